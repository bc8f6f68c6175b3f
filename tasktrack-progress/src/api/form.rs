//! Multipart form reading

use std::collections::HashMap;

use axum::extract::Multipart;

use crate::collaborators::Upload;
use crate::error::{ProgressError, ProgressResult};

/// Form field carrying the optional attachment
pub const FILE_FIELD: &str = "file";

/// Text fields plus the optional uploaded file
#[derive(Debug, Default)]
pub struct ProgressForm {
    fields: HashMap<String, String>,
    pub upload: Option<Upload>,
}

impl ProgressForm {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Field value with surrounding whitespace removed, `None` when blank
    pub fn text(&self, name: &str) -> Option<String> {
        self.field(name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Read every part of `multipart`
    ///
    /// The `file` part becomes the upload; an empty file part is ignored.
    pub async fn read(mut multipart: Multipart) -> ProgressResult<Self> {
        let mut form = ProgressForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ProgressError::validation(format!("Invalid form data: {}", e)))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            if name == FILE_FIELD {
                let file_name = field.file_name().unwrap_or("document").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ProgressError::validation(format!("Invalid file upload: {}", e)))?;
                if !bytes.is_empty() {
                    form.upload = Some(Upload {
                        file_name,
                        content_type,
                        bytes: bytes.to_vec(),
                    });
                }
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ProgressError::validation(format!("Invalid form field {}: {}", name, e)))?;
                form.fields.insert(name, value);
            }
        }

        Ok(form)
    }
}
