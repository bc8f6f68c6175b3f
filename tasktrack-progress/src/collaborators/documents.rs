//! Document storage for progress attachments

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use tasktrack_common::{time, Error, Result};

/// Uploaded file as received from the multipart form
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Where a stored document ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    /// Storage key, kept on the progress row for later deletion
    pub key: String,
    /// URL handed to clients
    pub public_url: String,
}

/// Blob storage for progress documents
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn put(&self, upload: &Upload) -> Result<StoredDocument>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Stores documents as files under a root directory
pub struct LocalDocumentStore {
    root: PathBuf,
    base_url: String,
}

impl LocalDocumentStore {
    pub fn new(root: impl Into<PathBuf>, base_url: &str) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(Error::InvalidInput(format!("Invalid document key: {}", key)));
        }
        Ok(self.root.join(key))
    }
}

/// File name with whitespace collapsed to `_` and path separators removed
fn safe_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);
    let cleaned: String = base
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| *c != '\0')
        .collect();
    match cleaned.trim_start_matches('.') {
        "" => "document".to_string(),
        name => name.to_string(),
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn put(&self, upload: &Upload) -> Result<StoredDocument> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let key = format!(
            "progress/{}_{}_{}",
            time::now().timestamp_millis(),
            &nonce[..8],
            safe_name(&upload.file_name)
        );
        let path = self.path_for(&key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &upload.bytes).await?;
        info!(key = %key, bytes = upload.bytes.len(), "Stored progress document");

        Ok(StoredDocument {
            public_url: format!("{}/{}", self.base_url, key),
            key,
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        tokio::fs::remove_file(&path).await?;
        info!(key = %key, "Deleted progress document");
        Ok(())
    }
}
