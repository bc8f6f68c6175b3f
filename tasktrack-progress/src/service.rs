//! Progress service
//!
//! Orchestrates a mutation: load the target and latest rows, plan the
//! transition, store an optional document, append the new row, then fire the
//! status republish and the notification events. Only the row insert is
//! guaranteed when a call returns `Ok`; everything published afterwards is
//! best-effort.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use tasktrack_common::api::{Principal, Role};
use tasktrack_common::events::{routing, NotificationEnvelope, TaskType};
use tasktrack_common::publisher::EventPublisher;

use crate::collaborators::{DocumentStore, StoredDocument, Upload, UserDirectory};
use crate::db::{self, NewProgress, ProgressRecord, ProgressStats, RoleScope};
use crate::error::{ProgressError, ProgressResult};
use crate::machine::{self, Review, StudentUpdate, Transition};
use crate::republisher::StatusRepublisher;

/// Appends tried against a moving latest row before a conflict is reported
const APPEND_ATTEMPTS: usize = 3;

/// Name used when the user directory cannot resolve a student
pub const FALLBACK_STUDENT_NAME: &str = "Mahasiswa";
/// Name used when the user directory cannot resolve a lecturer
pub const FALLBACK_LECTURER_NAME: &str = "Dosen";

/// Result of a successful mutation
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub message: String,
    pub record: ProgressRecord,
    pub file_url: Option<String>,
}

impl MutationOutcome {
    /// `{success, message, data: <record + fileUrl>}`
    pub fn to_body(&self) -> Value {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Data<'a> {
            #[serde(flatten)]
            record: &'a ProgressRecord,
            file_url: &'a Option<String>,
        }

        serde_json::json!({
            "success": true,
            "message": self.message,
            "data": Data {
                record: &self.record,
                file_url: &self.file_url,
            },
        })
    }
}

/// Progress state machine plus its side effects
pub struct ProgressService {
    db: SqlitePool,
    notifications: EventPublisher,
    republisher: StatusRepublisher,
    users: Arc<dyn UserDirectory>,
    documents: Arc<dyn DocumentStore>,
    service_name: String,
}

impl ProgressService {
    pub fn new(
        db: SqlitePool,
        notifications: EventPublisher,
        republisher: StatusRepublisher,
        users: Arc<dyn UserDirectory>,
        documents: Arc<dyn DocumentStore>,
        service_name: &str,
    ) -> Self {
        Self {
            db,
            notifications,
            republisher,
            users,
            documents,
            service_name: service_name.to_string(),
        }
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    /// Target row by id plus the latest row of its `(task_id, user_id)` pair
    async fn load_current(&self, id: i64) -> ProgressResult<(ProgressRecord, ProgressRecord)> {
        let target = db::progress::find_by_id(&self.db, id)
            .await?
            .ok_or_else(|| ProgressError::NotFound("Progress not found".to_string()))?;
        let latest = db::progress::latest_for(&self.db, target.task_id, target.user_id)
            .await?
            .unwrap_or_else(|| target.clone());
        Ok((target, latest))
    }

    async fn store_upload(&self, upload: Option<&Upload>) -> ProgressResult<Option<StoredDocument>> {
        match upload {
            Some(upload) => Ok(Some(self.documents.put(upload).await?)),
            None => Ok(None),
        }
    }

    async fn name_of(&self, principal: &Principal, fallback: &str) -> String {
        self.users
            .display_name(principal.id, principal.token.as_deref())
            .await
            .unwrap_or_else(|| {
                warn!(user_id = principal.id, "Falling back to default display name");
                fallback.to_string()
            })
    }

    /// Append the row `plan` derives from the latest state, re-planning when
    /// another write lands first
    ///
    /// The stored document is removed again when the final plan is rejected.
    async fn append_planned<F>(
        &self,
        target: &ProgressRecord,
        mut latest: ProgressRecord,
        document: Option<&StoredDocument>,
        mut plan: F,
    ) -> ProgressResult<ProgressRecord>
    where
        F: FnMut(&ProgressRecord) -> ProgressResult<NewProgress>,
    {
        for _ in 0..APPEND_ATTEMPTS {
            let row = match plan(&latest) {
                Ok(row) => row,
                Err(e) => {
                    self.discard_document(document).await;
                    return Err(e);
                }
            };
            if let Some(record) = db::progress::append_if_latest(&self.db, &row, latest.id).await? {
                return Ok(record);
            }

            debug!(
                task_id = target.task_id,
                user_id = target.user_id,
                planned_on = latest.id,
                "Latest progress changed concurrently, re-planning"
            );
            latest = db::progress::latest_for(&self.db, target.task_id, target.user_id)
                .await?
                .ok_or_else(|| ProgressError::NotFound("Progress not found".to_string()))?;
        }

        self.discard_document(document).await;
        Err(ProgressError::Conflict(
            "Progress was changed by another request, please retry".to_string(),
        ))
    }

    async fn discard_document(&self, document: Option<&StoredDocument>) {
        if let Some(document) = document {
            if let Err(e) = self.documents.delete(&document.key).await {
                warn!(key = %document.key, error = %e, "Failed to remove unused document");
            }
        }
    }

    async fn notify(&self, routing_key: &str, user_id: i64, message: String) {
        let envelope = NotificationEnvelope::new(&self.service_name, routing_key, message, Some(user_id));
        self.notifications.publish(routing_key, &envelope).await;
    }

    /// Student reports progress on record `id`
    pub async fn update_by_student(
        &self,
        principal: &Principal,
        id: i64,
        update: StudentUpdate,
        upload: Option<Upload>,
    ) -> ProgressResult<MutationOutcome> {
        let (target, latest) = self.load_current(id).await?;
        // Reject before any lookup or upload happens
        machine::plan_student_update(principal, &latest, &update)?;

        let user_name = self.name_of(principal, FALLBACK_STUDENT_NAME).await;
        let document = self.store_upload(upload.as_ref()).await?;

        let record = self
            .append_planned(&target, latest, document.as_ref(), |current| {
                let Transition { progress, status, .. } =
                    machine::plan_student_update(principal, current, &update)?;
                Ok(NewProgress {
                    task_id: target.task_id,
                    task_type: target.task_type,
                    group_id: target.group_id,
                    user_id: target.user_id,
                    user_name: Some(user_name.clone()),
                    dosen_name: None,
                    created_by: current.created_by,
                    assigned_to: Some(target.user_id),
                    progress,
                    status,
                    description: update.description.clone(),
                    document: document.as_ref().map(|d| d.public_url.clone()),
                    storage_key: document.as_ref().map(|d| d.key.clone()),
                    dosen_comment: None,
                    grade: None,
                })
            })
            .await?;
        info!(
            id = record.id,
            task_id = record.task_id,
            user_id = record.user_id,
            progress = record.progress,
            status = %record.status,
            "Student progress recorded"
        );

        self.republisher.publish(&record).await;

        self.notify(
            routing::PROGRESS_UPDATED,
            record.user_id,
            format!(
                "Task progress updated, now {}%, status: {}",
                record.progress, record.status
            ),
        )
        .await;

        if let Some(author) = record.created_by.filter(|author| *author != record.user_id) {
            self.notify(
                routing::PROGRESS_UPDATED,
                author,
                format!(
                    "{} updated task progress to {}% (status: {}).",
                    user_name, record.progress, record.status
                ),
            )
            .await;
        }

        Ok(MutationOutcome {
            message: "Progress updated.".to_string(),
            file_url: document.map(|d| d.public_url),
            record,
        })
    }

    /// Lecturer reviews record `id`
    pub async fn review(
        &self,
        principal: &Principal,
        id: i64,
        review: Review,
        upload: Option<Upload>,
    ) -> ProgressResult<MutationOutcome> {
        if !principal.is(Role::Dosen) {
            return Err(ProgressError::Forbidden(
                "Only lecturers can review progress".to_string(),
            ));
        }
        let (target, latest) = self.load_current(id).await?;

        // Authorship is checked on the addressed row, state on the latest one
        if target.created_by != Some(principal.id) {
            return Err(ProgressError::Forbidden(
                "You are not the creator of this task".to_string(),
            ));
        }
        let with_author = |latest: &ProgressRecord| ProgressRecord {
            created_by: target.created_by,
            ..latest.clone()
        };
        machine::plan_review(principal, &with_author(&latest), &review)?;

        let dosen_name = self.name_of(principal, FALLBACK_LECTURER_NAME).await;
        let document = self.store_upload(upload.as_ref()).await?;

        let record = self
            .append_planned(&target, latest, document.as_ref(), |current| {
                let Transition {
                    progress,
                    status,
                    dosen_comment,
                    grade,
                } = machine::plan_review(principal, &with_author(current), &review)?;
                Ok(NewProgress {
                    task_id: target.task_id,
                    task_type: target.task_type,
                    group_id: target.group_id,
                    user_id: target.user_id,
                    user_name: None,
                    dosen_name: Some(dosen_name.clone()),
                    created_by: Some(principal.id),
                    assigned_to: Some(target.user_id),
                    progress,
                    status,
                    description: None,
                    document: document.as_ref().map(|d| d.public_url.clone()),
                    storage_key: document.as_ref().map(|d| d.key.clone()),
                    dosen_comment,
                    grade,
                })
            })
            .await?;
        info!(
            id = record.id,
            task_id = record.task_id,
            user_id = record.user_id,
            status = %record.status,
            "Lecturer review recorded"
        );

        self.republisher.publish(&record).await;

        let comment_suffix = record
            .dosen_comment
            .as_deref()
            .map(|c| format!(": \"{}\"", c))
            .unwrap_or_default();
        self.notify(
            routing::PROGRESS_REVIEWED,
            record.user_id,
            format!(
                "Lecturer {} reviewed your task (status: {}){}",
                dosen_name, record.status, comment_suffix
            ),
        )
        .await;
        self.notify(
            routing::PROGRESS_REVIEWED,
            principal.id,
            format!(
                "Your review of task #{} was sent to the student.",
                record.task_id
            ),
        )
        .await;

        Ok(MutationOutcome {
            message: format!("Progress saved as '{}'", record.status),
            file_url: document.map(|d| d.public_url),
            record,
        })
    }

    /// Role check shared by task reads and deletes
    async fn check_task_access(&self, principal: &Principal, task_id: i64, task_type: TaskType) -> ProgressResult<()> {
        match principal.role {
            Role::Mahasiswa => {
                if !db::progress::is_assigned(&self.db, task_id, task_type, principal.id).await? {
                    return Err(ProgressError::Forbidden("You are not assigned to this task".to_string()));
                }
            }
            Role::Dosen => {
                if !db::progress::is_creator(&self.db, task_id, task_type, principal.id).await? {
                    return Err(ProgressError::Forbidden("You are not the creator of this task".to_string()));
                }
            }
            Role::Admin => {}
        }
        Ok(())
    }

    /// Full history of a task, newest first
    pub async fn list_for_task(
        &self,
        principal: &Principal,
        task_id: i64,
        task_type: TaskType,
    ) -> ProgressResult<Vec<ProgressRecord>> {
        if !db::progress::task_exists(&self.db, task_id, task_type).await? {
            return Err(ProgressError::NotFound("Task not found".to_string()));
        }
        self.check_task_access(principal, task_id, task_type).await?;
        Ok(db::progress::list_by_task(&self.db, task_id, task_type).await?)
    }

    /// Delete a task's rows; returns the number removed
    ///
    /// Individual tasks lose every row. For group tasks a Mahasiswa removes
    /// only their own rows and a Dosen only the rows they created.
    pub async fn delete_for_task(
        &self,
        principal: &Principal,
        task_id: i64,
        task_type: TaskType,
    ) -> ProgressResult<u64> {
        if !db::progress::task_exists(&self.db, task_id, task_type).await? {
            return Err(ProgressError::NotFound("Progress not found".to_string()));
        }
        self.check_task_access(principal, task_id, task_type).await?;

        let scope = match (task_type, principal.role) {
            (TaskType::Group, Role::Mahasiswa) => RoleScope::AssignedTo(principal.id),
            (TaskType::Group, Role::Dosen) => RoleScope::CreatedBy(principal.id),
            _ => RoleScope::All,
        };

        for key in db::progress::storage_keys(&self.db, task_id, task_type, scope).await? {
            if let Err(e) = self.documents.delete(&key).await {
                warn!(key = %key, error = %e, "Failed to delete progress document");
            }
        }

        let deleted = db::progress::delete_by_task(&self.db, task_id, task_type, scope).await?;
        if deleted == 0 {
            return Err(ProgressError::NotFound("Progress not found".to_string()));
        }
        info!(task_id, task_type = %task_type, deleted, "Progress rows deleted");
        Ok(deleted)
    }

    pub async fn list_for_user(&self, user_id: i64) -> ProgressResult<Vec<ProgressRecord>> {
        Ok(db::progress::list_by_user(&self.db, user_id).await?)
    }

    pub async fn stats_for_user(&self, user_id: i64) -> ProgressResult<ProgressStats> {
        Ok(db::progress::stats_for_user(&self.db, user_id).await?)
    }
}
