//! Progress ingestion consumer
//!
//! Seeds one progress row (progress 0, Pending) per task-creation event.
//! Events missing `taskId`, `userId` or `taskType` are dropped. Everything is
//! acknowledged, including database failures: there is no redelivery and no
//! idempotency key, so a redelivered event produces a second seed row.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::info;

use tasktrack_common::broker::QueueBinding;
use tasktrack_common::consumer::{AckPolicy, ConsumerSpec, Handled, HandlerError, MessageHandler};
use tasktrack_common::events::{routing, TaskCreatedEvent, TaskType};

use crate::db::{self, NewProgress};

/// Default ingestion queue
pub const INGESTION_QUEUE: &str = "progress.task.created.queue";

/// Queue binding for the task-creation keys
pub fn ingestion_binding(exchange: &str, queue: &str) -> QueueBinding {
    QueueBinding::topic(exchange, queue, routing::TASK_CREATION_KEYS)
}

pub fn ingestion_spec(exchange: &str, queue: &str) -> ConsumerSpec {
    ConsumerSpec::new(ingestion_binding(exchange, queue), AckPolicy::Always)
}

/// Turns task-creation events into seed rows
pub struct IngestionHandler {
    db: SqlitePool,
}

impl IngestionHandler {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

/// Seed row for a valid event, `Ok(None)` when a required field is missing
pub fn seed_from_event(event: &TaskCreatedEvent) -> Result<Option<NewProgress>, String> {
    let (Some(task_id), Some(user_id), Some(raw_type)) =
        (event.task_id, event.user_id, event.task_type.as_deref())
    else {
        return Ok(None);
    };
    if task_id == 0 || user_id == 0 || raw_type.is_empty() {
        return Ok(None);
    }

    let task_type: TaskType = raw_type.parse().map_err(|e: tasktrack_common::Error| e.to_string())?;

    Ok(Some(NewProgress {
        group_id: match task_type {
            TaskType::Group => event.group_id,
            TaskType::Individual => None,
        },
        user_name: event.user_name.clone(),
        dosen_name: event.dosen_name.clone(),
        created_by: event.created_by,
        assigned_to: event.assigned_to.or(Some(user_id)),
        ..NewProgress::seed(task_id, task_type, user_id)
    }))
}

#[async_trait]
impl MessageHandler for IngestionHandler {
    async fn handle(&self, routing_key: &str, payload: &[u8]) -> Result<Handled, HandlerError> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| HandlerError::new(format!("Invalid JSON: {}", e), None))?;

        let event: TaskCreatedEvent = serde_json::from_value(value.clone())
            .map_err(|e| HandlerError::new(format!("Malformed task event: {}", e), Some(value.clone())))?;

        let seed = match seed_from_event(&event) {
            Ok(Some(seed)) => seed,
            Ok(None) => {
                return Ok(Handled::Dropped {
                    reason: "Incomplete task event: taskId, userId and taskType are required".to_string(),
                    payload: Some(value),
                })
            }
            Err(e) => return Err(HandlerError::new(e, Some(value))),
        };

        let record = db::progress::insert(&self.db, &seed)
            .await
            .map_err(|e| HandlerError::new(e.to_string(), Some(value.clone())))?;

        info!(
            routing_key,
            task_id = record.task_id,
            user_id = record.user_id,
            task_type = %record.task_type,
            "Seeded progress record"
        );
        Ok(Handled::Stored(value))
    }
}
