//! Status mirror consumer for task-owning services
//!
//! The progress service republishes every status change as `task.updated` or
//! `group.task.updated`. Services that own the task rows bind a queue to those
//! keys and copy the status onto their own record through a
//! [`TaskStatusSink`]. Unknown task ids and undecodable bodies are dropped.
//! Only sink failures are returned as handler errors, which the consumer
//! requeues ([`AckPolicy::RequeueOnError`]).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::broker::QueueBinding;
use crate::consumer::{AckPolicy, ConsumerSpec, Handled, HandlerError, MessageHandler};
use crate::events::{routing, StatusChangedEvent};
use crate::Result;

/// Destination for mirrored task status
#[async_trait]
pub trait TaskStatusSink: Send + Sync {
    /// Store `status` on task `task_id`; `Ok(false)` when the task is unknown
    async fn apply_status(&self, task_id: i64, status: &str) -> Result<bool>;
}

/// Consumer spec for a mirror queue bound to `routing_keys`
pub fn mirror_spec(exchange: &str, queue: &str, routing_keys: &[&str]) -> ConsumerSpec {
    ConsumerSpec::new(
        QueueBinding::topic(exchange, queue, routing_keys),
        AckPolicy::RequeueOnError,
    )
}

/// Default spec: both status keys on the progress exchange
pub fn default_mirror_spec(queue: &str) -> ConsumerSpec {
    mirror_spec(routing::PROGRESS_EXCHANGE, queue, routing::STATUS_KEYS)
}

/// Applies status-changed events to a [`TaskStatusSink`]
pub struct StatusMirrorHandler {
    sink: Arc<dyn TaskStatusSink>,
}

impl StatusMirrorHandler {
    pub fn new(sink: Arc<dyn TaskStatusSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl MessageHandler for StatusMirrorHandler {
    async fn handle(&self, routing_key: &str, payload: &[u8]) -> std::result::Result<Handled, HandlerError> {
        let value: Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(e) => {
                return Ok(Handled::Dropped {
                    reason: format!("Invalid JSON on {}: {}", routing_key, e),
                    payload: None,
                })
            }
        };

        let event: StatusChangedEvent = match serde_json::from_value(value.clone()) {
            Ok(event) => event,
            Err(e) => {
                return Ok(Handled::Dropped {
                    reason: format!("Malformed status event: {}", e),
                    payload: Some(value),
                })
            }
        };

        match self.sink.apply_status(event.task_id, event.status.as_str()).await {
            Ok(true) => Ok(Handled::Stored(value)),
            Ok(false) => Ok(Handled::Dropped {
                reason: format!("Task {} not found", event.task_id),
                payload: Some(value),
            }),
            Err(e) => Err(HandlerError::new(e.to_string(), Some(value))),
        }
    }
}
