//! Log side-channel consumer
//!
//! Persists every record arriving on the log queue. This consumer never
//! writes side-channel records itself, so a failure here cannot loop back
//! into its own queue.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::debug;

use tasktrack_common::broker::QueueBinding;
use tasktrack_common::consumer::{AckPolicy, ConsumerSpec, Handled, HandlerError, MessageHandler};

use crate::db::{self, NewLogEntry};

pub fn log_spec(queue: &str) -> ConsumerSpec {
    ConsumerSpec::new(QueueBinding::plain(queue), AckPolicy::Always)
}

/// Writes incoming records to the logs table
pub struct LogSinkHandler {
    db: SqlitePool,
}

impl LogSinkHandler {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageHandler for LogSinkHandler {
    async fn handle(&self, _routing_key: &str, payload: &[u8]) -> Result<Handled, HandlerError> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| HandlerError::new(format!("Invalid JSON: {}", e), None))?;
        let entry: NewLogEntry = serde_json::from_value(value.clone())
            .map_err(|e| HandlerError::new(format!("Malformed log record: {}", e), Some(value.clone())))?;

        let stored = db::logs::insert(&self.db, &entry)
            .await
            .map_err(|e| HandlerError::new(e.to_string(), Some(value.clone())))?;

        debug!(id = stored.id, service = ?stored.service, "Log record stored");
        Ok(Handled::Stored(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use tasktrack_common::db::open_in_memory;

    const QUEUE: &str = "logs_queue";

    #[tokio::test]
    async fn test_records_are_stored_as_sent() {
        let db = open_in_memory().await.unwrap();
        init_schema(&db).await.unwrap();
        let handler = LogSinkHandler::new(db.clone());

        let body = br#"{"channel":"RabbitMQ","service":"notification-service","level":"error","eventType":"CONSUME","message":"Failed to process message from task.created","metadata":{"error":"boom"}}"#;
        handler.handle(QUEUE, body).await.unwrap();

        let all = db::logs::list_all(&db).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].level.as_deref(), Some("error"));
        assert_eq!(all[0].metadata.as_ref().unwrap()["error"], "boom");
    }

    #[tokio::test]
    async fn test_malformed_records_are_errors() {
        let db = open_in_memory().await.unwrap();
        init_schema(&db).await.unwrap();
        let handler = LogSinkHandler::new(db.clone());

        assert!(handler.handle(QUEUE, b"{oops").await.is_err());
        assert!(handler.handle(QUEUE, br#"{"level": 5}"#).await.is_err());
        assert!(db::logs::list_all(&db).await.unwrap().is_empty());
    }
}
