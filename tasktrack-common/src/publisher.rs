//! Event publisher
//!
//! Thin fire-and-forget wrapper over [`Broker::publish`]. Every attempt, good
//! or bad, is mirrored to the log side-channel with its duration. Errors never
//! reach the caller: a business operation that triggered a publish reports
//! success to its client even when the event was lost.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use crate::broker::Broker;
use crate::logchannel::{LogEventType, LogLevel, LogMetadata, LogPublisher};

/// What happened to a publish attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Sent,
    Failed(String),
}

impl PublishOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, PublishOutcome::Sent)
    }
}

/// Publishes JSON events to one topic exchange
#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn Broker>,
    exchange: String,
    /// Queue name reported in side-channel metadata
    queue_label: Option<String>,
    log: LogPublisher,
}

impl EventPublisher {
    pub fn new(broker: Arc<dyn Broker>, exchange: &str, log: LogPublisher) -> Self {
        Self {
            broker,
            exchange: exchange.to_string(),
            queue_label: None,
            log,
        }
    }

    /// Report `queue` in side-channel metadata for this publisher's events
    pub fn with_queue_label(mut self, queue: &str) -> Self {
        self.queue_label = Some(queue.to_string());
        self
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Publish `payload` under `routing_key`
    ///
    /// Never fails; the returned outcome is informational only.
    pub async fn publish<T: Serialize + ?Sized>(&self, routing_key: &str, payload: &T) -> PublishOutcome {
        let start = Instant::now();

        let (outcome, payload_value) = match serde_json::to_vec(payload) {
            Ok(body) => {
                let value = serde_json::from_slice::<Value>(&body).unwrap_or(Value::Null);
                match self.broker.publish(&self.exchange, routing_key, &body).await {
                    Ok(()) => (PublishOutcome::Sent, value),
                    Err(e) => (PublishOutcome::Failed(e.to_string()), value),
                }
            }
            Err(e) => (PublishOutcome::Failed(e.to_string()), Value::Null),
        };

        let mut metadata = LogMetadata::now()
            .exchange(&self.exchange)
            .routing_key(routing_key)
            .payload(payload_value)
            .duration(start.elapsed());
        if let Some(queue) = &self.queue_label {
            metadata = metadata.queue(queue);
        }

        match &outcome {
            PublishOutcome::Sent => {
                info!(exchange = %self.exchange, routing_key, "Event published");
                self.log
                    .log(
                        LogLevel::Info,
                        LogEventType::Publish,
                        format!("Published message to {}", routing_key),
                        metadata,
                    )
                    .await;
            }
            PublishOutcome::Failed(reason) => {
                error!(exchange = %self.exchange, routing_key, error = %reason, "Failed to publish event");
                self.log
                    .log(
                        LogLevel::Error,
                        LogEventType::Publish,
                        format!("Failed to publish message to {}", routing_key),
                        metadata.error(reason),
                    )
                    .await;
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MemoryBroker, QueueBinding};
    use crate::logchannel::LogRecord;
    use serde_json::json;

    async fn setup() -> (Arc<MemoryBroker>, EventPublisher) {
        let broker = Arc::new(MemoryBroker::with_topology(vec![
            QueueBinding::topic("notification_exchange", "notif", &["progress.*"]),
            QueueBinding::plain("logs_queue"),
        ]));
        broker.connect().await.unwrap();
        let log = LogPublisher::new(broker.clone(), "logs_queue", "progress-service");
        let publisher = EventPublisher::new(broker.clone(), "notification_exchange", log);
        (broker, publisher)
    }

    #[tokio::test]
    async fn test_publish_delivers_and_logs() {
        let (broker, publisher) = setup().await;

        let outcome = publisher
            .publish("progress.updated", &json!({"service": "progress-service", "userId": 12}))
            .await;
        assert!(outcome.is_sent());

        let (key, body) = broker.take("notif").await.unwrap();
        assert_eq!(key, "progress.updated");
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap()["userId"], 12);

        let (_, log) = broker.take("logs_queue").await.unwrap();
        let record: LogRecord = serde_json::from_slice(&log).unwrap();
        assert_eq!(record.level, LogLevel::Info);
        assert_eq!(record.event_type, LogEventType::Publish);
        assert_eq!(record.message, "Published message to progress.updated");
        assert_eq!(record.metadata.routing_key.as_deref(), Some("progress.updated"));
        assert!(record.metadata.duration.is_some());
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed_and_logged() {
        let (broker, publisher) = setup().await;

        // Publishing fails, but the log write must also fail quietly
        broker.set_offline(true);
        let outcome = publisher.publish("progress.updated", &json!({"x": 1})).await;
        assert!(matches!(outcome, PublishOutcome::Failed(_)));

        broker.set_offline(false);
        assert!(broker.take("notif").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_publish_writes_error_record() {
        let broker = Arc::new(MemoryBroker::with_topology(vec![QueueBinding::plain("logs_queue")]));
        broker.connect().await.unwrap();
        let log = LogPublisher::new(broker.clone(), "logs_queue", "svc");

        // A dedicated offline broker for the event path, a healthy one for logs
        let dead = Arc::new(MemoryBroker::new());
        dead.set_offline(true);
        let publisher = EventPublisher::new(dead, "progress.exchange", log).with_queue_label("progress.dispatcher.queue");

        let outcome = publisher.publish("task.updated", &json!({"taskId": 1})).await;
        assert!(!outcome.is_sent());

        let (_, body) = broker.take("logs_queue").await.unwrap();
        let record: LogRecord = serde_json::from_slice(&body).unwrap();
        assert_eq!(record.level, LogLevel::Error);
        assert_eq!(record.message, "Failed to publish message to task.updated");
        assert_eq!(record.metadata.queue.as_deref(), Some("progress.dispatcher.queue"));
        assert!(record.metadata.error.is_some());
    }
}
