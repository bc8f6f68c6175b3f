//! Log side-channel publisher
//!
//! Every publish and consume in the pipeline is mirrored as a [`LogRecord`]
//! onto a plain queue (default `logs_queue`) that the logging service
//! persists. The side-channel is purely observational: failing to write to it
//! is reported through `tracing` and never affects the caller.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::broker::{Broker, QueueBinding};
use crate::time;

/// Transport label stamped on every record
pub const CHANNEL_RABBITMQ: &str = "RabbitMQ";

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Pipeline event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogEventType {
    Publish,
    Consume,
}

impl LogEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogEventType::Publish => "PUBLISH",
            LogEventType::Consume => "CONSUME",
        }
    }
}

/// Structured metadata carried by a log record
///
/// Absent fields are omitted from the wire form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    /// Milliseconds spent on the operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    pub timestamp: String,
}

impl LogMetadata {
    pub fn now() -> Self {
        Self {
            timestamp: time::to_db(&time::now()),
            ..Self::default()
        }
    }

    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange = Some(exchange.to_string());
        self
    }

    pub fn queue(mut self, queue: &str) -> Self {
        self.queue = Some(queue.to_string());
        self
    }

    pub fn routing_key(mut self, routing_key: &str) -> Self {
        self.routing_key = Some(routing_key.to_string());
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn raw_content(mut self, raw: impl Into<String>) -> Self {
        self.raw_content = Some(raw.into());
        self
    }

    pub fn duration(mut self, elapsed: Duration) -> Self {
        self.duration = Some(elapsed.as_millis() as u64);
        self
    }
}

/// One side-channel log record as it travels over the log queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub channel: String,
    pub service: String,
    pub level: LogLevel,
    pub event_type: LogEventType,
    pub message: String,
    pub metadata: LogMetadata,
}

/// Writes log records to the side-channel queue
///
/// A disabled publisher (no broker) drops every record after a debug trace;
/// services that failed to reach the log queue at startup keep running in
/// that mode.
#[derive(Clone)]
pub struct LogPublisher {
    broker: Option<Arc<dyn Broker>>,
    queue: String,
    service: String,
}

impl LogPublisher {
    pub fn new(broker: Arc<dyn Broker>, queue: &str, service: &str) -> Self {
        Self {
            broker: Some(broker),
            queue: queue.to_string(),
            service: service.to_string(),
        }
    }

    /// Publisher that silently drops every record
    pub fn disabled(service: &str) -> Self {
        Self {
            broker: None,
            queue: String::new(),
            service: service.to_string(),
        }
    }

    /// Connect and declare the log queue, degrading to [`LogPublisher::disabled`]
    /// when the broker cannot be reached
    pub async fn connect(broker: Arc<dyn Broker>, queue: &str, service: &str) -> Self {
        let declared = match broker.connect().await {
            Ok(()) => broker.declare(&QueueBinding::plain(queue)).await,
            Err(e) => Err(e),
        };
        match declared {
            Ok(()) => Self::new(broker, queue, service),
            Err(e) => {
                warn!(queue, error = %e, "Log side-channel unavailable, continuing without it");
                Self::disabled(service)
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.broker.is_some()
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Build a record stamped with this publisher's service name
    pub fn record(
        &self,
        level: LogLevel,
        event_type: LogEventType,
        message: impl Into<String>,
        metadata: LogMetadata,
    ) -> LogRecord {
        LogRecord {
            channel: CHANNEL_RABBITMQ.to_string(),
            service: self.service.clone(),
            level,
            event_type,
            message: message.into(),
            metadata,
        }
    }

    /// Send one record; failures are traced and swallowed
    pub async fn write(&self, record: &LogRecord) {
        let Some(broker) = &self.broker else {
            debug!(message = %record.message, "Log side-channel disabled, record dropped");
            return;
        };

        let body = match serde_json::to_vec(record) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Failed to encode log record");
                return;
            }
        };

        if let Err(e) = broker.send_to_queue(&self.queue, &body).await {
            warn!(queue = %self.queue, error = %e, "Failed to write log record");
        }
    }

    pub async fn log(
        &self,
        level: LogLevel,
        event_type: LogEventType,
        message: impl Into<String>,
        metadata: LogMetadata,
    ) {
        let record = self.record(level, event_type, message, metadata);
        self.write(&record).await;
    }
}
