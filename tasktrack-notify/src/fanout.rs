//! Notification fan-out consumer
//!
//! One queue bound to the whole domain-event catalog. Each message becomes an
//! unread notification row and, when it names a recipient, a realtime push to
//! that user's room. Every delivery is acknowledged, including failures.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::info;

use tasktrack_common::broker::QueueBinding;
use tasktrack_common::consumer::{AckPolicy, ConsumerSpec, Handled, HandlerError, MessageHandler};
use tasktrack_common::events::routing;

use crate::db::{self, NewNotification};
use crate::realtime::RealtimeHub;

/// Default fan-out queue
pub const NOTIFICATION_QUEUE: &str = "notification_queue";

/// Service recorded when the envelope does not name one
pub const UNKNOWN_SERVICE: &str = "unknown";

pub fn fanout_binding(exchange: &str, queue: &str) -> QueueBinding {
    QueueBinding::topic(exchange, queue, routing::NOTIFICATION_CATALOG)
}

pub fn fanout_spec(exchange: &str, queue: &str) -> ConsumerSpec {
    ConsumerSpec::new(fanout_binding(exchange, queue), AckPolicy::Always)
}

/// Envelope fields with their fallbacks applied
///
/// Blank strings and a zero user id count as missing. `type` falls back to
/// the routing key and `message` to the raw payload text.
pub fn notification_from_envelope(routing_key: &str, value: &Value, raw: &str) -> NewNotification {
    let text = |field: &str| {
        value
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let user_id = value.get("userId").and_then(|v| match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    });

    NewNotification {
        service: text("service").unwrap_or_else(|| UNKNOWN_SERVICE.to_string()),
        kind: text("type").unwrap_or_else(|| routing_key.to_string()),
        message: text("message").unwrap_or_else(|| raw.to_string()),
        user_id: user_id.filter(|id| *id != 0),
    }
}

/// Stores and pushes notifications
pub struct FanoutHandler {
    db: SqlitePool,
    hub: RealtimeHub,
}

impl FanoutHandler {
    pub fn new(db: SqlitePool, hub: RealtimeHub) -> Self {
        Self { db, hub }
    }
}

#[async_trait]
impl MessageHandler for FanoutHandler {
    async fn handle(&self, routing_key: &str, payload: &[u8]) -> Result<Handled, HandlerError> {
        let raw = String::from_utf8_lossy(payload);
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| HandlerError::new(format!("Invalid JSON: {}", e), None))?;

        let new = notification_from_envelope(routing_key, &value, &raw);
        let stored = db::notifications::insert(&self.db, &new)
            .await
            .map_err(|e| HandlerError::new(e.to_string(), Some(value.clone())))?;

        let delivered = self.hub.push(&stored);
        info!(
            routing_key,
            id = stored.id,
            user_id = ?stored.user_id,
            delivered,
            "Notification stored"
        );
        Ok(Handled::Stored(value))
    }
}
