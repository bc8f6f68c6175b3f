//! Message broker abstraction
//!
//! Every publisher and consumer in a service process shares one [`Broker`]
//! handle created by the composition root (`main.rs`) and passed down as
//! `Arc<dyn Broker>`. Two implementations exist:
//! - [`AmqpBroker`]: one AMQP connection + one channel, established lazily
//!   with retry, all publishes serialized through a mutex
//! - [`MemoryBroker`]: in-process topic exchange with the same routing and
//!   acknowledgement semantics, used by tests and single-process runs

mod amqp;
mod memory;
mod topic;

pub use amqp::AmqpBroker;
pub use memory::{MemoryBroker, QueueStats};
pub use topic::topic_matches;

use std::borrow::Cow;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::backoff::BackoffPolicy;
use crate::{Error, Result};

/// Queue declaration plus its bindings
///
/// `exchange = None` declares a plain queue reachable only through the
/// default exchange (used by the log side-channel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub exchange: Option<String>,
    pub queue: String,
    pub routing_keys: Vec<String>,
}

impl QueueBinding {
    /// Queue bound to a topic exchange on the given patterns
    pub fn topic(exchange: &str, queue: &str, routing_keys: &[&str]) -> Self {
        Self {
            exchange: Some(exchange.to_string()),
            queue: queue.to_string(),
            routing_keys: routing_keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Queue without exchange bindings
    pub fn plain(queue: &str) -> Self {
        Self {
            exchange: None,
            queue: queue.to_string(),
            routing_keys: Vec::new(),
        }
    }
}

/// Acknowledges a single delivery back to the broker
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;
    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// One message received from a queue
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        exchange: String,
        routing_key: String,
        payload: Vec<u8>,
        redelivered: bool,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            exchange,
            routing_key,
            payload,
            redelivered,
            acker,
        }
    }

    /// Payload as text, lossy for invalid UTF-8
    pub fn payload_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn nack(&self, requeue: bool) -> Result<()> {
        self.acker.nack(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("bytes", &self.payload.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

/// Stream of deliveries for one consumer
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// Topic-routed message broker shared by every publisher/consumer in a process
#[async_trait]
pub trait Broker: Send + Sync {
    /// Establish the connection (with retry) and declare the startup topology
    ///
    /// Calling this again after success is a no-op.
    async fn connect(&self) -> Result<()>;

    /// Declare a queue and its bindings on an established connection
    async fn declare(&self, binding: &QueueBinding) -> Result<()>;

    /// Publish to a topic exchange (fire-and-forget, no publisher confirms)
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()>;

    /// Publish straight to a queue through the default exchange
    async fn send_to_queue(&self, queue: &str, payload: &[u8]) -> Result<()>;

    /// Start consuming a queue (one message in flight at a time)
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;

    /// Whether the underlying connection currently looks usable
    async fn is_connected(&self) -> bool;
}

/// Which broker implementation a binary should use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerKind {
    Amqp,
    Memory,
}

impl FromStr for BrokerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "amqp" | "rabbitmq" => Ok(BrokerKind::Amqp),
            "memory" | "in-memory" => Ok(BrokerKind::Memory),
            other => Err(Error::Config(format!("Unknown broker kind: {}", other))),
        }
    }
}

/// Build the process-wide broker handle
pub fn build_broker(
    kind: BrokerKind,
    url: &str,
    policy: Arc<dyn BackoffPolicy>,
    topology: Vec<QueueBinding>,
) -> Arc<dyn Broker> {
    match kind {
        BrokerKind::Amqp => Arc::new(AmqpBroker::new(url, policy, topology)),
        BrokerKind::Memory => Arc::new(MemoryBroker::with_topology(topology)),
    }
}
