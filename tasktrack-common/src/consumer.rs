//! Generic queue consume loop
//!
//! Every consumer in the pipeline runs the same loop:
//! 1. **Unbound**: connect and declare the queue with its bindings
//! 2. **Bound**: start a broker consumer on the queue
//! 3. **Consuming**: process one delivery at a time, to completion, then ack
//!
//! Failing to bind is terminal: the failure is logged to tracing and the side
//! channel and the loop returns without retry. Per-message outcomes are
//! mirrored to the side channel before the delivery is settled.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::broker::{Broker, Delivery, QueueBinding};
use crate::logchannel::{LogEventType, LogLevel, LogMetadata, LogPublisher};

/// Successful handler outcome
#[derive(Debug, Clone, PartialEq)]
pub enum Handled {
    /// Message processed; the value is the parsed payload for the log record
    Stored(Value),
    /// Message discarded as invalid, not an error
    Dropped { reason: String, payload: Option<Value> },
}

/// Handler failure
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerError {
    pub message: String,
    /// Parsed payload, if parsing got that far
    pub payload: Option<Value>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            message: message.into(),
            payload,
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Processes one message body
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, routing_key: &str, payload: &[u8]) -> Result<Handled, HandlerError>;
}

/// How deliveries are settled after handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPolicy {
    /// Ack whatever happened (fail-open, errors are dropped)
    Always,
    /// Ack on success, nack with requeue on handler error
    RequeueOnError,
}

/// Lifecycle of a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Unbound,
    Bound,
    Consuming,
}

/// Why a consume loop returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerExit {
    /// Connect/declare/consume failed before any message was read
    BindFailed(String),
    /// The broker closed the delivery stream
    StreamEnded,
    /// The delivery stream yielded a transport error
    StreamError(String),
}

/// Static description of a consumer
#[derive(Debug, Clone)]
pub struct ConsumerSpec {
    pub binding: QueueBinding,
    pub consumer_tag: String,
    pub ack_policy: AckPolicy,
}

impl ConsumerSpec {
    pub fn new(binding: QueueBinding, ack_policy: AckPolicy) -> Self {
        let consumer_tag = format!("{}-{}", binding.queue, uuid::Uuid::new_v4().simple());
        Self {
            binding,
            consumer_tag,
            ack_policy,
        }
    }
}

/// One queue consumer bound to a handler
pub struct Consumer {
    broker: Arc<dyn Broker>,
    spec: ConsumerSpec,
    handler: Arc<dyn MessageHandler>,
    log: Option<LogPublisher>,
    state_tx: watch::Sender<ConsumerState>,
}

impl Consumer {
    /// `log = None` disables side-channel records (used by the log consumer
    /// itself so it does not feed its own queue)
    pub fn new(
        broker: Arc<dyn Broker>,
        spec: ConsumerSpec,
        handler: Arc<dyn MessageHandler>,
        log: Option<LogPublisher>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConsumerState::Unbound);
        Self {
            broker,
            spec,
            handler,
            log,
            state_tx,
        }
    }

    /// Observe lifecycle transitions
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state_tx.subscribe()
    }

    /// Run the loop on a background task
    pub fn spawn(self) -> (watch::Receiver<ConsumerState>, JoinHandle<ConsumerExit>) {
        let state = self.state();
        let handle = tokio::spawn(async move { self.run().await });
        (state, handle)
    }

    /// Run the loop until the stream ends or binding fails
    pub async fn run(self) -> ConsumerExit {
        let queue = self.spec.binding.queue.clone();

        let bound = async {
            self.broker.connect().await?;
            self.broker.declare(&self.spec.binding).await?;
            self.state_tx.send_replace(ConsumerState::Bound);
            self.broker.consume(&queue, &self.spec.consumer_tag).await
        }
        .await;

        let mut stream = match bound {
            Ok(stream) => stream,
            Err(e) => {
                error!(queue = %queue, error = %e, "Consumer failed to start");
                let mut metadata = LogMetadata::now().queue(&queue).error(&e);
                if let Some(exchange) = &self.spec.binding.exchange {
                    metadata = metadata.exchange(exchange);
                }
                self.side_log(LogLevel::Error, "Consumer failed to start".to_string(), metadata)
                    .await;
                return ConsumerExit::BindFailed(e.to_string());
            }
        };

        self.state_tx.send_replace(ConsumerState::Consuming);
        info!(queue = %queue, keys = ?self.spec.binding.routing_keys, "Waiting for messages");

        while let Some(next) = stream.next().await {
            match next {
                Ok(delivery) => self.process(delivery).await,
                Err(e) => {
                    error!(queue = %queue, error = %e, "Delivery stream failed");
                    return ConsumerExit::StreamError(e.to_string());
                }
            }
        }

        warn!(queue = %queue, "Delivery stream ended");
        ConsumerExit::StreamEnded
    }

    async fn process(&self, delivery: Delivery) {
        let start = Instant::now();
        let routing_key = delivery.routing_key.clone();
        let result = self.handler.handle(&routing_key, &delivery.payload).await;

        let mut metadata = LogMetadata::now()
            .queue(&self.spec.binding.queue)
            .routing_key(&routing_key)
            .duration(start.elapsed());
        if let Some(exchange) = &self.spec.binding.exchange {
            metadata = metadata.exchange(exchange);
        }

        let success = match result {
            Ok(Handled::Stored(payload)) => {
                info!(routing_key = %routing_key, "Message consumed");
                self.side_log(
                    LogLevel::Info,
                    format!("Consumed message from {}", routing_key),
                    metadata.payload(payload),
                )
                .await;
                true
            }
            Ok(Handled::Dropped { reason, payload }) => {
                warn!(routing_key = %routing_key, reason = %reason, ?payload, "Message dropped");
                true
            }
            Err(e) => {
                error!(routing_key = %routing_key, error = %e, "Failed to process message");
                let mut metadata = metadata
                    .error(&e.message)
                    .raw_content(delivery.payload_text().into_owned());
                if let Some(payload) = e.payload {
                    metadata = metadata.payload(payload);
                }
                self.side_log(
                    LogLevel::Error,
                    format!("Failed to process message from {}", routing_key),
                    metadata,
                )
                .await;
                false
            }
        };

        let settled = match (success, self.spec.ack_policy) {
            (true, _) | (false, AckPolicy::Always) => delivery.ack().await,
            (false, AckPolicy::RequeueOnError) => delivery.nack(true).await,
        };
        if let Err(e) = settled {
            warn!(routing_key = %routing_key, error = %e, "Failed to settle delivery");
        }
    }

    async fn side_log(&self, level: LogLevel, message: String, metadata: LogMetadata) {
        if let Some(log) = &self.log {
            log.log(level, LogEventType::Consume, message, metadata).await;
        }
    }
}
