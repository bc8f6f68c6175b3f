//! AMQP broker connection manager
//!
//! Owns exactly one connection and one channel per process. The session is
//! created on the first `connect()` (or lazily by the first publish/consume),
//! using the injected backoff policy for retries. A session that dies later is
//! not healed automatically: the next operation on it fails and the caller
//! decides what to do (publishers log and swallow, consumers exit).

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Acknowledger, Broker, Delivery, DeliveryStream, QueueBinding};
use crate::backoff::{retry_with_backoff, BackoffPolicy};
use crate::{Error, Result};

/// Persistent delivery mode
const DELIVERY_MODE_PERSISTENT: u8 = 2;

struct Session {
    connection: Connection,
    channel: Channel,
}

/// Connection manager for an AMQP 0-9-1 broker (RabbitMQ)
pub struct AmqpBroker {
    url: String,
    policy: Arc<dyn BackoffPolicy>,
    topology: Vec<QueueBinding>,
    /// Guards the shared channel; held for the duration of each publish
    session: Mutex<Option<Session>>,
}

impl AmqpBroker {
    pub fn new(url: &str, policy: Arc<dyn BackoffPolicy>, topology: Vec<QueueBinding>) -> Self {
        Self {
            url: url.to_string(),
            policy,
            topology,
            session: Mutex::new(None),
        }
    }

    async fn open_session(&self) -> Result<Session> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        // One unacknowledged message per consumer: handlers run strictly in order
        channel.basic_qos(1, BasicQosOptions::default()).await?;

        for binding in &self.topology {
            declare_on(&channel, binding).await?;
        }

        info!("Connected to AMQP broker, {} queue(s) declared", self.topology.len());
        Ok(Session { connection, channel })
    }

    async fn ensure_session<'a>(&self, slot: &'a mut Option<Session>) -> Result<&'a Session> {
        if slot.is_none() {
            let session =
                retry_with_backoff("broker connect", self.policy.as_ref(), || self.open_session())
                    .await?;
            *slot = Some(session);
        }
        slot.as_ref()
            .ok_or_else(|| Error::Broker("AMQP session unavailable".to_string()))
    }

    async fn channel(&self) -> Result<Channel> {
        let mut guard = self.session.lock().await;
        let session = self.ensure_session(&mut guard).await?;
        Ok(session.channel.clone())
    }
}

async fn declare_on(channel: &Channel, binding: &QueueBinding) -> Result<()> {
    if let Some(exchange) = &binding.exchange {
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
    }

    channel
        .queue_declare(
            &binding.queue,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    if let Some(exchange) = &binding.exchange {
        for key in &binding.routing_keys {
            channel
                .queue_bind(
                    &binding.queue,
                    exchange,
                    key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
            debug!(queue = %binding.queue, exchange = %exchange, routing_key = %key, "Queue bound");
        }
    }
    Ok(())
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<()> {
        self.0.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.0
            .nack(BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn connect(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        self.ensure_session(&mut guard).await.map(|_| ())
    }

    async fn declare(&self, binding: &QueueBinding) -> Result<()> {
        let channel = self.channel().await?;
        declare_on(&channel, binding).await
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        let mut guard = self.session.lock().await;
        let session = self.ensure_session(&mut guard).await?;
        // The returned confirm is dropped: delivery is best-effort
        session
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(DELIVERY_MODE_PERSISTENT),
            )
            .await?;
        Ok(())
    }

    async fn send_to_queue(&self, queue: &str, payload: &[u8]) -> Result<()> {
        self.publish("", queue, payload).await
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let channel = self.channel().await?;
        let consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let stream = consumer.map(|item| match item {
            Ok(delivery) => Ok(Delivery::new(
                delivery.exchange.as_str().to_string(),
                delivery.routing_key.as_str().to_string(),
                delivery.data,
                delivery.redelivered,
                Box::new(AmqpAcker(delivery.acker)),
            )),
            Err(e) => {
                warn!("AMQP consumer stream error: {}", e);
                Err(Error::from(e))
            }
        });
        Ok(Box::pin(stream))
    }

    async fn is_connected(&self) -> bool {
        let guard = self.session.lock().await;
        guard
            .as_ref()
            .map(|s| s.connection.status().connected())
            .unwrap_or(false)
    }
}
