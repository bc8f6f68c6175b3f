//! In-process topic broker
//!
//! Reproduces the parts of AMQP the pipeline relies on:
//! - topic exchanges with `*` / `#` bindings, one copy per bound queue
//! - the default exchange (`send_to_queue`)
//! - unroutable messages are silently dropped
//! - competing consumers on one queue each receive a disjoint subset
//! - `nack(requeue = true)` puts the message back at the tail of the queue
//!
//! Per-queue counters let tests observe acknowledgements.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use super::{topic_matches, Acknowledger, Broker, Delivery, DeliveryStream, QueueBinding};
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct StoredMessage {
    exchange: String,
    routing_key: String,
    payload: Vec<u8>,
    redelivered: bool,
}

/// Acknowledgement counters for one queue
#[derive(Debug, Default)]
pub struct QueueStats {
    pub published: AtomicU64,
    pub acked: AtomicU64,
    pub requeued: AtomicU64,
    pub rejected: AtomicU64,
}

impl QueueStats {
    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }

    pub fn requeued(&self) -> u64 {
        self.requeued.load(Ordering::SeqCst)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }
}

struct QueueState {
    tx: mpsc::UnboundedSender<StoredMessage>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<StoredMessage>>>,
    stats: Arc<QueueStats>,
}

impl QueueState {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            stats: Arc::new(QueueStats::default()),
        }
    }
}

#[derive(Default)]
struct State {
    exchanges: HashSet<String>,
    queues: HashMap<String, QueueState>,
    /// (exchange, pattern, queue)
    bindings: Vec<(String, String, String)>,
}

impl State {
    fn declare(&mut self, binding: &QueueBinding) {
        self.queues
            .entry(binding.queue.clone())
            .or_insert_with(QueueState::new);
        if let Some(exchange) = &binding.exchange {
            self.exchanges.insert(exchange.clone());
            for key in &binding.routing_keys {
                let entry = (exchange.clone(), key.clone(), binding.queue.clone());
                if !self.bindings.contains(&entry) {
                    self.bindings.push(entry);
                }
            }
        }
    }

    fn enqueue(&self, queue: &str, message: StoredMessage) {
        if let Some(state) = self.queues.get(queue) {
            state.stats.published.fetch_add(1, Ordering::SeqCst);
            // Receiver lives as long as the queue state
            let _ = state.tx.send(message);
        }
    }
}

/// In-memory topic broker
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<StdMutex<State>>,
    topology: Arc<Vec<QueueBinding>>,
    connected: Arc<AtomicBool>,
    offline: Arc<AtomicBool>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_topology(Vec::new())
    }

    /// Broker that declares `topology` on connect
    pub fn with_topology(topology: Vec<QueueBinding>) -> Self {
        Self {
            state: Arc::new(StdMutex::new(State::default())),
            topology: Arc::new(topology),
            connected: Arc::new(AtomicBool::new(false)),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulate the broker being unreachable (connect and publish fail)
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
        if offline {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    /// Counters for a declared queue
    pub fn stats(&self, queue: &str) -> Option<Arc<QueueStats>> {
        self.lock()
            .ok()
            .and_then(|s| s.queues.get(queue).map(|q| q.stats.clone()))
    }

    /// Pop one pending message from a queue without a consumer (test inspection)
    ///
    /// The message counts as acknowledged.
    pub async fn take(&self, queue: &str) -> Option<(String, Vec<u8>)> {
        let (rx, stats) = {
            let state = self.lock().ok()?;
            let q = state.queues.get(queue)?;
            (q.rx.clone(), q.stats.clone())
        };
        let mut rx = rx.lock().await;
        let message = rx.try_recv().ok()?;
        stats.acked.fetch_add(1, Ordering::SeqCst);
        Some((message.routing_key, message.payload))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("memory broker state poisoned".to_string()))
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(Error::Broker("memory broker is offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        self.ensure_online()?;
        if !self.connected.swap(true, Ordering::SeqCst) {
            let mut state = self.lock()?;
            for binding in self.topology.iter() {
                state.declare(binding);
            }
        }
        Ok(())
    }
}

struct MemoryAcker {
    queue_tx: mpsc::UnboundedSender<StoredMessage>,
    stats: Arc<QueueStats>,
    message: StoredMessage,
    settled: AtomicBool,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(Error::Broker("delivery already settled".to_string()));
        }
        self.stats.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(Error::Broker("delivery already settled".to_string()));
        }
        if requeue {
            self.stats.requeued.fetch_add(1, Ordering::SeqCst);
            let mut again = self.message.clone();
            again.redelivered = true;
            self.queue_tx
                .send(again)
                .map_err(|_| Error::Broker("queue closed".to_string()))?;
        } else {
            self.stats.rejected.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> Result<()> {
        self.ensure_connected()
    }

    async fn declare(&self, binding: &QueueBinding) -> Result<()> {
        self.ensure_connected()?;
        self.lock()?.declare(binding);
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        self.ensure_connected()?;
        let state = self.lock()?;
        let targets: HashSet<&str> = state
            .bindings
            .iter()
            .filter(|(ex, pattern, _)| ex == exchange && topic_matches(pattern, routing_key))
            .map(|(_, _, queue)| queue.as_str())
            .collect();

        if targets.is_empty() {
            debug!(exchange, routing_key, "Unroutable message dropped");
        }

        for queue in targets {
            state.enqueue(
                queue,
                StoredMessage {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    payload: payload.to_vec(),
                    redelivered: false,
                },
            );
        }
        Ok(())
    }

    async fn send_to_queue(&self, queue: &str, payload: &[u8]) -> Result<()> {
        self.ensure_connected()?;
        self.lock()?.enqueue(
            queue,
            StoredMessage {
                exchange: String::new(),
                routing_key: queue.to_string(),
                payload: payload.to_vec(),
                redelivered: false,
            },
        );
        Ok(())
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> Result<DeliveryStream> {
        self.ensure_connected()?;
        let (tx, rx, stats) = {
            let state = self.lock()?;
            let q = state
                .queues
                .get(queue)
                .ok_or_else(|| Error::Broker(format!("NOT_FOUND - no queue '{}'", queue)))?;
            (q.tx.clone(), q.rx.clone(), q.stats.clone())
        };

        let stream = async_stream::stream! {
            loop {
                let next = { rx.lock().await.recv().await };
                match next {
                    Some(message) => {
                        let acker = MemoryAcker {
                            queue_tx: tx.clone(),
                            stats: stats.clone(),
                            message: message.clone(),
                            settled: AtomicBool::new(false),
                        };
                        yield Ok(Delivery::new(
                            message.exchange,
                            message.routing_key,
                            message.payload,
                            message.redelivered,
                            Box::new(acker),
                        ));
                    }
                    None => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.offline.load(Ordering::SeqCst)
    }
}
