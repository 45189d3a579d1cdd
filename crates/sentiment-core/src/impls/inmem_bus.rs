//! InMemoryBus - プロセス内の request/reply バス
//!
//! # 学習ポイント
//! - 1 アドレス = 1 本の mpsc チャネル。受信側を `Arc<tokio::sync::Mutex<_>>` で
//!   共有し、同じアドレスの複数 consumer が配送を奪い合う（competing consumers）
//! - 最後の consumer が unregister したらアドレスごと削除する。チャネルに残った
//!   `Delivery` は drop され、Drop 実装が internal fault を返す
//! - topic は `broadcast` チャネル（購読者がいなければ捨てる）

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::ports::{BusError, Consumer, Delivery, MessageBus};

const DEFAULT_CAPACITY: usize = 1024;
const TOPIC_CAPACITY: usize = 256;

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Delivery>>>;

struct Endpoint {
    tx: mpsc::Sender<Delivery>,
    rx: SharedReceiver,
    consumers: usize,
}

#[derive(Default)]
struct Registry {
    endpoints: HashMap<String, Endpoint>,
    topics: HashMap<String, broadcast::Sender<serde_json::Value>>,
}

/// In-process implementation of [`MessageBus`].
///
/// Cloning is cheap and every clone talks to the same bus.
#[derive(Clone)]
pub struct InMemoryBus {
    registry: Arc<Mutex<Registry>>,
    capacity: usize,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// `capacity` bounds the number of queued deliveries per address.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            capacity: capacity.max(1),
        }
    }

    /// Number of live consumers registered at `address`.
    pub fn consumer_count(&self, address: &str) -> usize {
        self.lock()
            .endpoints
            .get(address)
            .map_or(0, |e| e.consumers)
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // Registry updates are single statements; a poisoned guard is still consistent.
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sender(&self, address: &str) -> Option<mpsc::Sender<Delivery>> {
        self.lock().endpoints.get(address).map(|e| e.tx.clone())
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn consumer(&self, address: &str) -> Result<Box<dyn Consumer>, BusError> {
        let mut registry = self.lock();
        let capacity = self.capacity;
        let endpoint = registry
            .endpoints
            .entry(address.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(capacity);
                Endpoint {
                    tx,
                    rx: Arc::new(tokio::sync::Mutex::new(rx)),
                    consumers: 0,
                }
            });
        endpoint.consumers += 1;
        debug!(address, consumers = endpoint.consumers, "consumer registered");

        Ok(Box::new(InMemoryConsumer {
            address: address.to_string(),
            rx: endpoint.rx.clone(),
            registry: self.registry.clone(),
        }))
    }

    async fn request(
        &self,
        address: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, BusError> {
        let tx = self.sender(address).ok_or_else(|| BusError::NoHandlers {
            address: address.to_string(),
        })?;

        let (delivery, reply) = Delivery::new(address, body);
        debug!(address, request_id = %delivery.id(), "sending request");

        let exchange = async {
            tx.send(delivery).await.map_err(|_| BusError::NoHandlers {
                address: address.to_string(),
            })?;
            match reply.await {
                Ok(Ok(body)) => Ok(body),
                Ok(Err(failure)) => Err(BusError::Failure(failure)),
                Err(_) => Err(BusError::Closed(format!("reply channel for `{address}` closed"))),
            }
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| BusError::Timeout {
                address: address.to_string(),
                after: timeout,
            })?
    }

    fn publish(&self, topic: &str, body: serde_json::Value) {
        let tx = self.lock().topics.get(topic).cloned();
        if let Some(tx) = tx {
            // No subscribers is not an error for a broadcast.
            let _ = tx.send(body);
        }
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<serde_json::Value> {
        self.lock()
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }
}

struct InMemoryConsumer {
    address: String,
    rx: SharedReceiver,
    registry: Arc<Mutex<Registry>>,
}

#[async_trait]
impl Consumer for InMemoryConsumer {
    fn address(&self) -> &str {
        &self.address
    }

    async fn next(&mut self) -> Option<Delivery> {
        // recv is cancel-safe, so dropping this future inside select! loses nothing.
        self.rx.lock().await.recv().await
    }

    async fn unregister(self: Box<Self>) -> Result<(), BusError> {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let Some(endpoint) = registry.endpoints.get_mut(&self.address) else {
            return Err(BusError::Closed(format!(
                "address `{}` is not registered",
                self.address
            )));
        };

        endpoint.consumers = endpoint.consumers.saturating_sub(1);
        debug!(address = %self.address, consumers = endpoint.consumers, "consumer unregistered");
        if endpoint.consumers == 0 {
            registry.endpoints.remove(&self.address);
        }
        Ok(())
    }
}
