//! # In-Memory Broker
//!
//! In-process `MessageBroker` for tests and local development. Routes
//! through declared exchanges and bindings exactly like the real broker
//! (direct = exact key match, fanout = every bound queue) and keeps a
//! per-queue delivery history so tests can assert on what was published.
//!
//! One consumer per queue; `consume` hands out the queue's receiving end.
//!
//! ## Usage
//!
//! ```rust
//! use steamline::config::{ExchangeConfig, ExchangeType};
//! use steamline::messaging::broker::MessageBroker;
//! use steamline::messaging::header::{Header, MessageKind, OriginStage};
//! use steamline::messaging::in_memory::InMemoryBroker;
//!
//! # tokio_test::block_on(async {
//! let broker = InMemoryBroker::new();
//! broker
//!     .declare_exchange(&ExchangeConfig {
//!         name: "games".to_string(),
//!         kind: ExchangeType::Direct,
//!     })
//!     .await
//!     .unwrap();
//! broker.declare_queue("games_q").await.unwrap();
//! broker.bind_queue("games_q", "games", "games").await.unwrap();
//!
//! let header = Header::new(MessageKind::Game, "1-0", OriginStage::Game);
//! broker.publish("games", "games", &header, b"[]").await.unwrap();
//! assert_eq!(broker.delivered_count("games_q").await, 1);
//! # });
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::RwLock;

use crate::config::{ExchangeConfig, ExchangeType};
use crate::error::{BrokerError, BrokerResult};
use crate::messaging::broker::{Delivery, DeliveryStream, MessageBroker};
use crate::messaging::header::Header;

#[derive(Debug, Clone)]
struct Binding {
    exchange: String,
    routing_key: String,
    queue: String,
}

#[derive(Default)]
struct InMemoryState {
    exchanges: HashMap<String, ExchangeType>,
    bindings: Vec<Binding>,
    senders: HashMap<String, mpsc::UnboundedSender<Delivery>>,
    receivers: HashMap<String, mpsc::UnboundedReceiver<Delivery>>,
    history: HashMap<String, Vec<(Header, Vec<u8>)>>,
    acked: Vec<u64>,
}

/// In-process broker with AMQP-style routing
#[derive(Default)]
pub struct InMemoryBroker {
    state: RwLock<InMemoryState>,
    next_tag: AtomicU64,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message delivered to a queue so far, in delivery order.
    pub async fn delivered(&self, queue: &str) -> Vec<(Header, Vec<u8>)> {
        let state = self.state.read().await;
        state.history.get(queue).cloned().unwrap_or_default()
    }

    /// Number of messages delivered to a queue so far.
    pub async fn delivered_count(&self, queue: &str) -> usize {
        let state = self.state.read().await;
        state.history.get(queue).map_or(0, |h| h.len())
    }

    /// Delivery tags acked so far, in ack order.
    pub async fn acked(&self) -> Vec<u64> {
        self.state.read().await.acked.clone()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn declare_exchange(&self, exchange: &ExchangeConfig) -> BrokerResult<()> {
        let mut state = self.state.write().await;
        state
            .exchanges
            .entry(exchange.name.clone())
            .or_insert(exchange.kind);
        Ok(())
    }

    async fn declare_queue(&self, queue: &str) -> BrokerResult<()> {
        let mut state = self.state.write().await;
        if !state.senders.contains_key(queue) {
            let (tx, rx) = mpsc::unbounded_channel();
            state.senders.insert(queue.to_string(), tx);
            state.receivers.insert(queue.to_string(), rx);
            state.history.insert(queue.to_string(), Vec::new());
        }
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> BrokerResult<()> {
        let mut state = self.state.write().await;
        if !state.exchanges.contains_key(exchange) {
            return Err(BrokerError::topology(exchange, "unknown exchange"));
        }
        if !state.senders.contains_key(queue) {
            return Err(BrokerError::topology(queue, "unknown queue"));
        }
        let exists = state.bindings.iter().any(|b| {
            b.exchange == exchange && b.routing_key == routing_key && b.queue == queue
        });
        if !exists {
            state.bindings.push(Binding {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                queue: queue.to_string(),
            });
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        header: &Header,
        payload: &[u8],
    ) -> BrokerResult<()> {
        let mut state = self.state.write().await;
        let kind = *state
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::publish(exchange, routing_key, "unknown exchange"))?;

        let targets: Vec<String> = state
            .bindings
            .iter()
            .filter(|b| {
                b.exchange == exchange
                    && (kind == ExchangeType::Fanout || b.routing_key == routing_key)
            })
            .map(|b| b.queue.clone())
            .collect();

        // Unroutable messages are dropped, as an unbound AMQP publish would be.
        for queue in targets {
            let delivery = Delivery {
                delivery_tag: self.next_tag.fetch_add(1, Ordering::Relaxed) + 1,
                header: header.clone(),
                body: payload.to_vec(),
            };
            if let Some(history) = state.history.get_mut(&queue) {
                history.push((header.clone(), payload.to_vec()));
            }
            if let Some(sender) = state.senders.get(&queue) {
                // Receiver dropped means the consumer is gone; nothing to do.
                let _ = sender.send(delivery);
            }
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> BrokerResult<DeliveryStream> {
        let mut state = self.state.write().await;
        let receiver = state
            .receivers
            .remove(queue)
            .ok_or_else(|| BrokerError::consume(queue, "unknown queue or already consumed"))?;

        let stream = futures::stream::unfold(receiver, |mut rx| async move {
            rx.recv().await.map(|delivery| (Ok(delivery), rx))
        });
        Ok(Box::pin(stream))
    }

    async fn ack(&self, delivery_tag: u64) -> BrokerResult<()> {
        self.state.write().await.acked.push(delivery_tag);
        Ok(())
    }
}
