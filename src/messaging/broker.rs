//! # Broker Interface
//!
//! The pipeline's only transport seam. Implementations must provide
//! reliable at-least-once delivery with per-message header metadata;
//! everything stronger (exactly-once effect) is layered on top by the
//! worker runtime via sequencing, dedup, and the recovery log.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::config::ExchangeConfig;
use crate::error::BrokerResult;
use crate::messaging::header::Header;

/// One message handed to a consumer, header already decoded
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub header: Header,
    pub body: Vec<u8>,
}

/// Ordered stream of deliveries from a single queue
pub type DeliveryStream = Pin<Box<dyn Stream<Item = BrokerResult<Delivery>> + Send>>;

/// Publish/subscribe transport used by every stage
#[async_trait]
pub trait MessageBroker: Send + Sync + 'static {
    /// Declare an exchange; idempotent.
    async fn declare_exchange(&self, exchange: &ExchangeConfig) -> BrokerResult<()>;

    /// Declare a durable queue; idempotent.
    async fn declare_queue(&self, queue: &str) -> BrokerResult<()>;

    /// Bind a queue to an exchange under a routing key; idempotent.
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str)
        -> BrokerResult<()>;

    /// Publish one message with its header metadata.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        header: &Header,
        payload: &[u8],
    ) -> BrokerResult<()>;

    /// Open a delivery stream over a queue. Deliveries must be acked.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> BrokerResult<DeliveryStream>;

    /// Acknowledge a delivery by tag.
    async fn ack(&self, delivery_tag: u64) -> BrokerResult<()>;

    /// Release the underlying connection.
    async fn close(&self) -> BrokerResult<()> {
        Ok(())
    }
}
