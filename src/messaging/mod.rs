//! # Messaging
//!
//! The broker seam and the message metadata that crosses it: the
//! `MessageBroker` trait, header encoding, the RabbitMQ provider, and an
//! in-memory provider for tests and local development.

pub mod broker;
pub mod header;
pub mod in_memory;
pub mod rabbit;

pub use broker::{Delivery, DeliveryStream, MessageBroker};
pub use header::{Header, MessageKind, OriginStage};
pub use in_memory::InMemoryBroker;
pub use rabbit::RabbitBroker;
