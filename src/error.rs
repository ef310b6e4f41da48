//! # Pipeline Error Types
//!
//! Structured error families for the worker pipeline using thiserror,
//! one enum per concern: broker transport, wire protocol, recovery log,
//! and the worker runtime umbrella.

use thiserror::Error;

/// Errors raised by a message broker implementation
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Topology setup failed: {object}: {message}")]
    Topology { object: String, message: String },

    #[error("Publish failed: exchange {exchange}, key {routing_key}: {message}")]
    Publish {
        exchange: String,
        routing_key: String,
        message: String,
    },

    #[error("Consume failed: queue {queue}: {message}")]
    Consume { queue: String, message: String },

    #[error("Ack failed for delivery {delivery_tag}: {message}")]
    Ack { delivery_tag: u64, message: String },
}

impl BrokerError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a topology setup error for a queue, exchange, or binding
    pub fn topology(object: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Topology {
            object: object.into(),
            message: message.into(),
        }
    }

    /// Create a publish error
    pub fn publish(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Publish {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            message: message.into(),
        }
    }

    /// Create a consume error
    pub fn consume(queue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Consume {
            queue: queue.into(),
            message: message.into(),
        }
    }

    /// Create an ack error
    pub fn ack(delivery_tag: u64, message: impl Into<String>) -> Self {
        Self::Ack {
            delivery_tag,
            message: message.into(),
        }
    }
}

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors raised while encoding or decoding wire data
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed sequence string: {value}")]
    MalformedSequence { value: String },

    #[error("Malformed {kind} payload: {message}")]
    MalformedPayload { kind: String, message: String },

    #[error("Unknown message kind: {value}")]
    UnknownMessageKind { value: u8 },

    #[error("Unknown origin stage: {value}")]
    UnknownOriginStage { value: u8 },
}

impl ProtocolError {
    /// Create a malformed sequence error
    pub fn malformed_sequence(value: impl Into<String>) -> Self {
        Self::MalformedSequence {
            value: value.into(),
        }
    }

    /// Create a malformed payload error for a named message kind
    pub fn malformed_payload(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedPayload {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised by the recovery log
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Cannot open recovery log {path}: {message}")]
    Open { path: String, message: String },

    #[error("Append to recovery log failed: {message}")]
    Append { message: String },

    #[error("Malformed recovery record at line {line}: {message}")]
    MalformedRecord { line: u64, message: String },
}

impl RecoveryError {
    /// Create an open error
    pub fn open(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Open {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an append error
    pub fn append(message: impl Into<String>) -> Self {
        Self::Append {
            message: message.into(),
        }
    }

    /// Create a malformed record error
    pub fn malformed_record(line: u64, message: impl Into<String>) -> Self {
        Self::MalformedRecord {
            line,
            message: message.into(),
        }
    }
}

/// Result type for recovery operations
pub type RecoveryResult<T> = Result<T, RecoveryError>;

/// Umbrella error for worker startup and the runtime loop
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid topology: {message}")]
    InvalidTopology { message: String },
}

impl WorkerError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid topology error
    pub fn invalid_topology(message: impl Into<String>) -> Self {
        Self::InvalidTopology {
            message: message.into(),
        }
    }
}

/// Result type for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_error_display() {
        let err = BrokerError::publish("games", "games_q_0", "channel closed");
        assert_eq!(
            err.to_string(),
            "Publish failed: exchange games, key games_q_0: channel closed"
        );
    }

    #[test]
    fn test_broker_error_constructors() {
        assert!(matches!(
            BrokerError::connection("refused"),
            BrokerError::Connection { .. }
        ));
        assert!(matches!(
            BrokerError::topology("reviews_q", "declare failed"),
            BrokerError::Topology { .. }
        ));
        assert!(matches!(
            BrokerError::ack(42, "unknown delivery"),
            BrokerError::Ack {
                delivery_tag: 42,
                ..
            }
        ));
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::malformed_sequence("not-a-counter-x");
        assert_eq!(err.to_string(), "Malformed sequence string: not-a-counter-x");
        let err = ProtocolError::UnknownMessageKind { value: 250 };
        assert_eq!(err.to_string(), "Unknown message kind: 250");
    }

    #[test]
    fn test_worker_error_from_families() {
        let err: WorkerError = BrokerError::connection("refused").into();
        assert!(matches!(err, WorkerError::Broker(_)));
        let err: WorkerError = RecoveryError::append("disk full").into();
        assert!(matches!(err, WorkerError::Recovery(_)));
        let err: WorkerError = ProtocolError::UnknownOriginStage { value: 9 }.into();
        assert!(matches!(err, WorkerError::Protocol(_)));
    }
}
