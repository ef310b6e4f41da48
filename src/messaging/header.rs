//! # Message Header
//!
//! Broker metadata carried beside every payload: what the payload is, which
//! client session it belongs to, which logical query it serves, and the
//! producer's sequence id. Headers are owned values built fresh per emitted
//! message; a stage clones the incoming header and rewrites the fields it
//! changes.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};
use crate::sequence::SequenceSource;

/// AMQP header table key for the message kind
pub const KIND_KEY: &str = "x-message-kind";
/// AMQP header table key for the client session
pub const CLIENT_ID_KEY: &str = "x-client-id";
/// AMQP header table key for the origin stage
pub const ORIGIN_KEY: &str = "x-origin-id";
/// AMQP header table key for the sequence id
pub const SEQUENCE_KEY: &str = "x-sequence-id";

/// Payload type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Eof = 0,
    Game = 1,
    Review = 2,
    ScoredReview = 3,
    GameName = 4,
    PlatformTally = 5,
    PlaytimeRelease = 6,
    TextReview = 7,
}

impl MessageKind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> ProtocolResult<Self> {
        match value {
            0 => Ok(Self::Eof),
            1 => Ok(Self::Game),
            2 => Ok(Self::Review),
            3 => Ok(Self::ScoredReview),
            4 => Ok(Self::GameName),
            5 => Ok(Self::PlatformTally),
            6 => Ok(Self::PlaytimeRelease),
            7 => Ok(Self::TextReview),
            other => Err(ProtocolError::UnknownMessageKind { value: other }),
        }
    }
}

/// Which dataset or logical query a message belongs to. Needed because some
/// stages fan results for several queries into one shared queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum OriginStage {
    Review = 0,
    Game = 1,
    Query1 = 2,
    Query2 = 3,
    Query3 = 4,
    Query4 = 5,
    Query5 = 6,
}

impl OriginStage {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> ProtocolResult<Self> {
        match value {
            0 => Ok(Self::Review),
            1 => Ok(Self::Game),
            2 => Ok(Self::Query1),
            3 => Ok(Self::Query2),
            4 => Ok(Self::Query3),
            5 => Ok(Self::Query4),
            6 => Ok(Self::Query5),
            other => Err(ProtocolError::UnknownOriginStage { value: other }),
        }
    }
}

/// Metadata of one message, carried in the broker header table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub kind: MessageKind,
    pub client_id: String,
    pub origin: OriginStage,
    pub sequence: SequenceSource,
}

impl Header {
    pub fn new(kind: MessageKind, client_id: impl Into<String>, origin: OriginStage) -> Self {
        Self {
            kind,
            client_id: client_id.into(),
            origin,
            sequence: SequenceSource::default(),
        }
    }

    /// Same header with a different payload kind.
    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Same header with a different origin stage.
    pub fn with_origin(mut self, origin: OriginStage) -> Self {
        self.origin = origin;
        self
    }

    /// Same header stamped with a fresh sequence id.
    pub fn with_sequence(mut self, sequence: SequenceSource) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn is_eof(&self) -> bool {
        self.kind == MessageKind::Eof
    }
}
