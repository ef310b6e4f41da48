//! # Payload Models
//!
//! The record types that travel between stages, serialized as JSON batches.
//! Every record type knows its `MessageKind` tag so the stage helpers can
//! stamp outgoing headers and label decode errors without repeating the
//! mapping. The EOF visited-set payload is the one non-JSON format and
//! lives with the worker runtime.

pub mod game;
pub mod review;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ProtocolError, ProtocolResult};
use crate::messaging::header::MessageKind;

pub use game::{GameName, GameRecord, PlatformTally, PlaytimeRelease};
pub use review::{ReviewRecord, ScoredReview, TextReview};

/// A wire record: serde value plus the message-kind tag of its batches
pub trait Payload: Serialize + DeserializeOwned {
    const KIND: MessageKind;

    fn encode_batch(batch: &[Self]) -> ProtocolResult<Vec<u8>> {
        serde_json::to_vec(batch).map_err(|e| {
            ProtocolError::malformed_payload(format!("{:?}", Self::KIND), e.to_string())
        })
    }

    fn decode_batch(bytes: &[u8]) -> ProtocolResult<Vec<Self>> {
        serde_json::from_slice(bytes).map_err(|e| {
            ProtocolError::malformed_payload(format!("{:?}", Self::KIND), e.to_string())
        })
    }
}

impl Payload for GameRecord {
    const KIND: MessageKind = MessageKind::Game;
}

impl Payload for ReviewRecord {
    const KIND: MessageKind = MessageKind::Review;
}

impl Payload for ScoredReview {
    const KIND: MessageKind = MessageKind::ScoredReview;
}

impl Payload for GameName {
    const KIND: MessageKind = MessageKind::GameName;
}

impl Payload for PlaytimeRelease {
    const KIND: MessageKind = MessageKind::PlaytimeRelease;
}

impl Payload for TextReview {
    const KIND: MessageKind = MessageKind::TextReview;
}

impl Payload for PlatformTally {
    const KIND: MessageKind = MessageKind::PlatformTally;
}
