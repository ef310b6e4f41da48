//! # EOF Visited Set
//!
//! Wire form of an end-of-stream marker: a length-prefixed list of the
//! worker ids that have already acted on it. An empty set is the terminal
//! form forwarded downstream once a peer group finishes.

use crate::error::{ProtocolError, ProtocolResult};

/// Terminal EOF payload: an empty visited set
pub const EMPTY_EOF: &[u8] = &[0];

/// Worker ids that have re-emitted one EOF, in visit order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitedSet {
    ids: Vec<u8>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a length-prefixed id list.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let (&count, rest) = bytes
            .split_first()
            .ok_or_else(|| ProtocolError::malformed_payload("Eof", "empty payload"))?;
        let count = usize::from(count);
        if rest.len() < count {
            return Err(ProtocolError::malformed_payload(
                "Eof",
                format!("visited set claims {} ids, found {}", count, rest.len()),
            ));
        }
        Ok(Self {
            ids: rest[..count].to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.ids.len());
        bytes.push(self.ids.len() as u8);
        bytes.extend_from_slice(&self.ids);
        bytes
    }

    pub fn contains(&self, id: u8) -> bool {
        self.ids.contains(&id)
    }

    /// Append an id unless it is already present.
    pub fn insert(&mut self, id: u8) {
        if !self.contains(id) {
            self.ids.push(id);
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
