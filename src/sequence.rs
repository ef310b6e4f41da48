//! # Message Sequencing
//!
//! Per-destination monotonic counters namespaced by producer worker uuid.
//! A producer stamps `"<workerUuid>-<counter>"` into each outbound header;
//! consumers use the pair to detect broker redeliveries, and recovery feeds
//! logged destinations back in so counters resume exactly where they left
//! off. String forms split at the *last* separator, since routing keys may
//! themselves contain it.

use std::collections::HashMap;
use std::fmt;

use crate::error::{ProtocolError, ProtocolResult};

/// Separator between the key/uuid part and the counter
pub const SEPARATOR: char = '-';

/// Identity of one emitted message: producing worker plus counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SequenceSource {
    pub worker: u8,
    pub counter: u64,
}

impl SequenceSource {
    pub fn new(worker: u8, counter: u64) -> Self {
        Self { worker, counter }
    }

    /// Parse `"<workerUuid>-<counter>"`, splitting at the last separator.
    pub fn parse(value: &str) -> ProtocolResult<Self> {
        let (worker, counter) = value
            .rsplit_once(SEPARATOR)
            .ok_or_else(|| ProtocolError::malformed_sequence(value))?;
        let worker = worker
            .parse::<u8>()
            .map_err(|_| ProtocolError::malformed_sequence(value))?;
        let counter = counter
            .parse::<u64>()
            .map_err(|_| ProtocolError::malformed_sequence(value))?;
        Ok(Self { worker, counter })
    }
}

impl fmt::Display for SequenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.worker, SEPARATOR, self.counter)
    }
}

/// One emitted message as recorded for recovery: routing key plus counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceDestination {
    pub routing_key: String,
    pub counter: u64,
}

impl SequenceDestination {
    pub fn new(routing_key: impl Into<String>, counter: u64) -> Self {
        Self {
            routing_key: routing_key.into(),
            counter,
        }
    }

    /// Parse `"<routingKey>-<counter>"`, splitting at the last separator so
    /// keys like `results_q_2` survive the round trip.
    pub fn parse(value: &str) -> ProtocolResult<Self> {
        let (key, counter) = value
            .rsplit_once(SEPARATOR)
            .ok_or_else(|| ProtocolError::malformed_sequence(value))?;
        let counter = counter
            .parse::<u64>()
            .map_err(|_| ProtocolError::malformed_sequence(value))?;
        Ok(Self {
            routing_key: key.to_string(),
            counter,
        })
    }
}

impl fmt::Display for SequenceDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.routing_key, SEPARATOR, self.counter)
    }
}

/// Monotonic counter store, one counter per (routing key, client session)
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    // client session -> routing key -> next counter
    counters: HashMap<String, HashMap<String, u64>>,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next counter for the pair: 0 on first sight, then 1, 2, …
    pub fn next_id(&mut self, routing_key: &str, client_id: &str) -> u64 {
        let counter = self
            .counters
            .entry(client_id.to_string())
            .or_default()
            .entry(routing_key.to_string())
            .or_insert(0);
        let id = *counter;
        *counter += 1;
        id
    }

    /// Resume after replaying a logged destination: the next counter for
    /// (destination key, client) becomes `counter + 1`.
    pub fn recover_id(&mut self, destination: &SequenceDestination, client_id: &str) {
        self.counters
            .entry(client_id.to_string())
            .or_default()
            .insert(destination.routing_key.clone(), destination.counter + 1);
    }

    /// Drop every counter belonging to a finished client session.
    pub fn purge_client(&mut self, client_id: &str) {
        self.counters.remove(client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_id_starts_at_zero_and_increments() {
        let mut gen = SequenceGenerator::new();
        assert_eq!(gen.next_id("results_q", "1-0"), 0);
        assert_eq!(gen.next_id("results_q", "1-0"), 1);
        assert_eq!(gen.next_id("results_q", "1-0"), 2);
    }

    #[test]
    fn test_counters_are_independent_per_key_and_client() {
        let mut gen = SequenceGenerator::new();
        assert_eq!(gen.next_id("a", "1-0"), 0);
        assert_eq!(gen.next_id("b", "1-0"), 0);
        assert_eq!(gen.next_id("a", "1-1"), 0);
        assert_eq!(gen.next_id("a", "1-0"), 1);
    }

    #[test]
    fn test_recover_id_resumes_after_logged_counter() {
        let mut gen = SequenceGenerator::new();
        gen.recover_id(&SequenceDestination::new("results_q", 41), "1-0");
        assert_eq!(gen.next_id("results_q", "1-0"), 42);
        assert_eq!(gen.next_id("results_q", "1-0"), 43);
    }

    #[test]
    fn test_purge_client_resets_counters() {
        let mut gen = SequenceGenerator::new();
        gen.next_id("a", "1-0");
        gen.purge_client("1-0");
        assert_eq!(gen.next_id("a", "1-0"), 0);
    }

    #[test]
    fn test_source_round_trip() {
        let src = SequenceSource::new(7, 123);
        assert_eq!(src.to_string(), "7-123");
        assert_eq!(SequenceSource::parse("7-123").unwrap(), src);
    }

    #[test]
    fn test_destination_parse_splits_at_last_separator() {
        let dst = SequenceDestination::parse("results_q_2-7").unwrap();
        assert_eq!(dst.routing_key, "results_q_2");
        assert_eq!(dst.counter, 7);
        assert_eq!(dst.to_string(), "results_q_2-7");
    }

    #[test]
    fn test_malformed_sequences_are_rejected() {
        assert!(SequenceSource::parse("no_separator").is_err());
        assert!(SequenceSource::parse("x-1").is_err());
        assert!(SequenceSource::parse("1-x").is_err());
        assert!(SequenceDestination::parse("plain").is_err());
        assert!(SequenceDestination::parse("key-notanumber").is_err());
    }
}
