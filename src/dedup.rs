//! # Duplicate Filter
//!
//! Guards every stage against broker-level redelivery. Each producer stamps
//! a per-(routing key, client) counter into its headers; a consumer only has
//! to remember, per (producer worker, client session), the next counter it
//! expects. Anything below that was already accepted once. Gaps are accepted
//! and traced; the filter guards against redelivery, not loss.
//!
//! One watermark per producer is enough because the topology never binds one
//! worker to two destinations of the same producer; each producer reaches a
//! given consumer through exactly one routing key.
//!
//! Watermarks are kept for the life of the process, even after a client
//! session finishes. A stale redelivery for a finished client must still be
//! classified as duplicate; only the sequencer forgets finished clients.

use std::collections::HashMap;

use tracing::debug;

use crate::sequence::SequenceSource;

/// Next-expected counter per (client session, producer worker)
#[derive(Debug, Default)]
pub struct DuplicateFilter {
    // client session -> producer worker -> next expected counter
    next_expected: HashMap<String, HashMap<u8, u64>>,
}

impl DuplicateFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when this (producer, client, counter) was already accepted, with
    /// no state change; otherwise advances next-expected to `counter + 1`
    /// and returns false.
    pub fn is_duplicate(&mut self, source: SequenceSource, client_id: &str) -> bool {
        let next = self
            .next_expected
            .entry(client_id.to_string())
            .or_default()
            .entry(source.worker)
            .or_insert(0);

        if source.counter < *next {
            return true;
        }
        if source.counter > *next {
            debug!(
                producer = source.worker,
                client_id = %client_id,
                expected = *next,
                observed = source.counter,
                "sequence gap accepted"
            );
        }
        *next = source.counter + 1;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_second_delivery_is_duplicate() {
        let mut filter = DuplicateFilter::new();
        assert!(!filter.is_duplicate(SequenceSource::new(1, 0), "1-0"));
        assert!(filter.is_duplicate(SequenceSource::new(1, 0), "1-0"));
        assert!(!filter.is_duplicate(SequenceSource::new(1, 1), "1-0"));
        assert!(filter.is_duplicate(SequenceSource::new(1, 1), "1-0"));
    }

    #[test]
    fn test_gap_advances_past_missing_counters() {
        let mut filter = DuplicateFilter::new();
        assert!(!filter.is_duplicate(SequenceSource::new(1, 5), "1-0"));
        // everything at or below the gap is now a duplicate
        assert!(filter.is_duplicate(SequenceSource::new(1, 3), "1-0"));
        assert!(filter.is_duplicate(SequenceSource::new(1, 5), "1-0"));
        assert!(!filter.is_duplicate(SequenceSource::new(1, 6), "1-0"));
    }

    #[test]
    fn test_producers_and_clients_are_independent() {
        let mut filter = DuplicateFilter::new();
        assert!(!filter.is_duplicate(SequenceSource::new(1, 0), "1-0"));
        assert!(!filter.is_duplicate(SequenceSource::new(2, 0), "1-0"));
        assert!(!filter.is_duplicate(SequenceSource::new(1, 0), "1-1"));
    }

    proptest! {
        /// Replaying every accepted counter a second time classifies all of
        /// them as duplicates.
        #[test]
        fn prop_replay_of_accepted_counters_is_all_duplicates(
            counters in proptest::collection::vec(0u64..64, 1..40)
        ) {
            let mut filter = DuplicateFilter::new();
            let accepted: Vec<u64> = counters
                .iter()
                .copied()
                .filter(|&c| !filter.is_duplicate(SequenceSource::new(3, c), "1-0"))
                .collect();
            prop_assert!(!accepted.is_empty());
            for c in accepted {
                prop_assert!(filter.is_duplicate(SequenceSource::new(3, c), "1-0"));
            }
        }
    }
}
