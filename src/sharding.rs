//! # Shard Routing
//!
//! Deterministic partitioning of routing keys across replicated consumers.
//! Every producer and consumer of a topology must agree on the slot for a
//! given key, so the hash is pinned: xxHash32, seed 0. String keys keep a
//! whole client session on one shard (preserving per-client order); i64 keys
//! keep one entity (one game) on one shard for joins and aggregation.

use std::hash::Hasher;

use twox_hash::XxHash32;

use crate::config::{instantiate, Destination};
use crate::error::{ProtocolError, ProtocolResult};
use crate::sequence::SEPARATOR;

/// xxHash32(seed 0) of a string key.
pub fn hash_string(key: &str) -> u32 {
    let mut hasher = XxHash32::with_seed(0);
    hasher.write(key.as_bytes());
    hasher.finish() as u32
}

/// xxHash32(seed 0) over all eight little-endian bytes of the id.
pub fn hash_i64(id: i64) -> u32 {
    let mut hasher = XxHash32::with_seed(0);
    hasher.write(&id.to_le_bytes());
    hasher.finish() as u32
}

/// Routing key for a client session: unchanged when the destination is not
/// sharded, otherwise the session's slot substituted into the template.
pub fn shard_string(destination: &Destination, session: &str) -> String {
    if destination.consumers == 0 {
        return destination.routing_key.clone();
    }
    let slot = hash_string(session) % u32::from(destination.consumers);
    instantiate(&destination.routing_key, slot as u8)
}

/// Routing key for an entity id: unchanged when the destination is not
/// sharded, otherwise the id's slot substituted into the template.
pub fn shard_i64(destination: &Destination, id: i64) -> String {
    if destination.consumers == 0 {
        return destination.routing_key.clone();
    }
    let slot = hash_i64(id) % u32::from(destination.consumers);
    instantiate(&destination.routing_key, slot as u8)
}

/// Routing key for aggregated results: the gateway id parsed from the client
/// session (`"<gatewayId>-<n>"`, split at the last separator) substituted
/// into the template, so results return to the gateway partition that issued
/// the session.
pub fn aggregator_output(destination: &Destination, client_id: &str) -> ProtocolResult<String> {
    let (gateway, _) = client_id
        .rsplit_once(SEPARATOR)
        .ok_or_else(|| ProtocolError::malformed_sequence(client_id))?;
    Ok(destination.routing_key.replacen("{}", gateway, 1))
}

/// Every instantiated routing key of a destination: the template itself when
/// unsharded, otherwise one key per shard slot.
pub fn expand(destination: &Destination) -> Vec<String> {
    if destination.consumers == 0 {
        return vec![destination.routing_key.clone()];
    }
    (0..destination.consumers)
        .map(|slot| instantiate(&destination.routing_key, slot))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sharded(consumers: u8) -> Destination {
        Destination {
            exchange: "reviews".to_string(),
            routing_key: "scored_{}".to_string(),
            consumers,
            origin: None,
        }
    }

    #[test]
    fn test_unsharded_key_passes_through() {
        let dest = sharded(0);
        assert_eq!(shard_string(&dest, "1-0"), "scored_{}");
        assert_eq!(shard_i64(&dest, 42), "scored_{}");
    }

    #[test]
    fn test_sharded_key_is_deterministic() {
        let dest = sharded(4);
        let a = shard_i64(&dest, 730);
        let b = shard_i64(&dest, 730);
        assert_eq!(a, b);
        assert!(a.starts_with("scored_"));
    }

    #[test]
    fn test_distribution_is_not_degenerate() {
        let dest = sharded(4);
        let mut seen = std::collections::HashSet::new();
        for id in 0..200i64 {
            seen.insert(shard_i64(&dest, id));
        }
        assert!(seen.len() > 1, "all ids landed on one shard");
        for key in &seen {
            let slot: u8 = key.strip_prefix("scored_").unwrap().parse().unwrap();
            assert!(slot < 4);
        }
    }

    #[test]
    fn test_aggregator_output_routes_to_gateway() {
        let dest = Destination {
            exchange: "results".to_string(),
            routing_key: "results_q_{}".to_string(),
            consumers: 0,
            origin: None,
        };
        assert_eq!(aggregator_output(&dest, "3-17").unwrap(), "results_q_3");
        assert!(aggregator_output(&dest, "noseparator").is_err());
    }

    #[test]
    fn test_expand_lists_every_slot() {
        assert_eq!(expand(&sharded(0)), vec!["scored_{}".to_string()]);
        assert_eq!(
            expand(&sharded(3)),
            vec!["scored_0", "scored_1", "scored_2"]
        );
    }

    proptest! {
        #[test]
        fn prop_string_sharding_is_pure_and_in_range(
            session in "[a-z0-9-]{1,20}",
            consumers in 1u8..16
        ) {
            let dest = sharded(consumers);
            let first = shard_string(&dest, &session);
            prop_assert_eq!(&first, &shard_string(&dest, &session));
            let slot: u8 = first.strip_prefix("scored_").unwrap().parse().unwrap();
            prop_assert!(slot < consumers);
        }
    }
}
