//! # Processor Contract
//!
//! Seam between the worker runtime and the per-query state machines. The
//! runtime hands every accepted delivery to [`Processor::process`] together
//! with a [`StageContext`] that carries the stage's topology and its
//! sequenced publish helpers. Recovery replay drives the exact same entry
//! point with [`ProcessMode::Replay`], under which a processor must update
//! its state but publish nothing.

use async_trait::async_trait;
use tracing::{error, warn};

use crate::config::Destination;
use crate::error::WorkerResult;
use crate::messaging::broker::MessageBroker;
use crate::messaging::header::{Header, MessageKind};
use crate::sequence::{SequenceDestination, SequenceGenerator, SequenceSource};
use crate::worker::eof::{VisitedSet, EMPTY_EOF};

/// Whether a delivery is live broker traffic or a recovery-log replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMode {
    Live,
    Replay,
}

impl ProcessMode {
    pub fn is_replay(self) -> bool {
        matches!(self, Self::Replay)
    }

    pub fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }
}

/// One instantiated input binding of the running worker
#[derive(Debug, Clone)]
pub struct InputRoute {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

/// Per-query processing state machine
#[async_trait]
pub trait Processor: Send + 'static {
    /// One-time hook after topology declaration, before recovery replay.
    fn init(&mut self) -> WorkerResult<()> {
        Ok(())
    }

    /// Handle one accepted delivery. Returns the sequence destination of
    /// every message published while handling it, for the recovery log.
    /// Failures on the data path are logged inside, never propagated.
    async fn process(
        &mut self,
        ctx: &mut StageContext<'_>,
        header: &Header,
        body: &[u8],
        mode: ProcessMode,
    ) -> Vec<SequenceDestination>;
}

impl std::fmt::Debug for dyn Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Processor")
    }
}

/// Topology and publish capabilities handed to a processor per delivery
pub struct StageContext<'a> {
    pub(crate) broker: &'a dyn MessageBroker,
    pub(crate) sequencer: &'a mut SequenceGenerator,
    /// Output destinations in config order.
    pub outputs: &'a [Destination],
    /// Every (exchange, instantiated key) an EOF broadcast must reach.
    pub(crate) eof_destinations: &'a [(String, String)],
    /// The input binding the current delivery arrived on.
    pub(crate) input: &'a InputRoute,
    /// Shard index of this worker within its stage group.
    pub id: u8,
    /// Producer uuid stamped into outbound sequence ids.
    pub uuid: u8,
    /// Replica count of the stage group, for visited-set termination.
    pub peers: u8,
    /// Upstream EOF count for counted fan-in; 0 selects visited-set.
    pub expected_eofs: u8,
    pub(crate) finished: Option<String>,
}

impl<'a> StageContext<'a> {
    /// Publish one payload, stamping a fresh sequence id for the routing
    /// key and the header's client. The consumed counter is returned as a
    /// recovery destination even when the publish itself fails; replay
    /// relies on the log to keep counters aligned with what was attempted.
    pub async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        header: Header,
        payload: &[u8],
    ) -> SequenceDestination {
        let counter = self.sequencer.next_id(routing_key, &header.client_id);
        let header = header.with_sequence(SequenceSource::new(self.uuid, counter));
        if let Err(e) = self
            .broker
            .publish(exchange, routing_key, &header, payload)
            .await
        {
            error!(error = %e, exchange, routing_key, "publish failed");
        }
        SequenceDestination::new(routing_key, counter)
    }

    /// Publish one terminal EOF (empty visited set) to a single destination.
    pub async fn publish_eof(
        &mut self,
        exchange: &str,
        routing_key: &str,
        header: &Header,
    ) -> SequenceDestination {
        let eof = header.clone().with_kind(MessageKind::Eof);
        self.publish(exchange, routing_key, eof, EMPTY_EOF).await
    }

    /// Publish one terminal EOF to every instantiated output key.
    pub async fn broadcast_eof(&mut self, header: &Header) -> Vec<SequenceDestination> {
        let destinations = self.eof_destinations;
        let mut emitted = Vec::with_capacity(destinations.len());
        for (exchange, routing_key) in destinations {
            emitted.push(self.publish_eof(exchange, routing_key, header).await);
        }
        emitted
    }

    /// Visited-set termination step for one incoming EOF: add this worker's
    /// id, then either relay the set to the group's own input (while peers
    /// remain unvisited) or broadcast the terminal EOF to every output. A
    /// worker already in the set relays the payload unchanged.
    pub async fn handle_eof(&mut self, header: &Header, body: &[u8]) -> Vec<SequenceDestination> {
        let mut visited = match VisitedSet::decode(body) {
            Ok(visited) => visited,
            Err(e) => {
                warn!(error = %e, client_id = %header.client_id, "dropping malformed EOF");
                return Vec::new();
            }
        };
        visited.insert(self.id);

        if visited.len() < usize::from(self.peers) {
            let input = self.input;
            let eof = header.clone().with_kind(MessageKind::Eof);
            let destination = self
                .publish(&input.exchange, &input.routing_key, eof, &visited.encode())
                .await;
            vec![destination]
        } else {
            self.broadcast_eof(header).await
        }
    }

    /// Whether this worker's id is already in an EOF's visited set. A
    /// malformed payload counts as visited so it is never flushed on.
    pub fn already_visited(&self, body: &[u8]) -> bool {
        match VisitedSet::decode(body) {
            Ok(visited) => visited.contains(self.id),
            Err(_) => true,
        }
    }

    /// Whether adding this worker's id to the EOF's visited set completes
    /// the peer group, making this the terminal hop.
    pub fn completes_group(&self, body: &[u8]) -> bool {
        match VisitedSet::decode(body) {
            Ok(mut visited) => {
                visited.insert(self.id);
                visited.len() >= usize::from(self.peers)
            }
            Err(_) => false,
        }
    }

    /// Mark the client session as fully flushed; the runtime then drops its
    /// sequencing and dedup watermarks.
    pub fn finish_client(&mut self, client_id: &str) {
        self.finished = Some(client_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExchangeConfig, ExchangeType};
    use crate::messaging::header::OriginStage;
    use crate::messaging::in_memory::InMemoryBroker;

    fn output_dest() -> Destination {
        Destination {
            exchange: "out".to_string(),
            routing_key: "scored_{}".to_string(),
            consumers: 2,
            origin: None,
        }
    }

    fn input_route() -> InputRoute {
        InputRoute {
            exchange: "games".to_string(),
            queue: "games_q".to_string(),
            routing_key: "games".to_string(),
        }
    }

    async fn broker_with_topology() -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        for name in ["games", "out"] {
            broker
                .declare_exchange(&ExchangeConfig {
                    name: name.to_string(),
                    kind: ExchangeType::Direct,
                })
                .await
                .unwrap();
        }
        broker.declare_queue("games_q").await.unwrap();
        broker.bind_queue("games_q", "games", "games").await.unwrap();
        for queue in ["scored_0", "scored_1"] {
            broker.declare_queue(queue).await.unwrap();
            broker.bind_queue(queue, "out", queue).await.unwrap();
        }
        broker
    }

    fn header() -> Header {
        Header::new(MessageKind::ScoredReview, "1-0", OriginStage::Query3)
    }

    macro_rules! ctx {
        ($broker:expr, $seq:expr, $outputs:expr, $eofs:expr, $input:expr, $peers:expr) => {
            StageContext {
                broker: $broker,
                sequencer: $seq,
                outputs: $outputs,
                eof_destinations: $eofs,
                input: $input,
                id: 0,
                uuid: 4,
                peers: $peers,
                expected_eofs: 0,
                finished: None,
            }
        };
    }

    #[tokio::test]
    async fn test_publish_stamps_monotonic_sequence_ids() {
        let broker = broker_with_topology().await;
        let mut sequencer = SequenceGenerator::new();
        let outputs = [output_dest()];
        let eofs: [(String, String); 0] = [];
        let input = input_route();
        let mut ctx = ctx!(&broker, &mut sequencer, &outputs, &eofs, &input, 1);

        let first = ctx.publish("out", "scored_0", header(), b"[1]").await;
        let second = ctx.publish("out", "scored_0", header(), b"[2]").await;
        assert_eq!(first.counter, 0);
        assert_eq!(second.counter, 1);

        let delivered = broker.delivered("scored_0").await;
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].0.sequence, SequenceSource::new(4, 0));
        assert_eq!(delivered[1].0.sequence, SequenceSource::new(4, 1));
    }

    #[tokio::test]
    async fn test_handle_eof_relays_augmented_set_while_peers_remain() {
        let broker = broker_with_topology().await;
        let mut sequencer = SequenceGenerator::new();
        let outputs = [output_dest()];
        let eofs = [
            ("out".to_string(), "scored_0".to_string()),
            ("out".to_string(), "scored_1".to_string()),
        ];
        let input = input_route();
        let mut ctx = ctx!(&broker, &mut sequencer, &outputs, &eofs, &input, 3);

        let emitted = ctx.handle_eof(&header(), EMPTY_EOF).await;
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].routing_key, "games");

        let relayed = broker.delivered("games_q").await;
        assert_eq!(relayed.len(), 1);
        assert_eq!(relayed[0].0.kind, MessageKind::Eof);
        assert_eq!(relayed[0].1, vec![1, 0]);
        assert_eq!(broker.delivered_count("scored_0").await, 0);
    }

    #[tokio::test]
    async fn test_handle_eof_relays_unchanged_when_already_visited() {
        let broker = broker_with_topology().await;
        let mut sequencer = SequenceGenerator::new();
        let outputs = [output_dest()];
        let eofs = [("out".to_string(), "scored_0".to_string())];
        let input = input_route();
        let mut ctx = ctx!(&broker, &mut sequencer, &outputs, &eofs, &input, 3);

        assert!(ctx.already_visited(&[1, 0]));
        let emitted = ctx.handle_eof(&header(), &[1, 0]).await;
        assert_eq!(emitted.len(), 1);

        let relayed = broker.delivered("games_q").await;
        assert_eq!(relayed[0].1, vec![1, 0]);
        assert_eq!(broker.delivered_count("scored_0").await, 0);
    }

    #[tokio::test]
    async fn test_handle_eof_broadcasts_terminal_eof_once_group_is_done() {
        let broker = broker_with_topology().await;
        let mut sequencer = SequenceGenerator::new();
        let outputs = [output_dest()];
        let eofs = [
            ("out".to_string(), "scored_0".to_string()),
            ("out".to_string(), "scored_1".to_string()),
        ];
        let input = input_route();
        let mut ctx = ctx!(&broker, &mut sequencer, &outputs, &eofs, &input, 3);

        let emitted = ctx.handle_eof(&header(), &[2, 1, 2]).await;
        assert_eq!(emitted.len(), 2);

        assert_eq!(broker.delivered_count("games_q").await, 0);
        for queue in ["scored_0", "scored_1"] {
            let delivered = broker.delivered(queue).await;
            assert_eq!(delivered.len(), 1);
            assert_eq!(delivered[0].0.kind, MessageKind::Eof);
            assert_eq!(delivered[0].1, EMPTY_EOF);
        }
    }

    #[tokio::test]
    async fn test_single_peer_group_broadcasts_immediately() {
        let broker = broker_with_topology().await;
        let mut sequencer = SequenceGenerator::new();
        let outputs = [output_dest()];
        let eofs = [("out".to_string(), "scored_0".to_string())];
        let input = input_route();
        let mut ctx = ctx!(&broker, &mut sequencer, &outputs, &eofs, &input, 1);

        ctx.handle_eof(&header(), EMPTY_EOF).await;
        assert_eq!(broker.delivered_count("games_q").await, 0);
        assert_eq!(broker.delivered_count("scored_0").await, 1);
    }

    #[tokio::test]
    async fn test_finish_client_records_the_session() {
        let broker = broker_with_topology().await;
        let mut sequencer = SequenceGenerator::new();
        let outputs = [output_dest()];
        let eofs: [(String, String); 0] = [];
        let input = input_route();
        let mut ctx = ctx!(&broker, &mut sequencer, &outputs, &eofs, &input, 1);

        ctx.finish_client("1-0");
        assert_eq!(ctx.finished.as_deref(), Some("1-0"));
    }
}
