//! Bounded top-N selection per client. Generic over the ranked record so
//! the vote and playtime variants share one state machine; a record seen
//! again overwrites its ranked value in place.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::heap::{BoundedMinHeap, Ranked};
use crate::messaging::header::Header;
use crate::models::review::ScoredReview;
use crate::models::Payload;
use crate::sequence::SequenceDestination;
use crate::sharding::shard_string;
use crate::worker::processor::{ProcessMode, Processor, StageContext};

impl Ranked for ScoredReview {
    type Rank = u64;

    fn rank(&self) -> u64 {
        self.votes
    }

    fn id(&self) -> i64 {
        self.game_id
    }
}

/// Top selector over per-game vote counts.
pub fn top_votes(capacity: usize) -> TopN<ScoredReview> {
    TopN::new(capacity)
}

pub struct TopN<T> {
    capacity: usize,
    heaps: HashMap<String, BoundedMinHeap<T>>,
    eofs_recv: HashMap<String, u8>,
}

impl<T: Ranked> TopN<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heaps: HashMap::new(),
            eofs_recv: HashMap::new(),
        }
    }
}

impl<T> TopN<T>
where
    T: Ranked + Payload + Send + 'static,
{
    /// Publish the drained top list to every output, sharded by client.
    async fn publish_top(
        &self,
        ctx: &mut StageContext<'_>,
        header: &Header,
        top: &[T],
    ) -> Vec<SequenceDestination> {
        let mut emitted = Vec::new();
        let outputs = ctx.outputs;
        for output in outputs {
            let key = shard_string(output, &header.client_id);
            let out = super::outgoing(header, output);
            if let Some(dest) = super::publish_json(ctx, &output.exchange, &key, out, top).await {
                emitted.push(dest);
            }
        }
        emitted
    }

    async fn handle_terminal(
        &mut self,
        ctx: &mut StageContext<'_>,
        header: &Header,
        body: &[u8],
        mode: ProcessMode,
    ) -> Vec<SequenceDestination> {
        let client = &header.client_id;
        let mut emitted = Vec::new();

        if ctx.expected_eofs > 0 {
            let seen = self.eofs_recv.entry(client.clone()).or_insert(0);
            *seen += 1;
            if *seen < ctx.expected_eofs {
                return emitted;
            }
            let top = self
                .heaps
                .remove(client)
                .map(|mut heap| heap.drain_descending())
                .unwrap_or_default();
            if mode.is_live() {
                emitted =
                    super::publish_aggregated(ctx, header, &top, top.len().max(1)).await;
            }
            self.eofs_recv.remove(client);
            ctx.finish_client(client);
        } else {
            if mode.is_live() && !ctx.already_visited(body) {
                if let Some(mut heap) = self.heaps.remove(client) {
                    let top = heap.drain_descending();
                    if !top.is_empty() {
                        emitted = self.publish_top(ctx, header, &top).await;
                    }
                }
            }
            let terminal = ctx.completes_group(body);
            if mode.is_live() {
                emitted.extend(ctx.handle_eof(header, body).await);
            }
            self.heaps.remove(client);
            if terminal {
                ctx.finish_client(client);
            }
        }
        emitted
    }
}

#[async_trait]
impl<T> Processor for TopN<T>
where
    T: Ranked + Payload + Send + Sync + 'static,
{
    async fn process(
        &mut self,
        ctx: &mut StageContext<'_>,
        header: &Header,
        body: &[u8],
        mode: ProcessMode,
    ) -> Vec<SequenceDestination> {
        if header.is_eof() {
            return self.handle_terminal(ctx, header, body, mode).await;
        }

        let Some(items) = super::decode_batch::<T>(header, body) else {
            return Vec::new();
        };
        let heap = self
            .heaps
            .entry(header.client_id.clone())
            .or_insert_with(|| BoundedMinHeap::new(self.capacity));
        for item in items {
            heap.upsert(item);
        }
        Vec::new()
    }
}
