//! Platform counter: per-client tallies of windows/linux/mac support across
//! the game catalog. A first level counts raw game records; a second level
//! merges the per-shard partial tallies into the final answer.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::warn;

use crate::messaging::header::{Header, MessageKind};
use crate::models::game::{GameRecord, PlatformTally};
use crate::sequence::SequenceDestination;
use crate::sharding::shard_string;
use crate::worker::processor::{ProcessMode, Processor, StageContext};

#[derive(Default)]
pub struct PlatformCounter {
    tallies: HashMap<String, PlatformTally>,
    // counted fan-in progress, aggregation mode only
    eofs_recv: HashMap<String, u8>,
}

impl PlatformCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flush the client's tally to every output, sharded by client session.
    /// Empty tallies are not published.
    async fn flush(
        &mut self,
        ctx: &mut StageContext<'_>,
        header: &Header,
    ) -> Vec<SequenceDestination> {
        let Some(tally) = self.tallies.get(&header.client_id) else {
            return Vec::new();
        };
        if tally.is_empty() {
            return Vec::new();
        }
        let batch = [*tally];

        let mut emitted = Vec::new();
        let outputs = ctx.outputs;
        for output in outputs {
            let key = shard_string(output, &header.client_id);
            let out = super::outgoing(header, output);
            if let Some(dest) = super::publish_json(ctx, &output.exchange, &key, out, &batch).await
            {
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
            // aggregation root: wait for every upstream EOF, then answer
            // straight to the client's gateway partition
            let seen = self.eofs_recv.entry(client.clone()).or_insert(0);
            *seen += 1;
            if *seen < ctx.expected_eofs {
                return emitted;
            }
            if mode.is_live() {
                let tally = self.tallies.get(client).copied().unwrap_or_default();
                let batch = [tally];
                let results: &[PlatformTally] = if tally.is_empty() { &[] } else { &batch };
                emitted = super::publish_aggregated(ctx, header, results, 1).await;
            }
            self.tallies.remove(client);
            self.eofs_recv.remove(client);
            ctx.finish_client(client);
        } else {
            // peer group on a shared queue: contribute once, pass the
            // visited set along
            if mode.is_live() && !ctx.already_visited(body) {
                emitted = self.flush(ctx, header).await;
            }
            let terminal = ctx.completes_group(body);
            if mode.is_live() {
                emitted.extend(ctx.handle_eof(header, body).await);
            }
            self.tallies.remove(client);
            if terminal {
                ctx.finish_client(client);
            }
        }
        emitted
    }
}

#[async_trait]
impl Processor for PlatformCounter {
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

        match header.kind {
            MessageKind::Game => {
                let Some(games) = super::decode_batch::<GameRecord>(header, body) else {
                    return Vec::new();
                };
                let tally = self.tallies.entry(header.client_id.clone()).or_default();
                for game in &games {
                    tally.observe(game);
                }
            }
            MessageKind::PlatformTally => {
                let Some(partials) = super::decode_batch::<PlatformTally>(header, body) else {
                    return Vec::new();
                };
                let tally = self.tallies.entry(header.client_id.clone()).or_default();
                for partial in &partials {
                    tally.merge(partial);
                }
            }
            other => {
                warn!(kind = ?other, client_id = %header.client_id, "unexpected payload kind");
            }
        }
        Vec::new()
    }
}
