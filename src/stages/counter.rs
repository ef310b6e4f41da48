//! Counter: accumulates named entities per client and republishes them in
//! bounded batches. Instances compose into a concentration tree; the root
//! runs counted fan-in and answers to the client's gateway partition.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::messaging::header::{Header, MessageKind};
use crate::models::game::GameName;
use crate::models::review::ScoredReview;
use crate::sequence::SequenceDestination;
use crate::sharding::{aggregator_output, shard_string};
use crate::worker::processor::{ProcessMode, Processor, StageContext};

pub struct Counter {
    batch_size: usize,
    buffers: HashMap<String, Vec<GameName>>,
    eofs_recv: HashMap<String, u8>,
}

impl Counter {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            buffers: HashMap::new(),
            eofs_recv: HashMap::new(),
        }
    }

    /// Publish a batch to every output. An aggregation root streams to the
    /// issuing gateway partition; a peer stage shards by client session.
    async fn publish_batch(
        &self,
        ctx: &mut StageContext<'_>,
        header: &Header,
        batch: &[GameName],
    ) -> Vec<SequenceDestination> {
        let mut emitted = Vec::new();
        let aggregating = ctx.expected_eofs > 0;
        let outputs = ctx.outputs;
        for output in outputs {
            let key = if aggregating {
                match aggregator_output(output, &header.client_id) {
                    Ok(key) => key,
                    Err(e) => {
                        error!(error = %e, client_id = %header.client_id, "cannot route batch");
                        continue;
                    }
                }
            } else {
                shard_string(output, &header.client_id)
            };
            let out = super::outgoing(header, output);
            if let Some(dest) = super::publish_json(ctx, &output.exchange, &key, out, batch).await
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
            let seen = self.eofs_recv.entry(client.clone()).or_insert(0);
            *seen += 1;
            if *seen < ctx.expected_eofs {
                return emitted;
            }
            let remainder = self.buffers.remove(client).unwrap_or_default();
            if mode.is_live() {
                emitted =
                    super::publish_aggregated(ctx, header, &remainder, self.batch_size).await;
            }
            self.eofs_recv.remove(client);
            ctx.finish_client(client);
        } else {
            if mode.is_live() && !ctx.already_visited(body) {
                let remainder = self.buffers.get(client).filter(|b| !b.is_empty()).cloned();
                if let Some(remainder) = remainder {
                    emitted = self.publish_batch(ctx, header, &remainder).await;
                }
            }
            let terminal = ctx.completes_group(body);
            if mode.is_live() {
                emitted.extend(ctx.handle_eof(header, body).await);
            }
            self.buffers.remove(client);
            if terminal {
                ctx.finish_client(client);
            }
        }
        emitted
    }
}

#[async_trait]
impl Processor for Counter {
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

        let names = match header.kind {
            MessageKind::GameName => match super::decode_batch::<GameName>(header, body) {
                Some(names) => names,
                None => return Vec::new(),
            },
            MessageKind::ScoredReview => {
                match super::decode_batch::<ScoredReview>(header, body) {
                    Some(scored) => scored
                        .into_iter()
                        .map(|s| GameName {
                            game_id: s.game_id,
                            game_name: s.game_name,
                        })
                        .collect(),
                    None => return Vec::new(),
                }
            }
            other => {
                warn!(kind = ?other, client_id = %header.client_id, "unexpected payload kind");
                return Vec::new();
            }
        };

        let buffer = self.buffers.entry(header.client_id.clone()).or_default();
        buffer.extend(names);
        if buffer.len() < self.batch_size {
            return Vec::new();
        }

        let batch = std::mem::take(buffer);
        if mode.is_replay() {
            return Vec::new();
        }
        self.publish_batch(ctx, header, &batch).await
    }
}
