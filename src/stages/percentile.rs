//! Percentile cut: accumulates per-game vote counts for a client and, once
//! every upstream shard has finished, answers with the games at or above
//! the configured percentile.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::messaging::header::Header;
use crate::models::review::{sort_by_votes, ScoredReview};
use crate::sequence::SequenceDestination;
use crate::worker::processor::{ProcessMode, Processor, StageContext};

pub struct Percentile {
    cutoff: u8,
    batch_size: usize,
    // client -> game id -> accumulated votes
    votes: HashMap<String, HashMap<i64, ScoredReview>>,
    eofs_recv: HashMap<String, u8>,
}

impl Percentile {
    pub fn new(cutoff: u8, batch_size: usize) -> Self {
        Self {
            cutoff,
            batch_size,
            votes: HashMap::new(),
            eofs_recv: HashMap::new(),
        }
    }

    fn accumulate(&mut self, client: &str, scored: Vec<ScoredReview>) {
        let per_client = self.votes.entry(client.to_string()).or_default();
        for review in scored {
            let entry = per_client
                .entry(review.game_id)
                .or_insert_with(|| ScoredReview {
                    game_id: review.game_id,
                    votes: 0,
                    game_name: String::new(),
                });
            entry.votes += review.votes;
            if entry.game_name.is_empty() && !review.game_name.is_empty() {
                entry.game_name = review.game_name;
            }
        }
    }

    /// Votes sorted ascending, cut at `floor(cutoff/100 * len)` clamped to
    /// the last element. The element at the computed index is inclusive.
    fn cut(&self, merged: HashMap<i64, ScoredReview>) -> Vec<ScoredReview> {
        let mut sorted: Vec<ScoredReview> = merged.into_values().collect();
        if sorted.is_empty() {
            return sorted;
        }
        sort_by_votes(&mut sorted);
        let index = (usize::from(self.cutoff) * sorted.len() / 100).min(sorted.len() - 1);
        sorted.split_off(index)
    }
}

#[async_trait]
impl Processor for Percentile {
    async fn process(
        &mut self,
        ctx: &mut StageContext<'_>,
        header: &Header,
        body: &[u8],
        mode: ProcessMode,
    ) -> Vec<SequenceDestination> {
        let client = header.client_id.clone();

        if header.is_eof() {
            let expected = ctx.expected_eofs.max(1);
            let seen = self.eofs_recv.entry(client.clone()).or_insert(0);
            *seen += 1;
            if *seen < expected {
                return Vec::new();
            }

            let merged = self.votes.remove(&client).unwrap_or_default();
            let mut emitted = Vec::new();
            if mode.is_live() {
                let tail = self.cut(merged);
                emitted =
                    super::publish_aggregated(ctx, header, &tail, self.batch_size).await;
            }
            self.eofs_recv.remove(&client);
            ctx.finish_client(&client);
            return emitted;
        }

        let Some(scored) = super::decode_batch::<ScoredReview>(header, body) else {
            return Vec::new();
        };
        self.accumulate(&client, scored);
        Vec::new()
    }
}
