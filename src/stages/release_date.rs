//! Release-date filter: keeps the games released within a configured year
//! window, projected onto playtime records for the ranking stages.

use async_trait::async_trait;
use tracing::debug;

use crate::messaging::header::Header;
use crate::models::game::{to_playtime_releases, GameRecord};
use crate::sequence::SequenceDestination;
use crate::worker::processor::{ProcessMode, Processor, StageContext};

pub struct ReleaseDateFilter {
    start_year: i32,
    end_year: i32,
}

impl ReleaseDateFilter {
    pub fn new(start_year: i32, end_year: i32) -> Self {
        Self {
            start_year,
            end_year,
        }
    }
}

#[async_trait]
impl Processor for ReleaseDateFilter {
    async fn process(
        &mut self,
        ctx: &mut StageContext<'_>,
        header: &Header,
        body: &[u8],
        mode: ProcessMode,
    ) -> Vec<SequenceDestination> {
        if mode.is_replay() {
            return Vec::new();
        }
        if header.is_eof() {
            return ctx.handle_eof(header, body).await;
        }
        let Some(games) = super::decode_batch::<GameRecord>(header, body) else {
            return Vec::new();
        };
        let (releases, skipped) = to_playtime_releases(&games, self.start_year, self.end_year);
        if skipped > 0 {
            debug!(
                skipped,
                client_id = %header.client_id,
                "unparseable release dates in batch"
            );
        }
        if releases.is_empty() {
            return Vec::new();
        }

        let mut emitted = Vec::new();
        let outputs = ctx.outputs;
        for output in outputs {
            for (key, group) in super::group_by_shard(output, &releases, |r| r.game_id) {
                let out = super::outgoing(header, output);
                if let Some(dest) =
                    super::publish_json(ctx, &output.exchange, &key, out, &group).await
                {
                    emitted.push(dest);
                }
            }
        }
        emitted
    }
}
