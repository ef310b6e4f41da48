//! Genre filter: keeps the games tagged with one configured genre and
//! projects them onto name records for the join stages downstream.

use async_trait::async_trait;

use crate::messaging::header::Header;
use crate::models::game::{to_game_names, GameRecord};
use crate::sequence::SequenceDestination;
use crate::worker::processor::{ProcessMode, Processor, StageContext};

pub struct GenreFilter {
    genre: String,
}

impl GenreFilter {
    pub fn new(genre: String) -> Self {
        Self { genre }
    }
}

#[async_trait]
impl Processor for GenreFilter {
    async fn process(
        &mut self,
        ctx: &mut StageContext<'_>,
        header: &Header,
        body: &[u8],
        mode: ProcessMode,
    ) -> Vec<SequenceDestination> {
        // no per-client state, so replay has nothing to rebuild
        if mode.is_replay() {
            return Vec::new();
        }
        if header.is_eof() {
            return ctx.handle_eof(header, body).await;
        }
        let Some(games) = super::decode_batch::<GameRecord>(header, body) else {
            return Vec::new();
        };
        let names = to_game_names(&games, &self.genre);
        if names.is_empty() {
            return Vec::new();
        }

        let mut emitted = Vec::new();
        let outputs = ctx.outputs;
        for output in outputs {
            for (key, group) in super::group_by_shard(output, &names, |n| n.game_id) {
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
