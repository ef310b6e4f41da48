//! Score filter: splits review batches by score sign, one configured
//! projection per output. Vote-count projections feed the ranking queries;
//! the text projection feeds language analysis.

use async_trait::async_trait;

use crate::config::ScoreProjection;
use crate::messaging::header::Header;
use crate::models::review::{to_scored, to_text_reviews, ReviewRecord};
use crate::sequence::SequenceDestination;
use crate::worker::processor::{ProcessMode, Processor, StageContext};

pub struct ScoreFilter {
    projections: Vec<ScoreProjection>,
}

impl ScoreFilter {
    pub fn new(projections: Vec<ScoreProjection>) -> Self {
        Self { projections }
    }
}

#[async_trait]
impl Processor for ScoreFilter {
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
        let Some(reviews) = super::decode_batch::<ReviewRecord>(header, body) else {
            return Vec::new();
        };

        let mut emitted = Vec::new();
        let outputs = ctx.outputs;
        for (output, projection) in outputs.iter().zip(self.projections.clone()) {
            match projection {
                ScoreProjection::Positive | ScoreProjection::Negative => {
                    let target = if projection == ScoreProjection::Positive {
                        1
                    } else {
                        -1
                    };
                    let scored = to_scored(&reviews, target);
                    for (key, group) in super::group_by_shard(output, &scored, |s| s.game_id) {
                        let out = super::outgoing(header, output);
                        if let Some(dest) =
                            super::publish_json(ctx, &output.exchange, &key, out, &group).await
                        {
                            emitted.push(dest);
                        }
                    }
                }
                ScoreProjection::NegativeText => {
                    let texts = to_text_reviews(&reviews, -1);
                    for (key, group) in super::group_by_shard(output, &texts, |t| t.game_id) {
                        let out = super::outgoing(header, output);
                        if let Some(dest) =
                            super::publish_json(ctx, &output.exchange, &key, out, &group).await
                        {
                            emitted.push(dest);
                        }
                    }
                }
            }
        }
        emitted
    }
}
