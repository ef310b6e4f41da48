//! Language filter: counts, per game, the reviews of a text batch written
//! in one configured language. Classification is an injected capability;
//! the filter only compares tags.

use async_trait::async_trait;

use crate::messaging::header::Header;
use crate::models::review::{ScoredReview, TextReview};
use crate::sequence::SequenceDestination;
use crate::stages::LanguageDetector;
use crate::worker::processor::{ProcessMode, Processor, StageContext};

pub struct LanguageFilter {
    language: String,
    detector: Box<dyn LanguageDetector>,
}

impl LanguageFilter {
    pub fn new(language: String, detector: Box<dyn LanguageDetector>) -> Self {
        Self { language, detector }
    }

    /// Per-game counts of texts classified as the configured language.
    /// Games without a single match are omitted. Names are left empty; the
    /// joiner downstream supplies them.
    fn count_matching(&self, batch: &[TextReview]) -> Vec<ScoredReview> {
        batch
            .iter()
            .filter_map(|review| {
                let votes = review
                    .texts
                    .iter()
                    .filter(|text| self.detector.detect(text) == self.language)
                    .count() as u64;
                (votes > 0).then(|| ScoredReview {
                    game_id: review.game_id,
                    votes,
                    game_name: String::new(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl Processor for LanguageFilter {
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
        let Some(batch) = super::decode_batch::<TextReview>(header, body) else {
            return Vec::new();
        };
        let counted = self.count_matching(&batch);
        if counted.is_empty() {
            return Vec::new();
        }

        let mut emitted = Vec::new();
        let outputs = ctx.outputs;
        for output in outputs {
            for (key, group) in super::group_by_shard(output, &counted, |s| s.game_id) {
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
