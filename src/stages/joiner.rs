//! Stream equi-join on game id between the catalog-name stream and the
//! scored-review stream. The name side is authoritative: only games that
//! survived the upstream catalog filters ever join. With a vote target the
//! joiner emits each game the moment it crosses the threshold; without one
//! it holds everything until both streams have finished.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::warn;

use crate::messaging::header::{Header, MessageKind, OriginStage};
use crate::models::game::GameName;
use crate::models::review::ScoredReview;
use crate::sequence::SequenceDestination;
use crate::worker::processor::{ProcessMode, Processor, StageContext};

#[derive(Debug, Clone, Default, PartialEq)]
struct JoinSlot {
    game_name: Option<String>,
    votes: u64,
    sent: bool,
}

impl JoinSlot {
    fn ready(&self, target_votes: Option<u64>) -> bool {
        !self.sent
            && self.game_name.is_some()
            && target_votes.is_some_and(|target| self.votes >= target)
    }
}

pub struct Joiner {
    target_votes: Option<u64>,
    expected_game_eofs: u8,
    expected_review_eofs: u8,
    batch_size: usize,
    // client -> game id -> join state
    slots: HashMap<String, HashMap<i64, JoinSlot>>,
    game_eofs: HashMap<String, u8>,
    review_eofs: HashMap<String, u8>,
}

impl Joiner {
    pub fn new(
        target_votes: Option<u64>,
        expected_game_eofs: u8,
        expected_review_eofs: u8,
        batch_size: usize,
    ) -> Self {
        Self {
            target_votes,
            expected_game_eofs,
            expected_review_eofs,
            batch_size,
            slots: HashMap::new(),
            game_eofs: HashMap::new(),
            review_eofs: HashMap::new(),
        }
    }

    fn emit(slot: &mut JoinSlot, game_id: i64, ready: &mut Vec<ScoredReview>) {
        slot.sent = true;
        ready.push(ScoredReview {
            game_id,
            votes: slot.votes,
            game_name: slot.game_name.clone().unwrap_or_default(),
        });
    }

    /// Fold one batch into the join state, returning the games that crossed
    /// the vote target because of it.
    fn absorb(&mut self, header: &Header, body: &[u8]) -> Vec<ScoredReview> {
        let per_client = self.slots.entry(header.client_id.clone()).or_default();
        let mut ready = Vec::new();

        match header.kind {
            MessageKind::GameName => {
                let Some(names) = super::decode_batch::<GameName>(header, body) else {
                    return ready;
                };
                for name in names {
                    let slot = per_client.entry(name.game_id).or_default();
                    if slot.sent {
                        continue;
                    }
                    if slot.game_name.is_none() {
                        slot.game_name = Some(name.game_name);
                    }
                    if slot.ready(self.target_votes) {
                        Self::emit(slot, name.game_id, &mut ready);
                    }
                }
            }
            MessageKind::ScoredReview => {
                let Some(scored) = super::decode_batch::<ScoredReview>(header, body) else {
                    return ready;
                };
                for review in scored {
                    let slot = per_client.entry(review.game_id).or_default();
                    if slot.sent {
                        continue;
                    }
                    slot.votes += review.votes;
                    if slot.ready(self.target_votes) {
                        Self::emit(slot, review.game_id, &mut ready);
                    }
                }
            }
            other => {
                warn!(kind = ?other, client_id = %header.client_id, "unexpected payload kind");
            }
        }
        ready
    }

    /// Joined games still unsent when both streams finish. Only meaningful
    /// without a vote target; with one, unsent games never crossed it.
    fn drain_unsent(&mut self, client: &str) -> Vec<ScoredReview> {
        let slots = self.slots.remove(client).unwrap_or_default();
        if self.target_votes.is_some() {
            return Vec::new();
        }
        let mut joined: Vec<ScoredReview> = slots
            .into_iter()
            .filter_map(|(game_id, slot)| match slot.game_name {
                Some(game_name) if !slot.sent && slot.votes > 0 => Some(ScoredReview {
                    game_id,
                    votes: slot.votes,
                    game_name,
                }),
                _ => None,
            })
            .collect();
        joined.sort_unstable_by_key(|review| review.game_id);
        joined
    }

    async fn publish_ready(
        &self,
        ctx: &mut StageContext<'_>,
        header: &Header,
        ready: &[ScoredReview],
    ) -> Vec<SequenceDestination> {
        let mut emitted = Vec::new();
        let outputs = ctx.outputs;
        for output in outputs {
            for (key, group) in super::group_by_shard(output, ready, |s| s.game_id) {
                let out = super::outgoing(header, output);
                for chunk in group.chunks(self.batch_size.max(1)) {
                    if let Some(dest) =
                        super::publish_json(ctx, &output.exchange, &key, out.clone(), chunk).await
                    {
                        emitted.push(dest);
                    }
                }
            }
        }
        emitted
    }
}

#[async_trait]
impl Processor for Joiner {
    async fn process(
        &mut self,
        ctx: &mut StageContext<'_>,
        header: &Header,
        body: &[u8],
        mode: ProcessMode,
    ) -> Vec<SequenceDestination> {
        let client = header.client_id.clone();

        if header.is_eof() {
            // the catalog stream keeps its dataset origin; anything else is
            // the review side
            let seen = if header.origin == OriginStage::Game {
                self.game_eofs.entry(client.clone()).or_insert(0)
            } else {
                self.review_eofs.entry(client.clone()).or_insert(0)
            };
            *seen += 1;

            let games_done =
                self.game_eofs.get(&client).copied().unwrap_or(0) >= self.expected_game_eofs;
            let reviews_done =
                self.review_eofs.get(&client).copied().unwrap_or(0) >= self.expected_review_eofs;
            if !games_done || !reviews_done {
                return Vec::new();
            }

            let unsent = self.drain_unsent(&client);
            let mut emitted = Vec::new();
            if mode.is_live() {
                if !unsent.is_empty() {
                    emitted = self.publish_ready(ctx, header, &unsent).await;
                }
                emitted.extend(ctx.broadcast_eof(header).await);
            }
            self.game_eofs.remove(&client);
            self.review_eofs.remove(&client);
            ctx.finish_client(&client);
            return emitted;
        }

        let ready = self.absorb(header, body);
        if ready.is_empty() || mode.is_replay() {
            return Vec::new();
        }
        self.publish_ready(ctx, header, &ready).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Destination;
    use crate::stages::testing::{data_header, eof_header, StageRig};
    use crate::worker::eof::EMPTY_EOF;

    fn name(game_id: i64) -> GameName {
        GameName {
            game_id,
            game_name: format!("game-{}", game_id),
        }
    }

    fn scored(game_id: i64, votes: u64) -> ScoredReview {
        ScoredReview {
            game_id,
            votes,
            // review-side names are not authoritative
            game_name: String::new(),
        }
    }

    fn output() -> Destination {
        Destination {
            exchange: "joined".to_string(),
            routing_key: "joined_q".to_string(),
            consumers: 0,
            origin: None,
        }
    }

    async fn send_names(joiner: &mut Joiner, rig: &mut StageRig, client: &str, names: &[GameName]) {
        let body = serde_json::to_vec(names).unwrap();
        let header = data_header(MessageKind::GameName, client, OriginStage::Game);
        joiner
            .process(&mut rig.ctx(), &header, &body, ProcessMode::Live)
            .await;
    }

    async fn send_votes(
        joiner: &mut Joiner,
        rig: &mut StageRig,
        client: &str,
        votes: &[ScoredReview],
    ) {
        let body = serde_json::to_vec(votes).unwrap();
        let header = data_header(MessageKind::ScoredReview, client, OriginStage::Review);
        joiner
            .process(&mut rig.ctx(), &header, &body, ProcessMode::Live)
            .await;
    }

    async fn delivered_reviews(rig: &StageRig) -> Vec<Vec<ScoredReview>> {
        rig.broker
            .delivered("joined_q")
            .await
            .into_iter()
            .filter(|(header, _)| !header.is_eof())
            .map(|(_, payload)| serde_json::from_slice(&payload).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_threshold_crossing_emits_once_with_accumulated_votes() {
        let mut rig = StageRig::with_outputs(vec![output()]).await;
        let mut joiner = Joiner::new(Some(15), 1, 1, 100);

        send_names(&mut joiner, &mut rig, "1-0", &[name(1)]).await;
        send_votes(&mut joiner, &mut rig, "1-0", &[scored(1, 10)]).await;
        assert!(delivered_reviews(&rig).await.is_empty());

        // 10 + 5 reaches the target
        send_votes(&mut joiner, &mut rig, "1-0", &[scored(1, 5)]).await;
        let batches = delivered_reviews(&rig).await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].votes, 15);
        assert_eq!(batches[0][0].game_name, "game-1");

        // already sent: further votes are ignored
        send_votes(&mut joiner, &mut rig, "1-0", &[scored(1, 100)]).await;
        assert_eq!(delivered_reviews(&rig).await.len(), 1);
    }

    #[tokio::test]
    async fn test_votes_arriving_first_wait_for_the_name() {
        let mut rig = StageRig::with_outputs(vec![output()]).await;
        let mut joiner = Joiner::new(Some(10), 1, 1, 100);

        send_votes(&mut joiner, &mut rig, "1-0", &[scored(1, 25)]).await;
        assert!(delivered_reviews(&rig).await.is_empty());

        send_names(&mut joiner, &mut rig, "1-0", &[name(1)]).await;
        let batches = delivered_reviews(&rig).await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].votes, 25);
    }

    #[tokio::test]
    async fn test_without_target_everything_joined_flushes_at_eof() {
        let mut rig = StageRig::with_outputs(vec![output()]).await;
        let mut joiner = Joiner::new(None, 1, 1, 100);

        send_names(&mut joiner, &mut rig, "1-0", &[name(1), name(2), name(3)]).await;
        send_votes(&mut joiner, &mut rig, "1-0", &[scored(1, 4), scored(2, 9)]).await;
        // id 4 never receives a name and must not appear
        send_votes(&mut joiner, &mut rig, "1-0", &[scored(4, 7)]).await;
        assert!(delivered_reviews(&rig).await.is_empty());

        joiner
            .process(
                &mut rig.ctx(),
                &eof_header("1-0", OriginStage::Game),
                EMPTY_EOF,
                ProcessMode::Live,
            )
            .await;
        assert!(delivered_reviews(&rig).await.is_empty());

        joiner
            .process(
                &mut rig.ctx(),
                &eof_header("1-0", OriginStage::Review),
                EMPTY_EOF,
                ProcessMode::Live,
            )
            .await;

        let batches = delivered_reviews(&rig).await;
        assert_eq!(batches.len(), 1);
        let pairs: Vec<(i64, u64)> = batches[0].iter().map(|s| (s.game_id, s.votes)).collect();
        // joined games with votes, in id order; zero-vote game 3 is dropped
        assert_eq!(pairs, vec![(1, 4), (2, 9)]);

        let delivered = rig.broker.delivered("joined_q").await;
        assert!(delivered.last().is_some_and(|(header, _)| header.is_eof()));
    }

    #[tokio::test]
    async fn test_under_target_games_are_dropped_at_eof() {
        let mut rig = StageRig::with_outputs(vec![output()]).await;
        let mut joiner = Joiner::new(Some(100), 1, 1, 100);

        send_names(&mut joiner, &mut rig, "1-0", &[name(1)]).await;
        send_votes(&mut joiner, &mut rig, "1-0", &[scored(1, 99)]).await;

        for origin in [OriginStage::Game, OriginStage::Review] {
            joiner
                .process(
                    &mut rig.ctx(),
                    &eof_header("1-0", origin),
                    EMPTY_EOF,
                    ProcessMode::Live,
                )
                .await;
        }

        let delivered = rig.broker.delivered("joined_q").await;
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].0.is_eof());
    }

    #[tokio::test]
    async fn test_each_source_needs_its_expected_eof_count() {
        let mut rig = StageRig::with_outputs(vec![output()]).await;
        let mut joiner = Joiner::new(None, 2, 1, 100);

        send_names(&mut joiner, &mut rig, "1-0", &[name(1)]).await;
        send_votes(&mut joiner, &mut rig, "1-0", &[scored(1, 3)]).await;

        joiner
            .process(
                &mut rig.ctx(),
                &eof_header("1-0", OriginStage::Game),
                EMPTY_EOF,
                ProcessMode::Live,
            )
            .await;
        joiner
            .process(
                &mut rig.ctx(),
                &eof_header("1-0", OriginStage::Review),
                EMPTY_EOF,
                ProcessMode::Live,
            )
            .await;
        // one game EOF still missing
        assert_eq!(rig.broker.delivered_count("joined_q").await, 0);

        joiner
            .process(
                &mut rig.ctx(),
                &eof_header("1-0", OriginStage::Game),
                EMPTY_EOF,
                ProcessMode::Live,
            )
            .await;
        assert_eq!(delivered_reviews(&rig).await.len(), 1);
        assert!(joiner.slots.is_empty());
    }

    #[tokio::test]
    async fn test_replay_marks_sent_without_publishing() {
        let mut rig = StageRig::with_outputs(vec![output()]).await;
        let mut joiner = Joiner::new(Some(5), 1, 1, 100);

        let body = serde_json::to_vec(&[name(1)]).unwrap();
        let header = data_header(MessageKind::GameName, "1-0", OriginStage::Game);
        joiner
            .process(&mut rig.ctx(), &header, &body, ProcessMode::Replay)
            .await;

        let body = serde_json::to_vec(&[scored(1, 9)]).unwrap();
        let header = data_header(MessageKind::ScoredReview, "1-0", OriginStage::Review);
        joiner
            .process(&mut rig.ctx(), &header, &body, ProcessMode::Replay)
            .await;

        assert!(joiner.slots["1-0"][&1].sent);
        assert_eq!(rig.broker.delivered_count("joined_q").await, 0);

        // live redelivery of later votes must not re-emit
        send_votes(&mut joiner, &mut rig, "1-0", &[scored(1, 50)]).await;
        assert_eq!(rig.broker.delivered_count("joined_q").await, 0);
    }
}
