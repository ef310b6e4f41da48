//! # Query State Machines
//!
//! One [`Processor`] implementation per pipeline stage, selected by
//! [`StageKind`] when the worker starts. The stateless filters project and
//! re-shard record batches; the stateful stages accumulate per-client state
//! and flush it when their termination condition fires. All of them mutate
//! state in replay mode exactly as they do live, but publish nothing.

pub mod counter;
pub mod genre;
pub mod joiner;
pub mod language;
pub mod percentile;
pub mod platform_counter;
pub mod release_date;
pub mod score;
pub mod top_n;
pub mod top_playtime;

use tracing::{error, warn};

use crate::config::{Destination, StageConfig, StageKind};
use crate::error::{WorkerError, WorkerResult};
use crate::messaging::header::Header;
use crate::models::Payload;
use crate::sequence::SequenceDestination;
use crate::sharding::{aggregator_output, shard_i64};
use crate::worker::processor::{Processor, StageContext};

/// Opaque text-language classification capability
pub trait LanguageDetector: Send + 'static {
    /// Language tag of a text, [`UNKNOWN_LANGUAGE`] when unclassifiable.
    fn detect(&self, text: &str) -> String;
}

/// Tag returned for unclassifiable text
pub const UNKNOWN_LANGUAGE: &str = "unknown";

/// Default detector: classifies nothing. Deployments inject a real
/// classifier through [`language::LanguageFilter::new`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnknownLanguage;

impl LanguageDetector for UnknownLanguage {
    fn detect(&self, _text: &str) -> String {
        UNKNOWN_LANGUAGE.to_string()
    }
}

/// Construct the state machine for a stage, validating the parameters it
/// requires.
pub fn build(stage: &StageConfig) -> WorkerResult<Box<dyn Processor>> {
    let params = &stage.params;
    let processor: Box<dyn Processor> = match stage.kind {
        StageKind::GenreFilter => Box::new(genre::GenreFilter::new(require(
            params.genre.clone(),
            "genre_filter needs params.genre",
        )?)),
        StageKind::ReleaseDateFilter => Box::new(release_date::ReleaseDateFilter::new(
            require(
                params.start_year,
                "release_date_filter needs params.start_year",
            )?,
            require(params.end_year, "release_date_filter needs params.end_year")?,
        )),
        StageKind::ScoreFilter => {
            if params.score_projections.len() != stage.outputs.len() {
                return Err(WorkerError::configuration(
                    "score_filter needs one params.score_projections entry per output",
                ));
            }
            Box::new(score::ScoreFilter::new(params.score_projections.clone()))
        }
        StageKind::LanguageFilter => Box::new(language::LanguageFilter::new(
            require(
                params.language.clone(),
                "language_filter needs params.language",
            )?,
            Box::new(UnknownLanguage),
        )),
        StageKind::PlatformCounter => Box::new(platform_counter::PlatformCounter::new()),
        StageKind::Counter => Box::new(counter::Counter::new(params.batch_size)),
        StageKind::Percentile => {
            let cutoff = require(params.percentile, "percentile needs params.percentile")?;
            if cutoff > 100 {
                return Err(WorkerError::configuration(
                    "params.percentile must be within 0..=100",
                ));
            }
            Box::new(percentile::Percentile::new(cutoff, params.batch_size))
        }
        StageKind::TopN => Box::new(top_n::top_votes(require(
            params.n,
            "top_n needs params.n",
        )?)),
        StageKind::TopPlaytime => Box::new(top_playtime::top_playtime(require(
            params.n,
            "top_playtime needs params.n",
        )?)),
        StageKind::Joiner => Box::new(joiner::Joiner::new(
            params.target_votes,
            params.expected_game_eofs,
            params.expected_review_eofs,
            params.batch_size,
        )),
    };
    Ok(processor)
}

fn require<T>(value: Option<T>, message: &str) -> WorkerResult<T> {
    value.ok_or_else(|| WorkerError::configuration(message))
}

/// Decode a JSON batch payload; malformed input is logged and dropped.
pub(crate) fn decode_batch<T: Payload>(header: &Header, body: &[u8]) -> Option<Vec<T>> {
    match T::decode_batch(body) {
        Ok(records) => Some(records),
        Err(e) => {
            warn!(
                error = %e,
                kind = ?header.kind,
                client_id = %header.client_id,
                "dropping undecodable payload"
            );
            None
        }
    }
}

/// Header for a message bound for one output: the incoming header with the
/// output's origin override applied. The payload kind is stamped at publish
/// time from the record type. Built fresh per message, never shared.
pub(crate) fn outgoing(header: &Header, output: &Destination) -> Header {
    let origin = output.origin.unwrap_or(header.origin);
    header.clone().with_origin(origin)
}

/// Group records by their shard routing key under one destination, in
/// deterministic key order.
pub(crate) fn group_by_shard<T: Clone>(
    output: &Destination,
    records: &[T],
    id: impl Fn(&T) -> i64,
) -> std::collections::BTreeMap<String, Vec<T>> {
    let mut shards: std::collections::BTreeMap<String, Vec<T>> = std::collections::BTreeMap::new();
    for record in records {
        shards
            .entry(shard_i64(output, id(record)))
            .or_default()
            .push(record.clone());
    }
    shards
}

/// Serialize and publish one batch under the record type's kind tag; a
/// serialization failure is logged and the batch dropped without consuming
/// a sequence id.
pub(crate) async fn publish_json<T: Payload>(
    ctx: &mut StageContext<'_>,
    exchange: &str,
    routing_key: &str,
    header: Header,
    batch: &[T],
) -> Option<SequenceDestination> {
    match T::encode_batch(batch) {
        Ok(payload) => {
            let header = header.with_kind(T::KIND);
            Some(ctx.publish(exchange, routing_key, header, &payload).await)
        }
        Err(e) => {
            error!(error = %e, routing_key, "serializing batch failed");
            None
        }
    }
}

/// Publish items to one routing key in chunks of `batch_size`, each chunk
/// under its own sequence id.
pub(crate) async fn publish_chunked<T: Payload>(
    ctx: &mut StageContext<'_>,
    exchange: &str,
    routing_key: &str,
    header: &Header,
    items: &[T],
    batch_size: usize,
) -> Vec<SequenceDestination> {
    let mut emitted = Vec::new();
    for chunk in items.chunks(batch_size.max(1)) {
        if let Some(dest) = publish_json(ctx, exchange, routing_key, header.clone(), chunk).await {
            emitted.push(dest);
        }
    }
    emitted
}

/// Terminal flush of an aggregation root: publish the client's results in
/// batches, then one EOF, to the gateway partition of every output.
pub(crate) async fn publish_aggregated<T: Payload>(
    ctx: &mut StageContext<'_>,
    header: &Header,
    items: &[T],
    batch_size: usize,
) -> Vec<SequenceDestination> {
    let mut emitted = Vec::new();
    let outputs = ctx.outputs;
    for output in outputs {
        let key = match aggregator_output(output, &header.client_id) {
            Ok(key) => key,
            Err(e) => {
                error!(
                    error = %e,
                    client_id = %header.client_id,
                    "cannot route aggregated results"
                );
                continue;
            }
        };
        let proto = outgoing(header, output);
        emitted.extend(publish_chunked(ctx, &output.exchange, &key, &proto, items, batch_size).await);
        emitted.push(ctx.publish_eof(&output.exchange, &key, &proto).await);
    }
    emitted
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InputBinding, StageParams};
    use crate::messaging::header::{MessageKind, OriginStage};
    use crate::models::GameName;

    fn stage(kind: StageKind, params: StageParams) -> StageConfig {
        StageConfig {
            kind,
            id: 0,
            uuid: 1,
            peers: 1,
            expected_eofs: 0,
            exchanges: Vec::new(),
            inputs: vec![InputBinding {
                exchange: "in".to_string(),
                queue: "in_q".to_string(),
                routing_key: "in_key".to_string(),
            }],
            outputs: Vec::new(),
            params,
        }
    }

    #[test]
    fn test_build_rejects_missing_required_params() {
        let err = build(&stage(StageKind::GenreFilter, StageParams::default())).unwrap_err();
        assert!(err.to_string().contains("params.genre"));

        let err = build(&stage(StageKind::TopN, StageParams::default())).unwrap_err();
        assert!(err.to_string().contains("params.n"));
    }

    #[test]
    fn test_build_rejects_projection_output_mismatch() {
        let params = StageParams {
            score_projections: vec![crate::config::ScoreProjection::Positive],
            ..StageParams::default()
        };
        // one projection, zero outputs
        let err = build(&stage(StageKind::ScoreFilter, params)).unwrap_err();
        assert!(err.to_string().contains("per output"));
    }

    #[test]
    fn test_build_rejects_out_of_range_percentile() {
        let params = StageParams {
            percentile: Some(101),
            ..StageParams::default()
        };
        let err = build(&stage(StageKind::Percentile, params)).unwrap_err();
        assert!(err.to_string().contains("0..=100"));
    }

    #[test]
    fn test_build_accepts_each_kind_with_its_params() {
        let cases = [
            (
                StageKind::GenreFilter,
                StageParams {
                    genre: Some("Indie".to_string()),
                    ..StageParams::default()
                },
            ),
            (
                StageKind::ReleaseDateFilter,
                StageParams {
                    start_year: Some(2010),
                    end_year: Some(2019),
                    ..StageParams::default()
                },
            ),
            (
                StageKind::LanguageFilter,
                StageParams {
                    language: Some("english".to_string()),
                    ..StageParams::default()
                },
            ),
            (StageKind::PlatformCounter, StageParams::default()),
            (StageKind::Counter, StageParams::default()),
            (
                StageKind::Percentile,
                StageParams {
                    percentile: Some(90),
                    ..StageParams::default()
                },
            ),
            (
                StageKind::TopN,
                StageParams {
                    n: Some(5),
                    ..StageParams::default()
                },
            ),
            (
                StageKind::TopPlaytime,
                StageParams {
                    n: Some(10),
                    ..StageParams::default()
                },
            ),
            (StageKind::Joiner, StageParams::default()),
        ];
        for (kind, params) in cases {
            assert!(build(&stage(kind, params)).is_ok(), "{:?}", kind);
        }
    }

    #[tokio::test]
    async fn test_publish_stamps_the_record_kind_into_the_header() {
        let output = Destination {
            exchange: "names".to_string(),
            routing_key: "names_q".to_string(),
            consumers: 0,
            origin: Some(OriginStage::Query2),
        };
        let mut rig = testing::StageRig::with_outputs(vec![output.clone()]).await;

        let incoming = testing::data_header(MessageKind::Game, "7-0", OriginStage::Game);
        let batch = vec![GameName {
            game_id: 10,
            game_name: "Counter-Strike".to_string(),
        }];
        let out = outgoing(&incoming, &output);
        let emitted = publish_json(&mut rig.ctx(), "names", "names_q", out, &batch).await;
        assert!(emitted.is_some());

        let delivered = rig.broker.delivered("names_q").await;
        assert_eq!(delivered.len(), 1);
        // the record type decides the kind, not the incoming header
        assert_eq!(delivered[0].0.kind, MessageKind::GameName);
        assert_eq!(delivered[0].0.origin, OriginStage::Query2);
    }
}
