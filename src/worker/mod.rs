//! # Worker Runtime
//!
//! Wires one processing state machine to the broker: declares the stage's
//! topology, replays the recovery log through the processor, then runs one
//! consumption loop per bound input queue. Every accepted delivery passes
//! the duplicate filter, is processed inside a single core lock (so
//! multi-queue stages serialize their shared state), is journaled, and only
//! then acked. A termination signal stops intake without interrupting the
//! record in flight.

pub mod eof;
pub mod processor;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{StageConfig, WorkerConfig};
use crate::dedup::DuplicateFilter;
use crate::error::{WorkerError, WorkerResult};
use crate::messaging::broker::{Delivery, MessageBroker};
use crate::recovery::{RecoveryLog, RecoveryRecord};
use crate::sequence::SequenceGenerator;
use crate::sharding::expand;
use crate::stages;
use crate::worker::processor::{InputRoute, ProcessMode, Processor, StageContext};

/// Instantiated routing of one worker: where it consumes and publishes
#[derive(Debug, Clone)]
pub struct Topology {
    pub outputs: Vec<crate::config::Destination>,
    /// Every (exchange, key) a terminal EOF broadcast must reach.
    pub eof_destinations: Vec<(String, String)>,
    pub inputs: Vec<InputRoute>,
}

impl Topology {
    /// Expand a stage's config: instantiate input templates with the
    /// worker's own shard id and enumerate every output shard key. Keys
    /// still carrying a placeholder are gateway-routed at publish time and
    /// excluded from the EOF broadcast list.
    pub fn from_stage(stage: &StageConfig) -> Self {
        let inputs = stage
            .inputs
            .iter()
            .map(|binding| InputRoute {
                exchange: binding.exchange.clone(),
                queue: binding.queue_for(stage.id),
                routing_key: binding.key_for(stage.id),
            })
            .collect();

        let mut eof_destinations = Vec::new();
        for output in &stage.outputs {
            for key in expand(output) {
                if !key.contains("{}") {
                    eof_destinations.push((output.exchange.clone(), key));
                }
            }
        }

        Self {
            outputs: stage.outputs.clone(),
            eof_destinations,
            inputs,
        }
    }
}

/// Mutable stage state, locked once per delivery
struct Core {
    processor: Box<dyn Processor>,
    sequencer: SequenceGenerator,
    dedup: DuplicateFilter,
    log: RecoveryLog,
}

#[derive(Debug, Default)]
struct Stats {
    accepted: AtomicU64,
    duplicates: AtomicU64,
}

/// One running stage instance
#[derive(Clone)]
pub struct Worker {
    stage: StageConfig,
    topology: Arc<Topology>,
    broker: Arc<dyn MessageBroker>,
    core: Arc<Mutex<Core>>,
    stats: Arc<Stats>,
    /// Process-local id for logs and consumer tags; the wire-level
    /// producer uuid stays `stage.uuid`.
    instance: Uuid,
}

impl Worker {
    pub fn new(config: &WorkerConfig, broker: Arc<dyn MessageBroker>) -> WorkerResult<Self> {
        if config.stage.inputs.is_empty() {
            return Err(WorkerError::invalid_topology(
                "stage declares no input bindings",
            ));
        }

        let processor = stages::build(&config.stage)?;
        let log = RecoveryLog::open(config.recovery_path())?;
        let topology = Topology::from_stage(&config.stage);

        Ok(Self {
            stage: config.stage.clone(),
            topology: Arc::new(topology),
            broker,
            core: Arc::new(Mutex::new(Core {
                processor,
                sequencer: SequenceGenerator::new(),
                dedup: DuplicateFilter::new(),
                log,
            })),
            stats: Arc::new(Stats::default()),
            instance: Uuid::new_v4(),
        })
    }

    /// Declare exchanges, every output shard queue, and this worker's own
    /// input queues, binding each before any traffic flows.
    pub async fn declare_topology(&self) -> WorkerResult<()> {
        for exchange in &self.stage.exchanges {
            self.broker.declare_exchange(exchange).await?;
        }
        for (exchange, key) in &self.topology.eof_destinations {
            self.broker.declare_queue(key).await?;
            self.broker.bind_queue(key, exchange, key).await?;
        }
        for input in &self.topology.inputs {
            self.broker.declare_queue(&input.queue).await?;
            self.broker
                .bind_queue(&input.queue, &input.exchange, &input.routing_key)
                .await?;
        }
        Ok(())
    }

    /// Replay the recovery log through the processor before any live
    /// traffic: rebuild accumulator state, restore outbound counters from
    /// the journaled destinations, and re-observe every journaled header so
    /// a post-crash redelivery is classified as duplicate.
    pub async fn recover(&self) -> WorkerResult<()> {
        let mut core = self.core.lock().await;
        let Core {
            processor,
            sequencer,
            dedup,
            log,
        } = &mut *core;

        let records = log.replay()?;
        if records.is_empty() {
            return Ok(());
        }
        info!(
            worker_uuid = self.stage.uuid,
            records = records.len(),
            "replaying recovery log"
        );

        for record in records {
            dedup.is_duplicate(record.header.sequence, &record.header.client_id);
            for destination in &record.destinations {
                sequencer.recover_id(destination, &record.header.client_id);
            }

            let finished = {
                let mut ctx = self.context(sequencer, 0);
                processor
                    .process(&mut ctx, &record.header, &record.payload, ProcessMode::Replay)
                    .await;
                ctx.finished
            };
            if let Some(client) = finished {
                sequencer.purge_client(&client);
            }
        }
        Ok(())
    }

    /// Declare, init, recover, then consume until a termination signal or
    /// until every input stream ends.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            worker_uuid = self.stage.uuid,
            shard = self.stage.id,
            instance = %self.instance,
            kind = ?self.stage.kind,
            "worker starting"
        );

        self.declare_topology().await?;
        self.core.lock().await.processor.init()?;
        self.recover().await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("termination signal received, stopping intake");
            let _ = shutdown_tx.send(true);
        });

        let mut loops: Vec<JoinHandle<WorkerResult<()>>> = Vec::new();
        for index in 0..self.topology.inputs.len() {
            let worker = self.clone();
            let shutdown = shutdown_rx.clone();
            loops.push(tokio::spawn(async move {
                worker.consume_loop(index, shutdown).await
            }));
        }

        let mut failure = None;
        for handle in loops {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "consumption loop failed");
                    failure.get_or_insert(e);
                }
                Err(e) => error!(error = %e, "consumption task aborted"),
            }
        }

        if let Err(e) = self.broker.close().await {
            debug!(error = %e, "broker close failed");
        }
        info!(
            accepted = self.stats.accepted.load(Ordering::Relaxed),
            duplicates = self.stats.duplicates.load(Ordering::Relaxed),
            "worker stopped"
        );
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn consume_loop(
        &self,
        input: usize,
        mut shutdown: watch::Receiver<bool>,
    ) -> WorkerResult<()> {
        let route = &self.topology.inputs[input];
        let tag = format!("steamline-{}-{}", self.instance, input);
        let mut deliveries = self.broker.consume(&route.queue, &tag).await?;
        info!(queue = %route.queue, routing_key = %route.routing_key, "consuming");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => self.handle_delivery(input, delivery).await,
                    Some(Err(e)) => {
                        warn!(error = %e, queue = %route.queue, "dropping undecodable delivery");
                    }
                    None => break,
                },
            }
        }
        Ok(())
    }

    /// Process one delivery end to end: dedup check, state machine, journal
    /// append, ack. Duplicates are acked without side effects. A delivery
    /// whose journal append fails is left unacked so the broker hands it
    /// back after a restart.
    pub async fn handle_delivery(&self, input: usize, delivery: Delivery) {
        let Delivery {
            delivery_tag,
            header,
            body,
        } = delivery;

        {
            let mut core = self.core.lock().await;
            let Core {
                processor,
                sequencer,
                dedup,
                log,
            } = &mut *core;

            if dedup.is_duplicate(header.sequence, &header.client_id) {
                self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                debug!(
                    client_id = %header.client_id,
                    sequence = %header.sequence,
                    "duplicate delivery dropped"
                );
            } else {
                let (destinations, finished) = {
                    let mut ctx = self.context(sequencer, input);
                    let destinations = processor
                        .process(&mut ctx, &header, &body, ProcessMode::Live)
                        .await;
                    (destinations, ctx.finished)
                };

                let record = RecoveryRecord::new(header, destinations, body);
                if let Err(e) = log.append(&record) {
                    // a replay would miss this record; left unacked, the
                    // broker redelivers it after restart and the re-publishes
                    // read as duplicates downstream
                    error!(error = %e, "recovery log append failed, leaving delivery unacked");
                    return;
                }
                // dedup watermarks are kept so a stale redelivery for the
                // finished client still reads as duplicate
                if let Some(client) = finished {
                    sequencer.purge_client(&client);
                    info!(client_id = %client, "client session complete");
                }
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Err(e) = self.broker.ack(delivery_tag).await {
            error!(error = %e, delivery_tag, "ack failed");
        }
    }

    fn context<'a>(
        &'a self,
        sequencer: &'a mut SequenceGenerator,
        input: usize,
    ) -> StageContext<'a> {
        StageContext {
            broker: self.broker.as_ref(),
            sequencer,
            outputs: &self.topology.outputs,
            eof_destinations: &self.topology.eof_destinations,
            input: &self.topology.inputs[input],
            id: self.stage.id,
            uuid: self.stage.uuid,
            peers: self.stage.peers,
            expected_eofs: self.stage.expected_eofs,
            finished: None,
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
