//! Pipeline orchestration.
//!
//! One task per stage:
//!
//! - producer: source → normalizer → scorer, then hands each scored event
//!   to the broadcast queue (never blocks, drops when full) and to the
//!   persistence queue (blocks when full)
//! - writer: drains the persistence queue into the [`Store`]
//! - broadcaster: drains the broadcast queue into the [`Broadcaster`]
//!
//! Every stage watches its own stop signal. Shutdown stops them in the
//! order producer → broadcaster → writer, and the writer gets a bounded
//! grace period to flush what is already queued. A stage that ends or
//! panics before it is told to stop moves the run to `Failed`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;
use crate::core::broadcaster::Broadcaster;
use crate::core::event::{EventOut, ScoredEvent};
use crate::core::normalizer::Normalizer;
use crate::core::scorer::{sanitize_score, Scorer};
use crate::core::source::Source;
use crate::core::stats::PipelineStats;
use crate::core::store::{Store, StoreError};
use crate::models::PipelineConfig;
use crate::utils::now_secs_f64;

/// Lifecycle of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Starting,
    Running,
    Draining,
    Stopped,
    /// A stage exited on its own while the run was live
    Failed,
}

/// Startup failures. Nothing raised by a running stage ends up here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Store initialization failed: {0}")]
    StoreInit(#[from] StoreError),
    #[error("Invalid queue capacity for {0}: must be greater than zero")]
    InvalidCapacity(&'static str),
}

/// Sending half of the bounded persistence queue.
///
/// `send` waits for free space; nothing is ever dropped here.
#[derive(Debug, Clone)]
pub struct PersistQueue {
    tx: mpsc::Sender<ScoredEvent>,
}

pub fn persist_queue(capacity: usize) -> Result<(PersistQueue, mpsc::Receiver<ScoredEvent>), PipelineError> {
    if capacity == 0 {
        return Err(PipelineError::InvalidCapacity("persistence queue"));
    }
    let (tx, rx) = mpsc::channel(capacity);
    Ok((PersistQueue { tx }, rx))
}

impl PersistQueue {
    /// Enqueue, waiting while the queue is full. Fails only when the writer is gone.
    pub async fn send(&self, item: ScoredEvent) -> Result<(), ScoredEvent> {
        let result = self.tx.send(item).await.map_err(|e| e.0);
        metrics::gauge!("persist_queue_depth", self.len() as f64);
        result
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// A configured pipeline that has not been started yet
pub struct Pipeline {
    config: PipelineConfig,
    source: Box<dyn Source>,
    normalizer: Normalizer,
    scorer: Arc<dyn Scorer>,
    store: Arc<dyn Store>,
    broadcaster: Arc<Broadcaster>,
    stats: Arc<PipelineStats>,
    state: Arc<watch::Sender<PipelineState>>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        source: Box<dyn Source>,
        normalizer: Normalizer,
        scorer: Arc<dyn Scorer>,
        store: Arc<dyn Store>,
        broadcaster: Arc<Broadcaster>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        Self {
            config,
            source,
            normalizer,
            scorer,
            store,
            broadcaster,
            stats,
            state: Arc::new(state),
        }
    }

    /// Subscribe to lifecycle changes.
    pub fn state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Initialize storage and queues, then launch all stages.
    ///
    /// Store initialization failures and zero capacities abort startup and
    /// leave the pipeline `Stopped`.
    pub async fn start(self) -> Result<RunningPipeline, PipelineError> {
        let run_id = Uuid::new_v4();
        self.state.send_replace(PipelineState::Starting);
        log::info!("Starting pipeline run {} (store: {})", run_id, self.store.backend_type());

        if let Err(e) = self.store.init().await {
            log::error!("Pipeline run {} aborted: {}", run_id, e);
            self.state.send_replace(PipelineState::Stopped);
            return Err(e.into());
        }
        let (persist_tx, persist_rx) = match persist_queue(self.config.persist_queue_capacity) {
            Ok(queue) => queue,
            Err(e) => {
                self.state.send_replace(PipelineState::Stopped);
                return Err(e);
            }
        };
        if self.config.broadcast_queue_capacity == 0 {
            self.state.send_replace(PipelineState::Stopped);
            return Err(PipelineError::InvalidCapacity("broadcast queue"));
        }
        let (broadcast_tx, broadcast_rx) = mpsc::channel(self.config.broadcast_queue_capacity);

        let producer = Producer {
            source: self.source,
            normalizer: self.normalizer,
            scorer: self.scorer,
            stats: self.stats.clone(),
            persist: persist_tx,
            broadcast: broadcast_tx,
        };
        let producer = Stage::spawn("producer", &self.state, |stop| producer.run(stop));

        let broadcaster = self.broadcaster;
        let fan_out = Stage::spawn("broadcaster", &self.state, |stop| run_broadcaster(broadcaster, broadcast_rx, stop));

        let drain_timeout = Duration::from_secs(self.config.drain_timeout_secs);
        let writer = Writer {
            store: self.store,
            stats: self.stats,
            drain_timeout,
        };
        let writer = Stage::spawn("writer", &self.state, |stop| writer.run(persist_rx, stop));

        // a stage may already have failed while starting
        let running = self.state.send_if_modified(|state| {
            if *state == PipelineState::Starting {
                *state = PipelineState::Running;
                true
            } else {
                false
            }
        });
        if running {
            log::info!("Pipeline run {} running", run_id);
        }
        Ok(RunningPipeline {
            run_id,
            state: self.state,
            producer,
            broadcaster: fan_out,
            writer,
            drain_timeout,
        })
    }
}

/// A started stage and its stop signal
struct Stage {
    name: &'static str,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Stage {
    /// Spawn a stage under supervision.
    ///
    /// # Arguments
    ///
    /// * `name` - Stage name used in logs
    /// * `state` - Run state, set to `Failed` if the stage exits before it is stopped
    /// * `run` - Builds the stage future from its stop signal
    fn spawn<F, Fut>(name: &'static str, state: &Arc<watch::Sender<PipelineState>>, run: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (stop, stop_rx) = watch::channel(false);
        let requested = stop_rx.clone();
        let state = state.clone();
        let stage = run(stop_rx);
        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(stage).catch_unwind().await;
            if *requested.borrow() {
                return;
            }
            let live = matches!(*state.borrow(), PipelineState::Starting | PipelineState::Running);
            if !live {
                return;
            }
            match outcome {
                Ok(()) => log::error!("{} exited unexpectedly", name),
                Err(panic) => log::error!("{} panicked: {}", name, panic_message(panic.as_ref())),
            }
            metrics::increment_counter!("pipeline_stage_failures_total", "stage" => name);
            state.send_if_modified(|current| {
                if matches!(*current, PipelineState::Starting | PipelineState::Running) {
                    *current = PipelineState::Failed;
                    true
                } else {
                    false
                }
            });
        });
        Self { name, stop, handle }
    }

    /// Signal the stage and wait for it, aborting after `grace` if given.
    async fn stop(mut self, grace: Option<Duration>) {
        self.stop.send_replace(true);
        let result = match grace {
            Some(grace) => match tokio::time::timeout(grace, &mut self.handle).await {
                Ok(result) => result,
                Err(_) => {
                    log::warn!("{} did not stop within {:?}, aborting", self.name, grace);
                    self.handle.abort();
                    return;
                }
            },
            None => (&mut self.handle).await,
        };
        match result {
            Ok(()) => log::debug!("{} stopped", self.name),
            Err(e) if e.is_cancelled() => log::debug!("{} cancelled", self.name),
            Err(e) => log::error!("{} task failed: {}", self.name, e),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Handle to a running pipeline
pub struct RunningPipeline {
    run_id: Uuid,
    state: Arc<watch::Sender<PipelineState>>,
    producer: Stage,
    broadcaster: Stage,
    writer: Stage,
    drain_timeout: Duration,
}

impl RunningPipeline {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Drain and stop every stage. Returns once the run is `Stopped`.
    pub async fn shutdown(self) {
        log::info!("Draining pipeline run {}", self.run_id);
        self.state.send_replace(PipelineState::Draining);

        self.producer.stop(None).await;
        self.broadcaster.stop(None).await;
        // the writer flushes under its own timeout; the extra second covers a hung append
        self.writer
            .stop(Some(self.drain_timeout + Duration::from_secs(1)))
            .await;

        self.state.send_replace(PipelineState::Stopped);
        log::info!("Pipeline run {} stopped", self.run_id);
    }
}

struct Producer {
    source: Box<dyn Source>,
    normalizer: Normalizer,
    scorer: Arc<dyn Scorer>,
    stats: Arc<PipelineStats>,
    persist: PersistQueue,
    broadcast: mpsc::Sender<Arc<str>>,
}

impl Producer {
    async fn run(mut self, mut stop: watch::Receiver<bool>) {
        log::info!("Producer reading from {:?} source", self.source.kind());
        loop {
            let raw = tokio::select! {
                biased;
                _ = stop.changed() => break,
                raw = self.source.next() => raw,
            };

            let normalized = tokio::select! {
                biased;
                _ = stop.changed() => break,
                result = self.normalizer.normalize(raw, now_secs_f64()) => result,
            };
            let event = match normalized {
                Ok(event) => event,
                Err(e) => {
                    log::debug!("Skipping malformed event: {}", e);
                    self.stats.record_malformed();
                    continue;
                }
            };

            let scorer = &self.scorer;
            let score = match std::panic::catch_unwind(AssertUnwindSafe(|| scorer.score(&event))) {
                Ok(score) => sanitize_score(score),
                Err(panic) => {
                    log::error!(
                        "Scorer panicked on event at {}: {}",
                        event.timestamp,
                        panic_message(panic.as_ref())
                    );
                    metrics::increment_counter!("scorer_failures_total");
                    0.0
                }
            };
            self.stats.record_event(event.bytes);
            let scored = ScoredEvent::new(event, score);

            self.publish(&scored);

            let sent = tokio::select! {
                biased;
                _ = stop.changed() => break,
                sent = self.persist.send(scored) => sent,
            };
            if sent.is_err() {
                log::warn!("Persistence queue closed, producer exiting");
                break;
            }
        }
    }

    /// Hand the serialized payload to the broadcast stage without waiting.
    fn publish(&self, scored: &ScoredEvent) {
        let payload = match serde_json::to_string(&EventOut::from(scored)) {
            Ok(json) => Arc::<str>::from(json),
            Err(e) => {
                log::warn!("Failed to serialize broadcast payload: {}", e);
                return;
            }
        };
        match self.broadcast.try_send(payload) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => self.stats.record_broadcast_dropped(),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::debug!("Broadcast queue closed, payload discarded");
            }
        }
    }
}

struct Writer {
    store: Arc<dyn Store>,
    stats: Arc<PipelineStats>,
    drain_timeout: Duration,
}

impl Writer {
    async fn run(self, mut rx: mpsc::Receiver<ScoredEvent>, mut stop: watch::Receiver<bool>) {
        loop {
            let item = tokio::select! {
                biased;
                _ = stop.changed() => break,
                item = rx.recv() => item,
            };
            match item {
                Some(scored) => self.persist(&scored).await,
                None => return,
            }
        }

        rx.close();
        let flushed = tokio::time::timeout(self.drain_timeout, async {
            let mut flushed = 0usize;
            while let Some(scored) = rx.recv().await {
                self.persist(&scored).await;
                flushed += 1;
            }
            flushed
        })
        .await;
        match flushed {
            Ok(count) => log::info!("Writer flushed {} queued events", count),
            Err(_) => log::warn!(
                "Writer drain timed out after {:?}, remaining events dropped",
                self.drain_timeout
            ),
        }
    }

    /// Store failures are logged and counted; the next event is processed regardless.
    async fn persist(&self, scored: &ScoredEvent) {
        match self.store.append(&scored.event, scored.score).await {
            Ok(()) => self.stats.record_persisted(),
            Err(e) => {
                log::error!("Store append failed: {}", e);
                self.stats.record_store_failure();
            }
        }
    }
}

async fn run_broadcaster(
    broadcaster: Arc<Broadcaster>,
    mut rx: mpsc::Receiver<Arc<str>>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = stop.changed() => break,
            message = rx.recv() => message,
        };
        match message {
            Some(message) => {
                broadcaster.fan_out(&message);
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use async_trait::async_trait;
    use tokio_test::{assert_pending, assert_ready};
    use crate::core::event::{CanonicalEvent, IpFlowRecord, RawEvent};
    use crate::core::reputation::ReputationLookup;
    use crate::core::scorer::LogisticScorer;
    use crate::core::source::SourceKind;
    use crate::core::store::MemoryStore;
    use crate::core::rate_estimator::RateEstimator;

    fn scored(ts: i64) -> ScoredEvent {
        let raw = serde_json::json!({
            "timestamp": ts,
            "source": {"ip": null, "country": "US", "asn": null, "geo": {"lat": 1.0, "lon": 2.0}},
            "destination": {"ip": null, "country": "IT", "asn": null, "geo": {"lat": 3.0, "lon": 4.0}},
            "packets_per_second": 1,
            "bits_per_second": 8.0,
            "bytes": 1.0,
            "action": "allow",
            "vector": "SYN",
            "reputation_score": 0
        });
        let event: CanonicalEvent = serde_json::from_value(raw).unwrap();
        ScoredEvent::new(event, 0.5)
    }

    /// Endless source of flow records for one IP, then idle forever
    struct FixedSource {
        remaining: Vec<RawEvent>,
    }

    #[async_trait]
    impl Source for FixedSource {
        async fn next(&mut self) -> RawEvent {
            match self.remaining.pop() {
                Some(event) => event,
                None => std::future::pending().await,
            }
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Mock
        }
    }

    fn flows(count: usize) -> Box<dyn Source> {
        let mut remaining: Vec<RawEvent> = (0..count)
            .map(|i| {
                RawEvent::IpFlow(IpFlowRecord {
                    timestamp: Some(1_700_000_000 + i as i64),
                    src_ip: Some(format!("10.0.0.{}", i % 200)),
                    src_country: Some("US".to_string()),
                    ..Default::default()
                })
            })
            .collect();
        remaining.reverse();
        Box::new(FixedSource { remaining })
    }

    fn pipeline(source: Box<dyn Source>, store: Arc<dyn Store>, config: PipelineConfig) -> (Pipeline, Arc<Broadcaster>, Arc<PipelineStats>) {
        let broadcaster = Arc::new(Broadcaster::new(config.subscriber_buffer));
        let stats = Arc::new(PipelineStats::new());
        let normalizer = Normalizer::new(
            RateEstimator::default(),
            Arc::new(ReputationLookup::disabled()),
            "IT",
        );
        let pipeline = Pipeline::new(
            config,
            source,
            normalizer,
            Arc::new(LogisticScorer::default()),
            store,
            broadcaster.clone(),
            stats.clone(),
        );
        (pipeline, broadcaster, stats)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_persist_queue_blocks_when_full() {
        let (queue, mut rx) = persist_queue(2).unwrap();
        queue.send(scored(1)).await.unwrap();
        queue.send(scored(2)).await.unwrap();
        assert_eq!(queue.len(), 2);

        let mut third = tokio_test::task::spawn(queue.send(scored(3)));
        assert_pending!(third.poll());
        assert_eq!(queue.len(), queue.capacity());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event.timestamp, 1);
        assert!(third.is_woken());
        assert_ready!(third.poll()).unwrap();
        drop(third);

        // FIFO, nothing dropped
        assert_eq!(rx.recv().await.unwrap().event.timestamp, 2);
        assert_eq!(rx.recv().await.unwrap().event.timestamp, 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(persist_queue(0), Err(PipelineError::InvalidCapacity(_))));
    }

    #[tokio::test]
    async fn test_events_persisted_in_source_order() {
        let store = Arc::new(MemoryStore::new());
        let (pipeline, _, stats) = pipeline(flows(25), store.clone(), PipelineConfig::default());
        let mut state = pipeline.state();
        assert_eq!(*state.borrow_and_update(), PipelineState::Idle);

        let running = pipeline.start().await.unwrap();
        assert_eq!(*running.state().borrow(), PipelineState::Running);

        wait_for(|| store.rows().len() == 25).await;
        let timestamps: Vec<i64> = store.rows().iter().map(|row| row.timestamp).collect();
        let expected: Vec<i64> = (0..25).map(|i| 1_700_000_000 + i).collect();
        assert_eq!(timestamps, expected);
        assert!(store.rows().iter().all(|row| (0.0..=1.0).contains(&row.score)));
        assert_eq!(stats.events(), 25);

        let mut final_state = running.state();
        running.shutdown().await;
        assert_eq!(*final_state.borrow_and_update(), PipelineState::Stopped);
    }

    #[tokio::test]
    async fn test_malformed_events_are_skipped() {
        let mut remaining = vec![
            RawEvent::IpFlow(IpFlowRecord {
                timestamp: Some(2),
                src_ip: Some("1.2.3.4".to_string()),
                ..Default::default()
            }),
            RawEvent::IpFlow(IpFlowRecord {
                timestamp: None,
                src_ip: Some("1.2.3.4".to_string()),
                ..Default::default()
            }),
        ];
        remaining.reverse();
        let store = Arc::new(MemoryStore::new());
        let (pipeline, _, stats) = pipeline(Box::new(FixedSource { remaining }), store.clone(), PipelineConfig::default());
        let running = pipeline.start().await.unwrap();

        wait_for(|| store.rows().len() == 1).await;
        assert_eq!(stats.snapshot().malformed, 1);
        running.shutdown().await;
    }

    struct BrokenStore;

    #[async_trait]
    impl Store for BrokenStore {
        async fn init(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn append(&self, _event: &CanonicalEvent, _score: f64) -> Result<(), StoreError> {
            Err(StoreError::NotInitialized)
        }

        async fn row_count(&self) -> Result<u64, StoreError> {
            Ok(0)
        }

        fn backend_type(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_store_init_failure_is_fatal() {
        let (pipeline, _, _) = pipeline(flows(1), Arc::new(BrokenStore), PipelineConfig::default());
        let state = pipeline.state();
        let result = pipeline.start().await;
        assert!(matches!(result, Err(PipelineError::StoreInit(_))));
        assert_eq!(*state.borrow(), PipelineState::Stopped);
    }

    #[tokio::test]
    async fn test_zero_broadcast_capacity_is_fatal() {
        let config = PipelineConfig {
            broadcast_queue_capacity: 0,
            ..PipelineConfig::default()
        };
        let (pipeline, _, _) = pipeline(flows(1), Arc::new(MemoryStore::new()), config);
        assert!(matches!(
            pipeline.start().await,
            Err(PipelineError::InvalidCapacity("broadcast queue"))
        ));
    }

    /// Panics on its second call only
    struct FailsOnceScorer {
        calls: AtomicUsize,
    }

    impl Scorer for FailsOnceScorer {
        fn score(&self, _event: &CanonicalEvent) -> f64 {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
                panic!("model weights unavailable");
            }
            0.7
        }
    }

    #[tokio::test]
    async fn test_scorer_panic_scores_neutral_and_keeps_running() {
        let store = Arc::new(MemoryStore::new());
        let config = PipelineConfig::default();
        let stats = Arc::new(PipelineStats::new());
        let normalizer = Normalizer::new(
            RateEstimator::default(),
            Arc::new(ReputationLookup::disabled()),
            "IT",
        );
        let pipeline = Pipeline::new(
            config,
            flows(5),
            normalizer,
            Arc::new(FailsOnceScorer { calls: AtomicUsize::new(0) }),
            store.clone(),
            Arc::new(Broadcaster::new(8)),
            stats.clone(),
        );
        let running = pipeline.start().await.unwrap();

        wait_for(|| store.rows().len() == 5).await;
        let scores: Vec<f64> = store.rows().iter().map(|row| row.score).collect();
        assert_eq!(scores, vec![0.7, 0.0, 0.7, 0.7, 0.7]);
        assert_eq!(stats.events(), 5);
        assert_eq!(*running.state().borrow(), PipelineState::Running);
        running.shutdown().await;
    }

    struct PanickingSource;

    #[async_trait]
    impl Source for PanickingSource {
        async fn next(&mut self) -> RawEvent {
            panic!("upstream decoder bug");
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Mock
        }
    }

    #[tokio::test]
    async fn test_stage_panic_marks_run_failed() {
        let (pipeline, _, _) = pipeline(Box::new(PanickingSource), Arc::new(MemoryStore::new()), PipelineConfig::default());
        let mut state = pipeline.state();
        let running = pipeline.start().await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| *s == PipelineState::Failed))
            .await
            .expect("run never failed")
            .unwrap();

        // shutdown still completes cleanly
        running.shutdown().await;
        assert_eq!(*state.borrow_and_update(), PipelineState::Stopped);
    }

    #[tokio::test]
    async fn test_requested_stop_is_not_a_failure() {
        let (pipeline, _, _) = pipeline(flows(2), Arc::new(MemoryStore::new()), PipelineConfig::default());
        let mut state = pipeline.state();
        let running = pipeline.start().await.unwrap();
        running.shutdown().await;
        assert_eq!(*state.borrow_and_update(), PipelineState::Stopped);
    }

    #[tokio::test]
    async fn test_live_delivery_to_subscribers() {
        let store = Arc::new(MemoryStore::new());
        let (pipeline, broadcaster, _) = pipeline(flows(3), store.clone(), PipelineConfig::default());
        let (_, mut rx) = broadcaster.subscribe();
        let running = pipeline.start().await.unwrap();

        for i in 0..3 {
            let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            let payload: EventOut = serde_json::from_str(&message).unwrap();
            assert_eq!(payload.ts, 1_700_000_000 + i);
            assert_eq!(payload.src.country, "US");
            assert_eq!(payload.dst.country, "IT");
        }
        running.shutdown().await;
    }
}
