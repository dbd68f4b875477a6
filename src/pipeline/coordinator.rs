//! Pipeline coordinator: one entry point per turn.
//!
//! Wires the segmenter, the worker pool and the publisher together for a turn,
//! supervises their tasks, and exposes the published units as a stream.
//! Dropping the stream aborts every task of the turn.

use crate::collaborators::{
    CollectorStatusSink, ConversationMemory, EmotionClassifier, FragmentStream,
    InMemoryConversation, NullStatusSink, PassthroughClassifier, PassthroughSynthesizer,
    PassthroughTranslator, Role, StatusSink, Translator, VoiceSynthesizer,
};
use crate::config::Config;
use crate::defaults;
use crate::error::{ReplyError, Result};
use crate::pipeline::error::{ErrorReporter, LogReporter, StationError};
use crate::pipeline::publisher::Publisher;
use crate::pipeline::queue::WorkQueue;
use crate::pipeline::segmenter::Segmenter;
use crate::pipeline::slots::SlotTable;
use crate::pipeline::types::{ClientNotice, Publication, ReplyUnit};
use crate::pipeline::worker::{Enricher, EnrichmentSettings, Worker};
use futures_util::stream::BoxStream;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Stream of reply units for one turn, ended by exactly one `is_final` unit.
pub type ReplyStream = BoxStream<'static, ReplyUnit>;

/// Configuration for the reply pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Enrichment workers per turn
    pub workers: usize,
    /// Maximum units in flight between segmenter and workers
    pub queue_capacity: usize,
    pub enrichment: EnrichmentSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: defaults::WORKERS,
            queue_capacity: defaults::queue_capacity(defaults::WORKERS),
            enrichment: EnrichmentSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Builds the pipeline config from the file/env config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.pipeline.workers.max(1),
            queue_capacity: config.pipeline.effective_queue_capacity().max(1),
            enrichment: EnrichmentSettings::from(&config.enrichment),
        }
    }

    /// Sets the worker count. Queue capacity is left as is.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_enrichment(mut self, enrichment: EnrichmentSettings) -> Self {
        self.enrichment = enrichment;
        self
    }
}

/// External services a turn talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub classifier: Arc<dyn EmotionClassifier>,
    pub translator: Arc<dyn Translator>,
    pub synthesizer: Arc<dyn VoiceSynthesizer>,
    pub memory: Arc<dyn ConversationMemory>,
    pub status: Arc<dyn StatusSink>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::passthrough()
    }
}

impl Collaborators {
    /// Collaborators that need no external services.
    pub fn passthrough() -> Self {
        Self {
            classifier: Arc::new(PassthroughClassifier),
            translator: Arc::new(PassthroughTranslator),
            synthesizer: Arc::new(PassthroughSynthesizer),
            memory: Arc::new(InMemoryConversation::new()),
            status: Arc::new(NullStatusSink),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn EmotionClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = translator;
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn VoiceSynthesizer>) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn ConversationMemory>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_status(mut self, status: Arc<dyn StatusSink>) -> Self {
        self.status = status;
        self
    }

    /// Same as [`passthrough`](Self::passthrough) but keeps handles to the
    /// memory and status sink for inspection.
    pub fn recording() -> (Self, Arc<InMemoryConversation>, Arc<CollectorStatusSink>) {
        let memory = Arc::new(InMemoryConversation::new());
        let status = Arc::new(CollectorStatusSink::new());
        let collaborators = Self::passthrough()
            .with_memory(memory.clone())
            .with_status(status.clone());
        (collaborators, memory, status)
    }
}

/// Input of one turn.
pub struct TurnRequest {
    /// The user message this turn answers, echoed on every unit.
    pub user_message: String,
    /// Display name of the speaking character.
    pub speaker: Option<String>,
    pub fragments: FragmentStream,
    /// Cancels the turn when triggered.
    pub cancel: CancellationToken,
}

impl TurnRequest {
    pub fn new(user_message: impl Into<String>, fragments: FragmentStream) -> Self {
        Self {
            user_message: user_message.into(),
            speaker: None,
            fragments,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Lifecycle of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Streaming,
    Draining,
    Completed,
    Errored,
    Cancelled,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnState::Idle => "idle",
            TurnState::Streaming => "streaming",
            TurnState::Draining => "draining",
            TurnState::Completed => "completed",
            TurnState::Errored => "errored",
            TurnState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Decrements the live turn count when the turn context goes away.
struct LiveTurnGuard(Arc<AtomicUsize>);

impl LiveTurnGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveTurnGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Everything one turn owns. Dropping it aborts the turn's tasks.
struct TurnContext {
    state: TurnState,
    slots: Arc<SlotTable>,
    queue: WorkQueue,
    workers: JoinSet<()>,
    worker_count: usize,
    segmenter: JoinHandle<Result<String>>,
    segmenter_open: bool,
    publisher: JoinHandle<Result<()>>,
    publisher_open: bool,
    output: mpsc::Receiver<Publication>,
    _live: LiveTurnGuard,
}

impl TurnContext {
    fn transition(&mut self, next: TurnState) {
        tracing::debug!(from = %self.state, to = %next, "turn state");
        self.state = next;
    }

    /// Why the publisher stopped without releasing the final index.
    async fn publisher_failure(&mut self) -> ReplyError {
        self.publisher_open = false;
        match (&mut self.publisher).await {
            Ok(Err(e)) => e,
            Ok(Ok(())) => ReplyError::TaskFailed {
                task: "publisher".to_string(),
                message: "stopped before the final unit".to_string(),
            },
            Err(e) => task_failed("publisher", e),
        }
    }

    /// Aborts every task still running and waits until all of them are gone.
    async fn shutdown(&mut self) {
        self.segmenter.abort();
        self.publisher.abort();

        if self.segmenter_open {
            self.segmenter_open = false;
            if let Err(e) = (&mut self.segmenter).await
                && !e.is_cancelled()
            {
                tracing::warn!(error = %e, "segmenter ended abnormally");
            }
        }
        if self.publisher_open {
            self.publisher_open = false;
            if let Err(e) = (&mut self.publisher).await
                && !e.is_cancelled()
            {
                tracing::warn!(error = %e, "publisher ended abnormally");
            }
        }
        self.workers.shutdown().await;
    }
}

impl Drop for TurnContext {
    fn drop(&mut self) {
        // No-op after shutdown(); matters when the caller drops the stream.
        // JoinSet aborts the workers on drop.
        self.segmenter.abort();
        self.publisher.abort();
    }
}

fn task_failed(task: &str, e: JoinError) -> ReplyError {
    let message = if e.is_panic() {
        let panic = e.into_panic();
        panic
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic.downcast_ref::<String>().map(|s| s.as_str()))
            .unwrap_or("unknown panic")
            .to_string()
    } else {
        e.to_string()
    };
    ReplyError::TaskFailed {
        task: task.to_string(),
        message,
    }
}

/// What woke the coordinator.
enum TurnEvent {
    Cancelled,
    Published(Option<Publication>),
    SegmenterDone(std::result::Result<Result<String>, JoinError>),
    WorkerExited(std::result::Result<(), JoinError>),
}

/// How the streaming phase ended.
enum Outcome {
    Completed(ReplyUnit),
    Failed(ReplyError),
    Cancelled,
}

/// The ordered streaming reply pipeline.
///
/// Cheap to clone; clones share the task tracker and turn counter.
#[derive(Clone)]
pub struct ReplyPipeline {
    config: PipelineConfig,
    collaborators: Collaborators,
    reporter: Arc<dyn ErrorReporter>,
    tracker: TaskTracker,
    live_turns: Arc<AtomicUsize>,
}

impl ReplyPipeline {
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
            reporter: Arc::new(LogReporter),
            tracker: TaskTracker::new(),
            live_turns: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sets a custom error reporter.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Pipeline tasks (segmenters, workers, publishers) still alive across all turns.
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Turns whose context has not been torn down yet.
    pub fn live_turns(&self) -> usize {
        self.live_turns.load(Ordering::SeqCst)
    }

    /// Runs one turn. Tasks start on the first poll of the returned stream.
    pub fn run_turn(&self, request: TurnRequest) -> ReplyStream {
        let pipeline = self.clone();
        Box::pin(async_stream::stream! {
            let TurnRequest {
                user_message,
                speaker,
                fragments,
                cancel,
            } = request;

            let mut turn = pipeline.start(fragments, &user_message, speaker.clone());
            turn.transition(TurnState::Streaming);

            let mut last_seen: Option<u64> = None;
            // Set once the segmenter failed; the units it already queued are
            // still released before the error unit.
            let mut source_failure: Option<(ReplyError, u64)> = None;
            let mut raw_text: Option<String> = None;

            let outcome = loop {
                if let Some((_, dispatched)) = &source_failure {
                    let released = last_seen.map_or(0, |i| i + 1);
                    if released >= *dispatched {
                        break source_failure.take().map_or(Outcome::Cancelled, |(e, _)| Outcome::Failed(e));
                    }
                }

                let segmenter_open = turn.segmenter_open;
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => TurnEvent::Cancelled,
                    publication = turn.output.recv() => TurnEvent::Published(publication),
                    result = &mut turn.segmenter, if segmenter_open => TurnEvent::SegmenterDone(result),
                    Some(result) = turn.workers.join_next() => TurnEvent::WorkerExited(result),
                };

                match event {
                    TurnEvent::Cancelled => break Outcome::Cancelled,
                    TurnEvent::Published(Some(Publication::Unit(unit))) => {
                        last_seen = Some(unit.sequence_index);
                        if unit.is_final {
                            break Outcome::Completed(unit);
                        }
                        yield unit;
                    }
                    TurnEvent::Published(Some(Publication::Gap { sequence_index, is_final })) => {
                        last_seen = Some(sequence_index);
                        if is_final {
                            break Outcome::Completed(ReplyUnit::closing(
                                sequence_index,
                                &user_message,
                                speaker.clone(),
                            ));
                        }
                    }
                    TurnEvent::Published(None) => {
                        break Outcome::Failed(turn.publisher_failure().await);
                    }
                    TurnEvent::SegmenterDone(result) => {
                        turn.segmenter_open = false;
                        match result {
                            Ok(Ok(raw)) => raw_text = Some(raw),
                            Ok(Err(e)) => {
                                tracing::warn!(error = %e, "fragment source failed");
                                source_failure = Some((e, turn.slots.issued()));
                            }
                            Err(e) => break Outcome::Failed(task_failed("segmenter", e)),
                        }
                    }
                    TurnEvent::WorkerExited(result) => {
                        let error = match result {
                            Ok(()) => ReplyError::TaskFailed {
                                task: "worker".to_string(),
                                message: "exited before the turn ended".to_string(),
                            },
                            Err(e) => task_failed("worker", e),
                        };
                        break Outcome::Failed(error);
                    }
                }
            };

            match outcome {
                Outcome::Completed(final_unit) => {
                    // Held back until persisted so a caller stopping at is_final loses nothing.
                    turn.transition(TurnState::Draining);
                    let raw = match raw_text {
                        Some(raw) => raw,
                        None => pipeline.await_raw_text(&mut turn).await,
                    };
                    pipeline.drain(&mut turn).await;
                    pipeline.persist(&raw).await;
                    turn.transition(TurnState::Completed);
                    yield final_unit;
                }
                Outcome::Failed(error) => {
                    turn.transition(TurnState::Errored);
                    let index = last_seen.map_or(0, |i| i + 1);
                    turn.shutdown().await;
                    pipeline.report_failure(&error).await;
                    yield ReplyUnit::error(index, error.to_string(), &user_message, speaker);
                }
                Outcome::Cancelled => {
                    turn.transition(TurnState::Cancelled);
                    turn.shutdown().await;
                    tracing::info!("turn cancelled");
                }
            }
        })
    }

    /// Seeds the turn context and spawns the turn's tasks.
    fn start(
        &self,
        fragments: FragmentStream,
        user_message: &str,
        speaker: Option<String>,
    ) -> TurnContext {
        let workers = self.config.workers.max(1);
        let slots = Arc::new(SlotTable::new());
        let queue = WorkQueue::new(self.config.queue_capacity, workers);
        let (output_tx, output_rx) = mpsc::channel(self.config.queue_capacity.max(1));

        let enricher = Arc::new(Enricher {
            classifier: self.collaborators.classifier.clone(),
            translator: self.collaborators.translator.clone(),
            synthesizer: self.collaborators.synthesizer.clone(),
            settings: self.config.enrichment.clone(),
            reporter: self.reporter.clone(),
            echo_of_input: user_message.to_string(),
            speaker,
        });

        let segmenter = self.tracker.spawn(Segmenter::new().run(
            fragments,
            queue.clone(),
            slots.clone(),
        ));

        let mut worker_set = JoinSet::new();
        for id in 0..workers {
            let worker = Worker::new(id, enricher.clone());
            worker_set.spawn(self.tracker.track_future(worker.run(queue.clone())));
        }

        let publisher = self
            .tracker
            .spawn(Publisher::new(slots.clone(), output_tx).run());

        tracing::debug!(
            workers,
            queue_capacity = queue.capacity(),
            "turn started"
        );

        TurnContext {
            state: TurnState::Idle,
            slots,
            queue,
            workers: worker_set,
            worker_count: workers,
            segmenter,
            segmenter_open: true,
            publisher,
            publisher_open: true,
            output: output_rx,
            _live: LiveTurnGuard::new(self.live_turns.clone()),
        }
    }

    async fn await_raw_text(&self, turn: &mut TurnContext) -> String {
        turn.segmenter_open = false;
        match (&mut turn.segmenter).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                self.reporter
                    .report("segmenter", &StationError::Recoverable(e.to_string()));
                String::new()
            }
            Err(e) => {
                self.reporter.report(
                    "segmenter",
                    &StationError::Recoverable(task_failed("segmenter", e).to_string()),
                );
                String::new()
            }
        }
    }

    /// Waits for the queue to empty, stops the workers and joins every task.
    async fn drain(&self, turn: &mut TurnContext) {
        if let Err(e) = turn.queue.drain().await {
            self.reporter
                .report("coordinator", &StationError::Recoverable(e.to_string()));
        }
        turn.queue.stop(turn.worker_count).await;

        while let Some(result) = turn.workers.join_next().await {
            if let Err(e) = result {
                self.reporter.report(
                    "worker",
                    &StationError::Recoverable(task_failed("worker", e).to_string()),
                );
            }
        }

        if !turn.publisher_open {
            return;
        }
        turn.publisher_open = false;
        match (&mut turn.publisher).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self
                .reporter
                .report("publisher", &StationError::Recoverable(e.to_string())),
            Err(e) => self.reporter.report(
                "publisher",
                &StationError::Recoverable(task_failed("publisher", e).to_string()),
            ),
        }
    }

    async fn persist(&self, raw: &str) {
        if raw.trim().is_empty() {
            tracing::info!("no reply generated");
            return;
        }
        tracing::info!(reply = raw, "assistant reply");
        if let Err(e) = self.collaborators.memory.append(Role::Assistant, raw).await {
            self.reporter
                .report("coordinator", &StationError::Recoverable(e.to_string()));
        }
    }

    async fn report_failure(&self, error: &ReplyError) {
        self.reporter
            .report("coordinator", &StationError::Fatal(error.to_string()));
        self.collaborators
            .status
            .notify(ClientNotice::Error {
                code: error.code().to_string(),
                detail: error.to_string(),
            })
            .await;
        self.collaborators
            .status
            .notify(ClientNotice::StatusReset {
                status: defaults::INPUT_STATUS.to_string(),
            })
            .await;
    }
}
