//! Invocation orchestrator
//!
//! Drives one change event through `Start -> Reading -> Computing -> Writing
//! -> Done`, with any state able to move to `Failed`. Transient failures
//! (`StoreUnavailable`, `WriteConflict`) retry the failed step up to
//! `max_attempts` times with a fixed backoff; permanent failures fail at once.
//! A write conflict retries from a fresh read, since the stale version tokens
//! can never succeed, and that re-read is charged to the Writing step.
//!
//! `Failed` publishes a [`DeadLetter`]. `process` only returns `Err` when that
//! publish itself fails, so the caller can redeliver the event.

use crate::config::PipelineConfig;
use crate::dead_letter::{DeadLetter, DeadLetterSink};
use crate::error::{FailureKind, PipelineError, PipelineResult, Result};
use crate::metrics::{MetricsCollector, MetricsTimer};
use crate::pipeline::adapter::ChangeEventAdapter;
use crate::pipeline::reader::PlayerScoreReader;
use crate::pipeline::writer::ScoreWriter;
use crate::rating::{RatingCalculator, RatingStore};
use crate::types::{GameId, GameUpdateRequest, RatingSnapshot, RatingUpdateResult};
use crate::utils::{current_timestamp, generate_invocation_id, rating_total};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// States of a single invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Start,
    Reading,
    Computing,
    Writing,
    Done,
    Failed,
}

/// Steps that can be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Reading,
    Computing,
    Writing,
}

impl PipelineStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::Reading => "reading",
            PipelineStep::Computing => "computing",
            PipelineStep::Writing => "writing",
        }
    }
}

/// How an invocation ended
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    /// Both ratings were committed
    Applied {
        game_id: GameId,
        update: RatingUpdateResult,
    },
    /// The event was published to the dead-letter sink
    DeadLettered { kind: FailureKind, attempts: u32 },
}

impl InvocationOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, InvocationOutcome::Applied { .. })
    }
}

/// Running totals across invocations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Events handed to the orchestrator
    pub events_received: u64,
    /// Invocations that committed both ratings
    pub applied: u64,
    /// Invocations published to the dead-letter sink
    pub dead_lettered: u64,
    /// Step retries across all invocations
    pub retries: u64,
    /// Failed step attempts keyed by failure kind
    pub failures: BTreeMap<String, u64>,
    pub last_applied_at: Option<DateTime<Utc>>,
}

/// A failure together with the attempts made on the failing step
struct StepFailure {
    error: PipelineError,
    attempts: u32,
}

pub struct Orchestrator {
    adapter: ChangeEventAdapter,
    reader: PlayerScoreReader,
    writer: ScoreWriter,
    calculator: Arc<dyn RatingCalculator>,
    dead_letters: Arc<dyn DeadLetterSink>,
    config: PipelineConfig,
    metrics: Option<Arc<MetricsCollector>>,
    stats: Arc<RwLock<PipelineStats>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RatingStore>,
        calculator: Arc<dyn RatingCalculator>,
        dead_letters: Arc<dyn DeadLetterSink>,
        config: PipelineConfig,
    ) -> Self {
        let timeout = config.store_timeout();
        Self {
            adapter: ChangeEventAdapter::new(),
            reader: PlayerScoreReader::new(store.clone(), timeout),
            writer: ScoreWriter::new(store, timeout),
            calculator,
            dead_letters,
            config,
            metrics: None,
            stats: Arc::new(RwLock::new(PipelineStats::default())),
        }
    }

    /// Attach a metrics collector
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Snapshot of the running totals
    pub fn stats(&self) -> PipelineStats {
        self.stats
            .read()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    /// Process a raw message body. Bodies that are not JSON are dead-lettered
    /// with the lossy UTF-8 text as the original event.
    pub async fn process_bytes(&self, payload: &[u8]) -> Result<InvocationOutcome> {
        let event = serde_json::from_slice::<Value>(payload)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()));
        self.process(&event).await
    }

    /// Run one invocation for a change event
    pub async fn process(&self, event: &Value) -> Result<InvocationOutcome> {
        let invocation_id = generate_invocation_id();
        let span = info_span!(
            "invocation",
            invocation_id = %invocation_id,
            game_id = tracing::field::Empty
        );

        self.run(event, invocation_id).instrument(span).await
    }

    async fn run(&self, event: &Value, invocation_id: Uuid) -> Result<InvocationOutcome> {
        let started = Instant::now();
        self.update_stats(|stats| stats.events_received += 1);

        let request = match self.adapter.adapt(event) {
            Ok(request) => request,
            Err(error) => {
                warn!("Rejected change event: {}", error);
                self.note_failure(&error);
                let failure = StepFailure { error, attempts: 1 };
                return self
                    .fail(event, failure, None, invocation_id, started)
                    .await;
            }
        };
        tracing::Span::current().record("game_id", request.game_id.as_str());

        debug!(
            "Adapted game {}: {} vs {} ({})",
            request.game_id, request.player_a_id, request.player_b_id, request.result
        );

        match self.execute(&request).await {
            Ok((snapshot, update)) => Ok(self.complete(request, snapshot, update, started)),
            Err(failure) => {
                self.fail(
                    event,
                    failure,
                    Some(request.game_id.clone()),
                    invocation_id,
                    started,
                )
                .await
            }
        }
    }

    /// Reading, Computing and Writing with the retry policy applied
    async fn execute(
        &self,
        request: &GameUpdateRequest,
    ) -> std::result::Result<(RatingSnapshot, RatingUpdateResult), StepFailure> {
        let mut state = InvocationState::Start;
        self.transition(&mut state, InvocationState::Reading);

        let mut attempts = 0;
        let mut snapshot = loop {
            attempts += 1;
            match self.read(request).await {
                Ok(snapshot) => break snapshot,
                Err(error) => {
                    self.retry_or_fail(PipelineStep::Reading, error, attempts, &mut state)
                        .await?
                }
            }
        };

        let mut attempts = 0;
        let mut refresh = false;
        loop {
            attempts += 1;
            match self
                .compute_and_write(request, &mut snapshot, &mut refresh, &mut state)
                .await
            {
                Ok(update) => {
                    self.transition(&mut state, InvocationState::Done);
                    return Ok((snapshot, update));
                }
                Err(error) => {
                    // The snapshot stays stale until a re-read succeeds
                    if matches!(error, PipelineError::WriteConflict { .. }) {
                        refresh = true;
                    }
                    self.retry_or_fail(PipelineStep::Writing, error, attempts, &mut state)
                        .await?
                }
            }
        }
    }

    /// One Writing-step attempt, re-reading first after a conflict
    async fn compute_and_write(
        &self,
        request: &GameUpdateRequest,
        snapshot: &mut RatingSnapshot,
        refresh: &mut bool,
        state: &mut InvocationState,
    ) -> PipelineResult<RatingUpdateResult> {
        if *refresh {
            debug!("Re-reading ratings after write conflict");
            *snapshot = self.read(request).await?;
            *refresh = false;
        }

        self.transition(state, InvocationState::Computing);
        let timer = MetricsTimer::new();
        let update = self.calculator.calculate(
            snapshot.player_a.rating,
            snapshot.player_b.rating,
            request.result,
        );
        self.record_step(PipelineStep::Computing, timer);

        self.transition(state, InvocationState::Writing);
        let timer = MetricsTimer::new();
        let written = self.writer.write(snapshot, &update).await;
        self.record_step(PipelineStep::Writing, timer);
        written?;

        info!(
            "Applied game {}: {} {} -> {}, {} {} -> {}",
            request.game_id,
            snapshot.player_a.player_id,
            snapshot.player_a.rating,
            update.new_rating_a,
            snapshot.player_b.player_id,
            snapshot.player_b.rating,
            update.new_rating_b
        );
        let drift = rating_total(update.new_rating_a, update.new_rating_b)
            - rating_total(snapshot.player_a.rating, snapshot.player_b.rating);
        if drift != 0 {
            debug!("Rounding moved the rating total by {}", drift);
        }

        Ok(update)
    }

    async fn read(&self, request: &GameUpdateRequest) -> PipelineResult<RatingSnapshot> {
        let timer = MetricsTimer::new();
        let result = self
            .reader
            .read(&request.player_a_id, &request.player_b_id)
            .await;
        self.record_step(PipelineStep::Reading, timer);
        result
    }

    /// Sleep and continue when the step may be retried, otherwise fail
    async fn retry_or_fail(
        &self,
        step: PipelineStep,
        error: PipelineError,
        attempts: u32,
        state: &mut InvocationState,
    ) -> std::result::Result<(), StepFailure> {
        self.note_failure(&error);

        if !error.is_transient() || attempts >= self.config.max_attempts {
            warn!(
                "Step {} failed after {} attempt(s): {}",
                step.as_str(),
                attempts,
                error
            );
            self.transition(state, InvocationState::Failed);
            return Err(StepFailure { error, attempts });
        }

        warn!(
            "Step {} failed on attempt {}/{}, retrying in {:?}: {}",
            step.as_str(),
            attempts,
            self.config.max_attempts,
            self.config.retry_backoff(),
            error
        );
        self.update_stats(|stats| stats.retries += 1);
        if let Some(metrics) = &self.metrics {
            metrics.record_retry(step.as_str());
        }

        tokio::time::sleep(self.config.retry_backoff()).await;
        Ok(())
    }

    fn complete(
        &self,
        request: GameUpdateRequest,
        snapshot: RatingSnapshot,
        update: RatingUpdateResult,
        started: Instant,
    ) -> InvocationOutcome {
        self.update_stats(|stats| {
            stats.applied += 1;
            stats.last_applied_at = Some(current_timestamp());
        });

        if let Some(metrics) = &self.metrics {
            metrics.record_applied(
                update.delta_a(snapshot.player_a.rating),
                update.delta_b(snapshot.player_b.rating),
                started.elapsed(),
            );
        }

        InvocationOutcome::Applied {
            game_id: request.game_id,
            update,
        }
    }

    async fn fail(
        &self,
        event: &Value,
        failure: StepFailure,
        game_id: Option<GameId>,
        invocation_id: Uuid,
        started: Instant,
    ) -> Result<InvocationOutcome> {
        let kind = failure.error.kind();
        let dead_letter = DeadLetter::from_error(
            event.clone(),
            &failure.error,
            failure.attempts,
            game_id,
            invocation_id,
        );

        if let Err(e) = self.dead_letters.publish(dead_letter).await {
            error!("Failed to publish dead letter for {}: {}", kind, e);
            return Err(e.into());
        }

        info!(
            "Dead-lettered event ({}, {} attempt(s))",
            kind, failure.attempts
        );
        self.update_stats(|stats| stats.dead_lettered += 1);
        if let Some(metrics) = &self.metrics {
            metrics.record_dead_lettered(kind, started.elapsed());
        }

        Ok(InvocationOutcome::DeadLettered {
            kind,
            attempts: failure.attempts,
        })
    }

    fn transition(&self, state: &mut InvocationState, next: InvocationState) {
        debug!("{:?} -> {:?}", state, next);
        *state = next;
    }

    fn note_failure(&self, error: &PipelineError) {
        let kind = error.kind();
        self.update_stats(|stats| {
            *stats.failures.entry(kind.as_str().to_string()).or_insert(0) += 1;
        });
        if let Some(metrics) = &self.metrics {
            metrics.record_failure(kind);
        }
    }

    fn record_step(&self, step: PipelineStep, timer: MetricsTimer) {
        if let Some(metrics) = &self.metrics {
            metrics.record_step(step.as_str(), timer.stop());
        }
    }

    fn update_stats(&self, update: impl FnOnce(&mut PipelineStats)) {
        match self.stats.write() {
            Ok(mut stats) => update(&mut stats),
            Err(_) => warn!("Failed to acquire pipeline stats lock"),
        }
    }
}
