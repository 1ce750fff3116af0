//! Test fixtures and fault-injecting implementations for integration testing
#![allow(dead_code)]

use async_trait::async_trait;
use elo_relay::config::PipelineConfig;
use elo_relay::dead_letter::{DeadLetter, DeadLetterSink};
use elo_relay::error::{PipelineError, PipelineResult, RelayError};
use elo_relay::pipeline::Orchestrator;
use elo_relay::rating::{EloCalculator, InMemoryKv, InMemoryRatingStore, RatingStore, VersionedKv};
use elo_relay::types::{PlayerId, PlayerRating, PlayerSeed, RatingWrite};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Rating store wrapper that fails or interferes on demand and counts calls
#[derive(Default)]
pub struct FaultInjectingStore {
    inner: InMemoryRatingStore,
    failing_reads: AtomicU32,
    failing_writes: AtomicU32,
    /// Writes made by "another writer" right before our next writes
    interference: Mutex<VecDeque<(PlayerId, i64)>>,
    reads: AtomicU32,
    writes: AtomicU32,
}

impl FaultInjectingStore {
    pub fn with_players(players: &[(&str, i64)]) -> Self {
        let seeds: Vec<PlayerSeed> = players
            .iter()
            .map(|(id, rating)| PlayerSeed {
                player_id: id.to_string(),
                rating: *rating,
            })
            .collect();

        Self {
            inner: InMemoryRatingStore::with_players(&seeds),
            ..Self::default()
        }
    }

    /// The next `count` reads fail as unreachable
    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// The next `count` writes fail as unreachable without applying anything
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Before the next write, another writer sets `player_id` to `rating`
    pub fn interfere_before_write(&self, player_id: &str, rating: i64) {
        if let Ok(mut queue) = self.interference.lock() {
            queue.push_back((player_id.to_string(), rating));
        }
    }

    pub fn read_calls(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn rating(&self, player_id: &str) -> PlayerRating {
        self.inner
            .get_rating(player_id)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("player {} not stored", player_id))
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn take_interference(&self) -> Option<(PlayerId, i64)> {
        self.interference.lock().ok()?.pop_front()
    }
}

#[async_trait]
impl RatingStore for FaultInjectingStore {
    async fn get_ratings(
        &self,
        player_ids: &[PlayerId],
    ) -> PipelineResult<HashMap<PlayerId, PlayerRating>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_reads) {
            return Err(PipelineError::unavailable("injected read failure"));
        }
        self.inner.get_ratings(player_ids).await
    }

    async fn write_ratings(&self, writes: Vec<RatingWrite>) -> PipelineResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some((player_id, rating)) = self.take_interference() {
            self.inner.put_player(&player_id, rating).await?;
        }
        if Self::take_failure(&self.failing_writes) {
            return Err(PipelineError::unavailable("injected write failure"));
        }
        self.inner.write_ratings(writes).await
    }

    async fn put_player(&self, player_id: &str, rating: i64) -> PipelineResult<PlayerRating> {
        self.inner.put_player(player_id, rating).await
    }

    async fn player_count(&self) -> PipelineResult<usize> {
        self.inner.player_count().await
    }
}

/// Dead letter sink that records what it is given, optionally refusing
#[derive(Default)]
pub struct RecordingDeadLetterSink {
    published: Mutex<Vec<DeadLetter>>,
    failing_publishes: AtomicU32,
}

impl RecordingDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` publishes fail
    pub fn fail_next_publishes(&self, count: u32) {
        self.failing_publishes.store(count, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<DeadLetter> {
        self.published
            .lock()
            .map(|letters| letters.clone())
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.published().len()
    }
}

#[async_trait]
impl DeadLetterSink for RecordingDeadLetterSink {
    async fn publish(&self, dead_letter: DeadLetter) -> Result<(), RelayError> {
        if FaultInjectingStore::take_failure(&self.failing_publishes) {
            return Err(RelayError::DeadLetterPublishFailed {
                message: "injected publish failure".to_string(),
            });
        }
        if let Ok(mut letters) = self.published.lock() {
            letters.push(dead_letter);
        }
        Ok(())
    }
}

/// Key-value backend whose swaps on one key stall before applying
pub struct StallingKv {
    inner: InMemoryKv,
    stalled_key: String,
    stall: Duration,
}

impl StallingKv {
    pub fn new(stalled_key: &str, stall: Duration) -> Self {
        Self {
            inner: InMemoryKv::new(),
            stalled_key: stalled_key.to_string(),
            stall,
        }
    }
}

#[async_trait]
impl VersionedKv for StallingKv {
    async fn get(&self, key: &str) -> PipelineResult<Option<PlayerRating>> {
        self.inner.get(key).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        rating: i64,
    ) -> PipelineResult<bool> {
        if key == self.stalled_key {
            tokio::time::sleep(self.stall).await;
        }
        self.inner
            .compare_and_swap(key, expected_version, rating)
            .await
    }

    async fn put(&self, key: &str, rating: i64) -> PipelineResult<PlayerRating> {
        self.inner.put(key, rating).await
    }

    async fn len(&self) -> PipelineResult<usize> {
        self.inner.len().await
    }
}

/// Pipeline configuration with a short backoff for tests
pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        retry_backoff_ms: 5,
        ..PipelineConfig::default()
    }
}

/// Orchestrator over the given store with a recording sink
pub fn orchestrator(
    store: Arc<dyn RatingStore>,
) -> (Orchestrator, Arc<RecordingDeadLetterSink>) {
    orchestrator_with_config(store, fast_config())
}

pub fn orchestrator_with_config(
    store: Arc<dyn RatingStore>,
    config: PipelineConfig,
) -> (Orchestrator, Arc<RecordingDeadLetterSink>) {
    let sink = Arc::new(RecordingDeadLetterSink::new());
    let orchestrator = Orchestrator::new(
        store,
        Arc::new(EloCalculator::default()),
        sink.clone(),
        config,
    );
    (orchestrator, sink)
}
