//! Rating store over a per-key compare-and-swap backend
//!
//! Backends without multi-key transactions still get the all-or-nothing write
//! contract: each key is swapped conditionally on its version, and when a later
//! key fails the keys already swapped are restored by compensating swaps before
//! the call returns. Every backend call is bounded by an operation timeout, so
//! a write always ends in a commit or a rollback. A swap that timed out may
//! still have landed, so it is rolled back like an applied one. Multi-key
//! reads double-collect versions until two passes agree.

use crate::error::{PipelineError, PipelineResult};
use crate::rating::storage::RatingStore;
use crate::types::{PlayerId, PlayerRating, RatingWrite};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Passes a snapshot read may take before giving up
const SNAPSHOT_ATTEMPTS: usize = 3;

/// Bound on a single backend call unless configured otherwise
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Single-key storage with versioned conditional updates
#[async_trait]
pub trait VersionedKv: Send + Sync {
    async fn get(&self, key: &str) -> PipelineResult<Option<PlayerRating>>;

    /// Set `rating` only if the stored version equals `expected_version`.
    /// Returns false when the precondition fails or the key is absent.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        rating: i64,
    ) -> PipelineResult<bool>;

    async fn put(&self, key: &str, rating: i64) -> PipelineResult<PlayerRating>;

    async fn len(&self) -> PipelineResult<usize>;
}

/// In-memory key-value backend with per-key versions
#[derive(Debug, Default)]
pub struct InMemoryKv {
    entries: Mutex<HashMap<PlayerId, PlayerRating>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionedKv for InMemoryKv {
    async fn get(&self, key: &str) -> PipelineResult<Option<PlayerRating>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        rating: i64,
    ) -> PipelineResult<bool> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if entry.version == expected_version => {
                entry.rating = rating;
                entry.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn put(&self, key: &str, rating: i64) -> PipelineResult<PlayerRating> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(key.to_string())
            .and_modify(|entry| {
                entry.rating = rating;
                entry.version += 1;
            })
            .or_insert_with(|| PlayerRating {
                player_id: key.to_string(),
                rating,
                version: 0,
            });
        Ok(entry.clone())
    }

    async fn len(&self) -> PipelineResult<usize> {
        Ok(self.entries.lock().await.len())
    }
}

/// A swap applied, or possibly applied, during a multi-key write
struct AppliedSwap {
    player_id: PlayerId,
    previous_rating: i64,
    version_after: u64,
    /// The swap timed out, so it may never have landed
    uncertain: bool,
}

/// [`RatingStore`] implemented with per-key CAS and compensating rollback
pub struct CasRatingStore<K: VersionedKv> {
    kv: K,
    op_timeout: Duration,
}

impl<K: VersionedKv> CasRatingStore<K> {
    pub fn new(kv: K) -> Self {
        Self {
            kv,
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    /// Bound each backend call by `op_timeout`
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    pub fn backend(&self) -> &K {
        &self.kv
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        key: &str,
        call: impl Future<Output = PipelineResult<T>>,
    ) -> PipelineResult<T> {
        tokio::time::timeout(self.op_timeout, call)
            .await
            .map_err(|_| {
                PipelineError::unavailable(format!(
                    "{} of '{}' timed out after {:?}",
                    operation, key, self.op_timeout
                ))
            })?
    }

    async fn collect(
        &self,
        player_ids: &[PlayerId],
    ) -> PipelineResult<HashMap<PlayerId, PlayerRating>> {
        let mut found = HashMap::new();
        for id in player_ids {
            if let Some(entry) = self.bounded("get", id, self.kv.get(id)).await? {
                found.insert(id.clone(), entry);
            }
        }
        Ok(found)
    }

    async fn rollback(&self, applied: Vec<AppliedSwap>) -> PipelineResult<()> {
        let mut incomplete = Vec::new();

        for swap in applied.into_iter().rev() {
            let restored = self
                .bounded(
                    "rollback",
                    &swap.player_id,
                    self.kv.compare_and_swap(
                        &swap.player_id,
                        swap.version_after,
                        swap.previous_rating,
                    ),
                )
                .await;

            match restored {
                Ok(true) => {}
                Ok(false) if swap.uncertain => {
                    debug!("Timed out swap of '{}' never landed", swap.player_id);
                }
                Ok(false) => {
                    error!(
                        "Rollback of '{}' lost a race with another writer",
                        swap.player_id
                    );
                    incomplete.push(swap.player_id);
                }
                Err(e) => {
                    error!("Rollback of '{}' failed: {}", swap.player_id, e);
                    incomplete.push(swap.player_id);
                }
            }
        }

        if incomplete.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::unavailable(format!(
                "rollback incomplete for {}",
                incomplete.join(", ")
            )))
        }
    }
}

#[async_trait]
impl<K: VersionedKv> RatingStore for CasRatingStore<K> {
    /// Two matching passes give a consistent snapshot, except while a failed
    /// write is rolling back: the snapshot may then hold a swap that is about
    /// to be undone. The rollback bumps that key's version again, so any write
    /// based on such a snapshot fails with `WriteConflict`.
    async fn get_ratings(
        &self,
        player_ids: &[PlayerId],
    ) -> PipelineResult<HashMap<PlayerId, PlayerRating>> {
        let mut previous = self.collect(player_ids).await?;

        for _ in 0..SNAPSHOT_ATTEMPTS {
            let current = self.collect(player_ids).await?;
            if current == previous {
                return Ok(current);
            }
            previous = current;
        }

        Err(PipelineError::unavailable(
            "could not obtain a consistent snapshot",
        ))
    }

    async fn write_ratings(&self, writes: Vec<RatingWrite>) -> PipelineResult<()> {
        let mut applied: Vec<AppliedSwap> = Vec::with_capacity(writes.len());

        for write in &writes {
            let current = self
                .bounded("get", &write.player_id, self.kv.get(&write.player_id))
                .await;

            let outcome = match current {
                Ok(Some(current)) if current.version == write.expected_version => {
                    let swap = self.kv.compare_and_swap(
                        &write.player_id,
                        write.expected_version,
                        write.new_rating,
                    );
                    match tokio::time::timeout(self.op_timeout, swap).await {
                        Ok(swapped) => swapped.map(|swapped| swapped.then_some(current.rating)),
                        Err(_) => {
                            applied.push(AppliedSwap {
                                player_id: write.player_id.clone(),
                                previous_rating: current.rating,
                                version_after: write.expected_version + 1,
                                uncertain: true,
                            });
                            Err(PipelineError::unavailable(format!(
                                "swap of '{}' timed out after {:?}",
                                write.player_id, self.op_timeout
                            )))
                        }
                    }
                }
                Ok(_) => Ok(None),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(Some(previous_rating)) => applied.push(AppliedSwap {
                    player_id: write.player_id.clone(),
                    previous_rating,
                    version_after: write.expected_version + 1,
                    uncertain: false,
                }),
                Ok(None) => {
                    warn!(
                        "Conditional swap failed for '{}', rolling back {} applied swaps",
                        write.player_id,
                        applied.len()
                    );
                    self.rollback(applied).await?;
                    return Err(PipelineError::WriteConflict {
                        player_id: write.player_id.clone(),
                    });
                }
                Err(e) => {
                    warn!(
                        "Store error on '{}', rolling back {} applied swaps: {}",
                        write.player_id,
                        applied.len(),
                        e
                    );
                    self.rollback(applied).await?;
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    async fn put_player(&self, player_id: &str, rating: i64) -> PipelineResult<PlayerRating> {
        self.bounded("put", player_id, self.kv.put(player_id, rating))
            .await
    }

    async fn player_count(&self) -> PipelineResult<usize> {
        self.bounded("count", "*", self.kv.len()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Backend whose swaps on one key fail on demand
    struct FlakyKv {
        inner: InMemoryKv,
        failing_key: String,
        fail_swaps: AtomicBool,
        unreachable: bool,
    }

    impl FlakyKv {
        fn new(failing_key: &str, unreachable: bool) -> Self {
            Self {
                inner: InMemoryKv::new(),
                failing_key: failing_key.to_string(),
                fail_swaps: AtomicBool::new(true),
                unreachable,
            }
        }
    }

    #[async_trait]
    impl VersionedKv for FlakyKv {
        async fn get(&self, key: &str) -> PipelineResult<Option<PlayerRating>> {
            self.inner.get(key).await
        }

        async fn compare_and_swap(
            &self,
            key: &str,
            expected_version: u64,
            rating: i64,
        ) -> PipelineResult<bool> {
            if key == self.failing_key && self.fail_swaps.load(Ordering::SeqCst) {
                if self.unreachable {
                    return Err(PipelineError::unavailable("connection reset"));
                }
                return Ok(false);
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

    fn writes(a: i64, b: i64) -> Vec<RatingWrite> {
        vec![
            RatingWrite {
                player_id: "a".to_string(),
                new_rating: a,
                expected_version: 0,
            },
            RatingWrite {
                player_id: "b".to_string(),
                new_rating: b,
                expected_version: 0,
            },
        ]
    }

    #[tokio::test]
    async fn test_cas_store_commits_both() {
        let store = CasRatingStore::new(InMemoryKv::new());
        store.put_player("a", 1405).await.unwrap();
        store.put_player("b", 1645).await.unwrap();

        store.write_ratings(writes(1431, 1619)).await.unwrap();

        let ratings = store
            .get_ratings(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(ratings["a"].rating, 1431);
        assert_eq!(ratings["b"].rating, 1619);
        assert_eq!(store.player_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_conflict_on_second_key_rolls_back_first() {
        let store = CasRatingStore::new(FlakyKv::new("b", false));
        store.put_player("a", 1405).await.unwrap();
        store.put_player("b", 1645).await.unwrap();

        let result = store.write_ratings(writes(1431, 1619)).await;
        assert_eq!(
            result,
            Err(PipelineError::WriteConflict {
                player_id: "b".to_string()
            })
        );

        let a = store.get_rating("a").await.unwrap().unwrap();
        let b = store.get_rating("b").await.unwrap().unwrap();
        assert_eq!(a.rating, 1405);
        assert_eq!(b.rating, 1645);
    }

    #[tokio::test]
    async fn test_write_from_rolled_back_view_conflicts() {
        let store = CasRatingStore::new(FlakyKv::new("b", false));
        store.put_player("a", 1405).await.unwrap();
        store.put_player("b", 1645).await.unwrap();
        assert!(store.write_ratings(writes(1431, 1619)).await.is_err());

        // A reader in the rollback window saw a at version 1
        let from_window = vec![RatingWrite {
            player_id: "a".to_string(),
            new_rating: 1450,
            expected_version: 1,
        }];
        let result = store.write_ratings(from_window).await;
        assert!(matches!(result, Err(PipelineError::WriteConflict { .. })));

        let a = store.get_rating("a").await.unwrap().unwrap();
        assert_eq!((a.rating, a.version), (1405, 2));
    }

    #[tokio::test]
    async fn test_unreachable_second_key_rolls_back_first() {
        let store = CasRatingStore::new(FlakyKv::new("b", true));
        store.put_player("a", 1405).await.unwrap();
        store.put_player("b", 1645).await.unwrap();

        let result = store.write_ratings(writes(1431, 1619)).await;
        assert!(matches!(
            result,
            Err(PipelineError::StoreUnavailable { .. })
        ));

        let a = store.get_rating("a").await.unwrap().unwrap();
        assert_eq!(a.rating, 1405);
    }

    #[tokio::test]
    async fn test_stale_first_key_writes_nothing() {
        let store = CasRatingStore::new(InMemoryKv::new());
        store.put_player("a", 1405).await.unwrap();
        store.put_player("b", 1645).await.unwrap();
        store.put_player("a", 1410).await.unwrap();

        let result = store.write_ratings(writes(1431, 1619)).await;
        assert!(matches!(result, Err(PipelineError::WriteConflict { .. })));

        let b = store.get_rating("b").await.unwrap().unwrap();
        assert_eq!((b.rating, b.version), (1645, 0));
    }

    #[tokio::test]
    async fn test_missing_key_is_conflict() {
        let store = CasRatingStore::new(InMemoryKv::new());
        store.put_player("a", 1405).await.unwrap();

        let result = store.write_ratings(writes(1431, 1619)).await;
        assert!(matches!(result, Err(PipelineError::WriteConflict { .. })));
        assert_eq!(store.get_rating("a").await.unwrap().unwrap().rating, 1405);
    }

    /// Backend whose swaps on one key stall before applying
    struct StallingKv {
        inner: InMemoryKv,
        stalled_key: String,
        stall: Duration,
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

    #[tokio::test]
    async fn test_timed_out_swap_rolls_back_first() {
        let store = CasRatingStore::new(StallingKv {
            inner: InMemoryKv::new(),
            stalled_key: "b".to_string(),
            stall: Duration::from_millis(200),
        })
        .with_op_timeout(Duration::from_millis(30));
        store.put_player("a", 1405).await.unwrap();
        store.put_player("b", 1645).await.unwrap();

        let result = store.write_ratings(writes(1431, 1619)).await;
        assert!(matches!(
            result,
            Err(PipelineError::StoreUnavailable { .. })
        ));

        // Wait out the stall so nothing is left pending
        tokio::time::sleep(Duration::from_millis(250)).await;
        let a = store.get_rating("a").await.unwrap().unwrap();
        let b = store.get_rating("b").await.unwrap().unwrap();
        assert_eq!((a.rating, a.version), (1405, 2));
        assert_eq!((b.rating, b.version), (1645, 0));
    }

    #[tokio::test]
    async fn test_slow_swap_within_timeout_commits() {
        let store = CasRatingStore::new(StallingKv {
            inner: InMemoryKv::new(),
            stalled_key: "b".to_string(),
            stall: Duration::from_millis(50),
        })
        .with_op_timeout(Duration::from_secs(1));
        store.put_player("a", 1405).await.unwrap();
        store.put_player("b", 1645).await.unwrap();

        store.write_ratings(writes(1431, 1619)).await.unwrap();

        assert_eq!(store.get_rating("a").await.unwrap().unwrap().rating, 1431);
        assert_eq!(store.get_rating("b").await.unwrap().unwrap().rating, 1619);
    }
}
