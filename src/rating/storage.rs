//! Rating store interface and in-memory implementation
//!
//! The store is the external key-value collaborator holding player ratings.
//! Reads of several keys observe one consistent snapshot and multi-key writes
//! are all-or-nothing, guarded by per-player version tokens.

use crate::error::{PipelineError, PipelineResult};
use crate::types::{PlayerId, PlayerRating, PlayerSeed, RatingWrite};
use anyhow::Context;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Trait for rating store operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RatingStore: Send + Sync {
    /// Read several players in one atomic snapshot. Missing ids are absent
    /// from the returned map.
    async fn get_ratings(
        &self,
        player_ids: &[PlayerId],
    ) -> PipelineResult<HashMap<PlayerId, PlayerRating>>;

    /// Apply all writes or none of them. Fails with `WriteConflict` when any
    /// entry's expected version no longer matches.
    async fn write_ratings(&self, writes: Vec<RatingWrite>) -> PipelineResult<()>;

    /// Create a player record, or overwrite the rating of an existing one
    async fn put_player(&self, player_id: &str, rating: i64) -> PipelineResult<PlayerRating>;

    /// Look up a single player
    async fn get_rating(&self, player_id: &str) -> PipelineResult<Option<PlayerRating>> {
        let ids = vec![player_id.to_string()];
        let mut ratings = self.get_ratings(&ids).await?;
        Ok(ratings.remove(player_id))
    }

    /// Total number of stored players
    async fn player_count(&self) -> PipelineResult<usize>;
}

/// In-memory rating store
///
/// A single lock covers every key, so a multi-key read or write is one
/// critical section.
#[derive(Debug, Default)]
pub struct InMemoryRatingStore {
    ratings: RwLock<HashMap<PlayerId, PlayerRating>>,
}

impl InMemoryRatingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with the given players
    pub fn with_players(seeds: &[PlayerSeed]) -> Self {
        let ratings = seeds
            .iter()
            .map(|seed| {
                (
                    seed.player_id.clone(),
                    PlayerRating {
                        player_id: seed.player_id.clone(),
                        rating: seed.rating,
                        version: 0,
                    },
                )
            })
            .collect();

        Self {
            ratings: RwLock::new(ratings),
        }
    }
}

/// Parse a JSON seed file into player seeds
pub fn load_seed_file(path: &Path) -> anyhow::Result<Vec<PlayerSeed>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;
    let seeds: Vec<PlayerSeed> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse seed file {}", path.display()))?;
    info!("Loaded {} player seeds from {}", seeds.len(), path.display());
    Ok(seeds)
}

#[async_trait]
impl RatingStore for InMemoryRatingStore {
    async fn get_ratings(
        &self,
        player_ids: &[PlayerId],
    ) -> PipelineResult<HashMap<PlayerId, PlayerRating>> {
        let ratings = self.ratings.read().await;

        Ok(player_ids
            .iter()
            .filter_map(|id| ratings.get(id).map(|entry| (id.clone(), entry.clone())))
            .collect())
    }

    async fn write_ratings(&self, writes: Vec<RatingWrite>) -> PipelineResult<()> {
        let mut ratings = self.ratings.write().await;

        // Check every precondition before touching anything
        for write in &writes {
            match ratings.get(&write.player_id) {
                Some(current) if current.version == write.expected_version => {}
                Some(current) => {
                    debug!(
                        "Version mismatch for '{}': expected {}, stored {}",
                        write.player_id, write.expected_version, current.version
                    );
                    return Err(PipelineError::WriteConflict {
                        player_id: write.player_id.clone(),
                    });
                }
                None => {
                    return Err(PipelineError::WriteConflict {
                        player_id: write.player_id.clone(),
                    });
                }
            }
        }

        for write in writes {
            if let Some(entry) = ratings.get_mut(&write.player_id) {
                entry.rating = write.new_rating;
                entry.version += 1;
            }
        }

        Ok(())
    }

    async fn put_player(&self, player_id: &str, rating: i64) -> PipelineResult<PlayerRating> {
        let mut ratings = self.ratings.write().await;

        let entry = ratings
            .entry(player_id.to_string())
            .and_modify(|entry| {
                entry.rating = rating;
                entry.version += 1;
            })
            .or_insert_with(|| PlayerRating {
                player_id: player_id.to_string(),
                rating,
                version: 0,
            });

        Ok(entry.clone())
    }

    async fn player_count(&self) -> PipelineResult<usize> {
        Ok(self.ratings.read().await.len())
    }
}
