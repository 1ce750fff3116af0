//! Score writer: commits both new ratings in one conditional write
//!
//! The store call runs on its own task. When it outlives the timeout the
//! writer waits for it to settle instead of dropping it, so a store that
//! applies keys one by one always finishes its commit or rollback, and the
//! caller never retries over a write that is still in flight.

use crate::error::{PipelineError, PipelineResult};
use crate::rating::RatingStore;
use crate::types::{RatingSnapshot, RatingUpdateResult, RatingWrite};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct ScoreWriter {
    store: Arc<dyn RatingStore>,
    timeout: Duration,
}

impl ScoreWriter {
    pub fn new(store: Arc<dyn RatingStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Persist both ratings, guarded by the versions seen in `snapshot`
    pub async fn write(
        &self,
        snapshot: &RatingSnapshot,
        update: &RatingUpdateResult,
    ) -> PipelineResult<()> {
        let writes = vec![
            RatingWrite {
                player_id: snapshot.player_a.player_id.clone(),
                new_rating: update.new_rating_a,
                expected_version: snapshot.player_a.version,
            },
            RatingWrite {
                player_id: snapshot.player_b.player_id.clone(),
                new_rating: update.new_rating_b,
                expected_version: snapshot.player_b.version,
            },
        ];

        let store = self.store.clone();
        let mut in_flight = tokio::spawn(async move { store.write_ratings(writes).await });

        let settled = match tokio::time::timeout(self.timeout, &mut in_flight).await {
            Ok(settled) => settled,
            Err(_) => {
                warn!(
                    "Write for {} and {} exceeded {:?}, waiting for it to settle",
                    snapshot.player_a.player_id, snapshot.player_b.player_id, self.timeout
                );
                in_flight.await
            }
        };

        settled.map_err(|e| PipelineError::unavailable(format!("write task failed: {}", e)))??;

        debug!(
            "Wrote ratings {}={}, {}={}",
            snapshot.player_a.player_id,
            update.new_rating_a,
            snapshot.player_b.player_id,
            update.new_rating_b
        );

        Ok(())
    }
}
