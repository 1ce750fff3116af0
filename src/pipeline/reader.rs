//! Player score reader: one atomic two-key read of both players' ratings

use crate::error::{PipelineError, PipelineResult};
use crate::rating::RatingStore;
use crate::types::{PlayerId, RatingSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct PlayerScoreReader {
    store: Arc<dyn RatingStore>,
    timeout: Duration,
}

impl PlayerScoreReader {
    pub fn new(store: Arc<dyn RatingStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Read both ratings in one snapshot.
    ///
    /// Player A is reported first when both are missing. A store call that
    /// exceeds the timeout is `StoreUnavailable`.
    pub async fn read(
        &self,
        player_a_id: &str,
        player_b_id: &str,
    ) -> PipelineResult<RatingSnapshot> {
        let ids: Vec<PlayerId> = vec![player_a_id.to_string(), player_b_id.to_string()];

        let mut found = tokio::time::timeout(self.timeout, self.store.get_ratings(&ids))
            .await
            .map_err(|_| {
                PipelineError::unavailable(format!("read timed out after {:?}", self.timeout))
            })??;

        let player_a = found
            .remove(player_a_id)
            .ok_or_else(|| PipelineError::PlayerNotFound {
                player_id: player_a_id.to_string(),
            })?;
        let player_b = found
            .remove(player_b_id)
            .ok_or_else(|| PipelineError::PlayerNotFound {
                player_id: player_b_id.to_string(),
            })?;

        debug!(
            "Read ratings {}={} (v{}), {}={} (v{})",
            player_a.player_id,
            player_a.rating,
            player_a.version,
            player_b.player_id,
            player_b.rating,
            player_b.version
        );

        Ok(RatingSnapshot { player_a, player_b })
    }
}
