//! Rating system configuration

use serde::{Deserialize, Serialize};

/// Sensitivity constant of the Elo update
pub const K_FACTOR: f64 = 32.0;

/// Elo calculator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    pub k_factor: f64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self { k_factor: K_FACTOR }
    }
}

impl RatingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.k_factor.is_finite() || self.k_factor <= 0.0 {
            return Err(anyhow::anyhow!(
                "K-factor must be a positive number, got {}",
                self.k_factor
            ));
        }
        Ok(())
    }
}
