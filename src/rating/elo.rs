//! Elo rating calculator
//!
//! Pure two-player Elo update built on the skillratings crate:
//!
//! ```text
//! expectedA  = 1 / (1 + 10^((ratingB - ratingA) / 400))
//! newRatingA = round(ratingA + K * (actualA - expectedA))
//! ```
//!
//! and symmetrically for player B. Rounding is half away from zero
//! (`f64::round`), so 1430.5 becomes 1431 and -0.5 becomes -1. Each side is
//! rounded independently, which can move the rounded total by one point.

use crate::config::rating::{RatingConfig, K_FACTOR};
use crate::types::{GameResult, RatingUpdateResult};
use skillratings::elo::{elo, expected_score, EloConfig, EloRating};
use skillratings::Outcomes;

/// Trait for computing rating updates after a two-player game
pub trait RatingCalculator: Send + Sync {
    /// Compute both players' new ratings. Never fails for a valid result.
    fn calculate(&self, rating_a: i64, rating_b: i64, result: GameResult) -> RatingUpdateResult;

    /// Current configuration as JSON
    fn config(&self) -> serde_json::Value;
}

/// Standard Elo calculator with a fixed K-factor
#[derive(Debug, Clone)]
pub struct EloCalculator {
    config: EloConfig,
}

impl EloCalculator {
    pub fn new(config: &RatingConfig) -> Self {
        Self {
            config: EloConfig {
                k: config.k_factor,
            },
        }
    }

    pub fn k_factor(&self) -> f64 {
        self.config.k
    }

    /// Probability-like expected score of a player against an opponent
    pub fn expected_score(rating: i64, opponent_rating: i64) -> f64 {
        let (expected, _) = expected_score(
            &EloRating {
                rating: rating as f64,
            },
            &EloRating {
                rating: opponent_rating as f64,
            },
        );
        expected
    }
}

impl Default for EloCalculator {
    fn default() -> Self {
        Self {
            config: EloConfig { k: K_FACTOR },
        }
    }
}

/// Round a rating to the nearest integer, halves away from zero
pub fn round_rating(value: f64) -> i64 {
    value.round() as i64
}

fn to_outcome(result: GameResult) -> Outcomes {
    match result {
        GameResult::PlayerAWins => Outcomes::WIN,
        GameResult::Draw => Outcomes::DRAW,
        GameResult::PlayerBWins => Outcomes::LOSS,
    }
}

impl RatingCalculator for EloCalculator {
    fn calculate(&self, rating_a: i64, rating_b: i64, result: GameResult) -> RatingUpdateResult {
        let player_a = EloRating {
            rating: rating_a as f64,
        };
        let player_b = EloRating {
            rating: rating_b as f64,
        };

        let (new_a, new_b) = elo(&player_a, &player_b, &to_outcome(result), &self.config);

        RatingUpdateResult {
            new_rating_a: round_rating(new_a.rating),
            new_rating_b: round_rating(new_b.rating),
            unrounded_a: new_a.rating,
            unrounded_b: new_b.rating,
        }
    }

    fn config(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "elo",
            "k_factor": self.config.k,
            "rounding": "half_away_from_zero"
        })
    }
}
