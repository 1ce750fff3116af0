//! Common types used throughout the rating pipeline

use serde::{Deserialize, Serialize};

/// Unique identifier for players
pub type PlayerId = String;

/// Unique identifier for game records
pub type GameId = String;

/// Outcome of a two-player game from player A's point of view.
///
/// Encoded on the wire as 0 (B wins), 0.5 (draw) or 1 (A wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameResult {
    PlayerBWins,
    Draw,
    PlayerAWins,
}

impl GameResult {
    /// Actual score of player A
    pub fn score_a(&self) -> f64 {
        match self {
            GameResult::PlayerBWins => 0.0,
            GameResult::Draw => 0.5,
            GameResult::PlayerAWins => 1.0,
        }
    }

    /// Actual score of player B
    pub fn score_b(&self) -> f64 {
        1.0 - self.score_a()
    }

    /// The same game seen from player B's side
    pub fn inverse(&self) -> Self {
        match self {
            GameResult::PlayerBWins => GameResult::PlayerAWins,
            GameResult::Draw => GameResult::Draw,
            GameResult::PlayerAWins => GameResult::PlayerBWins,
        }
    }

    /// Parse the numeric wire encoding, rejecting anything outside {0, 0.5, 1}
    pub fn from_score(score: f64) -> Option<Self> {
        if score == 0.0 {
            Some(GameResult::PlayerBWins)
        } else if score == 0.5 {
            Some(GameResult::Draw)
        } else if score == 1.0 {
            Some(GameResult::PlayerAWins)
        } else {
            None
        }
    }
}

impl std::fmt::Display for GameResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GameResult::PlayerBWins => write!(f, "B wins"),
            GameResult::Draw => write!(f, "draw"),
            GameResult::PlayerAWins => write!(f, "A wins"),
        }
    }
}

/// A player's stored rating together with its concurrency token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRating {
    pub player_id: PlayerId,
    pub rating: i64,
    /// Incremented by the store on every committed write
    pub version: u64,
}

/// Normalized game record for one pipeline invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameUpdateRequest {
    pub game_id: GameId,
    pub player_a_id: PlayerId,
    pub player_b_id: PlayerId,
    pub result: GameResult,
}

/// Both players' ratings read in one atomic operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingSnapshot {
    pub player_a: PlayerRating,
    pub player_b: PlayerRating,
}

/// Updated ratings for both players of a game
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingUpdateResult {
    pub new_rating_a: i64,
    pub new_rating_b: i64,
    /// Values before rounding; these sum exactly to the old total
    pub unrounded_a: f64,
    pub unrounded_b: f64,
}

impl RatingUpdateResult {
    /// Rating change for player A
    pub fn delta_a(&self, old_rating_a: i64) -> i64 {
        self.new_rating_a - old_rating_a
    }

    /// Rating change for player B
    pub fn delta_b(&self, old_rating_b: i64) -> i64 {
        self.new_rating_b - old_rating_b
    }
}

/// One entry of an atomic multi-key rating write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingWrite {
    pub player_id: PlayerId,
    pub new_rating: i64,
    /// The write only commits if the stored version still matches
    pub expected_version: u64,
}

/// Seed entry used to populate a rating store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSeed {
    pub player_id: PlayerId,
    pub rating: i64,
}
