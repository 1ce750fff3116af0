//! Elo rating computation and rating storage
//!
//! This module provides the pure Elo calculator backed by the skillratings
//! crate and the versioned store abstraction the pipeline reads from and
//! writes to.

pub mod cas;
pub mod elo;
pub mod storage;

// Re-export commonly used types
pub use cas::{CasRatingStore, InMemoryKv, VersionedKv};
pub use elo::{round_rating, EloCalculator, RatingCalculator};
pub use storage::{load_seed_file, InMemoryRatingStore, RatingStore};
