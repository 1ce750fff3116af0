//! Elo Relay - rating update pipeline for recorded games
//!
//! This crate consumes game-record change events from AMQP, reads both
//! players' ratings, computes the Elo update and writes both ratings back
//! atomically. Events that cannot be applied are published to a dead letter
//! exchange with the failure kind and attempt count.

pub mod amqp;
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod rating;
pub mod service;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{FailureKind, PipelineError, RelayError, Result};
pub use types::*;

// Re-export key components
pub use dead_letter::{DeadLetter, DeadLetterSink};
pub use pipeline::{InvocationOutcome, Orchestrator};
pub use rating::{EloCalculator, RatingCalculator, RatingStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
