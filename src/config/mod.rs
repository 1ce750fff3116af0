//! Configuration management for the elo-relay service
//!
//! This module handles all configuration loading from environment variables
//! and TOML files, validation, and default values for the rating pipeline.

pub mod app;
pub mod pipeline;
pub mod rating;

// Re-export commonly used types
pub use app::{
    validate_config, AmqpSettings, AppConfig, ServiceSettings, StoreBackend, StoreSettings,
};
pub use pipeline::PipelineConfig;
pub use rating::RatingConfig;
