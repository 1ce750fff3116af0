//! Service layer for the elo-relay rating service
//!
//! This module contains the application state that wires the pipeline to the
//! broker, and the health checks served over HTTP.

pub mod app;
pub mod health;

pub use app::{AppState, ServiceError};
pub use health::{ComponentCheck, HealthCheck, HealthStatus, ServiceRuntime, ServiceStats};
