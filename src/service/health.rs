//! Health checks and runtime status
//!
//! This module provides health check functionality for the elo-relay
//! service, including readiness and liveness probes. Checks read a shared
//! [`ServiceRuntime`] so the health server can be built before the rest of
//! the application.

use crate::amqp::AmqpConnection;
use crate::dead_letter::DeadLetterSink;
use crate::pipeline::{Orchestrator, PipelineStats};
use crate::rating::RatingStore;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Upper bound for the store probe
const STORE_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value (0=unhealthy, 1=degraded, 2=healthy)
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn combine(self, other: &HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Components the health checks observe
pub struct ServiceRuntime {
    name: String,
    started_at: Instant,
    is_running: RwLock<bool>,
    store: Arc<dyn RatingStore>,
    orchestrator: Arc<Orchestrator>,
    dead_letters: Arc<dyn DeadLetterSink>,
    amqp: Option<Arc<AmqpConnection>>,
}

impl ServiceRuntime {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn RatingStore>,
        orchestrator: Arc<Orchestrator>,
        dead_letters: Arc<dyn DeadLetterSink>,
        amqp: Option<Arc<AmqpConnection>>,
    ) -> Self {
        Self {
            name: name.into(),
            started_at: Instant::now(),
            is_running: RwLock::new(false),
            store,
            orchestrator,
            dead_letters,
            amqp,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub async fn set_running(&self, running: bool) {
        *self.is_running.write().await = running;
    }

    pub fn store(&self) -> Arc<dyn RatingStore> {
        self.store.clone()
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.orchestrator.clone()
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    pub version: String,
    /// Current timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Service statistics
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional error message if not healthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Players in the rating store, if it answered
    pub players: Option<usize>,
    /// Pipeline totals since start
    pub pipeline: PipelineStats,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(runtime: Arc<ServiceRuntime>) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(&runtime).await,
            Self::check_rating_store(&runtime).await,
            Self::check_amqp(&runtime),
            Self::check_dead_letter_sink(&runtime),
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |status, check| {
                status.combine(&check.status)
            });

        let stats = Self::gather_service_stats(&runtime).await;

        Ok(HealthCheck {
            status,
            service: runtime.name().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(runtime: Arc<ServiceRuntime>) -> Result<HealthStatus> {
        if runtime.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify events can be processed
    pub async fn readiness_check(runtime: Arc<ServiceRuntime>) -> Result<HealthStatus> {
        if !runtime.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        let store = Self::check_rating_store(&runtime).await;
        let amqp = Self::check_amqp(&runtime);
        Ok(store.status.combine(&amqp.status))
    }

    async fn check_service_running(runtime: &ServiceRuntime) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = if runtime.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn check_rating_store(runtime: &ServiceRuntime) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) =
            match tokio::time::timeout(STORE_PROBE_TIMEOUT, runtime.store.player_count()).await {
                Ok(Ok(_)) => (HealthStatus::Healthy, None),
                Ok(Err(e)) => (HealthStatus::Unhealthy, Some(e.to_string())),
                Err(_) => (
                    HealthStatus::Unhealthy,
                    Some("Rating store probe timed out".to_string()),
                ),
            };

        ComponentCheck {
            name: "rating_store".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_amqp(runtime: &ServiceRuntime) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match &runtime.amqp {
            Some(connection) if connection.is_alive() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Unhealthy,
                Some("AMQP connection closed".to_string()),
            ),
            None => (
                HealthStatus::Degraded,
                Some("No broker connection (standalone mode)".to_string()),
            ),
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_dead_letter_sink(runtime: &ServiceRuntime) -> ComponentCheck {
        let (status, message) = if runtime.dead_letters.is_durable() {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Degraded,
                Some("Dead letters are only logged".to_string()),
            )
        };

        ComponentCheck {
            name: "dead_letter_sink".to_string(),
            status,
            message,
            duration_ms: 0,
        }
    }

    async fn gather_service_stats(runtime: &ServiceRuntime) -> ServiceStats {
        let players = match runtime.store.player_count().await {
            Ok(count) => Some(count),
            Err(e) => {
                debug!("Failed to count players for health check: {}", e);
                None
            }
        };

        ServiceStats {
            players,
            pipeline: runtime.orchestrator.stats(),
            uptime_seconds: runtime.uptime().as_secs(),
        }
    }
}

/// Convert health check to JSON string
impl HealthCheck {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
