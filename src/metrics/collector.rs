//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the elo-relay rating pipeline
//! using Prometheus metrics.

use crate::error::FailureKind;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the rating pipeline
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Pipeline outcome metrics
    pipeline_metrics: PipelineMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP messages handled
    pub amqp_messages_total: IntCounterVec,

    /// AMQP operation errors
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Pipeline outcome metrics
#[derive(Clone)]
pub struct PipelineMetrics {
    /// Invocations by final outcome (applied, dead_lettered)
    pub events_processed_total: IntCounterVec,

    /// Step failures by kind, counting every attempt
    pub failures_total: IntCounterVec,

    /// Retries by pipeline step
    pub retries_total: IntCounterVec,

    /// Dead letters published by failure kind
    pub dead_letters_total: IntCounterVec,

    /// Absolute rating change applied to each player
    pub rating_change: Histogram,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Duration of each pipeline step attempt
    pub step_duration: HistogramVec,

    /// End-to-end invocation time, retries and backoff included
    pub invocation_duration: Histogram,

    /// AMQP operation duration
    pub amqp_operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let pipeline_metrics = PipelineMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            pipeline_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn pipeline(&self) -> &PipelineMetrics {
        &self.pipeline_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record an invocation that committed both ratings
    pub fn record_applied(&self, delta_a: i64, delta_b: i64, duration: Duration) {
        self.pipeline_metrics
            .events_processed_total
            .with_label_values(&["applied"])
            .inc();

        self.pipeline_metrics
            .rating_change
            .observe(delta_a.unsigned_abs() as f64);
        self.pipeline_metrics
            .rating_change
            .observe(delta_b.unsigned_abs() as f64);

        self.performance_metrics
            .invocation_duration
            .observe(duration.as_secs_f64());
    }

    /// Record an invocation that ended in the dead-letter channel
    pub fn record_dead_lettered(&self, kind: FailureKind, duration: Duration) {
        self.pipeline_metrics
            .events_processed_total
            .with_label_values(&["dead_lettered"])
            .inc();

        self.pipeline_metrics
            .dead_letters_total
            .with_label_values(&[kind.as_str()])
            .inc();

        self.performance_metrics
            .invocation_duration
            .observe(duration.as_secs_f64());
    }

    /// Record one failed step attempt
    pub fn record_failure(&self, kind: FailureKind) {
        self.pipeline_metrics
            .failures_total
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    /// Record a retry of a pipeline step
    pub fn record_retry(&self, step: &str) {
        self.pipeline_metrics
            .retries_total
            .with_label_values(&[step])
            .inc();
    }

    /// Record a single step attempt duration
    pub fn record_step(&self, step: &str, duration: Duration) {
        self.performance_metrics
            .step_duration
            .with_label_values(&[step])
            .observe(duration.as_secs_f64());
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }

        self.performance_metrics
            .amqp_operation_duration
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    pub fn update_uptime(&self, uptime: Duration) {
        self.service_metrics
            .uptime_seconds
            .set(uptime.as_secs() as i64);
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }
}

/// Wall-clock timer for one pipeline step
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl Default for MetricsTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("elo_relay_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "elo_relay_amqp_messages_total",
                "Total AMQP messages handled",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("elo_relay_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "elo_relay_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("elo_relay_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl PipelineMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let events_processed_total = IntCounterVec::new(
            Opts::new(
                "elo_relay_events_processed_total",
                "Change events processed by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(events_processed_total.clone()))?;

        let failures_total = IntCounterVec::new(
            Opts::new(
                "elo_relay_step_failures_total",
                "Failed step attempts by failure kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(failures_total.clone()))?;

        let retries_total = IntCounterVec::new(
            Opts::new("elo_relay_retries_total", "Step retries by pipeline step"),
            &["step"],
        )?;
        registry.register(Box::new(retries_total.clone()))?;

        let dead_letters_total = IntCounterVec::new(
            Opts::new(
                "elo_relay_dead_letters_total",
                "Dead letters published by failure kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(dead_letters_total.clone()))?;

        let rating_change = Histogram::with_opts(
            HistogramOpts::new(
                "elo_relay_rating_change_points",
                "Absolute rating change per player per game",
            )
            .buckets(vec![0.0, 1.0, 2.0, 4.0, 8.0, 12.0, 16.0, 20.0, 24.0, 28.0, 32.0]),
        )?;
        registry.register(Box::new(rating_change.clone()))?;

        Ok(Self {
            events_processed_total,
            failures_total,
            retries_total,
            dead_letters_total,
            rating_change,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let step_duration = HistogramVec::new(
            HistogramOpts::new(
                "elo_relay_step_duration_seconds",
                "Pipeline step attempt duration",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["step"],
        )?;
        registry.register(Box::new(step_duration.clone()))?;

        let invocation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "elo_relay_invocation_duration_seconds",
                "End-to-end invocation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
        )?;
        registry.register(Box::new(invocation_duration.clone()))?;

        let amqp_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "elo_relay_amqp_operation_duration_seconds",
                "AMQP operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operation_duration.clone()))?;

        Ok(Self {
            step_duration,
            invocation_duration,
            amqp_operation_duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        let _service = collector.service();
        let _pipeline = collector.pipeline();
        let _performance = collector.performance();
    }

    #[test]
    fn test_outcome_recording() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.record_applied(26, -26, Duration::from_millis(3));
        collector.record_dead_lettered(FailureKind::PlayerNotFound, Duration::from_millis(1));
        collector.record_dead_lettered(FailureKind::PlayerNotFound, Duration::from_millis(1));

        let pipeline = collector.pipeline();
        assert_eq!(
            pipeline
                .events_processed_total
                .with_label_values(&["applied"])
                .get(),
            1
        );
        assert_eq!(
            pipeline
                .events_processed_total
                .with_label_values(&["dead_lettered"])
                .get(),
            2
        );
        assert_eq!(
            pipeline
                .dead_letters_total
                .with_label_values(&["player_not_found"])
                .get(),
            2
        );
        assert_eq!(pipeline.rating_change.get_sample_count(), 2);
        assert_eq!(pipeline.rating_change.get_sample_sum(), 52.0);
    }

    #[test]
    fn test_retry_and_failure_counters() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.record_failure(FailureKind::WriteConflict);
        collector.record_retry("writing");
        collector.record_step("writing", Duration::from_micros(200));

        assert_eq!(
            collector
                .pipeline()
                .failures_total
                .with_label_values(&["write_conflict"])
                .get(),
            1
        );
        assert_eq!(
            collector
                .pipeline()
                .retries_total
                .with_label_values(&["writing"])
                .get(),
            1
        );
    }

    #[test]
    fn test_health_status_updates() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.update_health_status(2);
        collector.update_component_health("rating_store", true);
        collector.update_component_health("amqp", false);
        collector.update_uptime(Duration::from_secs(90));

        assert_eq!(collector.service().health_status.get(), 2);
        assert_eq!(collector.service().uptime_seconds.get(), 90);
    }

    #[test]
    fn test_step_timer_feeds_histogram() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");
        let timer = MetricsTimer::new();

        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.elapsed() >= Duration::from_millis(10));

        collector.record_step("reading", timer.stop());
        let histogram = collector
            .performance()
            .step_duration
            .with_label_values(&["reading"]);
        assert_eq!(histogram.get_sample_count(), 1);
        assert!(histogram.get_sample_sum() >= 0.01);
    }
}
