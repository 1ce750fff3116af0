//! Main application state and service coordination
//!
//! This module contains the AppState that wires the rating store, the
//! pipeline orchestrator, the AMQP consumer and dead letter publisher, the
//! health server and background tasks.

use crate::amqp::{
    declare_topology, AmqpConnection, AmqpDeadLetterPublisher, GameEventConsumer, PublisherConfig,
};
use crate::config::{AppConfig, StoreBackend};
use crate::dead_letter::{DeadLetterSink, LoggingDeadLetterSink};
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector, MetricsService};
use crate::pipeline::Orchestrator;
use crate::rating::{
    load_seed_file, CasRatingStore, EloCalculator, InMemoryKv, InMemoryRatingStore, RatingStore,
};
use crate::service::health::{HealthCheck, HealthStatus, ServiceRuntime};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Interval of the health metrics task
const HEALTH_METRICS_INTERVAL: Duration = Duration::from_secs(15);

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,

    /// Shared view used by the health checks
    runtime: Arc<ServiceRuntime>,

    /// Broker connection, absent in standalone mode
    amqp_connection: Option<Arc<AmqpConnection>>,

    metrics_service: Arc<MetricsService>,

    background_tasks: Vec<JoinHandle<()>>,

    /// Consumer for game change events
    event_consumer: Option<GameEventConsumer>,
}

impl AppState {
    /// Initialize the application against the configured broker
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing {} rating service", config.service.name);
        info!(
            "Configuration: service={}, amqp_url={}, store={:?}",
            config.service.name, config.amqp.url, config.store.backend
        );

        let collector = Self::initialize_collector()?;
        let amqp_connection = Self::initialize_amqp(&config).await?;
        let dead_letters =
            Self::initialize_dead_letters(&config, &amqp_connection, collector.clone()).await?;

        Self::assemble(config, collector, dead_letters, Some(amqp_connection)).await
    }

    /// Initialize without a broker. Dead letters are only logged and events
    /// can be fed through the orchestrator directly.
    pub async fn standalone(config: AppConfig) -> Result<Self, ServiceError> {
        info!(
            "Initializing {} rating service in standalone mode",
            config.service.name
        );

        let collector = Self::initialize_collector()?;
        Self::assemble(config, collector, Arc::new(LoggingDeadLetterSink), None).await
    }

    async fn assemble(
        config: AppConfig,
        collector: Arc<MetricsCollector>,
        dead_letters: Arc<dyn DeadLetterSink>,
        amqp_connection: Option<Arc<AmqpConnection>>,
    ) -> Result<Self, ServiceError> {
        let store = Self::initialize_store(&config).await?;

        let calculator = Arc::new(EloCalculator::new(&config.rating));
        let orchestrator = Arc::new(
            Orchestrator::new(
                store.clone(),
                calculator,
                dead_letters.clone(),
                config.pipeline.clone(),
            )
            .with_metrics(collector.clone()),
        );

        let runtime = Arc::new(ServiceRuntime::new(
            config.service.name.clone(),
            store,
            orchestrator,
            dead_letters,
            amqp_connection.clone(),
        ));

        let health_config = HealthServerConfig {
            port: config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        let health_server = Arc::new(
            HealthServer::new(health_config, collector.clone()).with_runtime(runtime.clone()),
        );
        let metrics_service = Arc::new(MetricsService::new(collector, health_server));

        Ok(Self {
            config,
            runtime,
            amqp_connection,
            metrics_service,
            background_tasks: Vec::new(),
            event_consumer: None,
        })
    }

    /// Start the health server, event consumption and background tasks
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting {} rating service", self.config.service.name);

        self.runtime.set_running(true).await;

        self.start_metrics_service().await;
        self.start_amqp_consumption().await?;
        self.start_background_tasks();

        info!("✅ {} started successfully", self.config.service.name);
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of {}", self.config.service.name);

        self.runtime.set_running(false).await;

        if let Some(consumer) = self.event_consumer.take() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("✅ AMQP message consumption stopped");
            }
        }

        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        }

        self.stop_background_tasks().await;

        if let Some(connection) = &self.amqp_connection {
            if let Err(e) = connection.close().await {
                warn!("Failed to close AMQP connection: {}", e);
            }
        }

        info!("Final pipeline statistics: {:?}", self.orchestrator().stats());
        info!("✅ {} shutdown completed", self.config.service.name);

        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        self.runtime.is_running().await
    }

    /// Get the orchestrator to process events directly
    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.runtime.orchestrator()
    }

    pub fn store(&self) -> Arc<dyn RatingStore> {
        self.runtime.store()
    }

    pub fn runtime(&self) -> Arc<ServiceRuntime> {
        self.runtime.clone()
    }

    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    fn initialize_collector() -> Result<Arc<MetricsCollector>, ServiceError> {
        MetricsCollector::new()
            .map(Arc::new)
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            })
    }

    /// Build the configured rating store and apply the seed file
    async fn initialize_store(config: &AppConfig) -> Result<Arc<dyn RatingStore>, ServiceError> {
        let seeds = match &config.store.seed_file {
            Some(path) => load_seed_file(path).map_err(|e| ServiceError::Configuration {
                message: format!("{:#}", e),
            })?,
            None => Vec::new(),
        };

        let store: Arc<dyn RatingStore> = match config.store.backend {
            StoreBackend::Memory => Arc::new(InMemoryRatingStore::with_players(&seeds)),
            StoreBackend::Cas => {
                let store = CasRatingStore::new(InMemoryKv::new())
                    .with_op_timeout(config.pipeline.store_timeout());
                for seed in &seeds {
                    store
                        .put_player(&seed.player_id, seed.rating)
                        .await
                        .map_err(|e| ServiceError::Initialization {
                            message: format!("Failed to seed {}: {}", seed.player_id, e),
                        })?;
                }
                Arc::new(store)
            }
        };

        info!(
            "Rating store ready ({:?} backend, {} seeded players)",
            config.store.backend,
            seeds.len()
        );
        Ok(store)
    }

    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let connection =
            AmqpConnection::connect(&config.amqp)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    /// Declare the topology and build the AMQP dead letter publisher
    async fn initialize_dead_letters(
        config: &AppConfig,
        connection: &AmqpConnection,
        collector: Arc<MetricsCollector>,
    ) -> Result<Arc<dyn DeadLetterSink>, ServiceError> {
        let channel = connection
            .connection()
            .open_channel(None)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open publisher channel: {}", e),
            })?;

        declare_topology(&channel, &config.amqp)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: e.to_string(),
            })?;

        let publisher_config = PublisherConfig {
            exchange: config.amqp.dead_letter_exchange.clone(),
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
        };

        Ok(Arc::new(
            AmqpDeadLetterPublisher::new(channel, publisher_config).with_metrics(collector),
        ))
    }

    async fn start_metrics_service(&mut self) {
        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.health_port;

        let handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            }
        });
        self.background_tasks.push(handle);

        // Give the listener a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;
        info!("✅ Health and metrics endpoints on port {}", port);
    }

    async fn start_amqp_consumption(&mut self) -> Result<(), ServiceError> {
        let Some(connection) = &self.amqp_connection else {
            info!("No broker connection - skipping event consumption");
            return Ok(());
        };

        let channel = connection
            .connection()
            .open_channel(None)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        let consumer = GameEventConsumer::new(self.orchestrator(), channel)
            .with_metrics(self.metrics_service.collector());

        consumer
            .start_consuming(&self.config.amqp.event_queue)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: e.to_string(),
            })?;

        info!(
            "Listening for game change events on '{}' (consumer {})",
            self.config.amqp.event_queue,
            consumer.consumer_tag()
        );
        self.event_consumer = Some(consumer);
        Ok(())
    }

    /// Periodically mirror health checks into the Prometheus gauges
    fn start_background_tasks(&mut self) {
        let runtime = self.runtime.clone();
        let collector = self.metrics_service.collector();

        let health_metrics_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_METRICS_INTERVAL);

            while runtime.is_running().await {
                interval.tick().await;

                collector.update_uptime(runtime.uptime());
                match HealthCheck::check(runtime.clone()).await {
                    Ok(health) => {
                        collector.update_health_status(health.status.as_gauge());
                        for check in &health.checks {
                            collector.update_component_health(
                                &check.name,
                                check.status != HealthStatus::Unhealthy,
                            );
                        }
                        debug!("Updated health metrics - status: {}", health.status);
                    }
                    Err(e) => warn!("Health check for metrics failed: {}", e),
                }
            }

            debug!("Health metrics task stopped");
        });

        self.background_tasks.push(health_metrics_task);
    }

    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            return;
        }

        info!("Stopping {} background tasks...", task_count);
        for task in self.background_tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        info!("✅ All {} background tasks stopped", task_count);
    }
}
