//! Main entry point for the Elo Relay rating service
//!
//! Initializes logging and configuration, wires the pipeline to the broker
//! and runs until SIGINT or SIGTERM, then shuts down within the configured
//! timeout.

use anyhow::Result;
use clap::Parser;
use elo_relay::config::{validate_config, AppConfig};
use elo_relay::service::{AppState, HealthCheck, HealthStatus, ServiceRuntime};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Elo Relay - rating updates from game-record change events
#[derive(Parser)]
#[command(
    name = "elo-relay",
    version,
    about = "Applies Elo rating updates for recorded games",
    long_about = "Elo Relay consumes game-record change events from AMQP, computes the Elo \
                 update for both players, writes both ratings atomically with version checks \
                 and dead-letters events that cannot be applied."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Perform health check and exit
    #[arg(long, help = "Perform a health check and exit with status code")]
    health_check: bool,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// AMQP URL override
    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    /// Health port override
    #[arg(long, value_name = "PORT", help = "Override health and metrics port")]
    health_port: Option<u16>,

    /// Run without a broker
    #[arg(long, help = "Run without AMQP; dead letters are only logged")]
    standalone: bool,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

async fn build_state(config: AppConfig, standalone: bool) -> Result<AppState> {
    let state = if standalone {
        AppState::standalone(config).await?
    } else {
        AppState::new(config).await?
    };
    Ok(state)
}

/// Check that the store and broker are reachable and exit with the result
async fn perform_health_check(config: AppConfig, standalone: bool) -> Result<()> {
    info!("Performing health check...");

    let state = build_state(config, standalone).await?;
    let runtime = state.runtime();
    runtime.set_running(true).await;

    match HealthCheck::check(runtime).await {
        Ok(health) => {
            println!("Health Check: {}", health.status);
            for check in &health.checks {
                match &check.message {
                    Some(message) => println!("  {}: {} ({})", check.name, check.status, message),
                    None => println!("  {}: {}", check.name, check.status),
                }
            }
            if let Some(players) = health.stats.players {
                println!("  Players: {}", players);
            }

            if health.status == HealthStatus::Healthy {
                std::process::exit(0);
            } else {
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received SIGINT (Ctrl+C) signal");
            },
            _ = terminate.recv() => {
                info!("Received SIGTERM signal");
            },
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C signal");
    }

    Ok(())
}

/// Log a pipeline summary periodically
async fn health_check_task(runtime: Arc<ServiceRuntime>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));

    while runtime.is_running().await {
        interval.tick().await;

        match HealthCheck::check(runtime.clone()).await {
            Ok(health) => {
                let stats = &health.stats.pipeline;
                info!(
                    "Health check: {} - {} events, {} applied, {} dead-lettered, {} retries",
                    health.status,
                    stats.events_received,
                    stats.applied,
                    stats.dead_lettered,
                    stats.retries
                );
            }
            Err(e) => {
                warn!("Health check failed: {}", e);
            }
        }
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig, standalone: bool) {
    info!("🚀 Elo Relay Rating Service");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    if standalone {
        info!("   AMQP: disabled (standalone)");
    } else {
        info!("   AMQP: {}", config.amqp.url);
        info!("   Event queue: {}", config.amqp.event_queue);
        info!("   Dead letters: {}", config.amqp.dead_letter_exchange);
    }
    info!("   Store: {:?}", config.store.backend);
    info!("   K-factor: {}", config.rating.k_factor);
    info!(
        "   Attempts per step: {} ({}ms backoff)",
        config.pipeline.max_attempts, config.pipeline.retry_backoff_ms
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load and merge configuration from environment and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    // CLI overrides
    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }

    if let Some(health_port) = args.health_port {
        config.service.health_port = health_port;
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {:#}", e);
        std::process::exit(1);
    });

    // Initialize logging early (before any other operations)
    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.health_check {
        return perform_health_check(config, args.standalone).await;
    }

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config, args.standalone);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    display_startup_banner(&config, args.standalone);

    info!("Initializing service components...");
    let mut app_state = match build_state(config.clone(), args.standalone).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    let health_task = tokio::spawn(health_check_task(app_state.runtime()));

    info!("✅ Elo Relay is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    if let Err(e) = wait_for_shutdown_signal().await {
        error!("Failed to listen for shutdown signals: {}", e);
    }

    info!("🛑 Shutdown signal received, beginning graceful shutdown...");
    health_task.abort();

    match tokio::time::timeout(config.shutdown_timeout(), app_state.shutdown()).await {
        Ok(Ok(())) => info!("✅ Graceful shutdown completed successfully"),
        Ok(Err(e)) => error!("Shutdown failed: {}", e),
        Err(_) => warn!("⚠️  Shutdown timeout exceeded, forcing exit"),
    }

    info!("🛑 Elo Relay stopped");
    Ok(())
}
