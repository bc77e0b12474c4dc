//! News Scanning Worker
//!
//! The scanner continuously ingests RSS feeds, extracts and analyzes article
//! content, generates summaries through the provider gateway, computes
//! embeddings through the ML service, and groups articles into topics. All
//! work flows through the three-class task queue; a periodic beat emits the
//! recurring jobs.
// This is the main entry point for the scanner application. It is responsible for:
// - Initializing logging and configuration.
// - Wiring the store, runtime, providers, worker pool, and beat together.
// - Managing the application's lifecycle, including graceful shutdown.

// Use jemalloc as the global allocator for better performance
#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info};

// The scanner is organized into several modules, each with a distinct responsibility.
mod config;
mod jobs;
mod ml;
mod provider;
mod runtime;
mod scan;
mod store;

use config::ConfigManager;
use jobs::{JobExecutor, SummaryPrompt};
use ml::MlClient;
use provider::{ProviderClient, ProviderGateway, ProviderKind};
use runtime::admin::QueueManager;
use runtime::beat::PeriodicBeat;
use runtime::worker::WorkerPool;
use runtime::TaskRuntime;
use scan::SourceScanner;
use store::NewsStore;

/// Command-line arguments for the scanner
#[derive(Parser, Debug)]
#[command(name = "scanner")]
#[command(about = "News scanning worker that ingests feeds and analyzes articles", long_about = None)]
struct CliArgs {
    /// Path to the configuration directory containing scanner.toml and sources.toml
    #[arg(value_name = "CONFIG_DIR")]
    config_dir: PathBuf,

    /// Override the data directory (defaults to a sibling of the config directory)
    #[arg(long = "data-dir", value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Override the ML service URL from the config file
    #[arg(long = "ml-service-url", value_name = "URL")]
    ml_service_url: Option<String>,

    /// Override the local provider URL from the config file
    #[arg(long = "provider-url", value_name = "URL")]
    provider_url: Option<String>,
}

/// The main application structure for the scanner. It owns the long-lived
/// components and coordinates their startup and shutdown.
pub struct Scanner {
    pub config_manager: ConfigManager,
    /// Admin surface the HTTP layer consumes: submit, cancel, status, stats.
    pub admin: QueueManager,
    worker_pool: WorkerPool,
    beat: PeriodicBeat,
    shutdown_timeout: Duration,
}

impl Scanner {
    /// Creates and fully initializes a scanner instance: configuration,
    /// store, runtime, providers, worker pool, and the periodic beat.
    pub async fn new(cli_args: CliArgs) -> Result<Self> {
        info!("Starting News Scanning Worker");

        // The data directory is expected to be a sibling of the config directory.
        let data_dir = cli_args.data_dir.clone().unwrap_or_else(|| {
            cli_args
                .config_dir
                .parent()
                .map(|p| p.join("data"))
                .unwrap_or_else(|| PathBuf::from("./data"))
        });
        info!("Data directory: {}", data_dir.display());

        let mut config_manager = ConfigManager::new(cli_args.config_dir)?;
        config_manager.load_config().await?;

        let mut scanner_config = config_manager
            .scanner_config
            .clone()
            .expect("Scanner configuration not loaded. Call load_config() first.");
        if let Some(url) = cli_args.ml_service_url {
            scanner_config.ml_service_url = url;
        }
        if let Some(url) = cli_args.provider_url {
            scanner_config.local_provider_url = url;
        }
        let config = Arc::new(scanner_config);

        // Initialize the store
        let mut news_store = NewsStore::new(&data_dir, config.database_busy_timeout_seconds)?;
        news_store.initialize().await?;
        let store = Arc::new(RwLock::new(news_store));
        info!("Store initialized successfully");

        // Register configured sources; scans pick them up on the next tick.
        let sources = config_manager
            .sources_config
            .clone()
            .unwrap_or_default()
            .sources;
        {
            let mut store = store.write().await;
            for entry in &sources {
                store
                    .add_source(&entry.url, &entry.display_name())
                    .await
                    .with_context(|| format!("Failed to register source {}", entry.url))?;
            }
        }
        info!(sources = sources.len(), "Sources registered");

        // Providers: local primary, remote fallback when configured.
        let primary = ProviderClient::new(
            ProviderKind::Local,
            config.local_provider_url.clone(),
            config.local_provider_model.clone(),
            None,
            config.provider_request_timeout(),
            Duration::from_secs_f64(config.provider_min_interval_seconds),
            config.provider_quota_soft_pct,
        )?;
        let fallback = if config.remote_provider_url.is_empty() {
            None
        } else {
            Some(ProviderClient::new(
                ProviderKind::Remote,
                config.remote_provider_url.clone(),
                config.remote_provider_model.clone(),
                Some(config.remote_provider_api_key.clone()),
                config.provider_request_timeout(),
                Duration::from_secs_f64(config.provider_min_interval_seconds),
                config.provider_quota_soft_pct,
            )?)
        };
        let gateway = Arc::new(ProviderGateway::new(
            primary,
            fallback,
            config.llm_fallback_enabled,
        ));

        let ml = Arc::new(MlClient::new(
            config.ml_service_url.clone(),
            config.ml_request_timeout(),
            config.daily_topics_timeout(),
        )?);

        let source_scanner = Arc::new(SourceScanner::new(config.clone())?);
        let prompt = Arc::new(SummaryPrompt::load(config.prompt_path.as_deref()));
        info!(prompt_version = %prompt.version, "Summary prompt loaded");

        let runtime = Arc::new(TaskRuntime::new(store.clone()));
        let executor = Arc::new(JobExecutor::new(
            store.clone(),
            config.clone(),
            runtime.clone(),
            gateway.clone(),
            ml,
            source_scanner,
            prompt,
        ));

        let worker_pool = WorkerPool::new(runtime.clone(), executor, config.clone());
        let beat = PeriodicBeat::new(runtime.clone(), config.clone());
        let admin = QueueManager::new(runtime, gateway);

        Ok(Self {
            config_manager,
            admin,
            worker_pool,
            beat,
            shutdown_timeout: Duration::from_secs(30),
        })
    }

    /// Starts the worker pool and the periodic beat.
    pub fn start(&self) {
        self.worker_pool.start();
        self.beat.start();
        info!("Scanner started");
    }

    /// Graceful shutdown: stop the beat, then drain the workers.
    pub async fn shutdown(&self) {
        info!("Shutting down scanner");
        self.beat.stop();
        self.worker_pool.stop(self.shutdown_timeout).await;
        info!("Scanner shutdown complete");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the logging framework (`tracing`).
    let file_appender = tracing_appender::rolling::daily("./logs", "scanner.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Configure logging with proper RUST_LOG environment variable handling
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Default directives are only used if RUST_LOG is not set
        tracing_subscriber::EnvFilter::new("scanner=info,shared=info")
    });

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    let cli_args = CliArgs::parse();
    info!("News Scanning Worker starting up");
    info!("Configuration directory: {}", cli_args.config_dir.display());

    let scanner = match Scanner::new(cli_args).await {
        Ok(scanner) => scanner,
        Err(e) => {
            error!("FATAL ERROR: Failed to initialize scanner");
            error!("Error: {}", e);
            let mut current_error = e.source();
            while let Some(err) = current_error {
                error!("  Caused by: {}", err);
                current_error = err.source();
            }
            std::process::exit(1);
        }
    };

    scanner.start();

    let stats = scanner.admin.get_queue_stats().await;
    info!("Queue state at startup: {}", stats);

    // Run until a shutdown signal arrives.
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    scanner.shutdown().await;
    Ok(())
}

// Unit tests for the scanner crate live in the tests module.
#[cfg(test)]
mod tests;
