// GA Realtime Exporter - Prometheus exporter for Google Analytics Real Time metrics
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # GA Realtime Exporter
//!
//! Polls the Google Analytics Real Time Reporting API and exposes the
//! results as Prometheus gauges.
//!
//! ## Usage
//!
//! ```bash
//! # Run with ./config/conf.yaml and ./config/ga_creds.json
//! ga-realtime-exporter
//!
//! # Custom paths and port
//! ga-realtime-exporter --config /etc/ga/conf.yaml --credentials /etc/ga/creds.json --port 9090
//! ```

mod analytics;
mod auth;
mod config;
mod credentials;
mod server;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ga_realtime::{GaugeRegistry, Poller, PollerStats, RegistryError};
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use analytics::RealtimeClient;
use auth::{AuthError, ServiceAccountTokenSource};
use config::{ConfigError, ExporterConfig, DEFAULT_CONFIG_PATH};
use credentials::{CredentialsError, ServiceAccountKey, DEFAULT_CREDENTIALS_PATH};
use server::AppState;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Google Analytics Real Time Prometheus Exporter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Service account key file (JSON)
    #[arg(long, default_value = DEFAULT_CREDENTIALS_PATH)]
    credentials: String,

    /// Port to listen on, overriding the configuration file
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Errors that stop the exporter before it starts serving.
#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credentials error: {0}")]
    Credentials(#[from] CredentialsError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Metric registration error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Exporter metrics error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args.log_level);

    info!("GA Realtime Exporter v{}", env!("CARGO_PKG_VERSION"));

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(args: Args) -> Result<(), StartupError> {
    let config = ExporterConfig::load(&args.config)?;
    let key = ServiceAccountKey::load(&args.credentials)?;
    info!(
        "Loaded {} metrics for view {} (interval {}s)",
        config.metrics.len(),
        config.viewid,
        config.interval
    );

    // Gauges first: an arity conflict must stop us before anything runs.
    let mut registry = GaugeRegistry::new();
    let created = registry.register_all(&config.metrics)?;
    let stats = PollerStats::register(registry.prometheus())?;
    let registry = Arc::new(registry);
    info!("Registered {} gauges", created);

    let http = reqwest::Client::builder()
        .user_agent(concat!("ga-realtime-exporter/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?;
    let tokens = Arc::new(ServiceAccountTokenSource::new(&key, http.clone())?);
    let client = Arc::new(RealtimeClient::new(http, config.viewid.clone(), tokens));

    let poller = Poller::new(
        config.metrics.clone(),
        client,
        Arc::clone(&registry),
        stats.clone(),
        config.poller_config(),
    )?;

    let state = Arc::new(AppState::new(
        Arc::clone(&registry),
        stats,
        config.interval(),
        poller.metric_count(),
    ));

    let port = args.port.unwrap_or(config.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Starting server on http://{}", addr);
    info!("Metrics endpoint: http://{}/metrics", addr);

    tokio::spawn(poller.run());

    axum::serve(listener, server::router(state)).await?;
    Ok(())
}
