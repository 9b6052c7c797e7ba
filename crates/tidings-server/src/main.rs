//! # Tidings
//!
//! News distribution server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! tidings
//!
//! # Run with custom config
//! tidings --config /path/to/tidings.toml
//!
//! # Run with environment variables
//! TIDINGS_PORT=6000 TIDINGS_HOST=0.0.0.0 tidings
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tidings_server::{metrics, Config, NewsServer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Category-based news distribution server.
#[derive(Debug, Parser)]
#[command(name = "tidings", version, about)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tidings=info,tidings_server=info,tidings_core=info,tidings_transport=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.validate().context("Invalid configuration")?;

    info!("Starting Tidings server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let server = NewsServer::bind(config).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await;

    Ok(())
}
