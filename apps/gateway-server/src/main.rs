//! Gateway Server - standalone server for the realtime voice-agent gateway.
//!
//! Bridges a carrier's media-stream WebSocket to remote ASR/LLM/TTS
//! services. Deployment endpoints and secrets are read from the
//! environment; call-behavior tuning loads from an optional YAML file with
//! environment and CLI overrides layered on top.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use crate::config::{EndpointConfig, ServerConfig};

/// Gateway Server - headless realtime voice-agent gateway.
#[derive(Parser, Debug)]
#[command(name = "gateway-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info", env = "GATEWAY_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Port to bind the WebSocket server to (overrides config file/env).
    #[arg(short = 'p', long, env = "GATEWAY_PORT")]
    port: Option<u16>,

    /// Public URL this server is reachable at (overrides config file/env).
    #[arg(long, env = "GATEWAY_PUBLIC_URL")]
    public_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Gateway Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(public_url) = args.public_url {
        config.public_url = Some(public_url);
    }

    let endpoints =
        EndpointConfig::from_env().context("failed to read endpoint configuration")?;

    log::info!(
        "Configuration: port={}, public_url={}, allow_barge_in={}",
        config.port,
        config.public_url.as_deref().unwrap_or("unset"),
        config.allow_barge_in,
    );

    let core_config = config.to_core_config();
    let services = Arc::new(
        gateway_core::bootstrap_services(core_config, endpoints.to_endpoints())
            .context("failed to bootstrap services")?,
    );
    log::info!("Services bootstrapped successfully");

    services.warm_opening_audio().await;

    let port = config.port;
    let server_services = Arc::clone(&services);
    let server_handle = tokio::spawn(async move {
        if let Err(err) = gateway_core::start_server(server_services, port).await {
            log::error!("Server error: {err}");
        }
    });

    log::info!("WebSocket server started on port {port}");

    shutdown_signal().await;
    log::info!("Shutdown signal received, cleaning up...");

    services.shutdown().await;
    let _ = server_handle.await;

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
