//! hostgate: forward HTTP proxy with a hostname allowlist
//!
//! This is the main entry point for the hostgate binary. It handles CLI
//! argument parsing, configuration loading, logging initialization, and
//! runs the proxy until SIGINT or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use hostgate::{
    cli::Cli,
    config::ConfigLoader,
    proxy::{ProxyServer, ShutdownHandle},
    systemd, telemetry,
};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before any other initialization)
    let cli = Cli::parse();

    // Load configuration with hierarchy merging
    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;
    let settings = config.resolve().context("Invalid configuration")?;

    telemetry::init_tracing(settings.verbose)?;

    debug!("Resolved settings: {:?}", settings);

    if settings.matcher.is_empty() {
        warn!("Allowlist is empty: every request will be rejected");
    }

    let (shutdown, shutdown_rx) = ShutdownHandle::new();
    let server = ProxyServer::bind(settings.proxy_config(), shutdown_rx)
        .await
        .context("Failed to start proxy")?;

    tokio::spawn(shutdown_on_signal(shutdown));

    server
        .run(|addr| {
            info!("Ready on {}", addr);
            match systemd::sd_notify_ready() {
                Ok(true) => debug!("Notified systemd of readiness"),
                Ok(false) => {}
                Err(e) => warn!("systemd readiness notification failed: {}", e),
            }
        })
        .await
        .context("Proxy stopped with an error")?;

    Ok(())
}

/// Trigger shutdown on the first SIGINT or SIGTERM.
async fn shutdown_on_signal(shutdown: ShutdownHandle) {
    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Failed to install signal handlers: {}", e);
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }

    shutdown.shutdown();
}
