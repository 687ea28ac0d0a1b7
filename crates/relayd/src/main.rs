//! relayd — the relay notification service daemon.
//!
//! Wires the pieces together: settings, tracing, metrics, the HTTP/WS
//! server, the heartbeat monitor, and the retention sweep. Shutdown is
//! cooperative: SIGINT/SIGTERM cancels the shutdown token, which unwinds
//! live sessions and background tasks before the process exits.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use relay_server::auth::JwtVerifier;
use relay_server::config::ServerConfig;
use relay_server::metrics::install_recorder;
use relay_server::server::RelayServer;
use relay_server::shutdown::wait_for_signal;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "relayd", about = "Relay notification service daemon", version)]
struct Args {
    /// Path to the settings file (defaults to `~/.relay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let settings = match &args.config {
        Some(path) => relay_settings::load_settings_from_path(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => relay_settings::load_settings().context("loading settings")?,
    };

    let mut config = ServerConfig::from_settings(&settings);
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let metrics_handle = install_recorder();
    let verifier = Arc::new(JwtVerifier::new(&settings.server.token_secret));
    let server = RelayServer::new(config.clone(), verifier).with_metrics(metrics_handle);

    let heartbeat = server.spawn_heartbeat();
    let cleanup = server.spawn_cleanup();

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("binding {}:{}", config.host, config.port))?;
    info!(addr = %listener.local_addr()?, "relayd listening");

    let shutdown = server.shutdown().clone();
    let signal_shutdown = shutdown.clone();
    let app = server.router();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            signal_shutdown.shutdown();
        })
        .await
        .context("server error")?;

    shutdown.graceful_shutdown(vec![heartbeat, cleanup], None).await;
    info!("relayd stopped");
    Ok(())
}
