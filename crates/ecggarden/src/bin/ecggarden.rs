//! ecggarden daemon: HTTP control surface over the capture supervisor.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use ecgconf::EcgConfig;
use ecggarden::{router, telemetry, AppState, FileSink, Supervisor};
use ecgstore::RecordStore;
use tokio_util::sync::CancellationToken;

/// ECG capture daemon
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file, replacing ./ecggarden.toml in the load order
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP port (overrides bind.http_port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Where session records and artifacts are kept (overrides paths.state_dir)
    #[arg(short, long)]
    state_dir: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) = EcgConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.bind.http_port = port;
    }
    if let Some(state_dir) = cli.state_dir {
        config.paths.state_dir = state_dir;
    }

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    telemetry::init(&config.telemetry.log_level).context("Failed to initialize tracing")?;

    tracing::info!("ecggarden {} starting", env!("CARGO_PKG_VERSION"));
    for file in &sources.files {
        tracing::info!(config.file = %file.display(), "Loaded config file");
    }
    for var in &sources.env_overrides {
        tracing::info!(config.env = %var, "Applied env override");
    }

    let state_dir = &config.paths.state_dir;
    std::fs::create_dir_all(state_dir).context("Failed to create state directory")?;
    let store = RecordStore::at_path(state_dir.join("records"))
        .context("Failed to open record store")?;
    tracing::info!(state_dir = %state_dir.display(), "Record store ready");

    // No worker survives a restart, so any record still running was cut off.
    let recovery = store.clone();
    let interrupted = tokio::task::spawn_blocking(move || {
        recovery.mark_interrupted("capture interrupted by daemon restart", Utc::now())
    })
    .await
    .context("Session recovery task failed")?
    .context("Failed to recover interrupted sessions")?;
    if !interrupted.is_empty() {
        tracing::warn!(sessions = ?interrupted, "Marked sessions interrupted by the last shutdown");
    }

    let sink = Arc::new(FileSink::new(store.clone()));
    let supervisor = Arc::new(Supervisor::from_config(&config, sink));

    let app = router(AppState {
        supervisor: Arc::clone(&supervisor),
        store,
    });

    let addr = config.bind.socket_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(
        http.addr = %addr,
        sampler = ?config.sampler.kind,
        capture.rate_hz = config.capture.sample_rate_hz,
        "Listening"
    );

    let shutdown = CancellationToken::new();
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                server_shutdown.cancelled().await;
                tracing::info!("Server shutdown signal received");
            })
            .await
    });

    wait_for_signal().await?;
    shutdown.cancel();

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Server shutdown with error"),
        Err(e) => tracing::error!(error = %e, "Server task failed"),
    }

    let stopped = supervisor.cleanup_all().await;
    tracing::info!(sessions = stopped, "Shutdown complete");

    Ok(())
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM.
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                tracing::info!("Received SIGINT (Ctrl+C), shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        tracing::info!("Received Ctrl+C, shutting down");
    }
    Ok(())
}
