//! typetree HTTP server.
//!
//! Usage:
//!   typetree-server --port 3001 --db typetree.sqlite3

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::info;
use typetree_core::telemetry::LocalSampleSource;
use typetree_core::{core_version, init_process_logging};
use typetree_server::{build_router, AppState, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::parse();
    init_process_logging(config.log_level(), config.log_dir.as_deref())
        .map_err(|err| anyhow!("failed to initialize logging: {err}"))?;

    let conn = config.open_database().with_context(|| {
        if config.memory {
            "failed to open in-memory database".to_string()
        } else {
            format!("failed to open database `{}`", config.db.display())
        }
    })?;

    let state = AppState::new(conn).context("database is not a typetree store")?;
    // No external producer is wired in yet; the topic stays quiet until one
    // publishes through a `SampleSource`.
    let telemetry = LocalSampleSource::new();
    state
        .subscribe_telemetry(&telemetry)
        .context("failed to subscribe to telemetry")?;

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        "event=server_start module=server status=ok addr={addr} core_version={} db={}",
        core_version(),
        if config.memory {
            ":memory:".to_string()
        } else {
            config.db.display().to_string()
        }
    );

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("event=server_stop module=server status=ok");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::warn!("event=server_signal module=server status=error error={err}");
    }
}
