//! approve-agent: host binary that supervises one scanner worker process.
//!
//! A real host would be a GUI with a "host" thread owning this exact
//! `SupervisorHandle` API; this binary is the thin async driver that plays
//! that role for manual and integration testing, per the design documents.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use approve_agent::config::ScanConfig;
use approve_agent::supervisor::{SupervisorEvent, SupervisorHandle};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("approve_agent=info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .init();

    let config_path = env::args()
        .nth(1)
        .context("usage: approve-agent <config.json>")?;
    let config_bytes =
        std::fs::read(&config_path).with_context(|| format!("reading {config_path}"))?;
    let config: ScanConfig = serde_json::from_slice(&config_bytes).context("parsing config")?;
    config.validate().context("validating config")?;

    let worker_path = worker_binary_path()?;
    info!(path = %worker_path.display(), "spawning scanner worker");
    let mut supervisor =
        SupervisorHandle::spawn(&worker_path).context("spawning worker process")?;
    supervisor.start(config).context("sending Start command")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            event = supervisor.next_event() => {
                match event {
                    SupervisorEvent::Status(Some(s)) => info!(running = s.running, detail = %s.detail, error = ?s.error, "status"),
                    SupervisorEvent::Status(None) => { error!("worker stdout closed unexpectedly"); break; }
                    SupervisorEvent::Hit(Some(h)) => info!(score = h.score, x = h.screen_x, y = h.screen_y, "hit"),
                    SupervisorEvent::Hit(None) => break,
                    SupervisorEvent::Log(Some(message)) => info!(worker = %message, "log"),
                    SupervisorEvent::Log(None) => break,
                }
            }
        }
    }

    supervisor.exit().await?;
    info!("approve-agent shutting down");
    Ok(())
}

/// The worker binary always ships alongside this one, so its path is
/// derived from `current_exe` rather than requiring it on `PATH`.
fn worker_binary_path() -> Result<PathBuf> {
    let mut path = env::current_exe().context("resolving current executable path")?;
    let file_name = if cfg!(windows) {
        "approve-worker.exe"
    } else {
        "approve-worker"
    };
    path.set_file_name(file_name);
    Ok(path)
}
