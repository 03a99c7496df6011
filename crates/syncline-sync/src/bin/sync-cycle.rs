//! # sync-cycle
//!
//! Runs one sync cycle and exits. Meant to be invoked by cron, a systemd
//! timer or any other scheduler, at most one instance at a time.
//!
//! ```text
//! sync-cycle [--config <path>] [--cleanup-only]
//!
//!   load config ─► open database (migrations) ─► run cycle (slave only)
//!                                              ─► retention sweep
//!                                              ─► print report as JSON
//! ```
//!
//! Log level comes from `RUST_LOG` (default `info`). Logs go to stderr so
//! stdout carries only the report.

use std::path::PathBuf;

use anyhow::{bail, Context};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use syncline_db::{Database, DbConfig};
use syncline_sync::{SyncConfig, SyncOrchestrator};

/// Parsed command line.
#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    cleanup_only: bool,
}

impl Args {
    fn parse() -> anyhow::Result<Self> {
        let mut args = Args::default();
        let mut raw = std::env::args().skip(1);

        while let Some(arg) = raw.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    let path = raw.next().context("--config needs a path")?;
                    args.config = Some(PathBuf::from(path));
                }
                "--cleanup-only" => args.cleanup_only = true,
                "--help" | "-h" => {
                    println!("usage: sync-cycle [--config <path>] [--cleanup-only]");
                    std::process::exit(0);
                }
                other => bail!("unknown argument: {}", other),
            }
        }

        Ok(args)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let args = Args::parse()?;

    let config = SyncConfig::load(args.config).context("Failed to load sync configuration")?;
    info!(
        role = %config.role(),
        master = config.base_url().unwrap_or("-"),
        database = %config.database.path.display(),
        "Configuration loaded"
    );

    let db = Database::new(
        DbConfig::new(config.database.path.clone()).track_changes(config.change_log.enabled),
    )
    .await
    .context("Failed to open database")?;

    let sync = SyncOrchestrator::new(config, db.clone()).context("Invalid sync configuration")?;

    let report = if args.cleanup_only {
        None
    } else {
        sync.run_scheduled_cycle().await
    };

    let swept = match sync.cleanup_with_configured_retention().await {
        Ok(deleted) => Some(deleted),
        Err(e) => {
            warn!(error = %e, "Change log cleanup failed");
            None
        }
    };

    let stats = match sync.stats().await {
        Ok(stats) => Some(stats),
        Err(e) => {
            warn!(error = %e, "Could not read change log statistics");
            None
        }
    };

    let output = json!({
        "role": sync.config().role().to_string(),
        "cycle": report,
        "cleaned_up": swept,
        "change_log": stats,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    db.close().await;
    Ok(())
}
