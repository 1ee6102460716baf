#![warn(missing_docs)]

//! nfsplane export daemon

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use nfsplane_core::StatsRegistry;
use nfsplane_server::{ActiveUsers, ExportStatReport, ExportTable, ServerConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "nfsplane-exportd")]
#[command(about = "nfsplane export table daemon", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, env = "NFSPLANE_CONFIG")]
    config: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .init();

    tracing::info!("nfsplane export daemon starting...");

    if cli.check {
        config.validate()?;
        tracing::info!(exports = config.exports.len(), "configuration is valid");
        return Ok(());
    }

    let stats = Arc::new(StatsRegistry::new());
    let table = Arc::new(ExportTable::with_stats(Arc::clone(&stats)));
    let published = config.apply(&table)?;
    tracing::info!(exports = published, "exports published");

    let users = Arc::new(ActiveUsers::new(Duration::from_secs(
        config.user_idle_timeout_secs,
    )));
    let sweeper = {
        let users = Arc::clone(&users);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                users.expire();
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    sweeper.abort();

    let report = ExportStatReport::collect(&table, &stats.snapshot());
    for rec in &report.records {
        tracing::info!(
            path = %rec.path,
            ops = rec.ops,
            bytes_read = rec.bytes_read,
            bytes_written = rec.bytes_written,
            "export totals"
        );
    }
    tracing::info!(active_users = users.user_count(), "nfsplane export daemon stopped");
    Ok(())
}
