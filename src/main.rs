use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod models;
mod notify;
mod probe;
mod registry;
mod report;
mod store;
#[cfg(test)]
mod test_support;
mod utils;

use crate::config::MonitorConfig;
use crate::engine::Engine;
use crate::probe::Prober;
use crate::report::Summary;

/// Checks every configured resource once and reports what changed since the last run.
#[derive(Debug, Parser)]
#[command(name = "reachwatch", version, about)]
struct Cli {
    /// Path to the JSON configuration
    #[arg(short, long, env = "REACHWATCH_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Log the summary without calling the webhook
    #[arg(long)]
    no_notify: bool,

    /// Overrides RUST_LOG; without either, logs at info
    #[arg(long)]
    log_level: Option<Level>,
}

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

fn log_filter(level: Option<Level>, rust_log: Option<&str>) -> EnvFilter {
    let base = rust_log.filter(|d| !d.trim().is_empty()).unwrap_or("info");
    let filter = EnvFilter::builder().parse_lossy(base);
    match level {
        Some(level) => filter.add_directive(level.into()),
        None => filter,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.log_level, std::env::var("RUST_LOG").ok().as_deref()))
        .with_ansi(true)
        .init();

    let config = MonitorConfig::load(&cli.config)?;
    let resources = registry::build(&config.devices)
        .with_context(|| format!("Invalid resources in {}", cli.config.display()))?;
    info!("Loaded {} resources across {} devices", resources.len(), config.devices.len());

    let prober = Prober::new(&config.probes)?;
    let store = store::open_store(&config.store).await;

    let report = Engine::new(&prober, store.as_ref(), config.max_concurrency)
        .run(&resources)
        .await;

    let changes = match report::summarize(&report.went_offline, &report.came_online) {
        Summary::NoChange => {
            info!("No changes in status since last run... all done.");
            return Ok(());
        }
        Summary::Changes(changes) => changes,
    };

    let link = config.report_link.as_deref();
    info!("{}\n{}", changes.title(), changes.body(link));

    match (&config.webhook_url, cli.no_notify) {
        (Some(_), true) => info!("Notification skipped (--no-notify)"),
        (Some(url), false) => {
            let client = notify::webhook_client(WEBHOOK_TIMEOUT).context("Failed to build HTTP client")?;
            if let Err(e) = notify::send_webhook(&client, url, &changes, link).await {
                error!("Failed to deliver notification: {}", e);
            }
        }
        (None, _) => {}
    }

    Ok(())
}
