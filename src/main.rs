// src/main.rs

use std::process::ExitCode;
use tokio::time::{self, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

mod config;
mod janitor;
mod retention;
mod sys;

use crate::config::{CleanerConfig, LogFormat};
use crate::janitor::Janitor;

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // ==============================================================================
    // 1. Configuration & Environment
    // ==============================================================================

    let config = match CleanerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            // Logging is not up yet; the format itself may be what failed to parse
            eprintln!("netboot-cleaner: configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(config.log_format);

    for policy in &config.policies {
        tracing::info!(
            "{} folder: {}, ThresholdMaxImagesCount: {}, MaxFolderSizeInGiB: {:.2}",
            policy.name,
            policy.path.display(),
            policy.max_count,
            policy.max_size_gib
        );
    }
    tracing::info!(
        layout = ?config.layout,
        sidecar = ?config.sidecar,
        size_accounting = ?config.size_accounting,
        sweep_orphans = config.sweep_orphans,
        interval_secs = config.interval.as_secs(),
        "🧹 Netboot cleaner starting"
    );

    // ==============================================================================
    // 2. Scheduling Loop
    // ==============================================================================

    let mut ticker = time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let janitor = Janitor::new(config);

    loop {
        // A pass is never interrupted; shutdown is only observed while idle.
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested, stopping between passes");
                return ExitCode::SUCCESS;
            }
        }

        let reports = janitor.run_pass().await;
        let deleted: usize = reports.iter().map(|r| r.deleted.len()).sum();
        let failed: usize = reports.iter().map(|r| r.failures.len()).sum();
        let stuck = reports.iter().filter(|r| r.stuck).count();
        tracing::info!(
            folders = reports.len(),
            deleted,
            failed,
            stuck,
            next_in_secs = janitor.config().interval.as_secs(),
            "Retention pass complete"
        );
    }
}
