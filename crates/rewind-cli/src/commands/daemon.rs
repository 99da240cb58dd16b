use super::sync::report_sync;
use super::{build_pipeline, load_config, load_credentials};
use crate::output::Output;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use feed_sync_config::PathManager;
use feed_sync_core::FeedPipeline;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

pub async fn run_daemon(interval_minutes: Option<u64>, no_startup_sync: bool, output: &Output) -> Result<()> {
    let path_manager = PathManager::default();
    path_manager
        .ensure_directories()
        .map_err(|e| eyre!("Failed to create data directories: {}", e))?;
    let config = load_config(&path_manager)?;
    let creds = load_credentials(&path_manager)?;

    let minutes = interval_minutes.unwrap_or(config.feed.refresh_interval_minutes);
    if minutes == 0 {
        return Err(eyre!("--interval-minutes must be greater than zero"));
    }

    // One pipeline for the process lifetime so a fatal token state sticks
    let mut pipeline = build_pipeline(&config, &creds, &path_manager, false)?;

    let mut ticker = tokio::time::interval(Duration::from_secs(minutes * 60));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    if no_startup_sync {
        // The first tick completes immediately
        ticker.tick().await;
    }

    info!(
        operation = "daemon_started",
        interval_minutes = minutes,
        startup_sync = !no_startup_sync,
        log_file = %path_manager.daemon_log_file().display(),
        "Daemon started"
    );
    output.info(format!("Publishing every {} minutes, press Ctrl-C to stop", minutes));

    loop {
        tokio::select! {
            _ = ticker.tick() => run_scheduled(&mut pipeline, output).await,
            _ = tokio::signal::ctrl_c() => {
                info!(operation = "daemon_stopped", "Shutdown signal received");
                break;
            }
        }
    }
    Ok(())
}

/// A failed run is logged and the loop carries on
async fn run_scheduled(pipeline: &mut FeedPipeline, output: &Output) {
    info!(operation = "scheduled_sync_start", "Starting scheduled sync");
    match pipeline.run().await {
        Ok(report) => {
            info!(
                operation = "scheduled_sync_complete",
                items = report.document.items.len(),
                duration_ms = report.duration.as_millis() as u64,
                "Scheduled sync completed"
            );
            report_sync(&report, output);
        }
        Err(e) => {
            error!(operation = "scheduled_sync_error", error = %format!("{:#}", e), "Scheduled sync failed");
            output.error(format!("Scheduled sync failed: {:#}", e));
        }
    }
}
