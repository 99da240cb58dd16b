use super::{build_pipeline, load_config, load_credentials};
use crate::output::Output;
use color_eyre::Result;
use feed_sync_config::PathManager;
use feed_sync_core::SyncReport;
use serde_json::json;

pub async fn run_sync(dry_run: bool, output: &Output) -> Result<()> {
    tracing::debug!(dry_run, "Sync command started");

    let path_manager = PathManager::default();
    let config = load_config(&path_manager)?;
    let creds = load_credentials(&path_manager)?;

    let mut pipeline = build_pipeline(&config, &creds, &path_manager, dry_run)?;
    let report = pipeline
        .run()
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Sync operation failed: {:#}", e))?;

    report_sync(&report, output);
    Ok(())
}

pub fn report_sync(report: &SyncReport, output: &Output) {
    if !output.is_human() {
        output.json(&json!({
            "success": true,
            "published": report.published,
            "items": report.document.items.len(),
            "calendar": report.document.calendar.len(),
            "season_failures": report.season_failures,
            "duration_seconds": report.duration.as_secs_f64(),
        }));
        return;
    }

    for show in &report.season_failures {
        output.warn(format!("Season data unavailable for {}, used show data instead", show));
    }
    let verb = if report.published { "Published" } else { "Built (dry run)" };
    output.success(format!(
        "{} {} items and {} upcoming entries in {:.1}s",
        verb,
        report.document.items.len(),
        report.document.calendar.len(),
        report.duration.as_secs_f64()
    ));
    if !report.published {
        output.info("Run 'rewind show --dry-run' to inspect the document");
    }
}
