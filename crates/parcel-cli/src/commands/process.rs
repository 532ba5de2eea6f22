//! `parcel process` command implementation
//!
//! Meant to be run from cron or a systemd timer.

use crate::commands::export::{print_completed, print_export};
use crate::commands::{open_dataset, report_error, Outcome};
use crate::config::Settings;
use crate::error::Result;
use crate::output;
use parcel_engine::{Engine, TickReport};
use std::path::{Path, PathBuf};

/// Run one tick for every dataset
pub async fn run(settings: &Settings, paths: Vec<PathBuf>) -> Result<Outcome> {
    let engine = settings.engine();
    let mut outcome = Outcome::Success;
    for path in settings.resolve_datasets(&paths)? {
        let result = process_one(&engine, &path).await;
        outcome = outcome.and(result.unwrap_or_else(|e| report_error(&path, &e)));
    }
    Ok(outcome)
}

async fn process_one(engine: &Engine, path: &Path) -> Result<Outcome> {
    let dataset = open_dataset(path)?;
    let report = engine.process(&dataset).await?;
    Ok(print_tick(&report))
}

fn print_tick(report: &TickReport) -> Outcome {
    output::heading(&report.dataset);

    for done in &report.ingest.ingested {
        let source = done
            .source
            .as_ref()
            .map(|s| s.display().to_string())
            .unwrap_or_default();
        print_completed(&format!("ingested from {}", source), done);
    }
    for skipped in &report.ingest.skipped {
        output::warning(&format!("skipped {}: {}", skipped.path.display(), skipped.error));
    }

    let outcome = match &report.export {
        Some(export) => print_export(export),
        None => {
            println!("  Not due");
            Outcome::Success
        },
    };

    if let Some(retention) = &report.retention {
        for id in &retention.deleted {
            println!("  Removed {}", id);
        }
    }

    // Export failures were already printed above.
    for warning in &report.warnings {
        if !(report.has_failure() && warning.starts_with("export ")) {
            output::warning(warning);
        }
    }
    if report.committed {
        println!("  Committed");
    }
    outcome
}
