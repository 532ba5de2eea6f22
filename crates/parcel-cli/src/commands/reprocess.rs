//! `parcel reprocess-metrics` command implementation

use crate::commands::{open_dataset, report_error, Outcome};
use crate::config::Settings;
use crate::error::Result;
use crate::output;
use parcel_engine::{Engine, ParcelId};
use std::path::{Path, PathBuf};

/// Record metrics missing from each dataset's ledger
pub async fn run(settings: &Settings, paths: Vec<PathBuf>, ids: Vec<ParcelId>) -> Result<Outcome> {
    let engine = settings.engine();
    let mut outcome = Outcome::Success;
    for path in settings.resolve_datasets(&paths)? {
        let result = reprocess_one(&engine, &path, &ids).await;
        outcome = outcome.and(result.unwrap_or_else(|e| report_error(&path, &e)));
    }
    Ok(outcome)
}

async fn reprocess_one(engine: &Engine, path: &Path, ids: &[ParcelId]) -> Result<Outcome> {
    let dataset = open_dataset(path)?;
    output::heading(&dataset.name());

    let report = engine.reprocess_metrics(&dataset, ids).await?;
    if report.recorded.is_empty() && report.failures.is_empty() {
        println!("  No missing metrics");
    }
    for (id, values) in &report.recorded {
        let names: Vec<&str> = values.keys().map(String::as_str).collect();
        output::success(&format!("{}: recorded {}", id, names.join(", ")));
    }
    for (id, failures) in &report.failures {
        for failure in failures {
            output::warning(&format!("{}: {} failed: {}", id, failure.metric, failure.error));
        }
    }
    Ok(Outcome::Success)
}
