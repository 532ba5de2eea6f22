//! `parcel export` command implementation

use crate::commands::{open_dataset, report_error, Outcome};
use crate::config::Settings;
use crate::error::Result;
use crate::output;
use parcel_engine::workflow::CompletedParcel;
use parcel_engine::{Engine, ExportOutcome, ParcelId};
use std::path::{Path, PathBuf};

/// Export each dataset once, regardless of schedule
pub async fn run(settings: &Settings, paths: Vec<PathBuf>, parcel_id: Option<ParcelId>) -> Result<Outcome> {
    let engine = settings.engine();
    let mut outcome = Outcome::Success;
    for path in settings.resolve_datasets(&paths)? {
        let result = export_one(&engine, &path, parcel_id.clone()).await;
        outcome = outcome.and(result.unwrap_or_else(|e| report_error(&path, &e)));
    }
    Ok(outcome)
}

async fn export_one(engine: &Engine, path: &Path, parcel_id: Option<ParcelId>) -> Result<Outcome> {
    let dataset = open_dataset(path)?;
    output::heading(&dataset.name());
    let outcome = engine.export(&dataset, parcel_id).await?;
    Ok(print_export(&outcome))
}

/// Print an export result; shared with `process`
pub(crate) fn print_export(outcome: &ExportOutcome) -> Outcome {
    match outcome {
        ExportOutcome::Skipped => {
            println!("  No export command configured");
            Outcome::Success
        },
        ExportOutcome::Completed(done) => {
            print_completed("exported", done);
            Outcome::Success
        },
        ExportOutcome::Failed { parcel_id, reason } => {
            output::failure(&format!("{} failed: {}", parcel_id, reason));
            Outcome::Failure
        },
    }
}

pub(crate) fn print_completed(verb: &str, done: &CompletedParcel) {
    let mut line = format!("{} {}", done.id(), verb);
    if let Some(bytes) = done.metrics.get("bytes") {
        line.push_str(&format!(" ({})", output::format_metric("bytes", bytes)));
    }
    output::success(&line);
    for warning in &done.warnings {
        output::warning(warning);
    }
}
