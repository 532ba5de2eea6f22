//! `parcel clean` command implementation

use crate::commands::{open_dataset, report_error, Outcome};
use crate::config::Settings;
use crate::error::Result;
use crate::output;
use colored::Colorize;
use parcel_engine::Engine;
use std::path::{Path, PathBuf};

/// Apply each dataset's `keep` limit
pub async fn run(settings: &Settings, paths: Vec<PathBuf>) -> Result<Outcome> {
    let engine = settings.engine();
    let mut outcome = Outcome::Success;
    for path in settings.resolve_datasets(&paths)? {
        let result = clean_one(&engine, &path).await;
        outcome = outcome.and(result.unwrap_or_else(|e| report_error(&path, &e)));
    }
    Ok(outcome)
}

async fn clean_one(engine: &Engine, path: &Path) -> Result<Outcome> {
    let dataset = open_dataset(path)?;
    output::heading(&dataset.name());

    let Some(keep) = dataset.config().keep else {
        println!("  {}", "No keep limit configured".dimmed());
        return Ok(Outcome::Success);
    };

    let retention = engine.clean(&dataset).await?;
    if retention.deleted.is_empty() && retention.failure.is_none() {
        println!("  Nothing to remove (keeping {})", keep);
    }
    for id in &retention.deleted {
        println!("  Removed {}", id);
    }
    match &retention.failure {
        Some(failure) => {
            output::failure(&format!("could not remove {}: {}", failure.parcel_id, failure.error));
            Ok(Outcome::Failure)
        },
        None => Ok(Outcome::Success),
    }
}
