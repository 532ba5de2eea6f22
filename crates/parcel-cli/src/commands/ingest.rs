//! `parcel ingest` command implementation

use crate::commands::export::print_completed;
use crate::commands::{open_dataset, Outcome};
use crate::config::Settings;
use crate::error::Result;
use crate::output;
use parcel_engine::ParcelId;
use std::path::PathBuf;

/// Move `source` into `dataset` as a new COMPLETE parcel
pub async fn run(
    settings: &Settings,
    dataset: PathBuf,
    source: PathBuf,
    parcel_id: Option<ParcelId>,
) -> Result<Outcome> {
    let dataset = open_dataset(&dataset)?;
    output::heading(&dataset.name());

    let done = settings
        .engine()
        .ingest_path(&dataset, &source, parcel_id)
        .await?;
    print_completed(&format!("ingested from {}", source.display()), &done);
    Ok(Outcome::Success)
}
