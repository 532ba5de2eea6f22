//! `parcel delete` command implementation
//!
//! The only way to remove a FAILED parcel; retention never does.

use crate::commands::{open_dataset, Outcome};
use crate::config::Settings;
use crate::error::Result;
use crate::output;
use parcel_engine::ParcelId;
use std::path::PathBuf;

pub async fn run(settings: &Settings, dataset: PathBuf, id: ParcelId) -> Result<Outcome> {
    let dataset = open_dataset(&dataset)?;
    let parcel = settings.engine().delete(&dataset, &id).await?;
    output::success(&format!(
        "Deleted {} parcel {} from {}",
        parcel.state,
        parcel.id,
        dataset.name()
    ));
    Ok(Outcome::Success)
}
