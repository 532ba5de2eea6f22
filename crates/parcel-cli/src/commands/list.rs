//! `parcel list` command implementation

use crate::commands::{open_dataset, Outcome};
use crate::error::Result;
use crate::output::{self, OutputFormat};
use parcel_common::fsutil;
use parcel_engine::{Parcel, ParcelStore};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
struct ParcelRow<'a> {
    #[serde(flatten)]
    parcel: &'a Parcel,
    bytes: Option<u64>,
}

/// List every parcel of one dataset, oldest first
pub async fn run(dataset: PathBuf, format: OutputFormat) -> Result<Outcome> {
    let dataset = open_dataset(&dataset)?;
    let parcels = ParcelStore::new(dataset.layout().clone()).list_parcels()?;

    // Payload size is informational; unreadable payloads show as unknown.
    let rows: Vec<ParcelRow<'_>> = parcels
        .iter()
        .map(|parcel| ParcelRow {
            parcel,
            bytes: parcel
                .payload
                .iter()
                .map(|p| fsutil::total_size_bytes(p).ok())
                .sum(),
        })
        .collect();

    if format == OutputFormat::Json {
        output::print_json(&rows)?;
        return Ok(Outcome::Success);
    }

    output::heading(&dataset.name());
    if rows.is_empty() {
        println!("  No parcels yet. Run 'parcel export' or 'parcel ingest' to create one.");
        return Ok(Outcome::Success);
    }

    let mut table = output::table(["Parcel", "State", "Size", "Payload", "Note"]);
    for row in &rows {
        let payload: Vec<String> = row
            .parcel
            .payload
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        table.add_row(vec![
            row.parcel.id.to_string(),
            output::format_state(row.parcel.state),
            row.bytes.map(output::format_bytes).unwrap_or_else(|| "?".to_string()),
            payload.join(", "),
            row.parcel.failure.clone().unwrap_or_default(),
        ]);
    }
    println!("{}", table);
    Ok(Outcome::Success)
}
