//! Terminal rendering helpers shared by the commands

use crate::error::Result;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use parcel_engine::{MetricValue, ParcelState};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Table with the CLI's standard look
pub fn table<I, S>(header: I) -> Table
where
    I: IntoIterator<Item = S>,
    S: Into<comfy_table::Cell>,
{
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(header);
    table
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Section heading for a dataset
pub fn heading(name: &str) {
    println!("{}", name.cyan().bold());
}

pub fn warning(message: &str) {
    println!("  {} {}", "!".yellow().bold(), message.yellow());
}

pub fn failure(message: &str) {
    println!("  {} {}", "✗".red().bold(), message.red());
}

pub fn success(message: &str) {
    println!("  {} {}", "✓".green().bold(), message);
}

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit])
    }
}

/// Metric value for display; `bytes` is shown with a unit
pub fn format_metric(metric: &str, value: &MetricValue) -> String {
    match (metric, value) {
        ("bytes", MetricValue::Integer(n)) if *n >= 0 => format_bytes(*n as u64),
        _ => value.to_string(),
    }
}

pub fn format_time(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

pub fn format_state(state: ParcelState) -> String {
    match state {
        ParcelState::Complete => state.to_string().green().to_string(),
        ParcelState::Failed => state.to_string().red().to_string(),
        ParcelState::Staging => state.to_string().yellow().to_string(),
    }
}
