//! `parcel report` command implementation

use crate::commands::Outcome;
use crate::config::Settings;
use crate::error::Result;
use crate::output::{self, OutputFormat};
use colored::Colorize;
use parcel_common::HumanDuration;
use parcel_engine::report::{DatasetReport, MetricTrend};
use std::path::PathBuf;

pub async fn run(
    settings: &Settings,
    paths: Vec<PathBuf>,
    format: OutputFormat,
    offsets: Vec<HumanDuration>,
) -> Result<Outcome> {
    let paths = settings.resolve_datasets(&paths)?;
    let report = settings.aggregator(&offsets).report_all(&paths);

    match format {
        OutputFormat::Json => output::print_json(&report)?,
        OutputFormat::Text => {
            for dataset in &report.datasets {
                print_dataset(dataset);
                println!();
            }
            for failed in &report.errors {
                output::failure(&format!("{}: {}", failed.path.display(), failed.error));
            }
        },
    }

    if report.errors.is_empty() {
        Ok(Outcome::Success)
    } else {
        Ok(Outcome::Failure)
    }
}

fn print_dataset(report: &DatasetReport) {
    let status = if report.overdue {
        "OVERDUE".red().bold()
    } else if report.due {
        "due".yellow()
    } else {
        "ok".green()
    };
    println!("{} [{}]", report.name.cyan().bold(), status);

    match (&report.last_complete, &report.last_complete_at) {
        (Some(id), Some(at)) => println!("  Last complete: {} ({})", id, output::format_time(at)),
        _ => println!("  Last complete: never"),
    }
    if let Some(next) = &report.next_due {
        println!("  Next due:      {}", output::format_time(next));
    }
    println!(
        "  Parcels:       {} complete, {} failed, {} staging",
        report.counts.complete, report.counts.failed, report.counts.staging
    );
    for warning in &report.warnings {
        output::warning(warning);
    }

    if report.metrics.is_empty() {
        return;
    }

    let mut header = vec!["Metric".to_string(), "Current".to_string()];
    if let Some(first) = report.metrics.iter().find(|m| !m.history.is_empty()) {
        header.extend(first.history.iter().map(|p| format!("{} ago", p.offset)));
    }
    let columns = header.len();

    let mut table = output::table(header);
    for trend in &report.metrics {
        table.add_row(trend_row(trend, columns));
    }
    println!("{}", table);
}

fn trend_row(trend: &MetricTrend, columns: usize) -> Vec<String> {
    let mut row = vec![
        trend.metric.clone(),
        trend
            .current
            .as_ref()
            .map(|v| output::format_metric(&trend.metric, v))
            .unwrap_or_else(|| "-".to_string()),
    ];
    row.extend(trend.history.iter().map(|point| {
        point
            .value
            .as_ref()
            .map(|v| output::format_metric(&trend.metric, v))
            .unwrap_or_else(|| "-".to_string())
    }));
    row.resize(columns, "-".to_string());
    row
}
