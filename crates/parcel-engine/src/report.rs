//! Read-only status summaries across datasets
//!
//! A report never touches the store or the ledger beyond reading them.

use crate::clock::Clock;
use crate::config::BUILTIN_METRICS;
use crate::dataset::Dataset;
use crate::error::Result;
use crate::ledger::{self, MetricRecord, MetricValue};
use crate::parcel::{ParcelId, ParcelState};
use crate::schedule::{self, last_complete};
use crate::store::ParcelStore;
use chrono::{DateTime, TimeDelta, Utc};
use parcel_common::duration::humanize;
use parcel_common::HumanDuration;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default look-back offsets for metric trends
pub fn default_offsets() -> Vec<HumanDuration> {
    vec![
        HumanDuration::new(TimeDelta::days(7)),
        HumanDuration::new(TimeDelta::days(180)),
    ]
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParcelCounts {
    pub complete: usize,
    pub failed: usize,
    pub staging: usize,
}

/// A metric value found at some distance in the past
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    /// The offset as written, e.g. "7 days"
    pub offset: String,
    pub target: DateTime<Utc>,
    pub value: Option<MetricValue>,
    pub parcel_id: Option<ParcelId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricTrend {
    pub metric: String,
    pub current: Option<MetricValue>,
    pub recorded_at: Option<DateTime<Utc>>,
    pub history: Vec<TrendPoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetReport {
    pub name: String,
    pub path: PathBuf,
    pub last_complete: Option<ParcelId>,
    pub last_complete_at: Option<DateTime<Utc>>,
    pub due: bool,
    pub overdue: bool,
    pub next_due: Option<DateTime<Utc>>,
    pub counts: ParcelCounts,
    pub warnings: Vec<String>,
    pub metrics: Vec<MetricTrend>,
}

/// A dataset that could not be reported on
#[derive(Debug, Clone, Serialize)]
pub struct DatasetError {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Default, Serialize)]
pub struct Report {
    pub datasets: Vec<DatasetReport>,
    pub errors: Vec<DatasetError>,
}

impl Report {
    pub fn has_warnings(&self) -> bool {
        !self.errors.is_empty() || self.datasets.iter().any(|d| !d.warnings.is_empty())
    }
}

pub struct ReportAggregator {
    clock: Arc<dyn Clock>,
    offsets: Vec<HumanDuration>,
}

impl ReportAggregator {
    pub fn new(clock: Arc<dyn Clock>, offsets: Vec<HumanDuration>) -> Self {
        Self { clock, offsets }
    }

    pub fn offsets(&self) -> &[HumanDuration] {
        &self.offsets
    }

    /// Report on every path, isolating failures per dataset
    pub fn report_all<P: AsRef<Path>>(&self, paths: &[P]) -> Report {
        let mut report = Report::default();
        for path in paths {
            let path = path.as_ref();
            match Dataset::open(path).and_then(|dataset| self.dataset_report(&dataset)) {
                Ok(dataset) => report.datasets.push(dataset),
                Err(e) => {
                    warn!(dataset = %path.display(), error = %e, "Cannot report on dataset");
                    report.errors.push(DatasetError {
                        path: path.to_path_buf(),
                        error: e.to_string(),
                    });
                },
            }
        }
        report
    }

    pub fn dataset_report(&self, dataset: &Dataset) -> Result<DatasetReport> {
        let store = ParcelStore::new(dataset.layout().clone());
        let parcels = store.list_parcels()?;
        let records = store.ledger().records()?;
        let config = dataset.config();
        let now = self.clock.now();

        let mut counts = ParcelCounts::default();
        for parcel in &parcels {
            match parcel.state {
                ParcelState::Complete => counts.complete += 1,
                ParcelState::Failed => counts.failed += 1,
                ParcelState::Staging => counts.staging += 1,
            }
        }

        let last = last_complete(&parcels).cloned();
        let due = schedule::is_due_at(config, last.as_ref(), now);
        let overdue = schedule::is_overdue_at(config, last.as_ref(), now);

        let mut warnings = Vec::new();
        if last.is_none() {
            warnings.push("no complete parcel".to_string());
        }
        if overdue {
            warnings.push("overdue".to_string());
        }
        if parcels.last().is_some_and(|p| !p.is_complete()) {
            warnings.push("most recent parcel is not complete".to_string());
        }

        let mut metrics = Vec::new();
        if let Some(id) = &last {
            let expected: BTreeSet<String> = BUILTIN_METRICS
                .iter()
                .map(|name| name.to_string())
                .chain(config.metrics.keys().cloned())
                .collect();
            let recorded: BTreeSet<String> = records
                .iter()
                .filter(|r| &r.parcel_id == id)
                .map(|r| r.metric.clone())
                .collect();

            let missing: Vec<&str> = expected.difference(&recorded).map(String::as_str).collect();
            if !missing.is_empty() {
                warnings.push(format!(
                    "metrics missing for last complete parcel: {}",
                    missing.join(", ")
                ));
            }

            for metric in expected.union(&recorded) {
                metrics.push(self.trend(&records, id, metric));
            }
        }

        let present: BTreeSet<&ParcelId> = parcels.iter().map(|p| &p.id).collect();
        let orphaned: BTreeSet<&ParcelId> = records
            .iter()
            .map(|r| &r.parcel_id)
            .filter(|id| !present.contains(id))
            .collect();
        if !orphaned.is_empty() {
            let ids: Vec<String> = orphaned.iter().map(ToString::to_string).collect();
            warnings.push(format!(
                "ledger references parcels no longer present: {}",
                ids.join(", ")
            ));
        }

        debug!(dataset = %dataset.path().display(), warnings = warnings.len(), "Report built");

        Ok(DatasetReport {
            name: dataset.name(),
            path: dataset.path().to_path_buf(),
            last_complete_at: last.as_ref().map(ParcelId::timestamp),
            next_due: schedule::next_due_at(config, last.as_ref()),
            last_complete: last,
            due,
            overdue,
            counts,
            warnings,
            metrics,
        })
    }

    /// Current value for `id` plus the nearest-preceding value per offset
    fn trend(&self, records: &[MetricRecord], id: &ParcelId, metric: &str) -> MetricTrend {
        let current = records
            .iter()
            .find(|r| &r.parcel_id == id && r.metric == metric);

        let history = match current {
            Some(current) => self
                .offsets
                .iter()
                .map(|offset| {
                    let target = current
                        .recorded_at
                        .checked_sub_signed(offset.as_delta())
                        .unwrap_or(DateTime::<Utc>::MIN_UTC);
                    let found = ledger::nearest_preceding(records, metric, target);
                    TrendPoint {
                        offset: humanize(offset.as_delta()),
                        target,
                        value: found.map(|r| r.value.clone()),
                        parcel_id: found.map(|r| r.parcel_id.clone()),
                    }
                })
                .collect(),
            None => Vec::new(),
        };

        MetricTrend {
            metric: metric.to_string(),
            current: current.map(|r| r.value.clone()),
            recorded_at: current.map(|r| r.recorded_at),
            history,
        }
    }
}
