//! Append-only metrics history (`metrics.csv`)
//!
//! One row per `(parcel_id, metric)` pair:
//!
//! ```text
//! parcel_id,metric,value,recorded_at
//! 2024-03-01T120000Z,bytes,5120,2024-03-01T12:00:07Z
//! ```
//!
//! Rows are only ever appended. The file is rewritten solely to drop the rows
//! of a deleted parcel.

use crate::error::{EngineError, Result};
use crate::parcel::ParcelId;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A scalar metric value
///
/// Values are typed when read back: integers, then floats, otherwise text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetricValue {
    pub fn parse(raw: &str) -> Self {
        if let Ok(i) = raw.parse::<i64>() {
            return Self::Integer(i);
        }
        match raw.parse::<f64>() {
            Ok(f) if f.is_finite() => Self::Float(f),
            _ => Self::Text(raw.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(_) => None,
        }
    }
}

impl From<u64> for MetricValue {
    fn from(value: u64) -> Self {
        i64::try_from(value)
            .map(Self::Integer)
            .unwrap_or_else(|_| Self::Text(value.to_string()))
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One ledger row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    pub parcel_id: ParcelId,
    pub metric: String,
    pub value: MetricValue,
    pub recorded_at: DateTime<Utc>,
}

impl MetricRecord {
    pub fn new(
        parcel_id: ParcelId,
        metric: impl Into<String>,
        value: MetricValue,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            parcel_id,
            metric: metric.into(),
            value,
            recorded_at,
        }
    }
}

/// The record for `metric` with the largest `recorded_at` not after `at`
///
/// Ties on `recorded_at` go to the larger parcel id.
pub fn nearest_preceding<'r>(
    records: &'r [MetricRecord],
    metric: &str,
    at: DateTime<Utc>,
) -> Option<&'r MetricRecord> {
    records
        .iter()
        .filter(|r| r.metric == metric && r.recorded_at <= at)
        .max_by(|a, b| {
            a.recorded_at
                .cmp(&b.recorded_at)
                .then_with(|| a.parcel_id.cmp(&b.parcel_id))
        })
}

/// On-disk row shape
#[derive(Debug, Serialize, Deserialize)]
struct Row {
    parcel_id: String,
    metric: String,
    value: String,
    recorded_at: String,
}

impl Row {
    fn from_record(record: &MetricRecord) -> Self {
        Self {
            parcel_id: record.parcel_id.to_string(),
            metric: record.metric.clone(),
            value: record.value.to_string(),
            recorded_at: record.recorded_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    fn into_record(self) -> Result<MetricRecord> {
        let recorded_at = DateTime::parse_from_rfc3339(&self.recorded_at)
            .map_err(|e| {
                EngineError::config(format!(
                    "metrics.csv has an invalid recorded_at '{}': {}",
                    self.recorded_at, e
                ))
            })?
            .with_timezone(&Utc);
        Ok(MetricRecord {
            parcel_id: self.parcel_id.parse()?,
            metric: self.metric,
            value: MetricValue::parse(&self.value),
            recorded_at,
        })
    }
}

/// Handle on a dataset's `metrics.csv`
#[derive(Debug, Clone)]
pub struct MetricsLedger {
    path: PathBuf,
}

impl MetricsLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file with only a header if it does not exist
    pub fn initialize(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        let mut writer = csv::Writer::from_path(&self.path)?;
        writer.write_record(["parcel_id", "metric", "value", "recorded_at"])?;
        writer.flush()?;
        Ok(())
    }

    /// All rows in file order; a missing ledger is empty
    pub fn records(&self) -> Result<Vec<MetricRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)?;
        reader
            .deserialize::<Row>()
            .map(|row| row.map_err(EngineError::from).and_then(Row::into_record))
            .collect()
    }

    pub fn for_parcel(&self, id: &ParcelId) -> Result<Vec<MetricRecord>> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|r| &r.parcel_id == id)
            .collect())
    }

    /// Ids of every parcel with at least one row
    pub fn parcel_ids(&self) -> Result<BTreeSet<ParcelId>> {
        Ok(self.records()?.into_iter().map(|r| r.parcel_id).collect())
    }

    /// Append rows
    ///
    /// Fails with a conflict, writing nothing, if any `(parcel_id, metric)`
    /// pair is already present or repeated within `records`.
    pub fn append(&self, records: &[MetricRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut seen: HashSet<(ParcelId, String)> = self
            .records()?
            .into_iter()
            .map(|r| (r.parcel_id, r.metric))
            .collect();
        for record in records {
            if !seen.insert((record.parcel_id.clone(), record.metric.clone())) {
                return Err(EngineError::conflict(format!(
                    "metric '{}' is already recorded for parcel {}",
                    record.metric, record.parcel_id
                )));
            }
        }

        let needs_header = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        for record in records {
            writer.serialize(Row::from_record(record))?;
        }
        writer.flush()?;

        debug!(ledger = %self.path.display(), rows = records.len(), "Appended metric rows");
        Ok(())
    }

    /// The row for `metric` with the largest `recorded_at` not after `at`
    pub fn nearest_preceding(
        &self,
        metric: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<MetricRecord>> {
        Ok(nearest_preceding(&self.records()?, metric, at).cloned())
    }

    /// Drop every row of a deleted parcel, returning how many were removed
    ///
    /// Surviving rows are copied field for field as read, never re-rendered
    /// from their typed values.
    pub fn remove_parcel(&self, id: &ParcelId) -> Result<usize> {
        if !self.path.exists() {
            return Ok(0);
        }
        let target = id.to_string();
        let mut reader = csv::Reader::from_path(&self.path)?;
        let header = reader.headers()?.clone();

        let mut kept = Vec::new();
        let mut removed = 0;
        for row in reader.records() {
            let row = row?;
            if row.get(0) == Some(target.as_str()) {
                removed += 1;
            } else {
                kept.push(row);
            }
        }
        if removed == 0 {
            return Ok(0);
        }

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&header)?;
        for row in &kept {
            writer.write_record(row)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| EngineError::Io(e.into_error()))?;
        parcel_common::fsutil::write_atomic(&self.path, &bytes)?;

        debug!(ledger = %self.path.display(), parcel_id = %id, removed, "Pruned metric rows");
        Ok(removed)
    }
}
