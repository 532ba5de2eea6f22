//! Per-dataset configuration (`config.toml`)
//!
//! The file is read once per tick and handed to every component as a value.
//! Durations use the human-friendly syntax from [`parcel_common::duration`].

use crate::error::{EngineError, Result};
use crate::runner::ExternalCommand;
use chrono::TimeDelta;
use parcel_common::HumanDuration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Names reserved for the metrics every parcel gets
pub const BUILTIN_METRICS: [&str; 2] = ["bytes", "files"];

/// Config file name inside a dataset directory
pub const CONFIG_FILE: &str = "config.toml";

fn default_timeout() -> HumanDuration {
    HumanDuration::new(TimeDelta::hours(1))
}

fn default_metric_timeout() -> HumanDuration {
    HumanDuration::new(TimeDelta::minutes(5))
}

fn default_margin() -> HumanDuration {
    HumanDuration::new(TimeDelta::minutes(5))
}

/// What the scheduler does for a dataset with no `interval`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unscheduled {
    /// Due until the first parcel completes, then never again
    #[default]
    Once,
    /// Due on every tick
    Always,
    /// Only exported on explicit request
    Never,
}

/// How ingested files get their parcel id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeSource {
    /// The file's modification time
    Mtime,
    /// The moment of ingest
    #[default]
    Now,
}

/// A custom metric computed from each parcel's payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    pub cmd: ExternalCommand,
    #[serde(default = "default_metric_timeout")]
    pub timeout: HumanDuration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(path) => vec![path],
        OneOrMany::Many(paths) => paths,
    })
}

/// Automatic ingest of files dropped outside the dataset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Glob patterns: absolute, `~/...`, or relative to the dataset directory
    #[serde(default, deserialize_with = "one_or_many")]
    pub paths: Vec<String>,

    #[serde(default)]
    pub time_source: TimeSource,
}

/// Names of the environment variables handed to external commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvNames {
    pub parcel_path: String,
    pub dataset_path: String,
}

impl Default for EnvNames {
    fn default() -> Self {
        Self {
            parcel_path: "PARCEL_PATH".to_string(),
            dataset_path: "DATASET_PATH".to_string(),
        }
    }
}

/// Validated contents of a dataset's `config.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Producing command; datasets without one are ingest-only
    #[serde(default)]
    pub cmd: Option<ExternalCommand>,

    #[serde(default)]
    pub interval: Option<HumanDuration>,

    /// Number of COMPLETE parcels retained
    #[serde(default)]
    pub keep: Option<usize>,

    /// Commit changes to the dataset's git repository
    #[serde(default)]
    pub git: bool,

    #[serde(default = "default_timeout")]
    pub timeout: HumanDuration,

    /// Slack subtracted from `interval` so a cron tick that fires slightly
    /// early still counts
    #[serde(default = "default_margin")]
    pub margin: HumanDuration,

    #[serde(default)]
    pub unscheduled: Unscheduled,

    /// Age of the last COMPLETE parcel that reports flag as overdue
    #[serde(default)]
    pub overdue_after: Option<HumanDuration>,

    #[serde(default)]
    pub metrics: BTreeMap<String, MetricConfig>,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub env: EnvNames,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            cmd: None,
            interval: None,
            keep: None,
            git: false,
            timeout: default_timeout(),
            margin: default_margin(),
            unscheduled: Unscheduled::default(),
            overdue_after: None,
            metrics: BTreeMap::new(),
            ingest: IngestConfig::default(),
            env: EnvNames::default(),
        }
    }
}

impl DatasetConfig {
    /// Read and validate `<dataset>/config.toml`
    pub fn load(dataset_dir: &Path) -> Result<Self> {
        let path = dataset_dir.join(CONFIG_FILE);
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            EngineError::config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&contents)
    }

    /// Parse and validate TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.keep == Some(0) {
            return Err(EngineError::config("keep must be at least 1"));
        }

        if let Some(cmd) = &self.cmd {
            if cmd.is_empty() {
                return Err(EngineError::config("cmd must not be empty"));
            }
        }

        if let Some(interval) = self.interval {
            if interval.as_delta() <= TimeDelta::zero() {
                return Err(EngineError::config("interval must be positive"));
            }
        }

        for (name, metric) in &self.metrics {
            if BUILTIN_METRICS.contains(&name.as_str()) {
                return Err(EngineError::config(format!(
                    "metric '{}' is built in and cannot be redefined",
                    name
                )));
            }
            if metric.cmd.is_empty() {
                return Err(EngineError::config(format!(
                    "metrics.{}.cmd must not be empty",
                    name
                )));
            }
        }

        for name in [&self.env.parcel_path, &self.env.dataset_path] {
            if name.is_empty() || name.contains('=') {
                return Err(EngineError::config(format!(
                    "invalid environment variable name '{}'",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Age past which the latest COMPLETE parcel is overdue
    ///
    /// Defaults to twice the interval; unscheduled datasets are never overdue.
    pub fn overdue_threshold(&self) -> Option<TimeDelta> {
        self.overdue_after.map(|d| d.as_delta()).or_else(|| {
            self.interval
                .map(|i| i.as_delta().checked_mul(2).unwrap_or(TimeDelta::MAX))
        })
    }
}
