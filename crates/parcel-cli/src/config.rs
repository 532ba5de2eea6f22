//! CLI settings read from the environment
//!
//! Per-dataset behaviour lives in each dataset's `config.toml`; these only
//! cover what the command line needs before a dataset is opened.

use crate::error::{CliError, Result};
use parcel_common::HumanDuration;
use parcel_engine::report::default_offsets;
use parcel_engine::runner::DEFAULT_OUTPUT_LIMIT;
use parcel_engine::{CommandRunner, Engine, ReportAggregator, SystemClock};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

// ============================================================================
// Environment Variables
// ============================================================================

/// Path-list of datasets used when none are given on the command line
pub const DATASETS_VAR: &str = "PARCEL_DATASETS";

/// Bytes of stdout/stderr kept per command stream
pub const OUTPUT_LIMIT_VAR: &str = "PARCEL_OUTPUT_LIMIT";

/// Comma-separated report offsets, e.g. "7 days,180 days"
pub const REPORT_OFFSETS_VAR: &str = "PARCEL_REPORT_OFFSETS";

#[derive(Debug, Clone)]
pub struct Settings {
    pub datasets: Vec<PathBuf>,
    pub output_limit: usize,
    pub report_offsets: Vec<HumanDuration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            datasets: Vec::new(),
            output_limit: DEFAULT_OUTPUT_LIMIT,
            report_offsets: default_offsets(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();

        if let Some(paths) = std::env::var_os(DATASETS_VAR) {
            settings.datasets = split_datasets(&paths);
        }

        if let Ok(limit) = std::env::var(OUTPUT_LIMIT_VAR) {
            settings.output_limit = limit
                .trim()
                .parse()
                .map_err(|e| CliError::invalid_setting(OUTPUT_LIMIT_VAR, e))?;
        }

        if let Ok(offsets) = std::env::var(REPORT_OFFSETS_VAR) {
            settings.report_offsets = parse_offsets(&offsets)?;
        }

        Ok(settings)
    }

    /// Datasets named on the command line, else the configured defaults
    pub fn resolve_datasets(&self, given: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let paths = if given.is_empty() {
            self.datasets.clone()
        } else {
            given.to_vec()
        };
        if paths.is_empty() {
            return Err(CliError::NoDatasets);
        }
        Ok(paths)
    }

    pub fn engine(&self) -> Engine {
        Engine::new(CommandRunner::new(self.output_limit), Arc::new(SystemClock))
    }

    /// Aggregator using `offsets` when given, else the configured ones
    pub fn aggregator(&self, offsets: &[HumanDuration]) -> ReportAggregator {
        let offsets = if offsets.is_empty() {
            self.report_offsets.clone()
        } else {
            offsets.to_vec()
        };
        ReportAggregator::new(Arc::new(SystemClock), offsets)
    }
}

fn split_datasets(raw: &OsString) -> Vec<PathBuf> {
    std::env::split_paths(raw)
        .filter(|p| !p.as_os_str().is_empty())
        .collect()
}

fn parse_offsets(raw: &str) -> Result<Vec<HumanDuration>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|e| CliError::invalid_setting(REPORT_OFFSETS_VAR, e))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use serial_test::serial;

    fn clear_env() {
        for var in [DATASETS_VAR, OUTPUT_LIMIT_VAR, REPORT_OFFSETS_VAR] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let settings = Settings::from_env().unwrap();
        assert!(settings.datasets.is_empty());
        assert_eq!(settings.output_limit, DEFAULT_OUTPUT_LIMIT);
        assert_eq!(settings.report_offsets, default_offsets());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        std::env::set_var(DATASETS_VAR, "/data/a:/data/b");
        std::env::set_var(OUTPUT_LIMIT_VAR, "1024");
        std::env::set_var(REPORT_OFFSETS_VAR, "1 day, 30 days");

        let settings = Settings::from_env().unwrap();
        clear_env();

        assert_eq!(
            settings.datasets,
            vec![PathBuf::from("/data/a"), PathBuf::from("/data/b")]
        );
        assert_eq!(settings.output_limit, 1024);
        assert_eq!(
            settings.report_offsets,
            vec![
                HumanDuration::new(TimeDelta::days(1)),
                HumanDuration::new(TimeDelta::days(30))
            ]
        );
    }

    #[test]
    #[serial]
    fn test_invalid_values() {
        clear_env();
        std::env::set_var(OUTPUT_LIMIT_VAR, "lots");
        let err = Settings::from_env().unwrap_err();
        assert!(err.to_string().contains(OUTPUT_LIMIT_VAR));

        std::env::remove_var(OUTPUT_LIMIT_VAR);
        std::env::set_var(REPORT_OFFSETS_VAR, "a fortnight");
        assert!(Settings::from_env().is_err());
        clear_env();
    }

    #[test]
    fn test_resolve_datasets() {
        let settings = Settings {
            datasets: vec![PathBuf::from("default")],
            ..Settings::default()
        };
        assert_eq!(
            settings.resolve_datasets(&[]).unwrap(),
            vec![PathBuf::from("default")]
        );
        assert_eq!(
            settings.resolve_datasets(&[PathBuf::from("given")]).unwrap(),
            vec![PathBuf::from("given")]
        );
        assert!(matches!(
            Settings::default().resolve_datasets(&[]),
            Err(CliError::NoDatasets)
        ));
    }
}
