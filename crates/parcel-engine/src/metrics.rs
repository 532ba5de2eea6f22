//! Metric computation for a parcel payload
//!
//! Every parcel gets the built-in `bytes` and `files` metrics. Custom
//! metrics come from `[metrics.<name>]` in config.toml: the command runs with
//! the payload path in the environment and its trimmed stdout is the value.

use crate::config::BUILTIN_METRICS;
use crate::dataset::Dataset;
use crate::ledger::{MetricRecord, MetricValue};
use crate::parcel::ParcelId;
use crate::runner::{CommandRunner, Invocation};
use chrono::{DateTime, Utc};
use parcel_common::fsutil;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// A metric that could not be computed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricFailure {
    pub metric: String,
    pub error: String,
}

/// Values computed for one payload, plus the metrics that failed
#[derive(Debug, Default)]
pub struct CollectedMetrics {
    pub values: BTreeMap<String, MetricValue>,
    pub failures: Vec<MetricFailure>,
}

impl CollectedMetrics {
    /// Ledger rows for the computed values, all sharing `recorded_at`
    pub fn into_records(self, id: &ParcelId, recorded_at: DateTime<Utc>) -> Vec<MetricRecord> {
        self.values
            .into_iter()
            .map(|(metric, value)| MetricRecord::new(id.clone(), metric, value, recorded_at))
            .collect()
    }

    fn fail(&mut self, metric: &str, error: impl ToString) {
        self.failures.push(MetricFailure {
            metric: metric.to_string(),
            error: error.to_string(),
        });
    }
}

pub struct MetricCollector<'a> {
    runner: &'a CommandRunner,
}

impl<'a> MetricCollector<'a> {
    pub fn new(runner: &'a CommandRunner) -> Self {
        Self { runner }
    }

    /// Compute every configured metric
    pub async fn collect(&self, dataset: &Dataset, payload: &Path) -> CollectedMetrics {
        self.collect_where(dataset, payload, |_| true).await
    }

    /// Compute only the metrics `wanted` selects
    ///
    /// Failures never abort the batch; they are listed in the result.
    pub async fn collect_where<F>(
        &self,
        dataset: &Dataset,
        payload: &Path,
        wanted: F,
    ) -> CollectedMetrics
    where
        F: Fn(&str) -> bool,
    {
        let mut collected = CollectedMetrics::default();

        for name in BUILTIN_METRICS.into_iter().filter(|name| wanted(*name)) {
            let value = match name {
                "bytes" => fsutil::total_size_bytes(payload),
                _ => fsutil::total_file_count(payload),
            };
            match value {
                Ok(value) => {
                    collected.values.insert(name.to_string(), MetricValue::from(value));
                },
                Err(e) => {
                    warn!(metric = name, payload = %payload.display(), error = %e, "Built-in metric failed");
                    collected.fail(name, e);
                },
            }
        }

        let env = &dataset.config().env;
        for (name, metric) in &dataset.config().metrics {
            if !wanted(name) {
                continue;
            }
            let invocation = Invocation::new()
                .env(&env.parcel_path, payload.to_string_lossy())
                .env(&env.dataset_path, dataset.path().to_string_lossy())
                .timeout(metric.timeout.to_std())
                .working_dir(dataset.path());

            match self.runner.run(&metric.cmd, &invocation).await {
                Ok(output) => {
                    let value = output.stdout.trim();
                    if value.is_empty() {
                        warn!(metric = %name, "Metric command produced no output");
                        collected.fail(name, "command produced no output");
                    } else {
                        debug!(metric = %name, value, "Metric computed");
                        collected.values.insert(name.clone(), MetricValue::parse(value));
                    }
                },
                Err(e) => {
                    warn!(metric = %name, payload = %payload.display(), error = %e, "Metric command failed");
                    collected.fail(name, e);
                },
            }
        }

        collected
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::DatasetConfig;
    use std::fs;
    use tempfile::TempDir;

    fn dataset(temp: &TempDir, toml: &str) -> Dataset {
        Dataset::with_config(temp.path(), DatasetConfig::parse(toml).unwrap())
    }

    #[tokio::test]
    async fn test_builtin_metrics_for_file_and_dir() {
        let temp = TempDir::new().unwrap();
        let ds = dataset(&temp, "");
        let runner = CommandRunner::default();
        let collector = MetricCollector::new(&runner);

        let file = temp.path().join("payload.txt");
        fs::write(&file, "12345").unwrap();
        let collected = collector.collect(&ds, &file).await;
        assert_eq!(collected.values["bytes"], MetricValue::Integer(5));
        assert_eq!(collected.values["files"], MetricValue::Integer(1));

        let dir = temp.path().join("payload");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("a"), "aa").unwrap();
        fs::write(dir.join("b"), "bbb").unwrap();
        let collected = collector.collect(&ds, &dir).await;
        assert_eq!(collected.values["bytes"], MetricValue::Integer(5));
        assert_eq!(collected.values["files"], MetricValue::Integer(2));
    }

    #[tokio::test]
    async fn test_custom_metrics_and_failures() {
        let temp = TempDir::new().unwrap();
        let ds = dataset(
            &temp,
            r#"
            [metrics.lines]
            cmd = "wc -l < \"$PARCEL_PATH\""

            [metrics.where]
            cmd = "printf %s \"$DATASET_PATH\""

            [metrics.broken]
            cmd = "exit 1"

            [metrics.silent]
            cmd = "true"
            "#,
        );
        let file = temp.path().join("payload.txt");
        fs::write(&file, "a\nb\nc\n").unwrap();

        let runner = CommandRunner::default();
        let collected = MetricCollector::new(&runner).collect(&ds, &file).await;

        assert_eq!(collected.values["lines"], MetricValue::Integer(3));
        assert_eq!(
            collected.values["where"],
            MetricValue::Text(temp.path().to_string_lossy().into_owned())
        );
        assert!(!collected.values.contains_key("broken"));
        assert!(!collected.values.contains_key("silent"));

        let mut failed: Vec<&str> = collected.failures.iter().map(|f| f.metric.as_str()).collect();
        failed.sort();
        assert_eq!(failed, vec!["broken", "silent"]);
    }

    #[tokio::test]
    async fn test_collect_where_filters() {
        let temp = TempDir::new().unwrap();
        let ds = dataset(&temp, "[metrics.one]\ncmd = \"echo 1\"\n");
        let file = temp.path().join("p");
        fs::write(&file, "x").unwrap();
        let runner = CommandRunner::default();

        let collected = MetricCollector::new(&runner)
            .collect_where(&ds, &file, |name| name == "one")
            .await;
        assert_eq!(collected.values.len(), 1);
        assert_eq!(collected.values["one"], MetricValue::Integer(1));
    }

    #[test]
    fn test_records_share_recorded_at() {
        let mut collected = CollectedMetrics::default();
        collected.values.insert("bytes".into(), MetricValue::Integer(1));
        collected.values.insert("files".into(), MetricValue::Integer(1));
        let id: ParcelId = "2024-01-01T000000Z".parse().unwrap();
        let at = Utc::now();
        let records = collected.into_records(&id, at);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.recorded_at == at && r.parcel_id == id));
    }
}
