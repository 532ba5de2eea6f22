//! Parcel workflows: export, ingest, the per-tick `process`, retention and
//! metric reprocessing
//!
//! ```text
//! NOT_DUE ──▶ STAGING ──▶ COMPLETE
//!                │
//!                └──────▶ FAILED
//! ```
//!
//! An export begins a parcel, runs the producing command against the staging
//! slot, computes metrics on the staged payload, then commits the payload
//! with a single rename and appends its metrics to the ledger. Ingest swaps
//! the producing command for a move of an existing file.

use crate::clock::{Clock, SystemClock};
use crate::dataset::Dataset;
use crate::error::{EngineError, Result};
use crate::hooks::{CommitHook, GitCommitHook, NoCommit};
use crate::ingest::{IngestCoordinator, SkippedFile};
use crate::ledger::MetricValue;
use crate::metrics::{MetricCollector, MetricFailure};
use crate::parcel::{Parcel, ParcelId, ParcelState};
use crate::retention::{RetentionEnforcer, RetentionOutcome};
use crate::runner::{CommandOutput, CommandRunner, Invocation};
use crate::schedule::ScheduleEvaluator;
use crate::store::{ParcelStore, StagingParcel};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Paths a dataset commit covers, relative to the dataset directory
const COMMIT_PATHS: [&str; 2] = ["data", "metrics.csv"];

/// A parcel that reached COMPLETE
#[derive(Debug, Clone, Serialize)]
pub struct CompletedParcel {
    pub parcel: Parcel,

    /// Where an ingested payload came from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,

    pub metrics: BTreeMap<String, MetricValue>,
    pub metric_failures: Vec<MetricFailure>,

    /// Non-fatal problems, e.g. metrics that could not be recorded
    pub warnings: Vec<String>,
}

impl CompletedParcel {
    pub fn id(&self) -> &ParcelId {
        &self.parcel.id
    }
}

/// Result of one export attempt
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExportOutcome {
    /// The dataset has no producing command
    Skipped,
    Completed(CompletedParcel),
    /// The producing command failed or timed out; the parcel is quarantined
    Failed { parcel_id: ParcelId, reason: String },
}

impl ExportOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Result of a batch of configured ingests
#[derive(Debug, Default, Serialize)]
pub struct IngestReport {
    pub ingested: Vec<CompletedParcel>,
    pub skipped: Vec<SkippedFile>,
}

/// Everything one `process` tick did for a dataset
#[derive(Debug, Serialize)]
pub struct TickReport {
    pub dataset: String,
    pub ingest: IngestReport,
    pub due: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<RetentionOutcome>,
    pub committed: bool,
    pub warnings: Vec<String>,
}

impl TickReport {
    pub fn has_failure(&self) -> bool {
        self.export.as_ref().is_some_and(ExportOutcome::is_failure)
    }
}

/// Result of filling in missing metrics
#[derive(Debug, Default, Serialize)]
pub struct ReprocessReport {
    /// Newly recorded values, per parcel
    pub recorded: BTreeMap<ParcelId, BTreeMap<String, MetricValue>>,
    pub failures: BTreeMap<ParcelId, Vec<MetricFailure>>,
}

/// Drives parcel workflows for any number of datasets
///
/// Configuration is taken from the [`Dataset`] passed to each call; the
/// engine itself only holds the command runner, the clock and an optional
/// commit hook override.
pub struct Engine {
    runner: CommandRunner,
    clock: Arc<dyn Clock>,
    commit_hook: Option<Arc<dyn CommitHook>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(CommandRunner::default(), Arc::new(SystemClock))
    }
}

impl Engine {
    pub fn new(runner: CommandRunner, clock: Arc<dyn Clock>) -> Self {
        Self {
            runner,
            clock,
            commit_hook: None,
        }
    }

    /// Use `hook` for every dataset instead of choosing by `git = true`
    pub fn with_commit_hook(mut self, hook: Arc<dyn CommitHook>) -> Self {
        self.commit_hook = Some(hook);
        self
    }

    pub fn runner(&self) -> &CommandRunner {
        &self.runner
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn store(&self, dataset: &Dataset) -> ParcelStore {
        ParcelStore::new(dataset.layout().clone())
    }

    pub fn schedule(&self) -> ScheduleEvaluator {
        ScheduleEvaluator::new(Arc::clone(&self.clock))
    }

    fn hook_for(&self, dataset: &Dataset) -> Arc<dyn CommitHook> {
        if let Some(hook) = &self.commit_hook {
            return Arc::clone(hook);
        }
        if dataset.config().git {
            Arc::new(GitCommitHook::new(self.runner.clone()))
        } else {
            Arc::new(NoCommit)
        }
    }

    /// Commit, downgrading failures to a warning string
    async fn commit(&self, dataset: &Dataset, message: &str) -> (bool, Option<String>) {
        let hook = self.hook_for(dataset);
        match hook.commit(dataset.path(), message, &COMMIT_PATHS).await {
            Ok(committed) => (committed, None),
            Err(e) => {
                warn!(dataset = %dataset.path().display(), error = %e, "Commit failed");
                (false, Some(format!("commit failed: {}", e)))
            },
        }
    }

    /// Run the producing command once and commit the result
    ///
    /// Without an explicit id the current time is used, suffixed if taken.
    pub async fn export(&self, dataset: &Dataset, id: Option<ParcelId>) -> Result<ExportOutcome> {
        let store = self.store(dataset);
        let mut outcome = self.export_with(dataset, &store, id).await?;
        if let ExportOutcome::Completed(done) = &mut outcome {
            let message = format!("add new export {}", done.id());
            if let (_, Some(warning)) = self.commit(dataset, &message).await {
                done.warnings.push(warning);
            }
        }
        Ok(outcome)
    }

    async fn export_with(
        &self,
        dataset: &Dataset,
        store: &ParcelStore,
        id: Option<ParcelId>,
    ) -> Result<ExportOutcome> {
        let Some(cmd) = dataset.config().cmd.as_ref() else {
            info!(dataset = %dataset.path().display(), "No export command configured");
            return Ok(ExportOutcome::Skipped);
        };

        let id = match id {
            Some(id) => id,
            None => store.next_available_id(&ParcelId::from_datetime(self.clock.now()))?,
        };
        let handle = store.begin_parcel(id)?;
        info!(dataset = %dataset.path().display(), parcel_id = %handle.id(), "Export started");

        let env = &dataset.config().env;
        let invocation = Invocation::new()
            .env(&env.parcel_path, handle.payload_prefix().to_string_lossy())
            .env(&env.dataset_path, dataset.path().to_string_lossy())
            .timeout(dataset.config().timeout.to_std())
            .working_dir(dataset.path());

        let result = self.runner.run(cmd, &invocation).await;
        write_logs(dataset, handle.id(), &result);

        if let Err(e) = result {
            let reason = e.to_string();
            let parcel_id = handle.id().clone();
            store.fail_parcel(handle, &reason)?;
            if e.is_command_failure() {
                return Ok(ExportOutcome::Failed { parcel_id, reason });
            }
            return Err(e);
        }

        let payload = match handle.payload() {
            Ok(payload) => payload,
            Err(e) => {
                let reason = e.to_string();
                let parcel_id = handle.id().clone();
                store.fail_parcel(handle, &reason)?;
                return Ok(ExportOutcome::Failed { parcel_id, reason });
            },
        };

        let done = self.finish(dataset, store, handle, &payload, None).await?;
        Ok(ExportOutcome::Completed(done))
    }

    /// Metrics on the staged payload, the commit rename, then the ledger
    async fn finish(
        &self,
        dataset: &Dataset,
        store: &ParcelStore,
        handle: StagingParcel,
        payload: &Path,
        source: Option<PathBuf>,
    ) -> Result<CompletedParcel> {
        let collected = MetricCollector::new(&self.runner).collect(dataset, payload).await;
        let parcel = store.complete_parcel(handle)?;

        let metrics = collected.values.clone();
        let metric_failures = collected.failures.clone();
        let mut warnings: Vec<String> = metric_failures
            .iter()
            .map(|f| format!("metric {} failed: {}", f.metric, f.error))
            .collect();

        let records = collected.into_records(&parcel.id, self.clock.now());
        if let Err(e) = store.ledger().append(&records) {
            error!(parcel_id = %parcel.id, error = %e, "Failed to record metrics");
            warnings.push(format!("metrics not recorded: {}", e));
        }

        Ok(CompletedParcel {
            parcel,
            source,
            metrics,
            metric_failures,
            warnings,
        })
    }

    /// Turn one file or directory into a COMPLETE parcel and commit
    pub async fn ingest_path(
        &self,
        dataset: &Dataset,
        source: &Path,
        id: Option<ParcelId>,
    ) -> Result<CompletedParcel> {
        let store = self.store(dataset);
        let mut done = self.ingest_with(dataset, &store, source, id).await?;
        let message = format!("ingest {} as {}", source.display(), done.id());
        if let (_, Some(warning)) = self.commit(dataset, &message).await {
            done.warnings.push(warning);
        }
        Ok(done)
    }

    async fn ingest_with(
        &self,
        dataset: &Dataset,
        store: &ParcelStore,
        source: &Path,
        id: Option<ParcelId>,
    ) -> Result<CompletedParcel> {
        let coordinator = IngestCoordinator::new(dataset, store, self.clock.as_ref());
        let handle = coordinator.stage(source, id)?;
        let payload = match handle.payload() {
            Ok(payload) => payload,
            Err(e) => {
                store.fail_parcel(handle, &e.to_string())?;
                return Err(e);
            },
        };
        info!(
            dataset = %dataset.path().display(),
            parcel_id = %handle.id(),
            source = %source.display(),
            "Ingesting"
        );
        self.finish(dataset, store, handle, &payload, Some(source.to_path_buf()))
            .await
    }

    /// Ingest everything matched by `[ingest] paths` and commit
    pub async fn run_ingest(&self, dataset: &Dataset) -> Result<IngestReport> {
        let store = self.store(dataset);
        let report = self.ingest_configured(dataset, &store).await?;
        if !report.ingested.is_empty() {
            self.commit(dataset, &ingest_message(&report)).await;
        }
        Ok(report)
    }

    async fn ingest_configured(&self, dataset: &Dataset, store: &ParcelStore) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        if dataset.config().ingest.paths.is_empty() {
            return Ok(report);
        }

        let coordinator = IngestCoordinator::new(dataset, store, self.clock.as_ref());
        for source in coordinator.discover()? {
            match self.ingest_with(dataset, store, &source, None).await {
                Ok(done) => report.ingested.push(done),
                Err(e) => {
                    warn!(source = %source.display(), error = %e, "Skipping file");
                    report.skipped.push(SkippedFile {
                        path: source,
                        error: e.to_string(),
                    });
                },
            }
        }
        Ok(report)
    }

    /// One scheduler tick: ingest, export if due, retention, commit
    pub async fn process(&self, dataset: &Dataset) -> Result<TickReport> {
        let store = self.store(dataset);
        let mut report = TickReport {
            dataset: dataset.name(),
            ingest: IngestReport::default(),
            due: false,
            export: None,
            retention: None,
            committed: false,
            warnings: Vec::new(),
        };

        match self.ingest_configured(dataset, &store).await {
            Ok(ingest) => report.ingest = ingest,
            Err(e) => {
                warn!(dataset = %dataset.path().display(), error = %e, "Ingest failed");
                report.warnings.push(format!("ingest failed: {}", e));
            },
        }

        report.due = self.schedule().is_due(dataset.config(), &store)?;
        if report.due {
            let outcome = self.export_with(dataset, &store, None).await?;
            if let ExportOutcome::Failed { parcel_id, reason } = &outcome {
                report
                    .warnings
                    .push(format!("export {} failed: {}", parcel_id, reason));
            }
            report.export = Some(outcome);
        }

        match RetentionEnforcer::new(&store).enforce(dataset.config().keep) {
            Ok(outcome) => {
                if let Some(failure) = &outcome.failure {
                    report.warnings.push(format!(
                        "retention stopped at {}: {}",
                        failure.parcel_id, failure.error
                    ));
                }
                report.retention = Some(outcome);
            },
            Err(e) => report.warnings.push(format!("retention skipped: {}", e)),
        }

        let mut new_ids: Vec<String> = report.ingest.ingested.iter().map(|p| p.id().to_string()).collect();
        if let Some(ExportOutcome::Completed(done)) = &report.export {
            new_ids.push(done.id().to_string());
        }
        let deleted = report.retention.as_ref().map_or(0, |r| r.deleted.len());
        if !new_ids.is_empty() || deleted > 0 {
            let mut message = format!("process new parcels: {}", new_ids.join(", "));
            for done in &report.ingest.ingested {
                if let Some(source) = &done.source {
                    message.push_str(&format!("\n{} was ingested from {}", done.id(), source.display()));
                }
            }
            if deleted > 0 {
                message.push_str(&format!("\nremoved {} old parcel(s)", deleted));
            }
            let (committed, warning) = self.commit(dataset, &message).await;
            report.committed = committed;
            report.warnings.extend(warning);
        }

        Ok(report)
    }

    /// Apply retention and commit the removals
    pub async fn clean(&self, dataset: &Dataset) -> Result<RetentionOutcome> {
        let store = self.store(dataset);
        let outcome = RetentionEnforcer::new(&store).enforce(dataset.config().keep)?;
        if !outcome.deleted.is_empty() {
            self.commit(dataset, "clean").await;
        }
        Ok(outcome)
    }

    /// Record metrics missing from the ledger for COMPLETE parcels
    ///
    /// With no ids every COMPLETE parcel is considered. Existing rows are
    /// never touched.
    pub async fn reprocess_metrics(
        &self,
        dataset: &Dataset,
        ids: &[ParcelId],
    ) -> Result<ReprocessReport> {
        let store = self.store(dataset);
        let parcels = store.list_parcels()?;
        let targets: Vec<&Parcel> = if ids.is_empty() {
            parcels.iter().filter(|p| p.is_complete()).collect()
        } else {
            ids.iter()
                .map(|id| {
                    parcels
                        .iter()
                        .find(|p| &p.id == id && p.state == ParcelState::Complete)
                        .ok_or_else(|| EngineError::NotFound(id.clone()))
                })
                .collect::<Result<_>>()?
        };

        let records = store.ledger().records()?;
        let collector = MetricCollector::new(&self.runner);
        let mut report = ReprocessReport::default();

        for parcel in targets {
            let Some(payload) = parcel.payload.first() else {
                continue;
            };
            let present: BTreeSet<&str> = records
                .iter()
                .filter(|r| r.parcel_id == parcel.id)
                .map(|r| r.metric.as_str())
                .collect();
            let collected = collector
                .collect_where(dataset, payload, |name| !present.contains(name))
                .await;
            if !collected.failures.is_empty() {
                report
                    .failures
                    .insert(parcel.id.clone(), collected.failures.clone());
            }
            if collected.values.is_empty() {
                continue;
            }
            let values = collected.values.clone();
            store
                .ledger()
                .append(&collected.into_records(&parcel.id, self.clock.now()))?;
            report.recorded.insert(parcel.id.clone(), values);
        }

        if !report.recorded.is_empty() {
            let ids: Vec<String> = report.recorded.keys().map(ToString::to_string).collect();
            self.commit(dataset, &format!("reprocess metrics for: {}", ids.join(", ")))
                .await;
        }
        Ok(report)
    }

    /// Manually delete a COMPLETE or FAILED parcel and commit
    pub async fn delete(&self, dataset: &Dataset, id: &ParcelId) -> Result<Parcel> {
        let store = self.store(dataset);
        let parcel = store.delete_parcel(id)?;
        if parcel.is_complete() {
            self.commit(dataset, &format!("delete {}", id)).await;
        }
        Ok(parcel)
    }
}

fn ingest_message(report: &IngestReport) -> String {
    let mut message = String::from("ingest");
    for done in &report.ingested {
        message.push_str(&format!("\n{}", done.id()));
        if let Some(source) = &done.source {
            message.push_str(&format!(" from {}", source.display()));
        }
    }
    message
}

/// Save the producing command's output to `log/<id>.out` and `log/<id>.err`
fn write_logs(dataset: &Dataset, id: &ParcelId, result: &Result<CommandOutput>) {
    let (stdout, stderr) = match result {
        Ok(output) => (output.stdout.as_str(), output.stderr.as_str()),
        Err(e) => e.command_output().unwrap_or(("", "")),
    };
    let layout = dataset.layout();
    if let Err(e) = std::fs::create_dir_all(layout.log_dir()) {
        warn!(error = %e, "Cannot create log directory");
        return;
    }
    for (path, contents) in [(layout.stdout_log(id), stdout), (layout.stderr_log(id), stderr)] {
        if let Err(e) = std::fs::write(&path, contents) {
            warn!(log = %path.display(), error = %e, "Failed to write command log");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::ledger::MetricRecord;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records commit messages instead of running git
    #[derive(Default)]
    struct RecordingHook {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommitHook for RecordingHook {
        async fn commit(&self, _dataset: &Path, message: &str, _paths: &[&str]) -> Result<bool> {
            self.messages.lock().unwrap().push(message.to_string());
            Ok(true)
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn setup(temp: &TempDir, toml: &str) -> (Dataset, Engine, Arc<RecordingHook>) {
        fs::write(temp.path().join("config.toml"), toml).unwrap();
        let dataset = Dataset::open(temp.path()).unwrap();
        dataset.layout().ensure_dirs().unwrap();
        let hook = Arc::new(RecordingHook::default());
        let engine = Engine::new(CommandRunner::default(), Arc::new(FixedClock(now())))
            .with_commit_hook(hook.clone());
        (dataset, engine, hook)
    }

    fn metric_names(records: &[MetricRecord]) -> Vec<String> {
        records.iter().map(|r| r.metric.clone()).collect()
    }

    #[tokio::test]
    async fn test_export_success() {
        let temp = TempDir::new().unwrap();
        let (dataset, engine, hook) = setup(
            &temp,
            r#"
            cmd = "echo exporting; printf 'a\nb\n' > \"$PARCEL_PATH.txt\""
            [metrics.lines]
            cmd = "wc -l < \"$PARCEL_PATH\""
            "#,
        );

        let outcome = engine.export(&dataset, None).await.unwrap();
        let ExportOutcome::Completed(done) = outcome else {
            panic!("expected completed export, got {:?}", outcome);
        };
        assert_eq!(done.id().to_string(), "2024-03-01T120000Z");
        assert_eq!(done.metrics["lines"], MetricValue::Integer(2));
        assert_eq!(done.metrics["bytes"], MetricValue::Integer(4));
        assert!(done.warnings.is_empty());

        assert!(temp.path().join("data/2024-03-01T120000Z.txt").is_file());
        assert_eq!(
            fs::read_to_string(temp.path().join("log/2024-03-01T120000Z.out")).unwrap(),
            "exporting\n"
        );

        let records = engine.store(&dataset).ledger().records().unwrap();
        assert_eq!(metric_names(&records), vec!["bytes", "files", "lines"]);
        assert!(records.iter().all(|r| r.recorded_at == now()));
        assert_eq!(
            hook.messages.lock().unwrap().clone(),
            vec!["add new export 2024-03-01T120000Z"]
        );
    }

    #[tokio::test]
    async fn test_export_failure_quarantines_without_metrics() {
        let temp = TempDir::new().unwrap();
        let (dataset, engine, hook) = setup(
            &temp,
            "cmd = \"echo partial > \\\"$PARCEL_PATH.txt\\\"; echo oops >&2; exit 1\"\n",
        );

        let outcome = engine.export(&dataset, None).await.unwrap();
        assert!(outcome.is_failure());

        let parcels = engine.store(&dataset).list_parcels().unwrap();
        assert_eq!(parcels.len(), 1);
        assert_eq!(parcels[0].state, ParcelState::Failed);
        assert!(temp.path().join("incomplete/2024-03-01T120000Z.txt").is_file());
        assert!(engine.store(&dataset).ledger().records().unwrap().is_empty());
        assert_eq!(
            fs::read_to_string(temp.path().join("log/2024-03-01T120000Z.err")).unwrap(),
            "oops\n"
        );
        assert!(hook.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_timeout_fails_parcel() {
        let temp = TempDir::new().unwrap();
        let (dataset, engine, _) = setup(&temp, "cmd = \"sleep 30\"\ntimeout = \"1s\"\n");
        let outcome = engine.export(&dataset, None).await.unwrap();
        match outcome {
            ExportOutcome::Failed { reason, .. } => assert!(reason.contains("timed out")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_export_without_payload_fails() {
        let temp = TempDir::new().unwrap();
        let (dataset, engine, _) = setup(&temp, "cmd = \"true\"\n");
        assert!(engine.export(&dataset, None).await.unwrap().is_failure());
    }

    #[tokio::test]
    async fn test_export_without_command_is_skipped() {
        let temp = TempDir::new().unwrap();
        let (dataset, engine, _) = setup(&temp, "");
        assert!(matches!(
            engine.export(&dataset, None).await.unwrap(),
            ExportOutcome::Skipped
        ));
    }

    #[tokio::test]
    async fn test_export_id_collision() {
        let temp = TempDir::new().unwrap();
        let (dataset, engine, _) = setup(&temp, "cmd = \"echo x > \\\"$PARCEL_PATH.txt\\\"\"\n");
        engine.export(&dataset, None).await.unwrap();

        // Same second: derived id is suffixed, explicit id conflicts.
        let second = engine.export(&dataset, None).await.unwrap();
        let ExportOutcome::Completed(done) = second else {
            panic!("expected completed export");
        };
        assert_eq!(done.id().to_string(), "2024-03-01T120000Z-1");

        let err = engine
            .export(&dataset, Some("2024-03-01T120000Z".parse().unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_metric_failure_is_not_fatal() {
        let temp = TempDir::new().unwrap();
        let (dataset, engine, _) = setup(
            &temp,
            r#"
            cmd = "echo x > \"$PARCEL_PATH.txt\""
            [metrics.bad]
            cmd = "exit 2"
            "#,
        );
        let ExportOutcome::Completed(done) = engine.export(&dataset, None).await.unwrap() else {
            panic!("expected completed export");
        };
        assert_eq!(done.parcel.state, ParcelState::Complete);
        assert_eq!(done.metric_failures.len(), 1);
        assert_eq!(done.warnings.len(), 1);
        assert!(!done.metrics.contains_key("bad"));
    }

    #[tokio::test]
    async fn test_ingest_path_completes_parcel() {
        let temp = TempDir::new().unwrap();
        let (dataset, engine, hook) = setup(&temp, "");
        let source = temp.path().join("drop.json");
        fs::write(&source, "{\"a\":1}").unwrap();

        let done = engine.ingest_path(&dataset, &source, None).await.unwrap();
        assert_eq!(done.id().to_string(), "2024-03-01T120000Z");
        assert!(!source.exists());
        assert!(temp.path().join("data/2024-03-01T120000Z.json").is_file());
        assert_eq!(done.metrics["bytes"], MetricValue::Integer(7));
        assert_eq!(hook.messages.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_process_ingests_exports_and_cleans() {
        let temp = TempDir::new().unwrap();
        let (dataset, engine, hook) = setup(
            &temp,
            r#"
            cmd = "echo fresh > \"$PARCEL_PATH.txt\""
            interval = "1 day"
            keep = 2
            [ingest]
            paths = "inbox/*.txt"
            time_source = "mtime"
            "#,
        );

        // Two old complete parcels
        for days in [5, 4] {
            let id = ParcelId::from_datetime(now() - TimeDelta::days(days));
            fs::write(temp.path().join(format!("data/{}.txt", id)), "old").unwrap();
        }
        let inbox = temp.path().join("inbox");
        fs::create_dir(&inbox).unwrap();
        let dropped = inbox.join("manual.txt");
        fs::write(&dropped, "manual").unwrap();
        let mtime = now() - TimeDelta::days(3);
        filetime::set_file_mtime(&dropped, filetime::FileTime::from_unix_time(mtime.timestamp(), 0))
            .unwrap();

        let report = engine.process(&dataset).await.unwrap();
        assert_eq!(report.ingest.ingested.len(), 1);
        assert!(report.due);
        assert!(matches!(report.export, Some(ExportOutcome::Completed(_))));
        assert_eq!(report.retention.as_ref().unwrap().deleted.len(), 2);
        assert!(report.committed);
        assert!(!report.has_failure());

        let remaining: Vec<String> = engine
            .store(&dataset)
            .list_parcels()
            .unwrap()
            .iter()
            .map(|p| p.id.to_string())
            .collect();
        assert_eq!(remaining, vec!["2024-02-27T120000Z", "2024-03-01T120000Z"]);
        assert!(hook.messages.lock().unwrap()[0].starts_with("process new parcels"));

        // Nothing is due right after a successful export.
        let again = engine.process(&dataset).await.unwrap();
        assert!(!again.due);
        assert!(again.export.is_none());
        assert!(!again.committed);
    }

    #[tokio::test]
    async fn test_interrupted_staging_does_not_block_retention() {
        let temp = TempDir::new().unwrap();
        let (dataset, engine, _) = setup(&temp, "interval = \"1 day\"\nkeep = 1\n");
        for hours in [30, 20, 10] {
            let id = ParcelId::from_datetime(now() - TimeDelta::hours(hours));
            fs::write(temp.path().join(format!("data/{}.txt", id)), "old").unwrap();
        }
        let stale = ParcelId::from_datetime(now() - TimeDelta::hours(5));
        std::mem::forget(engine.store(&dataset).begin_parcel(stale.clone()).unwrap());

        let report = engine.process(&dataset).await.unwrap();
        assert!(!report.due);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(report.retention.as_ref().unwrap().deleted.len(), 2);

        let store = engine.store(&dataset);
        assert_eq!(store.parcel(&stale).unwrap().unwrap().state, ParcelState::Failed);
        assert_eq!(store.list_parcels().unwrap().iter().filter(|p| p.is_complete()).count(), 1);

        // A second crashed run is cleared by `clean` as well.
        let again = ParcelId::from_datetime(now() - TimeDelta::hours(1));
        std::mem::forget(engine.store(&dataset).begin_parcel(again.clone()).unwrap());
        let outcome = engine.clean(&dataset).await.unwrap();
        assert!(outcome.deleted.is_empty());
        assert_eq!(
            engine.store(&dataset).parcel(&again).unwrap().unwrap().state,
            ParcelState::Failed
        );
    }

    #[tokio::test]
    async fn test_process_reports_export_failure() {
        let temp = TempDir::new().unwrap();
        let (dataset, engine, _) = setup(&temp, "cmd = \"exit 1\"\ninterval = \"1h\"\n");
        let report = engine.process(&dataset).await.unwrap();
        assert!(report.has_failure());
        assert_eq!(report.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_reprocess_only_adds_missing_metrics() {
        let temp = TempDir::new().unwrap();
        let (dataset, engine, _) = setup(&temp, "cmd = \"echo x > \\\"$PARCEL_PATH.txt\\\"\"\n");
        engine.export(&dataset, None).await.unwrap();
        let before = engine.store(&dataset).ledger().records().unwrap();

        // Add a metric to the config and reprocess.
        fs::write(
            temp.path().join("config.toml"),
            "cmd = \"echo x > \\\"$PARCEL_PATH.txt\\\"\"\n[metrics.answer]\ncmd = \"echo 42\"\n",
        )
        .unwrap();
        let dataset = Dataset::open(temp.path()).unwrap();
        let report = engine.reprocess_metrics(&dataset, &[]).await.unwrap();
        assert_eq!(report.recorded.len(), 1);

        let after = engine.store(&dataset).ledger().records().unwrap();
        assert_eq!(&after[..before.len()], &before[..]);
        assert_eq!(metric_names(&after[before.len()..]), vec!["answer"]);

        let again = engine.reprocess_metrics(&dataset, &[]).await.unwrap();
        assert!(again.recorded.is_empty());

        let missing: ParcelId = "2000-01-01T000000Z".parse().unwrap();
        assert!(matches!(
            engine.reprocess_metrics(&dataset, &[missing]).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_failed_parcel() {
        let temp = TempDir::new().unwrap();
        let (dataset, engine, _) = setup(&temp, "cmd = \"exit 1\"\n");
        let ExportOutcome::Failed { parcel_id, .. } = engine.export(&dataset, None).await.unwrap() else {
            panic!("expected failure");
        };
        engine.delete(&dataset, &parcel_id).await.unwrap();
        assert!(engine.store(&dataset).list_parcels().unwrap().is_empty());
        assert!(!temp.path().join(format!("log/{}.err", parcel_id)).exists());
    }
}
