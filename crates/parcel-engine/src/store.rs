//! Filesystem-backed parcel repository for one dataset
//!
//! State is derived from the filesystem on every call:
//!
//! | on disk | state |
//! |---|---|
//! | payload in `data/` | COMPLETE |
//! | `.state/<id>.failed` marker | FAILED |
//! | `.state/<id>.staging` marker | STAGING |
//! | bare payload in `incomplete/` | FAILED |
//!
//! The commit point of a parcel is the rename of its payload from
//! `incomplete/` into `data/`. Every other transition writes or removes a
//! marker file, and each marker write is itself a temp-file + rename, so an
//! interruption at any step leaves a state the rules above resolve.

use crate::dataset::DatasetLayout;
use crate::error::{EngineError, Result};
use crate::ledger::MetricsLedger;
use crate::parcel::{entry_stem, Parcel, ParcelId, ParcelState};
use chrono::{DateTime, Utc};
use parcel_common::fsutil;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

const STAGING_SUFFIX: &str = ".staging";
const FAILED_SUFFIX: &str = ".failed";

/// Reason recorded for a STAGING parcel found at the start of a new run
pub const INTERRUPTED_REASON: &str = "interrupted: staging parcel left by a previous run";

#[derive(Debug, Serialize, Deserialize)]
struct StagingMarker {
    started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FailedMarker {
    reason: String,
    failed_at: DateTime<Utc>,
}

/// Raw observations behind [`ParcelStore::list_parcels`]
#[derive(Debug, Default)]
struct Scan {
    data: BTreeMap<ParcelId, Vec<PathBuf>>,
    incomplete: BTreeMap<ParcelId, Vec<PathBuf>>,
    staging: BTreeSet<ParcelId>,
    failed: BTreeMap<ParcelId, Option<String>>,
}

impl Scan {
    fn ids(&self) -> BTreeSet<ParcelId> {
        self.data
            .keys()
            .chain(self.incomplete.keys())
            .chain(self.staging.iter())
            .chain(self.failed.keys())
            .cloned()
            .collect()
    }

    fn resolve(&self, id: &ParcelId) -> Parcel {
        if let Some(payload) = self.data.get(id) {
            return Parcel {
                id: id.clone(),
                state: ParcelState::Complete,
                payload: payload.clone(),
                failure: None,
            };
        }

        let payload = self.incomplete.get(id).cloned().unwrap_or_default();
        let (state, failure) = if let Some(reason) = self.failed.get(id) {
            (ParcelState::Failed, reason.clone())
        } else if self.staging.contains(id) {
            (ParcelState::Staging, None)
        } else {
            (
                ParcelState::Failed,
                Some("payload left in incomplete/ without a state marker".to_string()),
            )
        };

        Parcel {
            id: id.clone(),
            state,
            payload,
            failure,
        }
    }

    fn parcels(&self) -> Vec<Parcel> {
        self.ids().iter().map(|id| self.resolve(id)).collect()
    }
}

/// Handle on the single STAGING parcel of a store
///
/// Dropping an unresolved handle releases the in-process slot but leaves the
/// STAGING marker on disk, so the next `begin_parcel` quarantines it.
#[derive(Debug)]
pub struct StagingParcel {
    id: ParcelId,
    incomplete_dir: PathBuf,
    active: Arc<Mutex<Option<ParcelId>>>,
}

impl StagingParcel {
    pub fn id(&self) -> &ParcelId {
        &self.id
    }

    /// Path prefix the payload must be written to, e.g. `incomplete/<id>`
    ///
    /// Writers may append an extension or create a directory at this path.
    pub fn payload_prefix(&self) -> PathBuf {
        self.incomplete_dir.join(self.id.to_string())
    }

    /// Entries written for this parcel so far
    pub fn payload_entries(&self) -> Result<Vec<PathBuf>> {
        entries_for(&self.incomplete_dir, &self.id)
    }

    /// The single payload entry
    ///
    /// Fails when nothing, or more than one entry, was written.
    pub fn payload(&self) -> Result<PathBuf> {
        let mut entries = self.payload_entries()?;
        match entries.len() {
            1 => Ok(entries.remove(0)),
            0 => Err(EngineError::payload(
                &self.id,
                format!("nothing was written to {}", self.payload_prefix().display()),
            )),
            n => Err(EngineError::payload(
                &self.id,
                format!("expected one payload entry, found {}", n),
            )),
        }
    }
}

impl Drop for StagingParcel {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.as_ref() == Some(&self.id) {
            *active = None;
        }
    }
}

/// Parcel repository for one dataset directory
#[derive(Debug)]
pub struct ParcelStore {
    layout: DatasetLayout,
    ledger: MetricsLedger,
    active: Arc<Mutex<Option<ParcelId>>>,
}

impl ParcelStore {
    pub fn new(layout: DatasetLayout) -> Self {
        let ledger = MetricsLedger::new(layout.ledger_path());
        Self {
            layout,
            ledger,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    pub fn ledger(&self) -> &MetricsLedger {
        &self.ledger
    }

    fn scan(&self) -> Result<Scan> {
        let mut scan = Scan {
            data: group_entries(&self.layout.data_dir())?,
            incomplete: group_entries(&self.layout.incomplete_dir())?,
            ..Scan::default()
        };

        for name in dir_names(&self.layout.state_dir())? {
            if let Some(id) = marker_id(&name, STAGING_SUFFIX) {
                scan.staging.insert(id);
            } else if let Some(id) = marker_id(&name, FAILED_SUFFIX) {
                let reason = self.read_failure(&id);
                scan.failed.insert(id, reason);
            }
        }
        Ok(scan)
    }

    fn read_failure(&self, id: &ParcelId) -> Option<String> {
        let path = self.marker_path(id, FAILED_SUFFIX);
        let raw = std::fs::read(&path).ok()?;
        match serde_json::from_slice::<FailedMarker>(&raw) {
            Ok(marker) => Some(marker.reason),
            Err(e) => {
                warn!(marker = %path.display(), error = %e, "Unreadable failure marker");
                None
            },
        }
    }

    fn marker_path(&self, id: &ParcelId, suffix: &str) -> PathBuf {
        self.layout.state_dir().join(format!("{}{}", id, suffix))
    }

    /// All parcels, sorted by id ascending
    ///
    /// Read-only: a stale STAGING parcel is reported as such, not repaired.
    pub fn list_parcels(&self) -> Result<Vec<Parcel>> {
        Ok(self.scan()?.parcels())
    }

    /// Look up one parcel
    pub fn parcel(&self, id: &ParcelId) -> Result<Option<Parcel>> {
        let scan = self.scan()?;
        Ok(scan.ids().contains(id).then(|| scan.resolve(id)))
    }

    /// Every id with any trace in the dataset: payloads, markers, logs or ledger rows
    pub fn known_ids(&self) -> Result<BTreeSet<ParcelId>> {
        let mut ids = self.scan()?.ids();
        for name in dir_names(&self.layout.log_dir())? {
            if let Some(id) = entry_stem(&name).and_then(|s| s.parse().ok()) {
                ids.insert(id);
            }
        }
        ids.extend(self.ledger.parcel_ids()?);
        Ok(ids)
    }

    /// `base` if unused, otherwise `base` with the smallest free `-N` suffix
    pub fn next_available_id(&self, base: &ParcelId) -> Result<ParcelId> {
        let known = self.known_ids()?;
        if !known.contains(base) {
            return Ok(base.clone());
        }
        (1..=u32::MAX)
            .map(|seq| base.with_seq(seq))
            .find(|candidate| !known.contains(candidate))
            .ok_or_else(|| EngineError::conflict(format!("no free id near {}", base)))
    }

    /// Enter STAGING for a new parcel
    ///
    /// A STAGING parcel left by an earlier run is quarantined as FAILED
    /// first. Fails with a conflict while another handle from this store is
    /// unresolved, or when `id` already has any trace in the dataset.
    pub fn begin_parcel(&self, id: ParcelId) -> Result<StagingParcel> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = active.as_ref() {
            return Err(EngineError::conflict(format!(
                "parcel {} is still staging",
                current
            )));
        }

        self.recover()?;

        if self.known_ids()?.contains(&id) {
            return Err(EngineError::conflict(format!("parcel id {} is already in use", id)));
        }

        std::fs::create_dir_all(self.layout.state_dir())?;
        let marker = serde_json::to_vec(&StagingMarker {
            started_at: Utc::now(),
        })
        .map_err(std::io::Error::other)?;
        fsutil::write_atomic(self.marker_path(&id, STAGING_SUFFIX), &marker)?;

        debug!(dataset = %self.layout.root().display(), parcel_id = %id, "Parcel staging");
        *active = Some(id.clone());
        Ok(StagingParcel {
            id,
            incomplete_dir: self.layout.incomplete_dir(),
            active: Arc::clone(&self.active),
        })
    }

    /// Quarantine STAGING parcels left by an earlier run
    ///
    /// A no-op while a handle from this store is unresolved: that parcel is
    /// still being written.
    pub fn reconcile(&self) -> Result<()> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.is_some() {
            return Ok(());
        }
        self.recover()
    }

    /// Quarantine stale STAGING parcels and clear markers left behind by a
    /// crash after the commit rename
    fn recover(&self) -> Result<()> {
        let scan = self.scan()?;
        for id in &scan.staging {
            if scan.data.contains_key(id) {
                debug!(parcel_id = %id, "Removing staging marker of completed parcel");
                remove_if_exists(&self.marker_path(id, STAGING_SUFFIX))?;
            } else if !scan.failed.contains_key(id) {
                warn!(
                    dataset = %self.layout.root().display(),
                    parcel_id = %id,
                    "Quarantining parcel left in STAGING by a previous run"
                );
                self.mark_failed(id, INTERRUPTED_REASON)?;
            } else {
                remove_if_exists(&self.marker_path(id, STAGING_SUFFIX))?;
            }
        }
        Ok(())
    }

    fn mark_failed(&self, id: &ParcelId, reason: &str) -> Result<()> {
        std::fs::create_dir_all(self.layout.state_dir())?;
        let marker = serde_json::to_vec(&FailedMarker {
            reason: reason.to_string(),
            failed_at: Utc::now(),
        })
        .map_err(std::io::Error::other)?;
        fsutil::write_atomic(self.marker_path(id, FAILED_SUFFIX), &marker)?;
        remove_if_exists(&self.marker_path(id, STAGING_SUFFIX))?;
        Ok(())
    }

    /// Move the staged payload into `data/`
    ///
    /// The rename is the commit point. If it fails the parcel stays STAGING
    /// on disk and the next `begin_parcel` quarantines it.
    pub fn complete_parcel(&self, handle: StagingParcel) -> Result<Parcel> {
        let source = handle.payload()?;
        let name = source
            .file_name()
            .ok_or_else(|| EngineError::payload(&handle.id, "payload has no file name"))?;
        let data_dir = self.layout.data_dir();
        std::fs::create_dir_all(&data_dir)?;
        let dest = data_dir.join(name);
        if dest.exists() {
            return Err(EngineError::conflict(format!(
                "{} already exists",
                dest.display()
            )));
        }

        std::fs::rename(&source, &dest)?;
        remove_if_exists(&self.marker_path(&handle.id, STAGING_SUFFIX))?;

        info!(
            dataset = %self.layout.root().display(),
            parcel_id = %handle.id,
            "Parcel complete"
        );
        Ok(Parcel {
            id: handle.id.clone(),
            state: ParcelState::Complete,
            payload: vec![dest],
            failure: None,
        })
    }

    /// Record FAILED, leaving any partial payload in `incomplete/`
    pub fn fail_parcel(&self, handle: StagingParcel, reason: &str) -> Result<Parcel> {
        self.mark_failed(&handle.id, reason)?;
        warn!(
            dataset = %self.layout.root().display(),
            parcel_id = %handle.id,
            reason,
            "Parcel failed"
        );
        Ok(Parcel {
            id: handle.id.clone(),
            state: ParcelState::Failed,
            payload: handle.payload_entries()?,
            failure: Some(reason.to_string()),
        })
    }

    /// Roll back a parcel whose payload was never written
    ///
    /// If anything was written after all, the parcel is failed instead so
    /// the data is kept for inspection.
    pub fn abandon_parcel(&self, handle: StagingParcel) -> Result<()> {
        if !handle.payload_entries()?.is_empty() {
            self.fail_parcel(handle, "abandoned after payload was written")?;
            return Ok(());
        }
        remove_if_exists(&self.marker_path(&handle.id, STAGING_SUFFIX))?;
        debug!(parcel_id = %handle.id, "Parcel abandoned");
        Ok(())
    }

    /// Remove a COMPLETE or FAILED parcel with its ledger rows, logs and markers
    pub fn delete_parcel(&self, id: &ParcelId) -> Result<Parcel> {
        let parcel = match self.parcel(id)? {
            Some(parcel) if parcel.state.is_terminal() => parcel,
            _ => return Err(EngineError::NotFound(id.clone())),
        };

        for path in &parcel.payload {
            fsutil::remove_path(path)?;
        }
        self.ledger.remove_parcel(id)?;
        for path in [
            self.layout.stdout_log(id),
            self.layout.stderr_log(id),
            self.marker_path(id, FAILED_SUFFIX),
            self.marker_path(id, STAGING_SUFFIX),
        ] {
            remove_if_exists(&path)?;
        }

        info!(
            dataset = %self.layout.root().display(),
            parcel_id = %id,
            state = %parcel.state,
            "Parcel deleted"
        );
        Ok(parcel)
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Names in a directory, skipping dotfiles; a missing directory is empty
fn dir_names(dir: &Path) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

fn group_entries(dir: &Path) -> Result<BTreeMap<ParcelId, Vec<PathBuf>>> {
    let mut grouped: BTreeMap<ParcelId, Vec<PathBuf>> = BTreeMap::new();
    for name in dir_names(dir)? {
        let Some(stem) = entry_stem(&name) else {
            continue;
        };
        match stem.parse::<ParcelId>() {
            Ok(id) => grouped.entry(id).or_default().push(dir.join(&name)),
            Err(_) => debug!(entry = %dir.join(&name).display(), "Ignoring non-parcel entry"),
        }
    }
    Ok(grouped)
}

fn entries_for(dir: &Path, id: &ParcelId) -> Result<Vec<PathBuf>> {
    Ok(dir_names(dir)?
        .into_iter()
        .filter(|name| id.matches_entry(name))
        .map(|name| dir.join(name))
        .collect())
}

fn marker_id(name: &str, suffix: &str) -> Option<ParcelId> {
    name.strip_suffix(suffix)?.parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ledger::{MetricRecord, MetricValue};
    use proptest::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    fn id(s: &str) -> ParcelId {
        s.parse().unwrap()
    }

    fn store(temp: &TempDir) -> ParcelStore {
        let layout = DatasetLayout::new(temp.path());
        layout.ensure_dirs().unwrap();
        ParcelStore::new(layout)
    }

    fn write_payload(handle: &StagingParcel, ext: &str, contents: &str) -> PathBuf {
        let mut path = handle.payload_prefix().into_os_string();
        path.push(ext);
        let path = PathBuf::from(path);
        fs::write(&path, contents).unwrap();
        path
    }

    fn states(store: &ParcelStore) -> Vec<(String, ParcelState)> {
        store
            .list_parcels()
            .unwrap()
            .into_iter()
            .map(|p| (p.id.to_string(), p.state))
            .collect()
    }

    #[test]
    fn test_empty_store() {
        let temp = TempDir::new().unwrap();
        assert!(store(&temp).list_parcels().unwrap().is_empty());
    }

    #[test]
    fn test_missing_directories_list_empty() {
        let temp = TempDir::new().unwrap();
        let store = ParcelStore::new(DatasetLayout::new(temp.path().join("absent")));
        assert!(store.list_parcels().unwrap().is_empty());
    }

    #[test]
    fn test_complete_moves_payload_to_data() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let handle = store.begin_parcel(id("2024-01-01T000000Z")).unwrap();
        let staged = write_payload(&handle, ".json", "{}");
        assert_eq!(states(&store), vec![("2024-01-01T000000Z".into(), ParcelState::Staging)]);

        let parcel = store.complete_parcel(handle).unwrap();
        assert_eq!(parcel.state, ParcelState::Complete);
        assert!(!staged.exists());
        assert_eq!(
            parcel.payload,
            vec![temp.path().join("data/2024-01-01T000000Z.json")]
        );

        let listed = store.list_parcels().unwrap();
        assert_eq!(listed, vec![parcel]);
        assert!(!store.marker_path(&id("2024-01-01T000000Z"), STAGING_SUFFIX).exists());
    }

    #[test]
    fn test_directory_payload() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let handle = store.begin_parcel(id("2024-01-01T000000Z")).unwrap();
        fs::create_dir(handle.payload_prefix()).unwrap();
        fs::write(handle.payload_prefix().join("a.txt"), "a").unwrap();
        store.complete_parcel(handle).unwrap();
        assert!(temp.path().join("data/2024-01-01T000000Z/a.txt").is_file());
    }

    #[test]
    fn test_second_begin_while_staging_conflicts() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let first = store.begin_parcel(id("2024-01-01T000000Z")).unwrap();
        let err = store.begin_parcel(id("2024-01-02T000000Z")).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        write_payload(&first, ".txt", "x");
        store.complete_parcel(first).unwrap();
        let second = store.begin_parcel(id("2024-01-02T000000Z")).unwrap();
        assert_eq!(second.id(), &id("2024-01-02T000000Z"));
    }

    #[test]
    fn test_begin_with_used_id_conflicts() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let handle = store.begin_parcel(id("2024-01-01T000000Z")).unwrap();
        write_payload(&handle, ".txt", "x");
        store.complete_parcel(handle).unwrap();

        let err = store.begin_parcel(id("2024-01-01T000000Z")).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        // Ids known only from the ledger are taken too.
        store
            .ledger()
            .append(&[MetricRecord::new(
                id("2023-01-01T000000Z"),
                "bytes",
                MetricValue::Integer(1),
                Utc::now(),
            )])
            .unwrap();
        assert!(store.begin_parcel(id("2023-01-01T000000Z")).is_err());
    }

    #[test]
    fn test_stale_staging_is_quarantined_on_begin() {
        let temp = TempDir::new().unwrap();
        {
            let store = store(&temp);
            let handle = store.begin_parcel(id("2024-01-01T000000Z")).unwrap();
            write_payload(&handle, ".json", "partial");
            // Simulated crash: the handle is never resolved.
            std::mem::forget(handle);
        }

        let store = store(&temp);
        assert_eq!(states(&store), vec![("2024-01-01T000000Z".into(), ParcelState::Staging)]);

        let handle = store.begin_parcel(id("2024-01-02T000000Z")).unwrap();
        let stale = store.parcel(&id("2024-01-01T000000Z")).unwrap().unwrap();
        assert_eq!(stale.state, ParcelState::Failed);
        assert_eq!(stale.failure.as_deref(), Some(INTERRUPTED_REASON));
        assert_eq!(
            stale.payload,
            vec![temp.path().join("incomplete/2024-01-01T000000Z.json")]
        );
        assert_eq!(handle.id(), &id("2024-01-02T000000Z"));
    }

    #[test]
    fn test_dropped_handle_releases_slot_and_is_recovered() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        drop(store.begin_parcel(id("2024-01-01T000000Z")).unwrap());
        let next = store.begin_parcel(id("2024-01-02T000000Z")).unwrap();
        assert_eq!(next.id(), &id("2024-01-02T000000Z"));
        assert_eq!(
            store.parcel(&id("2024-01-01T000000Z")).unwrap().unwrap().state,
            ParcelState::Failed
        );
    }

    #[test]
    fn test_reconcile_quarantines_only_stale_staging() {
        let temp = TempDir::new().unwrap();
        {
            let store = store(&temp);
            std::mem::forget(store.begin_parcel(id("2024-01-01T000000Z")).unwrap());
        }

        let store = store(&temp);
        let live = store.begin_parcel(id("2024-01-02T000000Z")).unwrap();
        store.reconcile().unwrap();
        assert_eq!(
            store.parcel(live.id()).unwrap().unwrap().state,
            ParcelState::Staging
        );
        store.abandon_parcel(live).unwrap();

        fs::create_dir_all(temp.path().join("incomplete/.state")).unwrap();
        fs::write(temp.path().join("incomplete/.state/2024-01-03T000000Z.staging"), "{}").unwrap();
        store.reconcile().unwrap();
        assert_eq!(
            store.parcel(&id("2024-01-03T000000Z")).unwrap().unwrap().state,
            ParcelState::Failed
        );
    }

    #[test]
    fn test_staging_marker_after_commit_is_cleaned() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        // Crash between the commit rename and marker removal.
        fs::create_dir_all(temp.path().join("incomplete/.state")).unwrap();
        fs::write(temp.path().join("incomplete/.state/2024-01-01T000000Z.staging"), "{}").unwrap();
        fs::write(temp.path().join("data/2024-01-01T000000Z.txt"), "done").unwrap();
        assert_eq!(states(&store), vec![("2024-01-01T000000Z".into(), ParcelState::Complete)]);

        let _handle = store.begin_parcel(id("2024-01-02T000000Z")).unwrap();
        assert!(!temp.path().join("incomplete/.state/2024-01-01T000000Z.staging").exists());
        assert_eq!(
            store.parcel(&id("2024-01-01T000000Z")).unwrap().unwrap().state,
            ParcelState::Complete
        );
    }

    #[test]
    fn test_fail_keeps_partial_payload() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let handle = store.begin_parcel(id("2024-01-01T000000Z")).unwrap();
        let partial = write_payload(&handle, ".csv", "half");
        let parcel = store.fail_parcel(handle, "exit code 1").unwrap();

        assert_eq!(parcel.state, ParcelState::Failed);
        assert_eq!(parcel.payload, vec![partial.clone()]);
        assert!(partial.exists());
        let listed = store.parcel(&id("2024-01-01T000000Z")).unwrap().unwrap();
        assert_eq!(listed.failure.as_deref(), Some("exit code 1"));
    }

    #[test]
    fn test_bare_incomplete_payload_is_failed() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        fs::write(temp.path().join("incomplete/2020-01-01T000000Z.zip"), "x").unwrap();
        fs::write(temp.path().join("incomplete/notes.txt"), "ignored").unwrap();
        assert_eq!(states(&store), vec![("2020-01-01T000000Z".into(), ParcelState::Failed)]);
    }

    #[test]
    fn test_payload_must_be_single_entry() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let handle = store.begin_parcel(id("2024-01-01T000000Z")).unwrap();
        assert!(matches!(handle.payload(), Err(EngineError::Payload { .. })));

        write_payload(&handle, ".a", "1");
        write_payload(&handle, ".b", "2");
        assert!(matches!(handle.payload(), Err(EngineError::Payload { .. })));
        assert!(store.complete_parcel(handle).is_err());
    }

    #[test]
    fn test_abandon_without_payload_leaves_no_trace() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let handle = store.begin_parcel(id("2024-01-01T000000Z")).unwrap();
        store.abandon_parcel(handle).unwrap();
        assert!(store.list_parcels().unwrap().is_empty());
        assert!(store.begin_parcel(id("2024-01-01T000000Z")).is_ok());
    }

    #[test]
    fn test_abandon_with_payload_fails_parcel() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let handle = store.begin_parcel(id("2024-01-01T000000Z")).unwrap();
        write_payload(&handle, ".txt", "x");
        store.abandon_parcel(handle).unwrap();
        assert_eq!(states(&store), vec![("2024-01-01T000000Z".into(), ParcelState::Failed)]);
    }

    #[test]
    fn test_delete_parcel() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let target = id("2024-01-01T000000Z");
        let handle = store.begin_parcel(target.clone()).unwrap();
        write_payload(&handle, ".txt", "x");
        store.complete_parcel(handle).unwrap();
        fs::write(store.layout().stdout_log(&target), "log").unwrap();
        store
            .ledger()
            .append(&[MetricRecord::new(
                target.clone(),
                "bytes",
                MetricValue::Integer(1),
                Utc::now(),
            )])
            .unwrap();

        store.delete_parcel(&target).unwrap();
        assert!(store.list_parcels().unwrap().is_empty());
        assert!(store.ledger().records().unwrap().is_empty());
        assert!(!store.layout().stdout_log(&target).exists());

        assert!(matches!(
            store.delete_parcel(&target),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_failed_parcel_and_refuse_staging() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let failed = store.begin_parcel(id("2024-01-01T000000Z")).unwrap();
        write_payload(&failed, ".txt", "x");
        store.fail_parcel(failed, "boom").unwrap();

        let staging = store.begin_parcel(id("2024-01-02T000000Z")).unwrap();
        assert!(matches!(
            store.delete_parcel(staging.id()),
            Err(EngineError::NotFound(_))
        ));

        store.delete_parcel(&id("2024-01-01T000000Z")).unwrap();
        assert!(fs::read_dir(temp.path().join("incomplete"))
            .unwrap()
            .filter_map(|e| e.ok())
            .all(|e| e.file_name().to_string_lossy().starts_with('.')));
    }

    #[test]
    fn test_next_available_id() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let base = id("2024-01-01T000000Z");
        assert_eq!(store.next_available_id(&base).unwrap(), base);

        fs::write(temp.path().join("data/2024-01-01T000000Z.txt"), "a").unwrap();
        fs::write(temp.path().join("data/2024-01-01T000000Z-1.txt"), "b").unwrap();
        fs::write(temp.path().join("log/2024-01-01T000000Z-2.out"), "").unwrap();
        assert_eq!(
            store.next_available_id(&base).unwrap().to_string(),
            "2024-01-01T000000Z-3"
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_at_most_one_staging(ops in proptest::collection::vec(any::<bool>(), 1..12)) {
            let temp = TempDir::new().unwrap();
            let store = store(&temp);
            let mut handle: Option<StagingParcel> = None;
            let mut next = 0i64;

            for begin in ops {
                if begin {
                    next += 1;
                    let pid = ParcelId::from_datetime(
                        DateTime::from_timestamp(1_700_000_000 + next * 60, 0).unwrap(),
                    );
                    match store.begin_parcel(pid) {
                        Ok(h) => {
                            prop_assert!(handle.is_none());
                            write_payload(&h, ".txt", "x");
                            handle = Some(h);
                        },
                        Err(e) => {
                            prop_assert!(handle.is_some());
                            prop_assert!(matches!(e, EngineError::Conflict(_)), "unexpected error");
                        },
                    }
                } else if let Some(h) = handle.take() {
                    store.complete_parcel(h).unwrap();
                }

                let staging = store
                    .list_parcels()
                    .unwrap()
                    .iter()
                    .filter(|p| p.state == ParcelState::Staging)
                    .count();
                prop_assert!(staging <= 1);
            }
        }
    }
}
