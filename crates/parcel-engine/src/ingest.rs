//! Ingest of externally deposited files
//!
//! `[ingest] paths` holds glob patterns (`*`, `?`, `[...]`, `**/`) that are
//! absolute, start with `~`, or are relative to the dataset directory. Each
//! matching file or directory becomes a parcel by being moved into the
//! staging area, after which it follows the same completion path as an
//! export.

use crate::clock::Clock;
use crate::config::TimeSource;
use crate::dataset::Dataset;
use crate::error::{EngineError, Result};
use crate::parcel::ParcelId;
use crate::store::{ParcelStore, StagingParcel};
use chrono::{DateTime, Utc};
use glob::{MatchOptions, Pattern};
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// A file that could not be ingested
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub error: String,
}

/// One compiled `[ingest] paths` entry
#[derive(Debug)]
pub struct IngestPattern {
    pattern: String,
    /// Longest prefix without glob characters
    root: PathBuf,
    /// Full glob expression with `root` escaped, or `None` for a literal path
    glob: Option<String>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

fn has_glob_chars(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

fn expand_home(pattern: &str) -> Result<PathBuf> {
    let Some(rest) = pattern.strip_prefix('~') else {
        return Ok(PathBuf::from(pattern));
    };
    if !(rest.is_empty() || rest.starts_with('/')) {
        return Err(EngineError::config(format!(
            "unsupported home reference in ingest path '{}'",
            pattern
        )));
    }
    let home = dirs::home_dir()
        .ok_or_else(|| EngineError::config("cannot expand '~': no home directory"))?;
    Ok(home.join(rest.trim_start_matches('/')))
}

fn is_hidden(relative: &Path) -> bool {
    relative
        .components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
}

impl IngestPattern {
    /// Compile a pattern, resolving relative ones against `dataset_root`
    ///
    /// Only the pattern itself is glob syntax; the dataset path is taken
    /// literally even if it contains `[` or `*`.
    pub fn new(pattern: &str, dataset_root: &Path) -> Result<Self> {
        let expanded = expand_home(pattern)?;
        let mut root = if expanded.is_absolute() {
            PathBuf::new()
        } else {
            dataset_root.to_path_buf()
        };

        let mut rest: Vec<String> = Vec::new();
        for component in expanded.components() {
            let text = component.as_os_str().to_string_lossy().into_owned();
            if rest.is_empty() && !has_glob_chars(&text) {
                match component {
                    Component::ParentDir => {
                        root.pop();
                    },
                    Component::CurDir => {},
                    _ => root.push(component),
                }
            } else {
                rest.push(text);
            }
        }

        if rest.is_empty() {
            return Ok(Self {
                pattern: pattern.to_string(),
                root,
                glob: None,
            });
        }

        let glob = Path::new(&Pattern::escape(&root.to_string_lossy()))
            .join(rest.join("/"))
            .to_string_lossy()
            .into_owned();
        Pattern::new(&glob)
            .map_err(|e| EngineError::config(format!("invalid ingest path '{}': {}", pattern, e)))?;

        Ok(Self {
            pattern: pattern.to_string(),
            root,
            glob: Some(glob),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Paths currently matching, sorted
    ///
    /// Hidden entries and anything under `skip` are never matched. A matched
    /// directory is returned whole; nothing inside it is returned separately.
    pub fn matches<F>(&self, skip: F) -> Result<Vec<PathBuf>>
    where
        F: Fn(&Path) -> bool,
    {
        let Some(glob) = &self.glob else {
            return Ok(match std::fs::symlink_metadata(&self.root) {
                Ok(_) if !skip(&self.root) => vec![self.root.clone()],
                Ok(_) => Vec::new(),
                Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
                Err(e) => return Err(e.into()),
            });
        };

        let paths = glob::glob_with(glob, MATCH_OPTIONS).map_err(|e| {
            EngineError::config(format!("invalid ingest path '{}': {}", self.pattern, e))
        })?;

        let mut candidates = Vec::new();
        for entry in paths {
            match entry {
                Ok(path) => candidates.push(path),
                Err(e) => warn!(pattern = %self.pattern, error = %e, "Skipping unreadable path"),
            }
        }
        candidates.sort();

        let mut found: Vec<PathBuf> = Vec::new();
        for path in candidates {
            let hidden = path.strip_prefix(&self.root).map(is_hidden).unwrap_or(false);
            if hidden || skip(&path) || found.iter().any(|kept| path.starts_with(kept)) {
                continue;
            }
            found.push(path);
        }
        Ok(found)
    }
}

/// Finds ingest candidates and stages them as parcels
pub struct IngestCoordinator<'a> {
    dataset: &'a Dataset,
    store: &'a ParcelStore,
    clock: &'a dyn Clock,
}

impl<'a> IngestCoordinator<'a> {
    pub fn new(dataset: &'a Dataset, store: &'a ParcelStore, clock: &'a dyn Clock) -> Self {
        Self {
            dataset,
            store,
            clock,
        }
    }

    /// Every path matched by the configured patterns, deduplicated
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        let layout = self.dataset.layout();
        let mut found = BTreeSet::new();
        for raw in &self.dataset.config().ingest.paths {
            let pattern = IngestPattern::new(raw, self.dataset.path())?;
            let matched = pattern.matches(|path| layout.is_internal(path))?;
            debug!(pattern = %raw, matched = matched.len(), "Expanded ingest pattern");
            found.extend(matched);
        }
        Ok(found.into_iter().collect())
    }

    /// Parcel id for `source` under the configured time source, before
    /// disambiguation
    pub fn base_id(&self, source: &Path) -> Result<ParcelId> {
        let at: DateTime<Utc> = match self.dataset.config().ingest.time_source {
            TimeSource::Now => self.clock.now(),
            TimeSource::Mtime => std::fs::metadata(source)?.modified()?.into(),
        };
        Ok(ParcelId::from_datetime(at))
    }

    /// Begin a parcel and move `source` into its staging slot
    ///
    /// An explicit id is used as given and conflicts if taken; otherwise the
    /// id is derived from the time source and suffixed on collision. If the
    /// move fails, the parcel is rolled back and the error returned.
    pub fn stage(&self, source: &Path, id: Option<ParcelId>) -> Result<StagingParcel> {
        let id = match id {
            Some(id) => id,
            None => self.store.next_available_id(&self.base_id(source)?)?,
        };

        let handle = self.store.begin_parcel(id)?;
        let mut dest = handle.payload_prefix().into_os_string();
        if let Some(ext) = source.extension() {
            dest.push(".");
            dest.push(ext);
        }
        let dest = PathBuf::from(dest);

        if let Err(e) = move_path(source, &dest) {
            warn!(source = %source.display(), error = %e, "Ingest move failed");
            if let Err(rollback) = self.store.abandon_parcel(handle) {
                warn!(error = %rollback, "Failed to roll back ingest parcel");
            }
            return Err(e);
        }

        debug!(source = %source.display(), dest = %dest.display(), "Moved file into staging");
        Ok(handle)
    }
}

/// Rename, falling back to copy + remove for plain files (rename cannot
/// cross filesystems)
fn move_path(source: &Path, dest: &Path) -> Result<()> {
    match std::fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(e) if source.is_file() => {
            debug!(source = %source.display(), error = %e, "Rename failed, copying instead");
            std::fs::copy(source, dest)?;
            std::fs::remove_file(source)?;
            Ok(())
        },
        Err(e) => Err(e.into()),
    }
}
