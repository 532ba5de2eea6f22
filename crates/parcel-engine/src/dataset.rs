//! Dataset directory layout
//!
//! ```text
//! <dataset>/config.toml
//! <dataset>/data/<id>[.ext]             COMPLETE payloads
//! <dataset>/incomplete/<id>[.ext]       STAGING and FAILED payloads
//! <dataset>/incomplete/.state/<id>.*    state markers
//! <dataset>/metrics.csv                 metrics ledger
//! <dataset>/log/<id>.out, <id>.err      producing command output
//! ```

use crate::config::{DatasetConfig, CONFIG_FILE};
use crate::error::{EngineError, Result};
use crate::parcel::ParcelId;
use std::path::{Path, PathBuf};

pub const DATA_DIR: &str = "data";
pub const INCOMPLETE_DIR: &str = "incomplete";
pub const STATE_DIR: &str = ".state";
pub const LOG_DIR: &str = "log";
pub const LEDGER_FILE: &str = "metrics.csv";

/// Paths inside one dataset directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    root: PathBuf,
}

impl DatasetLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn incomplete_dir(&self) -> PathBuf {
        self.root.join(INCOMPLETE_DIR)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.incomplete_dir().join(STATE_DIR)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(LEDGER_FILE)
    }

    pub fn stdout_log(&self, id: &ParcelId) -> PathBuf {
        self.log_dir().join(format!("{}.out", id))
    }

    pub fn stderr_log(&self, id: &ParcelId) -> PathBuf {
        self.log_dir().join(format!("{}.err", id))
    }

    /// Whether `path` lies inside one of the managed subdirectories
    pub fn is_internal(&self, path: &Path) -> bool {
        [self.data_dir(), self.incomplete_dir(), self.log_dir()]
            .iter()
            .any(|dir| path.starts_with(dir))
            || path == self.ledger_path()
            || path == self.config_path()
    }

    /// Create the managed subdirectories if missing
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.data_dir(), self.incomplete_dir(), self.log_dir()] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// A dataset directory together with the configuration read for this tick
#[derive(Debug, Clone)]
pub struct Dataset {
    layout: DatasetLayout,
    config: DatasetConfig,
}

impl Dataset {
    /// Open an existing dataset, reading its `config.toml`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(EngineError::config(format!(
                "Dataset directory {} does not exist",
                path.display()
            )));
        }
        let config = DatasetConfig::load(path)?;
        Ok(Self::with_config(path, config))
    }

    pub fn with_config(path: impl Into<PathBuf>, config: DatasetConfig) -> Self {
        Self {
            layout: DatasetLayout::new(path),
            config,
        }
    }

    /// Display name: the directory's final component
    pub fn name(&self) -> String {
        let root = self.layout.root();
        root.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string())
    }

    pub fn path(&self) -> &Path {
        self.layout.root()
    }

    pub fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }
}
