//! Parcel identity and state
//!
//! A parcel id is the UTC second the parcel was created (or the modification
//! time of an ingested file), written as `YYYY-MM-DDTHHMMSSZ`. When two
//! parcels would share a second, the later one takes a numeric suffix:
//! `2024-03-01T120000Z-1`, `2024-03-01T120000Z-2`, ...

use crate::error::{EngineError, Result};
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H%M%SZ";

#[allow(clippy::expect_used)]
static PARCEL_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\A(\d{4}-\d{2}-\d{2}T\d{6}Z)(?:-([1-9]\d*))?\z").expect("parcel id pattern is valid")
});

/// Sortable, unique parcel identifier
///
/// Ordering is chronological, with suffixed ids after the plain id of the
/// same second.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParcelId {
    timestamp: DateTime<Utc>,
    seq: u32,
}

impl ParcelId {
    /// Id for the given instant, truncated to whole seconds
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self {
            timestamp: at.trunc_subsecs(0),
            seq: 0,
        }
    }

    /// The same second with a disambiguation suffix (0 means none)
    pub fn with_seq(&self, seq: u32) -> Self {
        Self {
            timestamp: self.timestamp,
            seq,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Whether a file or directory name belongs to this parcel
    ///
    /// Matches `<id>` exactly or `<id>.<anything>`.
    pub fn matches_entry(&self, name: &str) -> bool {
        entry_stem(name) == Some(self.to_string().as_str())
    }
}

/// The id portion of a payload entry name, i.e. everything before the first dot
///
/// Hidden entries (leading dot) have no stem.
pub fn entry_stem(name: &str) -> Option<&str> {
    if name.starts_with('.') {
        return None;
    }
    Some(name.split('.').next().unwrap_or(name))
}

impl fmt::Display for ParcelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.timestamp.format(TIMESTAMP_FORMAT))?;
        if self.seq > 0 {
            write!(f, "-{}", self.seq)?;
        }
        Ok(())
    }
}

impl FromStr for ParcelId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let caps = PARCEL_ID_RE
            .captures(s)
            .ok_or_else(|| EngineError::InvalidParcelId(s.to_string()))?;

        let naive = NaiveDateTime::parse_from_str(&caps[1], TIMESTAMP_FORMAT)
            .map_err(|_| EngineError::InvalidParcelId(s.to_string()))?;
        let seq = match caps.get(2) {
            Some(m) => m
                .as_str()
                .parse()
                .map_err(|_| EngineError::InvalidParcelId(s.to_string()))?,
            None => 0,
        };

        Ok(Self {
            timestamp: naive.and_utc(),
            seq,
        })
    }
}

impl Serialize for ParcelId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ParcelId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Lifecycle state of a parcel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParcelState {
    /// Producing command or ingest move in flight
    Staging,
    /// Payload moved to `data/`
    Complete,
    /// Quarantined in `incomplete/`
    Failed,
}

impl ParcelState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ParcelState::Staging)
    }
}

impl fmt::Display for ParcelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParcelState::Staging => write!(f, "STAGING"),
            ParcelState::Complete => write!(f, "COMPLETE"),
            ParcelState::Failed => write!(f, "FAILED"),
        }
    }
}

/// A parcel as observed on disk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parcel {
    pub id: ParcelId,
    pub state: ParcelState,

    /// Payload entries, in `data/` when complete and `incomplete/` otherwise
    pub payload: Vec<PathBuf>,

    /// Recorded reason for a failed parcel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl Parcel {
    pub fn is_complete(&self) -> bool {
        self.state == ParcelState::Complete
    }
}
