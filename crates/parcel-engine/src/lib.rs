//! Parcel Engine
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Keeps a directory of timestamped snapshots ("parcels") per dataset.
//!
//! # Overview
//!
//! - **Store**: parcel state derived from `data/`, `incomplete/` and marker files
//! - **Runner**: external commands with a timeout and bounded output capture
//! - **Schedule**: whether a dataset is due, from its last COMPLETE parcel
//! - **Ledger**: append-only `metrics.csv`
//! - **Workflow**: export, ingest, retention, reprocess and the per-tick `process`
//! - **Report**: read-only status and metric trends
//!
//! # Example
//!
//! ```no_run
//! use parcel_engine::{Dataset, Engine, ExportOutcome};
//!
//! async fn tick(path: &std::path::Path) -> parcel_engine::Result<()> {
//!     let dataset = Dataset::open(path)?;
//!     let engine = Engine::default();
//!     if let ExportOutcome::Failed { parcel_id, reason } = engine.export(&dataset, None).await? {
//!         eprintln!("{} failed: {}", parcel_id, reason);
//!     }
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod dataset;
pub mod error;
pub mod hooks;
pub mod ingest;
pub mod ledger;
pub mod metrics;
pub mod parcel;
pub mod report;
pub mod retention;
pub mod runner;
pub mod schedule;
pub mod store;
pub mod workflow;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::DatasetConfig;
pub use dataset::{Dataset, DatasetLayout};
pub use error::{EngineError, Result};
pub use hooks::{CommitHook, GitCommitHook, NoCommit};
pub use ledger::{MetricRecord, MetricValue, MetricsLedger};
pub use parcel::{Parcel, ParcelId, ParcelState};
pub use report::{DatasetReport, Report, ReportAggregator};
pub use retention::RetentionOutcome;
pub use runner::{CommandRunner, ExternalCommand};
pub use store::ParcelStore;
pub use workflow::{CompletedParcel, Engine, ExportOutcome, TickReport};
