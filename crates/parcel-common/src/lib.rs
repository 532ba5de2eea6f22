//! Parcel Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the parcel workspace.
//!
//! # Overview
//!
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Durations**: human-friendly interval strings such as `"1 day, 2 hours"`
//! - **Filesystem**: payload sizing and atomic writes
//!
//! # Example
//!
//! ```no_run
//! use parcel_common::duration::parse_duration;
//! use parcel_common::fsutil::total_size_bytes;
//!
//! fn check(path: &std::path::Path) -> parcel_common::Result<()> {
//!     let interval = parse_duration("1 week")?;
//!     let bytes = total_size_bytes(path)?;
//!     println!("{} bytes, next run in {}", bytes, interval);
//!     Ok(())
//! }
//! ```

pub mod duration;
pub mod error;
pub mod fsutil;
pub mod logging;

// Re-export commonly used types
pub use duration::HumanDuration;
pub use error::{CommonError, Result};
