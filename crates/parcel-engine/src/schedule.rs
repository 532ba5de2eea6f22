//! Whether a dataset needs a new parcel
//!
//! Nothing is persisted: each decision is derived from the id of the most
//! recent COMPLETE parcel and the dataset's configuration.

use crate::clock::Clock;
use crate::config::{DatasetConfig, Unscheduled};
use crate::error::Result;
use crate::parcel::{Parcel, ParcelId};
use crate::store::ParcelStore;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;

/// Id of the newest COMPLETE parcel in an ascending list
pub fn last_complete(parcels: &[Parcel]) -> Option<&ParcelId> {
    parcels.iter().rev().find(|p| p.is_complete()).map(|p| &p.id)
}

#[derive(Clone)]
pub struct ScheduleEvaluator {
    clock: Arc<dyn Clock>,
}

impl ScheduleEvaluator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Read the store and decide. Makes no filesystem writes.
    pub fn is_due(&self, config: &DatasetConfig, store: &ParcelStore) -> Result<bool> {
        let parcels = store.list_parcels()?;
        Ok(self.decide(config, last_complete(&parcels)))
    }

    pub fn decide(&self, config: &DatasetConfig, last: Option<&ParcelId>) -> bool {
        is_due_at(config, last, self.clock.now())
    }

    pub fn is_overdue(&self, config: &DatasetConfig, last: Option<&ParcelId>) -> bool {
        is_overdue_at(config, last, self.clock.now())
    }
}

/// Due when nothing is complete yet, or when `interval - margin` has
/// elapsed since the last COMPLETE parcel's timestamp
///
/// Without an interval, [`Unscheduled`] decides.
pub fn is_due_at(config: &DatasetConfig, last: Option<&ParcelId>, now: DateTime<Utc>) -> bool {
    let Some(interval) = config.interval else {
        return match config.unscheduled {
            Unscheduled::Once => last.is_none(),
            Unscheduled::Always => true,
            Unscheduled::Never => false,
        };
    };

    match last {
        None => true,
        Some(id) => now - id.timestamp() >= wait_after(interval.as_delta(), config.margin.as_delta()),
    }
}

/// Time between a COMPLETE parcel and the next due point
fn wait_after(interval: TimeDelta, margin: TimeDelta) -> TimeDelta {
    interval.checked_sub(&margin).unwrap_or(interval)
}

/// The moment the dataset becomes due again, if it is scheduled
///
/// `None` as well when that moment lies past the last representable date.
pub fn next_due_at(config: &DatasetConfig, last: Option<&ParcelId>) -> Option<DateTime<Utc>> {
    let interval = config.interval?;
    let last = last?;
    last.timestamp()
        .checked_add_signed(wait_after(interval.as_delta(), config.margin.as_delta()))
}

/// Overdue once the last COMPLETE parcel is older than the overdue threshold
///
/// A scheduled dataset with no complete parcel at all is overdue.
pub fn is_overdue_at(config: &DatasetConfig, last: Option<&ParcelId>, now: DateTime<Utc>) -> bool {
    let Some(threshold) = config.overdue_threshold() else {
        return false;
    };
    match last {
        None => true,
        Some(id) => now - id.timestamp() >= threshold,
    }
}
