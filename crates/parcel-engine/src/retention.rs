//! Retention: keep only the newest `keep` COMPLETE parcels

use crate::error::{EngineError, Result};
use crate::parcel::{ParcelId, ParcelState};
use crate::store::ParcelStore;
use serde::Serialize;
use tracing::{info, warn};

/// What one retention pass did
#[derive(Debug, Default, Serialize)]
pub struct RetentionOutcome {
    pub deleted: Vec<ParcelId>,

    /// The deletion that stopped the pass, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RetentionFailure>,
}

#[derive(Debug, Serialize)]
pub struct RetentionFailure {
    pub parcel_id: ParcelId,
    pub error: String,
}

pub struct RetentionEnforcer<'a> {
    store: &'a ParcelStore,
}

impl<'a> RetentionEnforcer<'a> {
    pub fn new(store: &'a ParcelStore) -> Self {
        Self { store }
    }

    /// Delete COMPLETE parcels beyond the `keep` newest, oldest first
    ///
    /// FAILED parcels are left for manual cleanup. STAGING parcels left by
    /// an earlier run are quarantined first; a parcel still being written by
    /// this process makes the pass refuse. A failed deletion stops the pass,
    /// so the survivors are always a contiguous run of the newest parcels.
    pub fn enforce(&self, keep: Option<usize>) -> Result<RetentionOutcome> {
        let mut outcome = RetentionOutcome::default();
        let Some(keep) = keep else {
            return Ok(outcome);
        };

        self.store.reconcile()?;
        let parcels = self.store.list_parcels()?;
        if let Some(staging) = parcels.iter().find(|p| p.state == ParcelState::Staging) {
            return Err(EngineError::conflict(format!(
                "cannot apply retention while parcel {} is staging",
                staging.id
            )));
        }

        let complete: Vec<&ParcelId> = parcels
            .iter()
            .filter(|p| p.is_complete())
            .map(|p| &p.id)
            .collect();
        let excess = complete.len().saturating_sub(keep);

        for id in complete.into_iter().take(excess) {
            match self.store.delete_parcel(id) {
                Ok(_) => outcome.deleted.push(id.clone()),
                Err(e) => {
                    warn!(parcel_id = %id, error = %e, "Retention stopped at failed deletion");
                    outcome.failure = Some(RetentionFailure {
                        parcel_id: id.clone(),
                        error: e.to_string(),
                    });
                    break;
                },
            }
        }

        if !outcome.deleted.is_empty() {
            info!(
                dataset = %self.store.layout().root().display(),
                deleted = outcome.deleted.len(),
                keep,
                "Retention applied"
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::dataset::DatasetLayout;
    use chrono::DateTime;
    use proptest::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> ParcelStore {
        let layout = DatasetLayout::new(temp.path());
        layout.ensure_dirs().unwrap();
        ParcelStore::new(layout)
    }

    fn nth_id(n: i64) -> ParcelId {
        ParcelId::from_datetime(DateTime::from_timestamp(1_600_000_000 + n * 86_400, 0).unwrap())
    }

    fn add_complete(temp: &TempDir, n: i64) -> ParcelId {
        let id = nth_id(n);
        fs::write(temp.path().join(format!("data/{}.txt", id)), "x").unwrap();
        id
    }

    fn add_failed(temp: &TempDir, n: i64) -> ParcelId {
        let id = nth_id(n);
        fs::write(temp.path().join(format!("incomplete/{}.txt", id)), "x").unwrap();
        id
    }

    #[test]
    fn test_no_keep_is_noop() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        add_complete(&temp, 1);
        let outcome = RetentionEnforcer::new(&store).enforce(None).unwrap();
        assert!(outcome.deleted.is_empty());
        assert_eq!(store.list_parcels().unwrap().len(), 1);
    }

    #[test]
    fn test_deletes_oldest_first_and_keeps_failed() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let ids: Vec<ParcelId> = (1..=4).map(|n| add_complete(&temp, n)).collect();
        let failed = add_failed(&temp, 0);

        let outcome = RetentionEnforcer::new(&store).enforce(Some(2)).unwrap();
        assert_eq!(outcome.deleted, vec![ids[0].clone(), ids[1].clone()]);
        assert!(outcome.failure.is_none());

        let remaining: Vec<ParcelId> = store.list_parcels().unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(remaining, vec![failed, ids[2].clone(), ids[3].clone()]);
    }

    #[test]
    fn test_refuses_while_staging() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        add_complete(&temp, 1);
        add_complete(&temp, 2);
        let _handle = store.begin_parcel(nth_id(3)).unwrap();
        let err = RetentionEnforcer::new(&store).enforce(Some(1)).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        assert_eq!(store.list_parcels().unwrap().len(), 3);
    }

    #[test]
    fn test_interrupted_staging_does_not_block() {
        let temp = TempDir::new().unwrap();
        DatasetLayout::new(temp.path()).ensure_dirs().unwrap();
        for n in 1..=3 {
            add_complete(&temp, n);
        }
        {
            let crashed = store(&temp);
            std::mem::forget(crashed.begin_parcel(nth_id(4)).unwrap());
        }

        let store = store(&temp);
        let outcome = RetentionEnforcer::new(&store).enforce(Some(1)).unwrap();
        assert_eq!(outcome.deleted, vec![nth_id(1), nth_id(2)]);

        let states: Vec<(ParcelId, ParcelState)> = store
            .list_parcels()
            .unwrap()
            .into_iter()
            .map(|p| (p.id, p.state))
            .collect();
        assert_eq!(
            states,
            vec![(nth_id(3), ParcelState::Complete), (nth_id(4), ParcelState::Failed)]
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_keeps_newest(total in 0i64..8, keep in 1usize..6) {
            let temp = TempDir::new().unwrap();
            let store = store(&temp);
            let ids: Vec<ParcelId> = (0..total).map(|n| add_complete(&temp, n)).collect();

            RetentionEnforcer::new(&store).enforce(Some(keep)).unwrap();

            let remaining: Vec<ParcelId> = store.list_parcels().unwrap().into_iter().map(|p| p.id).collect();
            let expected: Vec<ParcelId> = ids.iter().skip(ids.len().saturating_sub(keep)).cloned().collect();
            prop_assert_eq!(remaining, expected);
        }
    }
}
