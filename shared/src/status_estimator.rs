//! Per-status counts for the whole remote collection, extrapolated from the
//! loaded sample until pagination completes. Display heuristic only.

use std::collections::BTreeMap;

use crate::model::ReportStatus;
use crate::report_store::ReportStore;

pub struct StatusEstimator<'a> {
    store: &'a ReportStore,
}

impl<'a> StatusEstimator<'a> {
    pub fn new(store: &'a ReportStore) -> Self {
        Self { store }
    }

    pub fn estimate(&self, status: ReportStatus) -> u64 {
        let loaded_total = self.store.len() as u64;
        if loaded_total == 0 {
            return 0;
        }

        let loaded_in_status = self
            .store
            .reports()
            .iter()
            .filter(|r| r.status == status)
            .count() as u64;

        let total_known = self.store.cursor().total_known;
        if loaded_total >= total_known {
            return loaded_in_status;
        }

        proportional(total_known, loaded_in_status, loaded_total)
    }

    pub fn estimate_all(&self) -> BTreeMap<ReportStatus, u64> {
        ReportStatus::ALL
            .into_iter()
            .map(|status| (status, self.estimate(status)))
            .collect()
    }

    /// True when the estimate is an exact count.
    pub fn is_exact(&self) -> bool {
        self.store.len() as u64 >= self.store.cursor().total_known
    }
}

/// round(total * part / whole), half away from zero, in integer arithmetic.
fn proportional(total: u64, part: u64, whole: u64) -> u64 {
    let numerator = u128::from(total) * u128::from(part) * 2 + u128::from(whole);
    let rounded = numerator / (u128::from(whole) * 2);
    u64::try_from(rounded).unwrap_or(u64::MAX)
}
