use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::{ImageRef, Report, ReportId, ReportPatch};

/// How much of the remote collection is materialized locally.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub page: u32,
    pub per_page: u32,
    pub total_known: u64,
    pub has_more: bool,
}

impl Cursor {
    pub fn new(per_page: u32) -> Self {
        Self {
            page: 0,
            per_page: per_page.max(1),
            total_known: 0,
            has_more: false,
        }
    }

    fn recompute_has_more(&mut self) {
        self.has_more = u64::from(self.page) * u64::from(self.per_page) < self.total_known;
    }
}

/// Pagination metadata returned alongside a page of records.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PaginationInfo {
    /// The page these records belong to.
    pub page: u32,
    pub total: u64,
    pub total_pages: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportStore {
    reports: Vec<Report>,
    cursor: Cursor,
}

impl ReportStore {
    pub fn new(per_page: u32) -> Self {
        Self {
            reports: Vec::new(),
            cursor: Cursor::new(per_page),
        }
    }

    pub fn reports(&self) -> &[Report] {
        &self.reports
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn find_by_id(&self, id: ReportId) -> Option<&Report> {
        self.reports.iter().find(|r| r.id == Some(id))
    }

    /// Full reset, used by the initial load.
    pub fn replace_all(&mut self, records: Vec<Report>, info: PaginationInfo) {
        let mut seen = HashSet::with_capacity(records.len());
        self.reports = records
            .into_iter()
            .filter(|r| r.id.map_or(true, |id| seen.insert(id)))
            .collect();
        self.cursor.page = info.page;
        self.cursor.total_known = info.total.max(self.reports.len() as u64);
        self.cursor.recompute_has_more();
    }

    /// Appends a page, skipping records already present. Returns how many were added.
    pub fn append_page(&mut self, records: Vec<Report>, info: PaginationInfo) -> usize {
        let mut seen: HashSet<ReportId> = self.reports.iter().filter_map(|r| r.id).collect();
        let before = self.reports.len();
        let mut skipped = 0usize;

        for record in records {
            match record.id {
                Some(id) if !seen.insert(id) => skipped += 1,
                _ => self.reports.push(record),
            }
        }

        if skipped > 0 {
            debug!(skipped, page = info.page, "skipped duplicate records");
        }

        self.cursor.page = info.page;
        self.cursor.total_known = info.total.max(self.reports.len() as u64);
        self.cursor.recompute_has_more();
        self.reports.len() - before
    }

    /// Places a record first. An existing record with the same id is replaced.
    pub fn insert_head(&mut self, record: Report) {
        if let Some(id) = record.id {
            self.reports.retain(|r| r.id != Some(id));
        }
        self.reports.insert(0, record);
        self.cursor.total_known = self.cursor.total_known.max(self.reports.len() as u64);
        self.cursor.recompute_has_more();
    }

    /// Records that the remote collection grew without a page fetch.
    pub fn grow_total(&mut self, by: u64) {
        self.cursor.total_known = self.cursor.total_known.saturating_add(by);
        self.cursor.recompute_has_more();
    }

    pub fn remove_by_id(&mut self, id: ReportId) -> Option<Report> {
        let index = self.reports.iter().position(|r| r.id == Some(id))?;
        let removed = self.reports.remove(index);
        self.cursor.total_known = self.cursor.total_known.saturating_sub(1);
        self.cursor.recompute_has_more();
        Some(removed)
    }

    /// Merges changed status/classification fields. Returns whether anything changed.
    pub fn update_in_place(&mut self, id: ReportId, patch: ReportPatch) -> bool {
        let Some(report) = self.reports.iter_mut().find(|r| r.id == Some(id)) else {
            return false;
        };

        let mut changed = false;

        if let Some(status) = patch.status {
            changed |= replace_if_changed(&mut report.status, status);
        }
        if patch.waste_type.is_some() {
            changed |= replace_if_changed(&mut report.waste_type, patch.waste_type);
        }
        if patch.severity_score.is_some() {
            changed |= replace_if_changed(&mut report.severity_score, patch.severity_score);
        }
        if patch.priority_level.is_some() {
            changed |= replace_if_changed(&mut report.priority_level, patch.priority_level);
        }
        if patch.full_description.is_some() {
            changed |= replace_if_changed(&mut report.full_description, patch.full_description);
        }
        if let Some(image_ref) = patch.image_ref {
            changed |= merge_image_ref(report, image_ref);
        }

        changed
    }

    /// Advances the page counter ahead of a fetch; returns (previous, requested).
    pub fn begin_page_advance(&mut self) -> (u32, u32) {
        let previous = self.cursor.page;
        self.cursor.page = previous.saturating_add(1);
        (previous, self.cursor.page)
    }

    /// Compensates a failed fetch started with [`Self::begin_page_advance`].
    pub fn rollback_page_advance(&mut self, previous: u32) {
        self.cursor.page = previous;
        self.cursor.recompute_has_more();
    }

    /// Newest first; equal timestamps keep store order.
    pub fn by_recency(&self) -> Vec<&Report> {
        let mut sorted: Vec<&Report> = self.reports.iter().collect();
        sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sorted
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

fn merge_image_ref(report: &mut Report, incoming: ImageRef) -> bool {
    if incoming.is_empty() {
        if report.image_ref.as_ref().is_some_and(ImageRef::is_pending) {
            warn!(id = ?report.id, "ignoring empty image ref over pending local image");
        }
        return false;
    }
    let now_remote = !incoming.is_pending();
    let mut changed = replace_if_changed(&mut report.image_ref, Some(incoming));
    if now_remote {
        changed |= replace_if_changed(&mut report.upload_complete, true);
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LatLon, ReportStatus, UserId};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn report(id: i64) -> Report {
        Report {
            id: Some(ReportId(id)),
            owner_id: UserId(1),
            location: LatLon::new(0.0, 0.0).unwrap(),
            description: format!("report {id}"),
            image_ref: None,
            status: ReportStatus::Submitted,
            waste_type: None,
            severity_score: None,
            priority_level: None,
            full_description: None,
            created_at: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
            location_name: None,
            device_info: None,
            upload_complete: false,
        }
    }

    fn page(page: u32, total: u64) -> PaginationInfo {
        PaginationInfo {
            page,
            total,
            total_pages: 0,
        }
    }

    #[test]
    fn replace_all_sets_cursor() {
        let mut store = ReportStore::new(2);
        store.replace_all(vec![report(1), report(2)], page(1, 5));
        let cursor = store.cursor();
        assert_eq!(cursor.page, 1);
        assert_eq!(cursor.total_known, 5);
        assert!(cursor.has_more);
    }

    #[test]
    fn append_page_skips_existing_ids() {
        let mut store = ReportStore::new(2);
        store.replace_all(vec![report(1), report(2)], page(1, 4));
        let added = store.append_page(vec![report(2), report(3)], page(2, 4));
        assert_eq!(added, 1);
        assert_eq!(store.len(), 3);
        assert!(!store.cursor().has_more);
    }

    #[test]
    fn insert_head_goes_first_regardless_of_date() {
        let mut store = ReportStore::new(10);
        store.replace_all(vec![report(5), report(6)], page(1, 2));
        store.insert_head(report(1));
        assert_eq!(store.reports()[0].id, Some(ReportId(1)));
        assert_eq!(store.by_recency()[0].id, Some(ReportId(6)));
    }

    #[test]
    fn remove_decrements_total_with_floor() {
        let mut store = ReportStore::new(10);
        store.replace_all(vec![report(1)], page(1, 0));
        assert_eq!(store.cursor().total_known, 1);
        assert!(store.remove_by_id(ReportId(1)).is_some());
        assert_eq!(store.cursor().total_known, 0);
        assert!(store.remove_by_id(ReportId(1)).is_none());
        assert_eq!(store.cursor().total_known, 0);
    }

    #[test]
    fn update_reports_only_real_changes() {
        let mut store = ReportStore::new(10);
        store.replace_all(vec![report(1)], page(1, 1));

        let patch = ReportPatch {
            status: Some(ReportStatus::Analyzing),
            ..Default::default()
        };
        assert!(store.update_in_place(ReportId(1), patch.clone()));
        assert!(!store.update_in_place(ReportId(1), patch));
        assert!(!store.update_in_place(ReportId(99), ReportPatch::default()));
    }

    #[test]
    fn empty_image_never_overwrites_pending_local() {
        let mut store = ReportStore::new(10);
        let mut pending = report(1);
        pending.image_ref = Some(ImageRef::Pending { bytes: vec![9; 16] });
        store.replace_all(vec![pending], page(1, 1));

        let patch = ReportPatch {
            image_ref: Some(ImageRef::Remote { url: String::new() }),
            ..Default::default()
        };
        assert!(!store.update_in_place(ReportId(1), patch));
        assert_eq!(
            store.find_by_id(ReportId(1)).unwrap().image_ref,
            Some(ImageRef::Pending { bytes: vec![9; 16] })
        );
    }

    #[test]
    fn remote_image_confirms_upload() {
        let mut store = ReportStore::new(10);
        store.replace_all(vec![report(1)], page(1, 1));
        let patch = ReportPatch {
            image_ref: Some(ImageRef::Remote { url: "https://x/1.jpg".into() }),
            ..Default::default()
        };
        assert!(store.update_in_place(ReportId(1), patch));
        assert!(store.find_by_id(ReportId(1)).unwrap().upload_complete);
    }

    #[test]
    fn page_advance_rolls_back() {
        let mut store = ReportStore::new(10);
        store.replace_all(vec![report(1)], page(1, 30));
        let (previous, requested) = store.begin_page_advance();
        assert_eq!((previous, requested), (1, 2));
        store.rollback_page_advance(previous);
        assert_eq!(store.cursor().page, 1);
    }

    #[test]
    fn rollback_recomputes_has_more_after_removal_mid_fetch() {
        let mut store = ReportStore::new(2);
        store.replace_all(vec![report(1), report(2)], page(1, 4));
        let (previous, _) = store.begin_page_advance();

        store.remove_by_id(ReportId(1));
        assert!(!store.cursor().has_more);

        store.rollback_page_advance(previous);
        let cursor = store.cursor();
        assert_eq!(cursor.page, 1);
        assert_eq!(cursor.total_known, 3);
        assert!(cursor.has_more);
    }

    proptest! {
        #[test]
        fn append_never_duplicates_ids(
            first in proptest::collection::vec(0i64..40, 0..20),
            second in proptest::collection::vec(0i64..40, 0..20),
            total in 0u64..100,
        ) {
            let mut store = ReportStore::new(10);
            store.replace_all(first.into_iter().map(report).collect(), page(1, total));
            store.append_page(second.into_iter().map(report).collect(), page(2, total));

            let mut ids: Vec<_> = store.reports().iter().filter_map(|r| r.id).collect();
            let len = ids.len();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), len);

            let cursor = store.cursor();
            prop_assert_eq!(
                cursor.has_more,
                u64::from(cursor.page) * u64::from(cursor.per_page) < cursor.total_known
            );
        }
    }
}
