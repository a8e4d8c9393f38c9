use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::capabilities::{ConnectivityProbe, ReportApi, Session, Submission};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::image_processing::EncodedImage;
use crate::model::{ImageRef, Report, ReportDraft, ReportId, ReportPatch, ReportStatus};
use crate::observers::{Observers, SubscriptionId};
use crate::polling::{spawn_status_poll, PollHandle};
use crate::report_store::{Cursor, PaginationInfo, ReportStore};
use crate::status_estimator::StatusEstimator;

/// State handed to observers after every completed mutation.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncSnapshot {
    pub reports: Vec<Report>,
    pub cursor: Cursor,
    pub loading: bool,
    pub error: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoadMoreOutcome {
    /// Another load was in flight, nothing more to load, or the error flag is set.
    Skipped,
    Appended { added: usize },
    /// The fetch failed and the page counter was restored.
    RolledBack,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Continue,
    Finished,
}

/// A draft plus its upload-ready photo.
#[derive(Clone, Debug)]
pub struct SubmitRequest {
    pub draft: ReportDraft,
    pub image: Option<EncodedImage>,
}

struct SyncState {
    store: ReportStore,
    loading: bool,
    error: Option<String>,
}

impl SyncState {
    fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            reports: self.store.reports().to_vec(),
            cursor: self.store.cursor(),
            loading: self.loading,
            error: self.error.clone(),
        }
    }

    fn record_outcome<T>(&mut self, result: &Result<T, SyncError>) {
        self.error = match result {
            Ok(_) => None,
            Err(e) => Some(e.user_facing_message()),
        };
    }
}

pub struct SyncController {
    api: Arc<dyn ReportApi>,
    session: Arc<dyn Session>,
    connectivity: Arc<dyn ConnectivityProbe>,
    config: SyncConfig,
    state: RwLock<SyncState>,
    // Serializes page operations; load_more only ever try-locks it.
    page_latch: Mutex<()>,
    observers: Observers<SyncSnapshot>,
}

impl SyncController {
    pub fn new(
        config: SyncConfig,
        api: Arc<dyn ReportApi>,
        session: Arc<dyn Session>,
        connectivity: Arc<dyn ConnectivityProbe>,
    ) -> Self {
        let store = ReportStore::new(config.per_page);
        Self {
            api,
            session,
            connectivity,
            config,
            state: RwLock::new(SyncState {
                store,
                loading: false,
                error: None,
            }),
            page_latch: Mutex::new(()),
            observers: Observers::new(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SyncSnapshot) + Send + Sync + 'static,
    {
        self.observers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    pub async fn snapshot(&self) -> SyncSnapshot {
        self.state.read().await.snapshot()
    }

    pub async fn find(&self, id: ReportId) -> Option<Report> {
        self.state.read().await.store.find_by_id(id).cloned()
    }

    pub async fn estimate(&self, status: ReportStatus) -> u64 {
        let state = self.state.read().await;
        StatusEstimator::new(&state.store).estimate(status)
    }

    pub async fn estimate_all(&self) -> BTreeMap<ReportStatus, u64> {
        let state = self.state.read().await;
        StatusEstimator::new(&state.store).estimate_all()
    }

    /// Loads page 1 of the current user's reports, replacing the store.
    #[instrument(skip(self))]
    pub async fn initial_load(&self) -> Result<(), SyncError> {
        let _latch = self.page_latch.lock().await;

        {
            let mut state = self.state.write().await;
            state.loading = true;
        }

        let per_page = self.config.per_page;
        let result = match self.session.current_user() {
            Some(user_id) => self.api.list_reports(user_id, 1, per_page).await,
            None => Err(SyncError::AuthenticationRequired),
        };

        let (snapshot, outcome) = {
            let mut state = self.state.write().await;
            state.loading = false;
            state.record_outcome(&result);
            let outcome = match result {
                Ok(page) => {
                    info!(count = page.reports.len(), total = page.total, "initial load complete");
                    state.store.replace_all(
                        page.reports,
                        PaginationInfo {
                            page: 1,
                            total: page.total,
                            total_pages: page.total_pages,
                        },
                    );
                    Ok(())
                }
                Err(e) => {
                    warn!(error = %e, "initial load failed");
                    Err(e)
                }
            };
            (state.snapshot(), outcome)
        };

        self.observers.notify(&snapshot);
        outcome
    }

    /// Fetches the next page. Failures roll the page counter back and stay silent.
    #[instrument(skip(self))]
    pub async fn load_more(&self) -> LoadMoreOutcome {
        let Ok(_latch) = self.page_latch.try_lock() else {
            debug!("page load already in flight");
            return LoadMoreOutcome::Skipped;
        };
        let Some(user_id) = self.session.current_user() else {
            debug!("no signed-in user");
            return LoadMoreOutcome::Skipped;
        };

        let (previous, requested) = {
            let mut state = self.state.write().await;
            if !state.store.cursor().has_more || state.error.is_some() {
                return LoadMoreOutcome::Skipped;
            }
            state.store.begin_page_advance()
        };

        match self.api.list_reports(user_id, requested, self.config.per_page).await {
            Ok(page) => {
                let (added, snapshot) = {
                    let mut state = self.state.write().await;
                    let added = state.store.append_page(
                        page.reports,
                        PaginationInfo {
                            page: requested,
                            total: page.total,
                            total_pages: page.total_pages,
                        },
                    );
                    (added, state.snapshot())
                };
                debug!(page = requested, added, "page appended");
                self.observers.notify(&snapshot);
                LoadMoreOutcome::Appended { added }
            }
            Err(e) => {
                warn!(error = %e, page = requested, "load_more failed, rolling back page");
                counter!("sync.load_more.rollbacks").increment(1);
                self.state.write().await.store.rollback_page_advance(previous);
                LoadMoreOutcome::RolledBack
            }
        }
    }

    /// Submits a draft. On success the confirmed report becomes the store's head.
    #[instrument(skip(self, request), fields(draft_id = %request.draft.draft_id))]
    pub async fn submit(&self, request: SubmitRequest) -> Result<Report, SyncError> {
        let result = self.confirm_submission(request).await;

        let snapshot = {
            let mut state = self.state.write().await;
            state.record_outcome(&result);
            match &result {
                Ok(report) => {
                    state.store.grow_total(1);
                    state.store.insert_head(report.clone());
                }
                Err(e) => warn!(error = %e, "submission failed"),
            }
            state.snapshot()
        };

        self.observers.notify(&snapshot);
        result
    }

    async fn confirm_submission(&self, request: SubmitRequest) -> Result<Report, SyncError> {
        let user_id = self
            .session
            .current_user()
            .ok_or(SyncError::AuthenticationRequired)?;

        if !self.connectivity.is_reachable().await {
            return Err(SyncError::ConnectivityRequired);
        }

        if let Some(image) = &request.image {
            if !image.within_budget() {
                warn!(
                    len = image.len(),
                    quality = image.quality(),
                    "submitting best-effort image over byte budget"
                );
            }
        }

        let SubmitRequest { draft, image } = request;
        let submission = Submission {
            draft_id: draft.draft_id.clone(),
            user_id,
            location: draft.location,
            description: draft.effective_description(),
            device_info: draft.device_info.clone(),
            image,
        };

        let receipt = self.api.submit_report(&submission).await?;
        counter!("sync.submit.success").increment(1);
        info!(report_id = %receipt.report_id, "report confirmed");

        let (image_ref, upload_complete) = match (receipt.image_url, &submission.image) {
            (Some(url), _) => (Some(ImageRef::Remote { url }), true),
            (None, Some(image)) => (Some(image.to_image_ref()), false),
            (None, None) => (None, true),
        };

        Ok(Report {
            id: Some(receipt.report_id),
            owner_id: user_id,
            location: submission.location,
            description: submission.description,
            image_ref,
            status: ReportStatus::Submitted,
            waste_type: None,
            severity_score: None,
            priority_level: None,
            full_description: None,
            created_at: Utc::now(),
            location_name: draft.location_name,
            device_info: submission.device_info,
            upload_complete,
        })
    }

    /// Deletes remotely, then locally. A failed delete leaves the store untouched.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: ReportId) -> Result<(), SyncError> {
        let result = match self.session.current_user() {
            Some(_) => self.api.delete_report(id).await,
            None => Err(SyncError::AuthenticationRequired),
        };

        let snapshot = {
            let mut state = self.state.write().await;
            state.record_outcome(&result);
            match &result {
                Ok(()) => {
                    if state.store.remove_by_id(id).is_none() {
                        debug!("deleted report was not materialized locally");
                    }
                }
                Err(e) => warn!(error = %e, "delete failed"),
            }
            state.snapshot()
        };

        self.observers.notify(&snapshot);
        result
    }

    /// One polling step for `id`. Never surfaces errors.
    #[instrument(skip(self))]
    pub async fn poll_tick(&self, id: ReportId) -> PollOutcome {
        let stored = self.state.read().await.store.find_by_id(id).map(|r| r.status);

        let stored = match stored {
            Some(status) => status,
            None => return self.adopt_remote(id).await,
        };

        if !stored.is_in_progress() {
            return PollOutcome::Finished;
        }

        let remote = match self.api.get_report(id).await {
            Ok(report) => report,
            Err(SyncError::NotFound { .. }) => {
                debug!("report gone remotely, stopping");
                return PollOutcome::Finished;
            }
            Err(e) => {
                warn!(error = %e, "status poll failed");
                return PollOutcome::Continue;
            }
        };

        let snapshot = {
            let mut state = self.state.write().await;
            // Re-read: the store may have moved on while the fetch was in flight.
            let Some(current) = state.store.find_by_id(id).map(|r| r.status) else {
                return PollOutcome::Finished;
            };
            if current.is_terminal() {
                return PollOutcome::Finished;
            }
            if remote.status != current
                && state.store.update_in_place(id, ReportPatch::from_remote(&remote))
            {
                info!(from = %current, to = %remote.status, "status changed");
                counter!("sync.poll.updates").increment(1);
                Some(state.snapshot())
            } else {
                None
            }
        };

        if let Some(snapshot) = snapshot {
            self.observers.notify(&snapshot);
        }

        if remote.status.is_in_progress() {
            PollOutcome::Continue
        } else {
            PollOutcome::Finished
        }
    }

    async fn adopt_remote(&self, id: ReportId) -> PollOutcome {
        let report = match self.api.get_report(id).await {
            Ok(report) => report,
            Err(SyncError::NotFound { .. }) => {
                debug!("report not found, nothing to poll");
                return PollOutcome::Finished;
            }
            Err(e) => {
                warn!(error = %e, "could not fetch report for polling");
                return PollOutcome::Continue;
            }
        };

        let status = report.status;
        let snapshot = {
            let mut state = self.state.write().await;
            if state.store.find_by_id(id).is_some() {
                None
            } else {
                state.store.insert_head(report);
                Some(state.snapshot())
            }
        };
        if let Some(snapshot) = snapshot {
            self.observers.notify(&snapshot);
        }

        if status.is_in_progress() {
            PollOutcome::Continue
        } else {
            PollOutcome::Finished
        }
    }

    /// Starts polling `id` at the configured interval. The caller owns the handle.
    pub fn track_status(self: &Arc<Self>, id: ReportId) -> PollHandle {
        spawn_status_poll(Arc::clone(self), id, self.config.poll_interval)
    }
}
