//! Client-side synchronization and lifecycle engine for waste reports.
//!
//! The [`SyncController`] keeps a paginated local mirror of the signed-in
//! user's reports consistent with the remote authority: loading and
//! appending pages, submitting drafts, polling analysis status, and deleting.
//! Photos pass through the bounded [`ImageEncoder`] before upload.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod capabilities;
pub mod config;
pub mod error;
pub mod image_processing;
pub mod model;
pub mod observers;
pub mod polling;
pub mod report_store;
pub mod status_estimator;
pub mod sync_controller;
pub mod wire;

pub use capabilities::{
    ConnectivityProbe, HttpConnectivityProbe, HttpReportApi, ReportApi, Session, StaticSession,
    Submission,
};
pub use config::{ConfigError, EncoderConfig, SyncConfig};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use image_processing::{
    Bounds, EncodedImage, ImageCodec, ImageEncoder, ImageProcessingError, JpegCodec,
};
pub use model::{
    DeviceInfo, DraftId, ImageRef, LatLon, Report, ReportDraft, ReportId, ReportPatch,
    ReportStatus, UserId,
};
pub use observers::SubscriptionId;
pub use polling::{spawn_status_poll, PollHandle};
pub use report_store::{Cursor, PaginationInfo, ReportStore};
pub use status_estimator::StatusEstimator;
pub use sync_controller::{
    LoadMoreOutcome, PollOutcome, SubmitRequest, SyncController, SyncSnapshot,
};
pub use wire::{ReportPage, SubmitReceipt};

use std::sync::Arc;

/// Builds a controller backed by the HTTP API and probe.
pub fn connect(config: SyncConfig, session: Arc<dyn Session>) -> Result<SyncController, SyncError> {
    let api = HttpReportApi::new(&config, Arc::clone(&session))?;
    let probe = HttpConnectivityProbe::new(&config)?;
    Ok(SyncController::new(config, Arc::new(api), session, Arc::new(probe)))
}
