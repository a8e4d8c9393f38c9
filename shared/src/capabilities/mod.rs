//! Collaborators the sync engine consumes: the remote report API, the
//! session, and the connectivity probe. HTTP implementations live in the
//! submodules; hosts and tests can substitute their own.

mod connectivity;
mod http;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::SyncError;
use crate::image_processing::EncodedImage;
use crate::model::{DeviceInfo, DraftId, LatLon, Report, ReportId, UserId};
use crate::wire::{ReportPage, SubmitReceipt};

pub use self::connectivity::HttpConnectivityProbe;
pub use self::http::HttpReportApi;

/// Everything the remote authority needs to accept a new report.
#[derive(Clone, Debug)]
pub struct Submission {
    pub draft_id: DraftId,
    pub user_id: UserId,
    pub location: LatLon,
    pub description: String,
    pub device_info: Option<DeviceInfo>,
    pub image: Option<EncodedImage>,
}

#[async_trait]
pub trait ReportApi: Send + Sync {
    async fn list_reports(&self, user_id: UserId, page: u32, per_page: u32) -> Result<ReportPage, SyncError>;

    async fn get_report(&self, id: ReportId) -> Result<Report, SyncError>;

    async fn submit_report(&self, submission: &Submission) -> Result<SubmitReceipt, SyncError>;

    async fn delete_report(&self, id: ReportId) -> Result<(), SyncError>;
}

pub trait Session: Send + Sync {
    fn current_user(&self) -> Option<UserId>;

    fn access_token(&self) -> Option<SecretString>;
}

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Session whose credentials are fixed at construction.
#[derive(Clone, Default)]
pub struct StaticSession {
    user_id: Option<UserId>,
    token: Option<SecretString>,
}

impl StaticSession {
    pub fn new(user_id: UserId, token: SecretString) -> Self {
        Self {
            user_id: Some(user_id),
            token: Some(token),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl Session for StaticSession {
    fn current_user(&self) -> Option<UserId> {
        self.user_id
    }

    fn access_token(&self) -> Option<SecretString> {
        self.token.clone()
    }
}

impl std::fmt::Debug for StaticSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticSession")
            .field("user_id", &self.user_id)
            .field("token_present", &self.token.is_some())
            .finish()
    }
}
