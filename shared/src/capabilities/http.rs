use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use super::{ReportApi, Session, Submission};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::model::{Report, ReportId, UserId};
use crate::wire::{
    DeleteReportResponse, GetReportResponse, ListReportsResponse, ReportPage, SubmitReceipt,
    SubmitReportResponse,
};

pub const MAX_RESPONSE_BODY_SIZE: usize = 16 * 1024 * 1024;
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
const USER_AGENT: &str = concat!("report-sync/", env!("CARGO_PKG_VERSION"));
const REPORTS_PATH: &str = "reports";

/// `ReportApi` over the JSON/multipart HTTP interface.
pub struct HttpReportApi {
    client: Client,
    base_url: Url,
    session: Arc<dyn Session>,
}

impl HttpReportApi {
    pub fn new(config: &SyncConfig, session: Arc<dyn Session>) -> Result<Self, SyncError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_base_url.clone(),
            session,
        })
    }

    fn collection_url(&self) -> Result<Url, SyncError> {
        self.base_url
            .join(REPORTS_PATH)
            .map_err(|e| SyncError::remote(format!("invalid reports endpoint: {e}")))
    }

    fn report_url(&self, id: ReportId) -> Result<Url, SyncError> {
        self.base_url
            .join(&format!("{REPORTS_PATH}/{id}"))
            .map_err(|e| SyncError::remote(format!("invalid report endpoint: {e}")))
    }

    fn list_url(&self, user_id: UserId, page: u32, per_page: u32) -> Result<Url, SyncError> {
        let mut url = self.collection_url()?;
        url.query_pairs_mut()
            .append_pair("user_id", &user_id.to_string())
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &per_page.to_string());
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.session.access_token() {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    fn submission_form(submission: &Submission) -> Result<Form, SyncError> {
        let mut form = Form::new()
            .text("user_id", submission.user_id.to_string())
            .text("latitude", submission.location.lat.to_string())
            .text("longitude", submission.location.lon.to_string())
            .text("description", submission.description.clone());

        if let Some(info) = &submission.device_info {
            let encoded = serde_json::to_string(info)
                .map_err(|e| SyncError::parse(format!("device_info: {e}")))?;
            form = form.text("device_info", encoded);
        }

        if let Some(image) = &submission.image {
            let digest = image.digest();
            let part = Part::bytes(image.bytes().to_vec())
                .file_name(format!("report-{}.jpg", &digest[..16]))
                .mime_str("image/jpeg")?;
            form = form.part("image", part);
        }

        Ok(form)
    }
}

fn too_large(len: u64, limit: usize) -> SyncError {
    SyncError::remote(format!("response too large: {len} bytes, max {limit}"))
}

/// Buffers the body, refusing to hold more than `limit` bytes.
async fn read_capped_body(mut response: Response, limit: usize) -> Result<Vec<u8>, SyncError> {
    if let Some(declared) = response.content_length() {
        if declared > limit as u64 {
            return Err(too_large(declared, limit));
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Err(too_large((body.len() + chunk.len()) as u64, limit));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

async fn read_json<T: DeserializeOwned>(response: Response, id: Option<ReportId>) -> Result<T, SyncError> {
    let status = response.status();
    let body = read_capped_body(response, MAX_RESPONSE_BODY_SIZE).await?;

    if !status.is_success() {
        return Err(SyncError::from_http_status(status.as_u16(), Some(body.as_slice()), id));
    }

    serde_json::from_slice(&body).map_err(|e| SyncError::parse(e.to_string()))
}

#[async_trait]
impl ReportApi for HttpReportApi {
    #[instrument(skip(self))]
    async fn list_reports(&self, user_id: UserId, page: u32, per_page: u32) -> Result<ReportPage, SyncError> {
        let url = self.list_url(user_id, page, per_page)?;
        let response = self.authorize(self.client.get(url)).send().await?;
        let envelope: ListReportsResponse = read_json(response, None).await?;
        let page = envelope.into_page(Utc::now())?;
        debug!(count = page.reports.len(), total = page.total, "listed reports");
        Ok(page)
    }

    #[instrument(skip(self))]
    async fn get_report(&self, id: ReportId) -> Result<Report, SyncError> {
        let url = self.report_url(id)?;
        let response = self.authorize(self.client.get(url)).send().await?;
        let envelope: GetReportResponse = read_json(response, Some(id)).await?;
        envelope.into_report(id, Utc::now())
    }

    #[instrument(skip(self, submission), fields(draft_id = %submission.draft_id))]
    async fn submit_report(&self, submission: &Submission) -> Result<SubmitReceipt, SyncError> {
        let url = self.collection_url()?;
        let form = Self::submission_form(submission)?;
        let request = self
            .client
            .post(url)
            .header(IDEMPOTENCY_HEADER, submission.draft_id.to_string())
            .multipart(form);
        let response = self.authorize(request).send().await?;
        let envelope: SubmitReportResponse = read_json(response, None).await?;
        envelope.into_receipt()
    }

    #[instrument(skip(self))]
    async fn delete_report(&self, id: ReportId) -> Result<(), SyncError> {
        let url = self.report_url(id)?;
        let response = self.authorize(self.client.delete(url)).send().await?;
        let envelope: DeleteReportResponse = read_json(response, Some(id)).await?;
        envelope.into_result()
    }
}
