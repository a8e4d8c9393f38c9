//! JSON payloads exchanged with the report API.
//!
//! Decoding is permissive where the server is known to be inconsistent. Each
//! permissive field goes through an ordered fallback chain:
//!
//! - `report_date`: RFC 3339, then RFC 2822/1123, then `YYYY-MM-DD HH:MM:SS`,
//!   then `YYYY-MM-DDTHH:MM:SS[.fff]` without offset (both read as UTC), else now.
//! - `device_info`: JSON object, then a string holding a JSON object, else absent.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::SyncError;
use crate::model::{DeviceInfo, ImageRef, LatLon, Report, ReportId, ReportStatus, UserId};

const NAIVE_DATE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];
const MAX_SEVERITY: f32 = 10.0;

#[derive(Debug, Clone, Deserialize)]
pub struct ReportWire {
    pub report_id: i64,
    pub user_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub waste_type: Option<String>,
    #[serde(default)]
    pub severity_score: Option<f64>,
    #[serde(default)]
    pub priority_level: Option<String>,
    #[serde(default)]
    pub report_date: Option<String>,
    #[serde(default)]
    pub address_text: Option<String>,
    #[serde(default)]
    pub device_info: Option<Value>,
    #[serde(default)]
    pub full_description: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PaginationWire {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub total_pages: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListReportsResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub reports: Vec<ReportWire>,
    #[serde(default)]
    pub pagination: Option<PaginationWire>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GetReportResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub report: Option<ReportWire>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitReportResponse {
    pub status: String,
    #[serde(default)]
    pub report_id: Option<i64>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteReportResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// One decoded page of the caller's reports.
#[derive(Debug, Clone)]
pub struct ReportPage {
    pub reports: Vec<Report>,
    pub total: u64,
    pub total_pages: u32,
}

/// What the remote authority hands back for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub report_id: ReportId,
    pub image_url: Option<String>,
}

pub fn parse_report_date(raw: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return now;
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return dt.with_timezone(&Utc);
    }
    for format in NAIVE_DATE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return naive.and_utc();
        }
    }

    warn!(raw, "unparsable report_date, using current time");
    now
}

pub fn parse_device_info(raw: Option<Value>) -> Option<DeviceInfo> {
    match raw? {
        Value::Null => None,
        Value::Object(map) => Some(map.into_iter().collect()),
        Value::String(encoded) if encoded.trim().is_empty() => None,
        Value::String(encoded) => match serde_json::from_str::<Value>(&encoded) {
            Ok(Value::Object(map)) => Some(map.into_iter().collect()),
            Ok(_) => {
                warn!("device_info string did not decode to an object");
                None
            }
            Err(e) => {
                warn!(error = %e, "device_info string is not valid JSON");
                None
            }
        },
        _ => {
            warn!("device_info has unexpected shape");
            None
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl ReportWire {
    pub fn into_report(self, now: DateTime<Utc>) -> Result<Report, SyncError> {
        let location = LatLon::new(self.latitude, self.longitude).ok_or_else(|| {
            SyncError::parse(format!(
                "report {} has invalid coordinates {}, {}",
                self.report_id, self.latitude, self.longitude
            ))
        })?;

        let status = match self.status.as_deref() {
            None => ReportStatus::Submitted,
            Some(raw) => ReportStatus::from_str(raw).ok_or_else(|| {
                SyncError::parse(format!("report {} has unknown status '{raw}'", self.report_id))
            })?,
        };

        let image_ref = non_empty(self.image_url).map(|url| ImageRef::Remote { url });
        let upload_complete = image_ref.is_some();

        Ok(Report {
            id: Some(ReportId(self.report_id)),
            owner_id: UserId(self.user_id),
            location,
            description: self.description.unwrap_or_default(),
            image_ref,
            status,
            waste_type: non_empty(self.waste_type),
            severity_score: self
                .severity_score
                .filter(|s| s.is_finite())
                .map(|s| (s as f32).clamp(0.0, MAX_SEVERITY)),
            priority_level: non_empty(self.priority_level),
            full_description: non_empty(self.full_description),
            created_at: parse_report_date(self.report_date.as_deref(), now),
            location_name: non_empty(self.address_text),
            device_info: parse_device_info(self.device_info),
            upload_complete,
        })
    }
}

impl ListReportsResponse {
    pub fn into_page(self, now: DateTime<Utc>) -> Result<ReportPage, SyncError> {
        if !self.success {
            return Err(SyncError::remote(
                self.message.unwrap_or_else(|| "Failed to load reports".into()),
            ));
        }
        let pagination = self.pagination.unwrap_or_default();
        let reports = self
            .reports
            .into_iter()
            .map(|r| r.into_report(now))
            .collect::<Result<Vec<_>, _>>()?;
        // A missing pagination block still has to cover what was returned.
        let total = pagination.total.max(reports.len() as u64);
        Ok(ReportPage {
            reports,
            total,
            total_pages: pagination.total_pages,
        })
    }
}

impl GetReportResponse {
    pub fn into_report(self, id: ReportId, now: DateTime<Utc>) -> Result<Report, SyncError> {
        if !self.success {
            return Err(SyncError::remote(
                self.message.unwrap_or_else(|| format!("Failed to load report {id}")),
            ));
        }
        self.report
            .ok_or(SyncError::NotFound { id })?
            .into_report(now)
    }
}

impl SubmitReportResponse {
    pub fn into_receipt(self) -> Result<SubmitReceipt, SyncError> {
        if !self.status.eq_ignore_ascii_case("success") {
            return Err(SyncError::remote(
                self.message.unwrap_or_else(|| "Report submission failed".into()),
            ));
        }
        let report_id = self
            .report_id
            .ok_or_else(|| SyncError::parse("submission accepted without report_id"))?;
        Ok(SubmitReceipt {
            report_id: ReportId(report_id),
            image_url: non_empty(self.image_url),
        })
    }
}

impl DeleteReportResponse {
    pub fn into_result(self) -> Result<(), SyncError> {
        if self.success {
            Ok(())
        } else {
            Err(SyncError::remote(
                self.message.unwrap_or_else(|| "Failed to delete report".into()),
            ))
        }
    }
}
