use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Remote-assigned report identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReportId(pub i64);

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-side identifier of a draft that has not been confirmed yet.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DraftId(Uuid);

impl DraftId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for DraftId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validated lat/lon
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        if !lat.is_finite() || !lon.is_finite() { return None; }
        if !(-90.0..=90.0).contains(&lat) { return None; }
        if !(-180.0..=180.0).contains(&lon) { return None; }
        Some(Self { lat, lon })
    }
}

impl fmt::Display for LatLon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.lat, self.lon)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Submitted,
    Analyzing,
    Analyzed,
    Resolved,
    Rejected,
}

impl ReportStatus {
    pub const ALL: [Self; 5] = [
        Self::Submitted,
        Self::Analyzing,
        Self::Analyzed,
        Self::Resolved,
        Self::Rejected,
    ];

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "submitted" | "pending" | "new" => Some(Self::Submitted),
            "analyzing" | "analysing" | "processing" | "in_analysis" => Some(Self::Analyzing),
            "analyzed" | "analysed" => Some(Self::Analyzed),
            "resolved" | "completed" | "done" | "cleaned" => Some(Self::Resolved),
            "rejected" | "declined" | "invalid" => Some(Self::Rejected),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Analyzing => "analyzing",
            Self::Analyzed => "analyzed",
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Submitted => "Submitted",
            Self::Analyzing => "Analyzing",
            Self::Analyzed => "Analyzed",
            Self::Resolved => "Resolved",
            Self::Rejected => "Rejected",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Rejected)
    }

    /// Statuses that polling keeps watching.
    #[must_use]
    pub const fn is_in_progress(self) -> bool {
        matches!(self, Self::Submitted | Self::Analyzing)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Where the report photo lives: confirmed on the remote side, or still local.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageRef {
    Remote {
        url: String,
    },
    Pending {
        #[serde(with = "serde_bytes")]
        bytes: Vec<u8>,
    },
    LocalPath {
        path: PathBuf,
    },
}

impl ImageRef {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Remote { url } => url.trim().is_empty(),
            Self::Pending { bytes } => bytes.is_empty(),
            Self::LocalPath { path } => path.as_os_str().is_empty(),
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        !matches!(self, Self::Remote { .. })
    }

    #[must_use]
    pub fn remote_url(&self) -> Option<&str> {
        match self {
            Self::Remote { url } => Some(url),
            _ => None,
        }
    }
}

// Keep image bytes out of logs.
impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote { url } => f.debug_struct("Remote").field("url", url).finish(),
            Self::Pending { bytes } => f
                .debug_struct("Pending")
                .field("len", &bytes.len())
                .finish(),
            Self::LocalPath { path } => f.debug_struct("LocalPath").field("path", path).finish(),
        }
    }
}

pub type DeviceInfo = BTreeMap<String, serde_json::Value>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: Option<ReportId>,
    pub owner_id: UserId,
    pub location: LatLon,
    pub description: String,
    pub image_ref: Option<ImageRef>,
    pub status: ReportStatus,
    pub waste_type: Option<String>,
    pub severity_score: Option<f32>,
    pub priority_level: Option<String>,
    /// Analysis summary produced remotely.
    pub full_description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub location_name: Option<String>,
    pub device_info: Option<DeviceInfo>,
    pub upload_complete: bool,
}

/// Fields polling is allowed to change on a confirmed report.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReportPatch {
    pub status: Option<ReportStatus>,
    pub waste_type: Option<String>,
    pub severity_score: Option<f32>,
    pub priority_level: Option<String>,
    pub full_description: Option<String>,
    pub image_ref: Option<ImageRef>,
}

impl ReportPatch {
    /// Patch carrying the status and classification of a freshly fetched report.
    #[must_use]
    pub fn from_remote(report: &Report) -> Self {
        Self {
            status: Some(report.status),
            waste_type: report.waste_type.clone(),
            severity_score: report.severity_score,
            priority_level: report.priority_level.clone(),
            full_description: report.full_description.clone(),
            image_ref: report.image_ref.clone(),
        }
    }
}

/// A captured observation before the remote authority has seen it.
#[derive(Clone, Debug)]
pub struct ReportDraft {
    pub draft_id: DraftId,
    pub location: LatLon,
    pub description: String,
    pub location_name: Option<String>,
    pub device_info: Option<DeviceInfo>,
}

impl ReportDraft {
    pub fn new(location: LatLon, description: impl Into<String>) -> Self {
        Self {
            draft_id: DraftId::generate(),
            location,
            description: description.into(),
            location_name: None,
            device_info: None,
        }
    }

    #[must_use]
    pub fn with_location_name(mut self, name: impl Into<String>) -> Self {
        self.location_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_device_info(mut self, info: DeviceInfo) -> Self {
        self.device_info = Some(info);
        self
    }

    /// Description sent upstream; empty input is replaced by a location-based fallback.
    #[must_use]
    pub fn effective_description(&self) -> String {
        let trimmed = self.description.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
        match self.location_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => format!("Waste report from {name}"),
            _ => format!("Waste report from {}", self.location),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lat_lon_rejects_out_of_range() {
        assert!(LatLon::new(91.0, 0.0).is_none());
        assert!(LatLon::new(0.0, -181.0).is_none());
        assert!(LatLon::new(f64::NAN, 0.0).is_none());
        assert!(LatLon::new(-8.556856, 125.560314).is_some());
    }

    #[test]
    fn status_aliases_parse() {
        assert_eq!(ReportStatus::from_str("Pending"), Some(ReportStatus::Submitted));
        assert_eq!(ReportStatus::from_str("in-analysis"), Some(ReportStatus::Analyzing));
        assert_eq!(ReportStatus::from_str("COMPLETED"), Some(ReportStatus::Resolved));
        assert_eq!(ReportStatus::from_str("teleported"), None);
    }

    #[test]
    fn only_resolved_and_rejected_are_terminal() {
        let terminal: Vec<_> = ReportStatus::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(terminal, vec![ReportStatus::Resolved, ReportStatus::Rejected]);
        assert!(!ReportStatus::Analyzed.is_in_progress());
    }

    #[test]
    fn empty_description_falls_back_to_location_name() {
        let loc = LatLon::new(-8.556856, 125.560314).unwrap();
        let draft = ReportDraft::new(loc, "  ").with_location_name("Dili");
        assert_eq!(draft.effective_description(), "Waste report from Dili");
    }

    #[test]
    fn empty_description_without_name_uses_coordinates() {
        let loc = LatLon::new(-8.556856, 125.560314).unwrap();
        let draft = ReportDraft::new(loc, "");
        assert_eq!(
            draft.effective_description(),
            "Waste report from -8.556856, 125.560314"
        );
    }

    #[test]
    fn pending_image_debug_hides_bytes() {
        let image = ImageRef::Pending { bytes: vec![1, 2, 3] };
        assert_eq!(format!("{image:?}"), "Pending { len: 3 }");
        assert!(image.is_pending());
    }
}
