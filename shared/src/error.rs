use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::image_processing::ImageProcessingError;
use crate::model::ReportId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Authentication,
    Connectivity,
    Remote,
    Parse,
    Encoding,
    NotFound,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Authentication => "AUTH_REQUIRED",
            Self::Connectivity => "CONNECTIVITY_REQUIRED",
            Self::Remote => "REMOTE_ERROR",
            Self::Parse => "PARSE_ERROR",
            Self::Encoding => "ENCODING_ERROR",
            Self::NotFound => "NOT_FOUND",
        }
    }

    /// Whether the next natural trigger (refresh, tap, tick) may succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Connectivity | Self::Remote)
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("authentication required")]
    AuthenticationRequired,

    #[error("network connectivity required")]
    ConnectivityRequired,

    #[error("{message}")]
    Remote { message: String },

    #[error("unexpected payload: {reason}")]
    Parse { reason: String },

    #[error("image encoding failed: {0}")]
    Encoding(#[from] ImageProcessingError),

    #[error("report {id} not found")]
    NotFound { id: ReportId },
}

impl SyncError {
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthenticationRequired => ErrorKind::Authentication,
            Self::ConnectivityRequired => ErrorKind::Connectivity,
            Self::Remote { .. } => ErrorKind::Remote,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Encoding(_) => ErrorKind::Encoding,
            Self::NotFound { .. } => ErrorKind::NotFound,
        }
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind().code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Message shown next to the error flag. Remote messages pass through verbatim.
    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self {
            Self::AuthenticationRequired => "Please sign in to continue.".into(),
            Self::ConnectivityRequired => {
                "No internet connection. Please connect and try again.".into()
            }
            Self::Remote { message } => message.clone(),
            Self::Parse { .. } => {
                "The server sent an unexpected response. Please try again later.".into()
            }
            Self::Encoding(_) => "Unable to process the photo. Please try another one.".into(),
            Self::NotFound { .. } => "The report could not be found.".into(),
        }
    }

    /// Maps a non-2xx response onto the taxonomy, preferring the body's own message.
    #[must_use]
    pub fn from_http_status(status: u16, body: Option<&[u8]>, id: Option<ReportId>) -> Self {
        let message = body
            .and_then(|b| serde_json::from_slice::<ApiErrorResponse>(b).ok())
            .and_then(|e| e.message.filter(|m| !m.trim().is_empty()))
            .unwrap_or_else(|| format!("HTTP error: {status}"));

        match (status, id) {
            (401 | 403, _) => Self::AuthenticationRequired,
            (404, Some(id)) => Self::NotFound { id },
            _ => Self::Remote { message },
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::parse(e.to_string())
        } else {
            Self::remote(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    details: Option<HashMap<String, String>>,
}

pub type SyncResult<T> = Result<T, SyncError>;
