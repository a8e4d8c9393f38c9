use std::env;
use std::time::Duration;

use url::Url;

pub const ENV_API_BASE_URL: &str = "REPORT_SYNC_API_BASE_URL";
pub const ENV_PER_PAGE: &str = "REPORT_SYNC_PER_PAGE";
pub const ENV_POLL_INTERVAL_MS: &str = "REPORT_SYNC_POLL_INTERVAL_MS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "REPORT_SYNC_REQUEST_TIMEOUT_MS";
pub const ENV_MAX_IMAGE_BYTES: &str = "REPORT_SYNC_MAX_IMAGE_BYTES";

const DEFAULT_API_BASE_URL: &str = "https://api.example.org/v1/";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Bounds and quality ladder for upload encoding.
#[derive(Clone, Debug)]
pub struct EncoderConfig {
    pub max_width: u32,
    pub max_height: u32,
    pub max_bytes: usize,
    /// Starting quality when the image is resized first.
    pub initial_quality: u8,
    /// Starting quality for the compression-only path.
    pub compress_quality: u8,
    pub quality_step: u8,
    pub floor_quality: u8,
    pub max_input_bytes: usize,
    pub max_dimension: u32,
    pub max_alloc_bytes: u64,
    pub max_concurrent_ops: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            max_width: 1024,
            max_height: 1024,
            max_bytes: 500 * 1024,
            initial_quality: 90,
            compress_quality: 80,
            quality_step: 10,
            floor_quality: 20,
            max_input_bytes: 50 * 1024 * 1024,
            max_dimension: 15_000,
            max_alloc_bytes: 512 * 1024 * 1024,
            max_concurrent_ops: 2,
        }
    }
}

impl EncoderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_width == 0 || self.max_height == 0 {
            return Err(ConfigError::Invalid {
                field: "max_width/max_height",
                reason: "bounding box must be non-zero".into(),
            });
        }
        if self.max_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "max_bytes",
                reason: "byte budget must be non-zero".into(),
            });
        }
        if self.quality_step == 0 {
            return Err(ConfigError::Invalid {
                field: "quality_step",
                reason: "must be at least 1".into(),
            });
        }
        for (field, quality) in [
            ("initial_quality", self.initial_quality),
            ("compress_quality", self.compress_quality),
        ] {
            if quality > 100 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{quality} exceeds 100"),
                });
            }
            if quality < self.floor_quality {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{quality} is below floor {}", self.floor_quality),
                });
            }
        }
        if self.max_concurrent_ops == 0 {
            return Err(ConfigError::Invalid {
                field: "max_concurrent_ops",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub api_base_url: Url,
    pub per_page: u32,
    pub poll_interval: Duration,
    pub poll_jitter_ms: u64,
    pub request_timeout: Duration,
    pub connectivity_timeout: Duration,
    pub encoder: EncoderConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: Url::parse(DEFAULT_API_BASE_URL)
                .unwrap_or_else(|_| unreachable!("default base url is valid")),
            per_page: 10,
            poll_interval: Duration::from_secs(5),
            poll_jitter_ms: 500,
            request_timeout: Duration::from_secs(30),
            connectivity_timeout: Duration::from_secs(3),
            encoder: EncoderConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_url = env::var(ENV_API_BASE_URL)
            .map_err(|_| ConfigError::MissingEnvVar(ENV_API_BASE_URL.to_string()))?;
        let api_base_url = parse_base_url(&raw_url)
            .map_err(|reason| ConfigError::InvalidEnvVar(ENV_API_BASE_URL.to_string(), reason))?;

        let mut config = Self {
            api_base_url,
            ..Self::default()
        };

        if let Some(per_page) = optional_env::<u32>(ENV_PER_PAGE)? {
            config.per_page = per_page;
        }
        if let Some(ms) = optional_env::<u64>(ENV_POLL_INTERVAL_MS)? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = optional_env::<u64>(ENV_REQUEST_TIMEOUT_MS)? {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(bytes) = optional_env::<usize>(ENV_MAX_IMAGE_BYTES)? {
            config.encoder.max_bytes = bytes;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.api_base_url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                field: "api_base_url",
                reason: format!("unsupported scheme '{}'", self.api_base_url.scheme()),
            });
        }
        if self.per_page == 0 {
            return Err(ConfigError::Invalid {
                field: "per_page",
                reason: "must be at least 1".into(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "poll_interval",
                reason: "must be non-zero".into(),
            });
        }
        self.encoder.validate()
    }
}

/// Base URLs always end with '/' so endpoint joins append instead of replacing.
pub fn parse_base_url(raw: &str) -> Result<Url, String> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    let url = Url::parse(&with_slash).map_err(|e| e.to_string())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".into());
    }
    Ok(url)
}

fn optional_env<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar(name.to_string(), e.to_string())),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(SyncConfig::default().validate().is_ok());
        assert!(EncoderConfig::default().validate().is_ok());
    }

    #[test]
    fn floor_above_initial_is_rejected() {
        let config = EncoderConfig {
            floor_quality: 95,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_step_is_rejected() {
        let config = EncoderConfig {
            quality_step: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn base_url_gains_trailing_slash() {
        let url = parse_base_url("https://reports.example.org/api").unwrap();
        assert_eq!(url.as_str(), "https://reports.example.org/api/");
        assert_eq!(
            url.join("reports").unwrap().as_str(),
            "https://reports.example.org/api/reports"
        );
    }

    #[test]
    fn base_url_rejects_other_schemes() {
        assert!(parse_base_url("ftp://reports.example.org").is_err());
        assert!(parse_base_url("not a url").is_err());
    }
}
