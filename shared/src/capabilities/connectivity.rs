use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use super::ConnectivityProbe;
use crate::config::SyncConfig;
use crate::error::SyncError;

/// Reachability check: a HEAD against the API base URL. Any HTTP response,
/// whatever its status, counts as reachable.
pub struct HttpConnectivityProbe {
    client: Client,
    target: Url,
}

impl HttpConnectivityProbe {
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(config.connectivity_timeout)
            .build()?;
        Ok(Self {
            client,
            target: config.api_base_url.clone(),
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpConnectivityProbe {
    async fn is_reachable(&self) -> bool {
        match self.client.head(self.target.clone()).send().await {
            Ok(response) => {
                debug!(status = %response.status(), "connectivity probe answered");
                true
            }
            Err(e) => {
                debug!(error = %e, "connectivity probe failed");
                false
            }
        }
    }
}
