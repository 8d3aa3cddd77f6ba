//! Main-server duplicate-work probe.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use reelgrid_torrent_core::QueueCheck;

/// Asks the main node whether hashing a package would duplicate work.
#[async_trait]
pub trait QueueCheckClient: Send + Sync {
    /// Probe `/torrent-queue/check` for one package.
    async fn check(&self, package_id: Uuid) -> Result<QueueCheck>;
}

/// HTTP implementation used on client nodes in main-server mode.
pub struct HttpQueueCheck {
    base_url: String,
    http: reqwest::Client,
}

impl HttpQueueCheck {
    /// Build a probe against the main node's base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build queue check client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl QueueCheckClient for HttpQueueCheck {
    async fn check(&self, package_id: Uuid) -> Result<QueueCheck> {
        let url = format!(
            "{}/torrent-queue/check?package_id={package_id}",
            self.base_url
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("queue check request failed")?
            .error_for_status()
            .context("queue check returned an error status")?;
        response
            .json()
            .await
            .context("queue check response was not valid JSON")
    }
}
