use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::core::config::Config;
use crate::utils::Metrics;

/// Network access to the product image host
#[async_trait]
pub trait ImageHost: Send + Sync {
    /// Existence check (headers only). Any failure means unreachable.
    async fn probe(&self, url: &str) -> bool;

    /// Download an image body. `None` on any failure or a non-image body.
    async fn fetch(&self, url: &str) -> Option<Vec<u8>>;
}

/// reqwest-backed image host
pub struct HttpImageHost {
    http_client: reqwest::Client,
    probe_timeout: Duration,
    fetch_timeout: Duration,
    metrics: Option<Metrics>,
}

impl HttpImageHost {
    pub fn new(config: &Config, metrics: Option<Metrics>) -> reqwest::Result<Self> {
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.io_pool_size())
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(config.probe_timeout())
            .user_agent(concat!("nutritious-cleanup/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http_client,
            probe_timeout: config.probe_timeout(),
            fetch_timeout: config.fetch_timeout(),
            metrics,
        })
    }

    async fn fetch_inner(&self, url: &str) -> Option<Vec<u8>> {
        let response = match self
            .http_client
            .get(url)
            .timeout(self.fetch_timeout)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                debug!("Fetch failed for {}: {}", url, e);
                return None;
            }
        };

        if !response.status().is_success() {
            debug!("Fetch of {} returned {}", url, response.status());
            return None;
        }

        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                debug!("Failed to read body of {}: {}", url, e);
                return None;
            }
        };

        if bytes.is_empty() {
            debug!("Fetch of {} returned an empty body", url);
            return None;
        }

        if image::guess_format(&bytes).is_err() {
            debug!("Body of {} is not a recognised image format", url);
            return None;
        }

        Some(bytes.to_vec())
    }
}

#[async_trait]
impl ImageHost for HttpImageHost {
    async fn probe(&self, url: &str) -> bool {
        let reachable = match self
            .http_client
            .head(url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Probe failed for {}: {}", url, e);
                false
            }
        };

        if let Some(ref m) = self.metrics {
            m.record_probe(reachable);
        }
        reachable
    }

    async fn fetch(&self, url: &str) -> Option<Vec<u8>> {
        let bytes = self.fetch_inner(url).await;
        if let Some(ref m) = self.metrics {
            m.record_fetch(bytes.is_some());
        }
        bytes
    }
}
