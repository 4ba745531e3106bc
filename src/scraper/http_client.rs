use crate::config::ScraperConfig;
use crate::error::FetchError;
use anyhow::{Context, Result};
use rand::RngExt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Blocking-per-request page fetcher. Sleeps a randomized polite delay before
/// every request and reports failures without retrying — a failed item gets
/// picked up again on the next scheduled run.
pub struct HttpClient {
    inner: reqwest::Client,
    config: ScraperConfig,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            config: config.clone(),
        })
    }

    /// Fetch a URL as text. Non-200 statuses and transport errors are both
    /// surfaced as [`FetchError`], distinguishably.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let resp = self.request(url).await?;
        resp.text().await.map_err(|source| FetchError::Network {
            url: url.to_string(),
            source,
        })
    }

    /// Fetch a URL as raw bytes (photo downloads).
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let resp = self.request(url).await?;
        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|source| FetchError::Network {
                url: url.to_string(),
                source,
            })
    }

    async fn request(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        self.polite_delay().await;
        debug!("GET {}", url);

        let resp = self
            .inner
            .get(url)
            .header("Accept-Language", "pl-PL,pl;q=0.9")
            .header("Cache-Control", "no-cache")
            .send()
            .await
            .map_err(|source| FetchError::Network {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp)
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let jitter = rand::rng().random_range(0..=self.config.jitter_ms);
        let total = Duration::from_millis(self.config.request_delay_ms + jitter);
        sleep(total).await;
    }
}
