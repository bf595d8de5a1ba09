//! HTTP trail source.
//!
//! Fetches GeoJSON datasets from a remote host with:
//! - A shared connection pool and a 30 s request timeout
//! - Retry with exponential backoff on transport errors, 429 and 5xx
//! - A synchronous [`TrailSource`] facade over an owned tokio runtime
//!
//! Dataset `name` resolves to `<base_url>/<name>.geojson` unless a per-dataset
//! URL was registered with [`HttpTrailSource::with_dataset_url`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use tokio::runtime::Runtime;

use crate::trails::TrailSource;
use crate::{Result, TrailMatchError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF_EXPONENT: u32 = 4;

/// Remote dataset source.
///
/// Synchronous only: [`TrailSource::fetch`] drives its own tokio runtime with
/// `block_on`, which panics when called from inside an async context. Call it
/// from plain threads (or `spawn_blocking`).
pub struct HttpTrailSource {
    client: Client,
    runtime: Runtime,
    base_url: Option<String>,
    dataset_urls: HashMap<String, String>,
    max_retries: u32,
    base_backoff: Duration,
}

impl HttpTrailSource {
    /// Source resolving every dataset under `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        let mut source = Self::without_base()?;
        source.base_url = Some(base_url.trim_end_matches('/').to_string());
        Ok(source)
    }

    /// Source with no base URL; every dataset needs its own URL.
    pub fn without_base() -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TrailMatchError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        let runtime = Runtime::new().map_err(|e| TrailMatchError::Config {
            message: format!("Failed to create tokio runtime: {}", e),
        })?;

        Ok(Self {
            client,
            runtime,
            base_url: None,
            dataset_urls: HashMap::new(),
            max_retries: MAX_RETRIES,
            base_backoff: BASE_BACKOFF,
        })
    }

    /// Override the URL of one dataset.
    pub fn with_dataset_url(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.dataset_urls.insert(name.into(), url.into());
        self
    }

    /// Change the retry policy. Backoff doubles on every attempt, up to 16x the
    /// base delay.
    pub fn with_retries(mut self, max_retries: u32, base_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_backoff = base_backoff;
        self
    }

    /// URL the dataset `name` is fetched from.
    pub fn url_for(&self, name: &str) -> Result<String> {
        if let Some(url) = self.dataset_urls.get(name) {
            return Ok(url.clone());
        }
        match &self.base_url {
            Some(base) => Ok(format!("{}/{}.geojson", base, name)),
            None => Err(TrailMatchError::reference_load(name, "no URL configured")),
        }
    }

    /// Delay before retry number `retry` (1-based).
    fn backoff(&self, retry: u32) -> Duration {
        // Exponential backoff: 500ms, 1s, 2s, 4s, 8s, then flat
        let exponent = retry.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.base_backoff.saturating_mul(1 << exponent)
    }

    async fn fetch_with_retry(&self, name: &str, url: &str) -> Result<Vec<u8>> {
        let mut retries = 0;

        loop {
            let failure = match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status.is_success() {
                        let body = resp.bytes().await?;
                        return Ok(body.to_vec());
                    }

                    let error = TrailMatchError::Http {
                        message: format!("GET {} for dataset '{}'", url, name),
                        status_code: Some(status.as_u16()),
                    };
                    if status != StatusCode::TOO_MANY_REQUESTS && !status.is_server_error() {
                        return Err(error);
                    }
                    error
                }
                Err(e) => TrailMatchError::from(e),
            };

            retries += 1;
            if retries > self.max_retries {
                return Err(failure);
            }

            let backoff = self.backoff(retries);
            warn!(
                "[TrailFetcher] {} for '{}', retry {} after {:?}",
                failure, name, retries, backoff
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

impl TrailSource for HttpTrailSource {
    /// Blocking fetch. Must not be called from within a tokio runtime.
    fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        let url = self.url_for(name)?;
        debug!("[TrailFetcher] Fetching '{}' from {}", name, url);

        let start = Instant::now();
        let data = self.runtime.block_on(self.fetch_with_retry(name, &url))?;

        info!(
            "[TrailFetcher] Fetched '{}': {} bytes in {:.2}s",
            name,
            data.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(data)
    }
}
