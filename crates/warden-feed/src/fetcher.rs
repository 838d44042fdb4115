//! EDL download and line-oriented parsing.

use std::net::IpAddr;
use std::time::Duration;

use ipnet::IpNet;
use tokio::sync::watch;
use tracing::{debug, warn};
use warden_matcher::{IpSet, IpSetBuilder};

use crate::error::{FeedError, FeedResult};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_BODY_LIMIT: usize = 1024;

/// Fetcher settings.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Feed URL to download.
    pub url: String,
    /// Attempts per [`Fetcher::fetch_with_retry`] call.
    pub max_retry_attempts: u32,
    /// Base delay between attempts; attempt `n` waits `n × retry_delay`.
    pub retry_delay: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_retry_attempts: 3,
            retry_delay: Duration::from_secs(30),
        }
    }
}

/// Downloads the EDL feed and parses it into an [`IpSet`].
#[derive(Debug)]
pub struct Fetcher {
    client: reqwest::Client,
    config: FetcherConfig,
}

impl Fetcher {
    /// Creates a fetcher with the download timeout applied.
    #[must_use]
    pub fn new(config: FetcherConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .pool_max_idle_per_host(2)
                .pool_idle_timeout(Duration::from_secs(30))
                .build()
                .expect("failed to build feed HTTP client"),
            config,
        }
    }

    /// One download-and-parse attempt.
    ///
    /// # Errors
    ///
    /// Transport failures and non-2xx statuses are returned as errors; the
    /// parse itself never fails (bad lines are skipped).
    pub async fn fetch(&self) -> FeedResult<(IpSet, i64)> {
        let response = self.client.get(&self.config.url).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = body.chars().take(ERROR_BODY_LIMIT).collect();
            return Err(FeedError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        Ok(parse_edl(&body))
    }

    /// Fetches with linear backoff, honouring shutdown.
    ///
    /// # Errors
    ///
    /// Surfaces the last attempt's error once retries are exhausted, or
    /// [`FeedError::Cancelled`] when shutdown fires mid-backoff.
    pub async fn fetch_with_retry(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> FeedResult<(IpSet, i64)> {
        let mut last_err = None;

        for attempt in 0..self.config.max_retry_attempts {
            if attempt > 0 {
                let delay = self.config.retry_delay * attempt;
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => return Err(FeedError::Cancelled),
                }
            }

            match self.fetch().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    debug!(
                        attempt = attempt + 1,
                        max_attempts = self.config.max_retry_attempts,
                        error = %err,
                        "EDL fetch attempt failed"
                    );
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or(FeedError::Cancelled))
    }
}

/// Parses a feed body: one address or CIDR per line, `#` comments and blank
/// lines skipped, unparseable lines skipped silently. Returns the set and
/// the number of accepted entries.
#[must_use]
pub fn parse_edl(body: &str) -> (IpSet, i64) {
    let mut builder = IpSetBuilder::new();
    let mut count = 0i64;

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Ok(prefix) = line.parse::<IpNet>() {
            builder.add_prefix(prefix);
            count += 1;
        } else if let Ok(addr) = line.parse::<IpAddr>() {
            builder.add_addr(addr);
            count += 1;
        }
    }

    if count == 0 {
        warn!("EDL is empty - no IP addresses found");
    }

    (builder.build(), count)
}
