use crate::types::{FeedError, FetchConfig, FetchResult, Result};
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

/// Minimum spacing between requests to the same host.
const MIN_HOST_INTERVAL: Duration = Duration::from_secs(1);

pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    rate_limiter: Mutex<HashMap<String, Instant>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            config,
            rate_limiter: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetches a feed document, retrying with exponential backoff. Every failure mode
    /// ends as `SourceUnavailable`.
    pub async fn fetch_feed(&self, url: &str) -> Result<FetchResult> {
        let start_time = Instant::now();
        debug!("Fetching feed: {}", url);

        self.apply_rate_limit(url)
            .await
            .map_err(|e| FeedError::source_unavailable(url, e))?;

        let retry_delay = Duration::from_secs(self.config.retry_delay_seconds);
        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: retry_delay,
            initial_interval: retry_delay,
            max_interval: retry_delay * 32,
            multiplier: 2.0,
            max_elapsed_time: Some(retry_delay * 60),
            ..Default::default()
        };

        let mut last_error = String::from("no attempt made");

        for attempt in 0..=self.config.max_retries {
            match self.fetch_once(url).await {
                Ok((status, content)) => {
                    let response_time_ms = start_time.elapsed().as_millis() as u64;
                    info!("Successfully fetched feed: {} ({} bytes)", url, content.len());
                    return Ok(FetchResult {
                        url: url.to_string(),
                        http_status: status.as_u16(),
                        response_time_ms,
                        content,
                    });
                }
                Err(Attempt::Fatal(reason)) => {
                    last_error = reason;
                    break;
                }
                Err(Attempt::Retryable(reason)) => {
                    last_error = reason;
                    if attempt < self.config.max_retries {
                        if let Some(delay) = backoff.next_backoff() {
                            warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                    break;
                }
            }
        }

        warn!("Giving up on {}: {}", url, last_error);
        Err(FeedError::source_unavailable(url, last_error))
    }

    async fn fetch_once(&self, url: &str) -> std::result::Result<(StatusCode, String), Attempt> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Attempt::Retryable(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            return Err(Attempt::Fatal(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(Attempt::Retryable(format!("HTTP {}", status)));
        }

        let limit = self.config.max_feed_size_mb * 1024 * 1024;
        if let Some(content_length) = response.content_length() {
            if content_length as usize > limit {
                return Err(Attempt::Fatal(format!(
                    "Feed too large: {}MB",
                    content_length as usize / (1024 * 1024)
                )));
            }
        }

        let content = response
            .text()
            .await
            .map_err(|e| Attempt::Retryable(e.to_string()))?;
        if content.len() > limit {
            return Err(Attempt::Fatal(format!("Feed too large: {} bytes", content.len())));
        }
        Ok((status, content))
    }

    async fn apply_rate_limit(&self, url: &str) -> Result<()> {
        let parsed_url = Url::parse(url)?;
        let host = parsed_url.host_str().unwrap_or("").to_string();

        let wait_time = {
            let mut rate_limiter = self.rate_limiter.lock().await;
            let now = Instant::now();
            let next_slot = match rate_limiter.get(&host) {
                Some(last) if now.duration_since(*last) < MIN_HOST_INTERVAL => *last + MIN_HOST_INTERVAL,
                _ => now,
            };
            rate_limiter.insert(host.clone(), next_slot);
            next_slot.saturating_duration_since(now)
        };

        if !wait_time.is_zero() {
            debug!("Rate limiting {}: waiting {:?}", host, wait_time);
            tokio::time::sleep(wait_time).await;
        }
        Ok(())
    }
}

enum Attempt {
    Retryable(String),
    Fatal(String),
}
