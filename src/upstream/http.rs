//! Shared HTTP plumbing for upstream clients: request pacing, bounded retry
//! with exponential backoff, and per-request tracing.

use super::errors::UpstreamError;
use super::json;
use crate::utils::fmt_duration;
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use http::Extensions;
use rand::Rng;
use reqwest::{Request, Response, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Backoff schedule for transient upstream failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based), without jitter.
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Logs every upstream request with status and latency.
struct TracingMiddleware {
    upstream: &'static str,
}

#[async_trait]
impl Middleware for TracingMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let url = req.url().clone();
        let start = Instant::now();
        let result = next.run(req, extensions).await;
        let duration = fmt_duration(start.elapsed());
        match &result {
            Ok(resp) => trace!(
                upstream = self.upstream,
                url = %url,
                status = resp.status().as_u16(),
                duration,
                "Upstream request completed"
            ),
            Err(e) => debug!(
                upstream = self.upstream,
                url = %url,
                duration,
                error = %e,
                "Upstream request errored"
            ),
        }
        result
    }
}

/// Paced, retrying JSON client for one upstream service.
pub struct UpstreamClient {
    name: &'static str,
    http: ClientWithMiddleware,
    limiter: DefaultDirectRateLimiter,
    retry: RetryPolicy,
}

impl UpstreamClient {
    pub fn new(
        name: &'static str,
        requests_per_second: u32,
        retry: RetryPolicy,
    ) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("marketstats/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let http = ClientBuilder::new(client)
            .with(TracingMiddleware { upstream: name })
            .build();
        let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
        Ok(Self {
            name,
            http,
            limiter: RateLimiter::direct(quota),
            retry,
        })
    }

    /// GET `url` and decode the JSON body.
    ///
    /// Connection errors, timeouts, 429 and 5xx responses are retried with
    /// backoff. Any other non-success status fails immediately.
    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, UpstreamError> {
        let attempts = self.retry.max_retries.saturating_add(1);
        let mut last_error = anyhow::anyhow!("no attempt made");

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.jittered(self.retry.delay(attempt - 1));
                debug!(
                    upstream = self.name,
                    url = %url,
                    attempt,
                    delay = fmt_duration(delay),
                    "Retrying upstream request"
                );
                tokio::time::sleep(delay).await;
            }
            self.limiter.until_ready().await;

            let response = match self.http.get(url.clone()).send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = anyhow::Error::new(e);
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let body = response.text().await.map_err(|e| UpstreamError::ParseFailed {
                    status: status.as_u16(),
                    url: url.to_string(),
                    source: e.into(),
                })?;
                return json::decode(&body).map_err(|source| UpstreamError::ParseFailed {
                    status: status.as_u16(),
                    url: url.to_string(),
                    source,
                });
            }
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                last_error = anyhow::anyhow!("upstream responded with {status}");
                continue;
            }
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        warn!(
            upstream = self.name,
            url = %url,
            attempts,
            error = %last_error,
            "Upstream request failed after all retries"
        );
        Err(UpstreamError::RetriesExhausted {
            url: url.to_string(),
            attempts,
            source: last_error,
        })
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let max_jitter = u64::try_from(self.retry.base_delay.as_millis()).unwrap_or(u64::MAX);
        let jitter = rand::rng().random_range(0..=max_jitter);
        delay + Duration::from_millis(jitter)
    }
}

/// Parse a configured base URL, ensuring it ends with `/` so `join` appends.
pub fn base_url(raw: &str) -> Result<Url, url::ParseError> {
    if raw.ends_with('/') {
        Url::parse(raw)
    } else {
        Url::parse(&format!("{raw}/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(300));
        assert_eq!(policy.delay(1), Duration::from_millis(600));
        assert_eq!(policy.delay(2), Duration::from_secs(1));
        assert_eq!(policy.delay(40), Duration::from_secs(1));
    }

    #[test]
    fn base_url_gains_trailing_slash() {
        let url = base_url("https://universalis.app/api/v2").unwrap();
        assert_eq!(
            url.join("Gaia/5").unwrap().as_str(),
            "https://universalis.app/api/v2/Gaia/5"
        );
    }
}
