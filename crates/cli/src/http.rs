//! Retry with exponential backoff for transient HTTP failures

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

/// Maximum retry attempts (on top of the first request)
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff between retries
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for a server-requested `Retry-After`
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRY_ATTEMPTS,
            base_delay: RETRY_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs = headers.get(RETRY_AFTER)?.to_str().ok()?.parse::<u64>().ok()?;
    Some(Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

/// Send a request, retrying network errors, timeouts, 5xx and 429 responses.
///
/// Once retries are exhausted the last response is returned as-is (even when
/// it is a 5xx) so callers keep their own status handling; transport errors
/// are classified with [`Error::from_transport`].
pub async fn send_with_retry(
    request: RequestBuilder,
    url: &str,
    policy: &RetryPolicy,
) -> Result<Response> {
    let mut attempt = 0;
    loop {
        let builder = request
            .try_clone()
            .ok_or_else(|| Error::Config(format!("request to {url} cannot be retried")))?;

        let outcome = builder.send().await;
        let server_delay = match &outcome {
            Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                Some(parse_retry_after(resp.headers()))
            }
            Ok(resp) if resp.status().is_server_error() => Some(None),
            Ok(_) => None,
            Err(_) => Some(None),
        };

        let Some(server_delay) = server_delay else {
            return outcome.map_err(|e| Error::from_transport(url, e));
        };
        if attempt >= policy.max_retries {
            return outcome.map_err(|e| Error::from_transport(url, e));
        }

        let delay = server_delay.unwrap_or_else(|| policy.backoff(attempt));
        debug!(
            "retrying {} (attempt {}, delay {}ms)",
            url,
            attempt + 1,
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
