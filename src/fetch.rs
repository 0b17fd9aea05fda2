use crate::config::Config;
use anyhow::Result;
use bytes::Bytes;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{0}")]
    Provider(String),
}

impl FetchError {
    pub fn status(status: reqwest::StatusCode, body: String) -> Self {
        FetchError::Status {
            status: status.as_u16(),
            body,
        }
    }
}

/// Retry envelope for upstream calls: capped attempts with linear backoff
/// plus jitter on 429/5xx responses. Transport errors are not retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Default envelope for plain HTTP calls.
    pub const fn http() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(400),
            jitter: Duration::from_millis(300),
        }
    }

    fn backoff<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rng.gen_range(0..=jitter_ms)
        };
        self.backoff_base * attempt + Duration::from_millis(jitter)
    }
}

pub fn is_retryable(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

/// Shared outbound HTTP collaborator. One client per process; every request
/// carries the gateway User-Agent unless the caller supplies its own.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    user_agent: String,
}

impl Fetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .build()?;
        Ok(Fetcher {
            client,
            user_agent: config.user_agent.clone(),
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// GET a JSON document, retrying per policy on 429/5xx.
    pub async fn get_json(
        &self,
        url: &Url,
        headers: &[(String, String)],
        policy: &RetryPolicy,
    ) -> Result<serde_json::Value, FetchError> {
        let header_map = self.header_map(headers);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = self
                .client
                .get(url.clone())
                .headers(header_map.clone())
                .send()
                .await?;
            let status = response.status();
            if status.is_success() {
                return Ok(response.json().await?);
            }
            if is_retryable(status) && attempt < policy.max_attempts {
                let delay = {
                    let mut rng = rand::thread_rng();
                    policy.backoff(attempt, &mut rng)
                };
                debug!(%url, status = status.as_u16(), attempt, "retrying upstream call");
                tokio::time::sleep(delay).await;
                continue;
            }
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::status(status, body));
        }
    }

    /// GET raw bytes (image payloads); single attempt.
    pub async fn get_bytes(
        &self,
        url: &Url,
        headers: &[(String, String)],
    ) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .headers(self.header_map(headers))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::status(status, body));
        }
        Ok(response.bytes().await?)
    }

    fn header_map(&self, headers: &[(String, String)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            let Ok(value) = HeaderValue::from_str(value) else {
                continue;
            };
            map.insert(name, value);
        }
        if !map.contains_key(reqwest::header::USER_AGENT) {
            if let Ok(value) = HeaderValue::from_str(&self.user_agent) {
                map.insert(reqwest::header::USER_AGENT, value);
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn backoff_grows_with_attempts_within_jitter_bounds() {
        let policy = RetryPolicy::http();
        let mut rng = StdRng::seed_from_u64(11);
        for attempt in 1..=2u32 {
            let delay = policy.backoff(attempt, &mut rng);
            let floor = policy.backoff_base * attempt;
            assert!(delay >= floor);
            assert!(delay <= floor + policy.jitter);
        }
    }

    #[test]
    fn default_policy_matches_documented_attempts() {
        assert_eq!(RetryPolicy::http().max_attempts, 3);
    }

    #[test]
    fn retryable_statuses_are_429_and_5xx() {
        assert!(is_retryable(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(reqwest::StatusCode::BAD_GATEWAY));
        assert!(is_retryable(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_retryable(reqwest::StatusCode::NOT_FOUND));
        assert!(!is_retryable(reqwest::StatusCode::FORBIDDEN));
    }
}
