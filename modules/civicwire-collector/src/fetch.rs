use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use civicwire_common::CivicWireError;

use crate::traits::Fetcher;

/// Data fetches block up to this long per attempt.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Existence probes are cheap and give up fast.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Max attempts for transient transport failures (timeouts, connect errors,
/// 5xx). Actual delay is base * 2^attempt + jitter.
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(500);

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Production HTTP port: reqwest with fixed timeouts and jittered
/// exponential backoff on transient failures.
pub struct WebFetcher {
    http: reqwest::Client,
    probe_http: reqwest::Client,
}

impl WebFetcher {
    pub fn new() -> Result<Self, CivicWireError> {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| CivicWireError::Config(format!("Failed to build HTTP client: {e}")))?;
        let probe_http = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CivicWireError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, probe_http })
    }

    async fn get_with_retry(&self, url: &str) -> Result<reqwest::Response, CivicWireError> {
        for attempt in 0..MAX_ATTEMPTS {
            match self.http.get(url).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() && attempt + 1 < MAX_ATTEMPTS {
                        self.backoff(url, attempt, &format!("HTTP {status}")).await;
                        continue;
                    }
                    return Err(CivicWireError::Transport(format!("HTTP {status} for {url}")));
                }
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt + 1 < MAX_ATTEMPTS => {
                    self.backoff(url, attempt, &e.to_string()).await;
                }
                Err(e) => {
                    return Err(CivicWireError::Transport(format!(
                        "Request failed for {url}: {e}"
                    )));
                }
            }
        }
        Err(CivicWireError::Transport(format!(
            "Retries exhausted for {url}"
        )))
    }

    async fn backoff(&self, url: &str, attempt: u32, reason: &str) {
        let backoff = RETRY_BASE * 2u32.pow(attempt);
        let jitter = Duration::from_millis(rand::rng().random_range(0..250));
        warn!(
            url,
            attempt = attempt + 1,
            backoff_ms = backoff.as_millis() as u64,
            reason,
            "Transient fetch failure, retrying after backoff"
        );
        tokio::time::sleep(backoff + jitter).await;
    }
}

#[async_trait]
impl Fetcher for WebFetcher {
    async fn get_json(&self, url: &str) -> Result<serde_json::Value, CivicWireError> {
        let response = self.get_with_retry(url).await?;
        let body = response
            .text()
            .await
            .map_err(|e| CivicWireError::Transport(format!("Failed to read body of {url}: {e}")))?;
        serde_json::from_str(&body)
            .map_err(|e| CivicWireError::Parse(format!("Invalid JSON from {url}: {e}")))
    }

    async fn get_text(&self, url: &str) -> Result<String, CivicWireError> {
        let response = self.get_with_retry(url).await?;
        response
            .text()
            .await
            .map_err(|e| CivicWireError::Transport(format!("Failed to read body of {url}: {e}")))
    }

    async fn probe(&self, url: &str) -> Result<bool, CivicWireError> {
        debug!(url, "Probing");
        match self.probe_http.get(url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => Err(CivicWireError::Transport(format!(
                "Probe failed for {url}: {e}"
            ))),
        }
    }
}
