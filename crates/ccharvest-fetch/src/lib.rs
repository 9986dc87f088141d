//! Rate-respecting HTTP layer shared by the index client and record decoder.
//!
//! Two concurrency ceilings apply to every request: a global in-flight cap
//! and a per-host cap. Requests past either cap queue on the semaphores in
//! FIFO order. Each retry attempt re-acquires both permits, so retries never
//! bypass the limiter. Cancellation is tokio-native: dropping the returned
//! future aborts the in-flight request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, Instrument};
use url::Url;

pub const CRATE_NAME: &str = "ccharvest-fetch";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to each delay.
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            jitter: Duration::from_millis(200),
        }
    }
}

impl BackoffPolicy {
    /// Exponential delay for a zero-based attempt index, capped, no jitter.
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }

    fn delay_with_jitter(&self, attempt_index: usize) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.delay_for_attempt(attempt_index) + jitter
    }
}

#[derive(Debug, Clone)]
pub struct GovernorConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_host_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            global_concurrency: 16,
            per_host_concurrency: 4,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    /// `Content-Range` header, present on 206 responses.
    pub content_range: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport/timeout failure that survived every retry.
    #[error("request failed after retries: {0}")]
    Transport(#[from] reqwest::Error),
    /// Terminal (or retry-exhausted) non-success HTTP status.
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("not a fetchable url: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Page-level misses per the error taxonomy: retried-and-exhausted
    /// transient failures, as opposed to terminal 4xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(_) => true,
            FetchError::HttpStatus { status, .. } => {
                *status >= 500 || *status == 429
            }
            FetchError::InvalidUrl(_) => false,
        }
    }
}

/// The fetch governor. Cheap to clone via `Arc`.
#[derive(Debug)]
pub struct FetchGovernor {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_host_limit: usize,
    per_host: Mutex<HashMap<String, Arc<Semaphore>>>,
    backoff: BackoffPolicy,
}

impl FetchGovernor {
    pub fn new(config: GovernorConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_host_limit: config.per_host_concurrency.max(1),
            per_host: Mutex::new(HashMap::new()),
            backoff: config.backoff,
        })
    }

    async fn host_semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut map = self.per_host.lock().await;
        map.entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
            .clone()
    }

    /// GET a URL with retries and backoff. Succeeds on any 2xx.
    pub async fn fetch(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        self.fetch_with_range(url, None).await
    }

    /// GET a byte range (`Range: bytes=offset..offset+length-1`). The caller
    /// is responsible for checking that the response is a 206 with a
    /// matching `Content-Range`.
    pub async fn fetch_range(
        &self,
        url: &str,
        offset: u64,
        length: u64,
    ) -> Result<FetchedResponse, FetchError> {
        self.fetch_with_range(url, Some((offset, length))).await
    }

    async fn fetch_with_range(
        &self,
        url: &str,
        range: Option<(u64, u64)>,
    ) -> Result<FetchedResponse, FetchError> {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?;
        let host_limit = self.host_semaphore(&host).await;

        let span = info_span!("fetch", host = %host, url, range = range.is_some());
        async move {
            let mut last_transport: Option<reqwest::Error> = None;

            for attempt in 0..=self.backoff.max_retries {
                // Fresh permits per attempt; released before backing off so a
                // waiting request can use the slot while this one sleeps.
                let outcome = {
                    let _global = self
                        .global_limit
                        .acquire()
                        .await
                        .expect("governor semaphore never closed");
                    let _host = host_limit
                        .acquire()
                        .await
                        .expect("governor semaphore never closed");
                    self.attempt(url, range).await
                };

                match outcome {
                    AttemptOutcome::Done(response) => return Ok(response),
                    AttemptOutcome::Terminal(err) => return Err(err),
                    AttemptOutcome::RetryStatus(status, final_url) => {
                        if attempt == self.backoff.max_retries {
                            return Err(FetchError::HttpStatus {
                                status: status.as_u16(),
                                url: final_url,
                            });
                        }
                        debug!(attempt, status = status.as_u16(), "retrying after status");
                    }
                    AttemptOutcome::RetryTransport(err) => {
                        if attempt == self.backoff.max_retries {
                            return Err(FetchError::Transport(err));
                        }
                        debug!(attempt, error = %err, "retrying after transport error");
                        last_transport = Some(err);
                    }
                }
                tokio::time::sleep(self.backoff.delay_with_jitter(attempt)).await;
            }

            // Unreachable: the loop always returns on its final attempt.
            Err(match last_transport {
                Some(err) => FetchError::Transport(err),
                None => FetchError::InvalidUrl(url.to_string()),
            })
        }
        .instrument(span)
        .await
    }

    async fn attempt(&self, url: &str, range: Option<(u64, u64)>) -> AttemptOutcome {
        let mut request = self.client.get(url);
        if let Some((offset, length)) = range {
            // Index records are untrusted; an offset near u64::MAX must not
            // overflow the end-of-range arithmetic.
            let end = offset.saturating_add(length.saturating_sub(1));
            request = request.header(reqwest::header::RANGE, format!("bytes={offset}-{end}"));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                return match classify_reqwest_error(&err) {
                    RetryDisposition::Retryable => AttemptOutcome::RetryTransport(err),
                    RetryDisposition::NonRetryable => {
                        AttemptOutcome::Terminal(FetchError::Transport(err))
                    }
                };
            }
        };

        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return match classify_status(status) {
                RetryDisposition::Retryable => AttemptOutcome::RetryStatus(status, final_url),
                RetryDisposition::NonRetryable => AttemptOutcome::Terminal(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                }),
            };
        }

        let content_range = response
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match response.bytes().await {
            Ok(body) => AttemptOutcome::Done(FetchedResponse {
                status,
                final_url,
                content_range,
                content_type,
                body: body.to_vec(),
            }),
            Err(err) => match classify_reqwest_error(&err) {
                RetryDisposition::Retryable => AttemptOutcome::RetryTransport(err),
                RetryDisposition::NonRetryable => {
                    AttemptOutcome::Terminal(FetchError::Transport(err))
                }
            },
        }
    }
}

enum AttemptOutcome {
    Done(FetchedResponse),
    Terminal(FetchError),
    RetryStatus(StatusCode, String),
    RetryTransport(reqwest::Error),
}
