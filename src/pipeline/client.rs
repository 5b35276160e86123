//! Marker API client: submit a document, then wait for its Markdown.
//!
//! ## Protocol
//!
//! ```text
//! POST {api_url}  multipart{file, output_format=markdown}
//!   ├─ {"markdown": "..."}           → done (synchronous completion)
//!   ├─ {"request_check_url": "..."}  → poll
//!   └─ anything else                 → InvalidResponse
//!
//! poll: sleep(interval); GET {request_check_url}    (absolute URL)
//!   ├─ status "complete" + markdown  → done
//!   ├─ status "error"                → RemoteConversionError(error)
//!   └─ any other status              → keep polling, up to max_polls
//! ```
//!
//! ## Retry Strategy
//!
//! Only the submission is retried, and only on transport failures (timeout,
//! connection refused/reset). A poll that fails is terminal: the job already
//! exists upstream, and re-polling after an HTTP error would hide a real
//! rejection. Backoff is `base_delay * 2^(attempt-1)`, so with the default
//! 1 s base and 3 attempts the waits are 1 s → 2 s.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::output::ConversionOutcome;
use crate::pipeline::input::ConversionArtifact;
use crate::pipeline::mime;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Exponential backoff policy for the submission call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Growth factor between consecutive retries.
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier: 2.0,
        }
    }

    /// Delay after `attempts` failed attempts (1-indexed):
    /// `base_delay * multiplier^(attempts - 1)`.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1) as i32;
        Duration::from_secs_f64(self.base_delay.as_secs_f64() * self.multiplier.powi(exp))
    }

    /// Whether another attempt should follow `attempts` failed ones.
    pub fn should_retry(&self, attempts: u32, err: &GatewayError) -> bool {
        attempts < self.max_attempts && err.is_transient()
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(attempts, &e) => {
                    let delay = self.next_delay(attempts);
                    warn!(
                        "{}: attempt {}/{} failed: {}; retrying in {}ms",
                        label,
                        attempts,
                        self.max_attempts,
                        e,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Body returned by both the submission and the status-check endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct MarkerResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub markdown: Option<String>,
    #[serde(default)]
    pub request_check_url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// How the API answered a submission.
#[derive(Debug, PartialEq, Eq)]
pub enum Submission {
    /// Markdown was returned inline.
    Complete(String),
    /// Conversion continues asynchronously at this absolute URL.
    Pending(String),
}

impl MarkerResponse {
    fn take_markdown(&mut self) -> Option<String> {
        self.markdown.take().filter(|m| !m.is_empty())
    }

    /// Classify a submission response.
    pub fn into_submission(mut self) -> Result<Submission, GatewayError> {
        if let Some(markdown) = self.take_markdown() {
            return Ok(Submission::Complete(markdown));
        }
        if let Some(url) = self.request_check_url.take().filter(|u| !u.is_empty()) {
            return Ok(Submission::Pending(url));
        }
        Err(GatewayError::InvalidResponse {
            detail: self
                .error
                .unwrap_or_else(|| "response has neither markdown nor request_check_url".into()),
        })
    }
}

/// Bookkeeping for one conversion's asynchronous phase.
#[derive(Debug)]
struct PollState {
    attempt: u32,
    check_url: String,
    started: Instant,
}

impl PollState {
    fn new(check_url: String) -> Self {
        Self {
            attempt: 0,
            check_url,
            started: Instant::now(),
        }
    }
}

/// Client for the Marker conversion API.
#[derive(Debug, Clone)]
pub struct ConversionClient {
    http: reqwest::Client,
    api_url: String,
    headers: HeaderMap,
    retry: RetryPolicy,
    poll_interval: Duration,
    max_polls: u32,
}

impl ConversionClient {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| GatewayError::InvalidConfig("API key is not a valid header value".into()))?;
        key.set_sensitive(true);
        headers.insert("X-Api-Key", key);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent())
                .map_err(|_| GatewayError::InvalidConfig("invalid service name/version".into()))?,
        );

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GatewayError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            headers,
            retry: config.retry_policy(),
            poll_interval: config.poll_interval(),
            max_polls: config.max_polls,
        })
    }

    /// Convert `artifact` to Markdown.
    ///
    /// Never returns an error: every failure is folded into a
    /// [`ConversionOutcome`] with `success == false`.
    pub async fn convert(&self, artifact: &ConversionArtifact) -> ConversionOutcome {
        let start = Instant::now();
        match self.try_convert(artifact).await {
            Ok(markdown) => {
                info!(
                    file = %artifact.filename,
                    markdown_bytes = markdown.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Document converted"
                );
                ConversionOutcome::succeeded(markdown, start.elapsed())
            }
            Err(e) => {
                error!(
                    file = %artifact.path.display(),
                    error = %e,
                    error_code = e.code(),
                    "Document conversion failed"
                );
                ConversionOutcome::failed(&e, start.elapsed())
            }
        }
    }

    async fn try_convert(&self, artifact: &ConversionArtifact) -> Result<String, GatewayError> {
        let bytes = tokio::fs::read(&artifact.path)
            .await
            .map_err(|e| GatewayError::io(&artifact.path, e))?;
        let mime_type = mime::detect(&artifact.filename, &bytes);
        debug!(file = %artifact.filename, mime_type, "Submitting to Marker API");

        let submission = self
            .retry
            .run("Marker submission", || {
                self.submit(&artifact.filename, bytes.clone(), mime_type)
            })
            .await?;

        match submission.into_submission()? {
            Submission::Complete(markdown) => Ok(markdown),
            Submission::Pending(check_url) => self.poll(check_url).await,
        }
    }

    /// One submission attempt.
    async fn submit(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<MarkerResponse, GatewayError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime_type)
            .map_err(|e| GatewayError::Internal(format!("failed to build form part: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("output_format", "markdown");

        let response = self
            .http
            .post(&self.api_url)
            .headers(self.headers.clone())
            .multipart(form)
            .send()
            .await?;
        read_json(response).await
    }

    /// Poll `check_url` until the job completes, fails, or the budget runs out.
    async fn poll(&self, check_url: String) -> Result<String, GatewayError> {
        let mut state = PollState::new(check_url);
        info!(check_url = %state.check_url, max_polls = self.max_polls, "Conversion accepted, polling");

        while state.attempt < self.max_polls {
            state.attempt += 1;
            sleep(self.poll_interval).await;

            let response = self
                .http
                .get(&state.check_url)
                .headers(self.headers.clone())
                .send()
                .await
                .map_err(GatewayError::from);
            let mut body = match response {
                Ok(r) => read_json(r).await,
                Err(e) => Err(e),
            }
            .inspect_err(|e| {
                error!(
                    error = %e,
                    attempt = state.attempt,
                    check_url = %state.check_url,
                    "Status check failed"
                )
            })?;

            match body.status.as_deref() {
                Some("complete") => {
                    debug!(
                        attempts = state.attempt,
                        elapsed_ms = state.started.elapsed().as_millis() as u64,
                        "Conversion complete"
                    );
                    return body.take_markdown().ok_or_else(|| GatewayError::InvalidResponse {
                        detail: "conversion completed without markdown".into(),
                    });
                }
                Some("error") => {
                    return Err(GatewayError::RemoteConversionError {
                        detail: body.error.unwrap_or_else(|| "unknown error".into()),
                    });
                }
                other => debug!(attempt = state.attempt, status = ?other, "Conversion still running"),
            }
        }

        Err(GatewayError::PollTimeout {
            attempts: self.max_polls,
            waited_secs: self.max_polls as f64 * self.poll_interval.as_secs_f64(),
        })
    }
}

/// Fail on non-2xx, otherwise decode the JSON body.
async fn read_json(response: reqwest::Response) -> Result<MarkerResponse, GatewayError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable>".to_string());
        return Err(GatewayError::UpstreamStatus {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json::<MarkerResponse>().await?)
}
