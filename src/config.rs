//! Configuration for the conversion gateway.
//!
//! All behaviour is controlled through one [`GatewayConfig`], built via
//! [`GatewayConfigBuilder`] and handed by reference to every component at
//! construction time. Nothing in the library reads the environment; the
//! `mdgate` binary maps flags and environment variables onto the builder.

use crate::error::GatewayError;
use crate::pipeline::client::RetryPolicy;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default Marker API endpoint.
pub const DEFAULT_API_URL: &str = "https://www.datalab.to/api/v1/marker";

/// API key used when running in dev mode without a configured key.
pub const DEV_API_KEY: &str = "dev-key";

/// Name of the subdirectory (under `temp_dir`) holding reference outputs.
pub const OUTPUT_SUBDIR: &str = "outputs";

/// Configuration for the conversion gateway.
///
/// # Example
/// ```rust
/// use markdown_gateway::GatewayConfig;
///
/// let config = GatewayConfig::builder()
///     .api_key("sk-test")
///     .temp_dir("/tmp/mdgate")
///     .max_polls(60)
///     .build()
///     .unwrap();
/// assert_eq!(config.output_dir(), std::path::Path::new("/tmp/mdgate/outputs"));
/// ```
#[derive(Clone)]
pub struct GatewayConfig {
    /// Marker API submission URL. Default: [`DEFAULT_API_URL`].
    pub api_url: String,

    /// Value of the `X-Api-Key` header sent to the Marker API.
    pub api_key: String,

    /// Service name, used in the `User-Agent` header and `/health`.
    pub service_name: String,

    /// Service version, used in the `User-Agent` header and `/health`.
    pub service_version: String,

    /// Root of managed temporary storage. Default: `/tmp/markdown-service`.
    ///
    /// Reference outputs live in the [`OUTPUT_SUBDIR`] subdirectory.
    pub temp_dir: PathBuf,

    /// Maximum accepted input size in bytes. Default: 50 MiB.
    pub max_file_size: u64,

    /// Per-call timeout for Marker API requests, in seconds. Default: 300.
    ///
    /// Independent of the poll budget (`max_polls × poll_interval_ms`).
    pub request_timeout_secs: u64,

    /// Timeout for downloading `file_url` inputs, in seconds. Default: 30.
    pub download_timeout_secs: u64,

    /// Sleep before each status poll, in milliseconds. Default: 2000.
    pub poll_interval_ms: u64,

    /// Maximum number of status polls. Default: 300.
    pub max_polls: u32,

    /// Total submission attempts on transient network errors. Default: 3.
    pub retry_attempts: u32,

    /// Base delay for exponential submission backoff, in ms. Default: 1000.
    pub retry_delay_ms: u64,

    /// Expected `X-Service-Token` on protected routes. Empty rejects all.
    pub service_token: String,

    /// Dev mode: skip token checks and allow a placeholder API key.
    pub dev_mode: bool,

    /// Files older than this are evicted by the sweeper. Default: 24.
    pub output_retention_hours: u64,

    /// Period of the background sweeper, in seconds. Default: 3600.
    pub sweep_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: String::new(),
            service_name: "markdown-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            temp_dir: PathBuf::from("/tmp/markdown-service"),
            max_file_size: 50 * 1024 * 1024,
            request_timeout_secs: 300,
            download_timeout_secs: 30,
            poll_interval_ms: 2000,
            max_polls: 300,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            service_token: String::new(),
            dev_mode: false,
            output_retention_hours: 24,
            sweep_interval_secs: 3600,
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &mask_secret(&self.api_key))
            .field("service_name", &self.service_name)
            .field("service_version", &self.service_version)
            .field("temp_dir", &self.temp_dir)
            .field("max_file_size", &self.max_file_size)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("max_polls", &self.max_polls)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("service_token", &mask_secret(&self.service_token))
            .field("dev_mode", &self.dev_mode)
            .field("output_retention_hours", &self.output_retention_hours)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .finish()
    }
}

impl GatewayConfig {
    /// Create a new builder for `GatewayConfig`.
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder {
            config: Self::default(),
        }
    }

    /// Directory holding reference outputs.
    pub fn output_dir(&self) -> PathBuf {
        self.temp_dir.join(OUTPUT_SUBDIR)
    }

    /// `User-Agent` sent to the Marker API.
    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.service_name, self.service_version)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn output_retention(&self) -> Duration {
        Duration::from_secs(self.output_retention_hours.saturating_mul(3600))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Retry policy applied around the submission call.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, Duration::from_millis(self.retry_delay_ms))
    }
}

/// Builder for [`GatewayConfig`].
#[derive(Debug)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_url = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service_name = name.into();
        self
    }

    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.config.service_version = version.into();
        self
    }

    pub fn temp_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.temp_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = bytes;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs.max(1);
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn max_polls(mut self, n: u32) -> Self {
        self.config.max_polls = n;
        self
    }

    pub fn retry_attempts(mut self, n: u32) -> Self {
        self.config.retry_attempts = n.max(1);
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    pub fn service_token(mut self, token: impl Into<String>) -> Self {
        self.config.service_token = token.into();
        self
    }

    pub fn dev_mode(mut self, v: bool) -> Self {
        self.config.dev_mode = v;
        self
    }

    pub fn output_retention_hours(mut self, hours: u64) -> Self {
        self.config.output_retention_hours = hours;
        self
    }

    pub fn sweep_interval_secs(mut self, secs: u64) -> Self {
        self.config.sweep_interval_secs = secs.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<GatewayConfig, GatewayError> {
        let c = &mut self.config;

        let url = reqwest::Url::parse(&c.api_url).map_err(|e| {
            GatewayError::InvalidConfig(format!("API URL '{}' is invalid: {e}", c.api_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(GatewayError::InvalidConfig(format!(
                "API URL must be http or https, got '{}'",
                url.scheme()
            )));
        }

        if c.api_key.trim().is_empty() {
            if c.dev_mode {
                c.api_key = DEV_API_KEY.to_string();
            } else {
                return Err(GatewayError::InvalidConfig(
                    "Marker API key not found (set MARKER_API_KEY)".into(),
                ));
            }
        }

        if c.max_file_size == 0 {
            return Err(GatewayError::InvalidConfig("max_file_size must be ≥ 1".into()));
        }
        if c.max_polls == 0 {
            return Err(GatewayError::InvalidConfig("max_polls must be ≥ 1".into()));
        }
        // A zero window lets the sweeper evict artifacts still being converted.
        if c.output_retention_hours == 0 {
            return Err(GatewayError::InvalidConfig(
                "output_retention_hours must be ≥ 1".into(),
            ));
        }
        if c.temp_dir.as_os_str().is_empty() {
            return Err(GatewayError::InvalidConfig("temp_dir must be set".into()));
        }

        Ok(self.config)
    }
}

/// Mask a secret for logging: keep the first and last four characters of
/// long values, hide short ones entirely.
pub fn mask_secret(secret: &str) -> String {
    let len = secret.chars().count();
    if len == 0 {
        return "not-set".to_string();
    }
    if len <= 8 {
        return "*".repeat(len);
    }
    let head: String = secret.chars().take(4).collect();
    let tail: String = secret.chars().skip(len - 4).collect();
    format!("{head}...{tail}")
}
