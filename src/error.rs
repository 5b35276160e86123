//! Error types for the markdown-gateway library.
//!
//! A single [`GatewayError`] enum covers every failure in the pipeline, but
//! errors surface to callers in two different ways:
//!
//! * **Boundary errors** (bad filename, malformed request id, oversized or
//!   undecodable payload) are returned as `Err(GatewayError)` before any
//!   storage or network activity happens.
//!
//! * **Conversion errors** (upstream API rejected the file, polling timed
//!   out) are folded into a [`crate::output::ConversionOutcome`] by the
//!   conversion client, so the request handler only inspects a success flag.
//!
//! Every variant carries a stable machine-readable [`GatewayError::code`]
//! that is echoed as `error_code` in the HTTP response.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the markdown-gateway library.
#[derive(Debug, Error)]
pub enum GatewayError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// `file_content` was not valid base64.
    #[error("file_content must be valid base64 encoded data: {detail}")]
    InvalidEncoding { detail: String },

    /// Payload exceeds the configured maximum file size.
    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    /// Payload decoded or downloaded to zero bytes.
    #[error("File is empty")]
    EmptyFile,

    /// Filename extension or detected MIME type is not one we convert.
    #[error("Unsupported file format '{filename}'. Supported: .pdf, .docx, .doc, .txt")]
    UnsupportedFormat { filename: String },

    /// Request failed boundary validation for a reason other than format.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Remote `file_url` could not be downloaded.
    #[error("Failed to download '{url}': {reason}")]
    FetchError { url: String, reason: String },

    // ── Conversion API errors ─────────────────────────────────────────────
    /// The API answered with neither markdown nor a status-check URL.
    #[error("Invalid response from Marker API: {detail}")]
    InvalidResponse { detail: String },

    /// The API reported a terminal `error` status for the job.
    #[error("Conversion failed: {detail}")]
    RemoteConversionError { detail: String },

    /// The job never reached a terminal status within the poll budget.
    #[error("Polling timed out after {attempts} attempts ({waited_secs:.1} seconds)")]
    PollTimeout { attempts: u32, waited_secs: f64 },

    /// The API answered with a non-success HTTP status.
    #[error("Marker API returned HTTP {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    /// Network-level failure talking to the API (after any retries).
    #[error("Marker API request failed: {detail}")]
    Transport { detail: String, timeout: bool },

    // ── Storage errors ────────────────────────────────────────────────────
    /// File on disk does not match what we meant to write.
    #[error("File size mismatch for '{path}': expected {expected}, got {actual}")]
    WriteVerificationError {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// Requested stored output does not exist.
    #[error("File not found: '{name}'")]
    NotFound { name: String },

    /// Requested path resolves outside the managed root.
    #[error("Access denied: '{name}'")]
    AccessDenied { name: String },

    /// Temp/output directories cannot be created or written.
    #[error("Cannot create or write to directory '{path}': {detail}")]
    StorageUnavailable { path: PathBuf, detail: String },

    /// Generic I/O failure on a managed file.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable machine-readable code, returned as `error_code`.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidEncoding { .. } => "INVALID_ENCODING",
            GatewayError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            GatewayError::EmptyFile => "EMPTY_FILE",
            GatewayError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            GatewayError::InvalidRequest(_) => "INVALID_REQUEST",
            GatewayError::FetchError { .. } => "FETCH_ERROR",
            GatewayError::InvalidResponse { .. } => "INVALID_RESPONSE",
            GatewayError::RemoteConversionError { .. } => "REMOTE_CONVERSION_ERROR",
            GatewayError::PollTimeout { .. } => "POLL_TIMEOUT",
            GatewayError::UpstreamStatus { .. } => "UPSTREAM_STATUS",
            GatewayError::Transport { .. } => "TRANSPORT_ERROR",
            GatewayError::WriteVerificationError { .. } => "WRITE_VERIFICATION_ERROR",
            GatewayError::NotFound { .. } => "NOT_FOUND",
            GatewayError::AccessDenied { .. } => "ACCESS_DENIED",
            GatewayError::StorageUnavailable { .. } => "STORAGE_UNAVAILABLE",
            GatewayError::Io { .. } => "IO_ERROR",
            GatewayError::InvalidConfig(_) => "INVALID_CONFIG",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error is a network-level failure that is safe to retry.
    ///
    /// Only transport failures qualify. An HTTP error status means the API
    /// received and rejected the request, so resubmitting could start a
    /// duplicate job.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transport { .. })
    }

    /// Whether the error was raised by boundary validation, before any
    /// storage or upstream call.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            GatewayError::InvalidEncoding { .. }
                | GatewayError::FileTooLarge { .. }
                | GatewayError::EmptyFile
                | GatewayError::UnsupportedFormat { .. }
                | GatewayError::InvalidRequest(_)
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GatewayError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return GatewayError::UpstreamStatus {
                status: status.as_u16(),
                body: e.to_string(),
            };
        }
        if e.is_decode() {
            return GatewayError::InvalidResponse {
                detail: e.to_string(),
            };
        }
        GatewayError::Transport {
            detail: e.to_string(),
            timeout: e.is_timeout(),
        }
    }
}
