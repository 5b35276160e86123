//! Per-request orchestration: validate → resolve → convert → place.
//!
//! [`Gateway`] is the only entry point the HTTP layer talks to. It owns the
//! storage manager, input resolver and conversion client, all built from one
//! [`GatewayConfig`], and is shared immutably across concurrent requests.
//!
//! ## Cleanup guarantee
//!
//! Once an input artifact exists it is wrapped in an [`ArtifactGuard`]. The
//! request's single exit path releases the guard, which deletes the file
//! through [`TempStorage::delete`]. If the request future is dropped early
//! (client disconnect) or unwinds, the guard's `Drop` removes the file
//! instead. Either way the artifact is deleted exactly once.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::output::{ConversionOutcome, ConvertRequest, ConvertResponse, UploadRequest};
use crate::pipeline::client::ConversionClient;
use crate::pipeline::input::{ConversionArtifact, InputResolver, InputSource};
use crate::pipeline::mime;
use crate::pipeline::placement::{self, OutputMethod};
use crate::storage::TempStorage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

static RE_REQUEST_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{8,128}$").unwrap());

/// Result of a conversion call, distinguishing boundary rejections (the
/// request never reached storage or the API) from completed attempts.
#[derive(Debug, Clone)]
pub enum Reply {
    /// The pipeline ran; `success` may still be false.
    Completed(ConvertResponse),
    /// Boundary validation failed.
    Rejected(ConvertResponse),
}

impl Reply {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Reply::Rejected(_))
    }

    pub fn response(&self) -> &ConvertResponse {
        match self {
            Reply::Completed(r) | Reply::Rejected(r) => r,
        }
    }

    pub fn into_response(self) -> ConvertResponse {
        match self {
            Reply::Completed(r) | Reply::Rejected(r) => r,
        }
    }
}

/// Parameters shared by the JSON and upload paths once validated.
struct Job {
    input: InputSource,
    filename: String,
    output_method: OutputMethod,
    max_inline_size: u64,
    request_id: Option<String>,
    file_info: Map<String, Value>,
    start: Instant,
}

/// The conversion gateway.
#[derive(Debug)]
pub struct Gateway {
    config: GatewayConfig,
    storage: TempStorage,
    resolver: InputResolver,
    client: ConversionClient,
    started: Instant,
}

impl Gateway {
    /// Build every component from `config`, initialising storage.
    pub async fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let storage = TempStorage::from_config(&config).await?;
        let resolver = InputResolver::new(storage.clone(), &config)?;
        let client = ConversionClient::new(&config)?;
        Ok(Self {
            config,
            storage,
            resolver,
            client,
            started: Instant::now(),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn storage(&self) -> &TempStorage {
        &self.storage
    }

    /// Time since the gateway was constructed.
    pub fn uptime(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// Handle a JSON request carrying base64 content or a file URL.
    pub async fn convert_json(&self, req: ConvertRequest) -> Reply {
        let start = Instant::now();
        let filename = req.filename.trim().to_string();
        let file_info = base_file_info(&filename, req.content_type.as_deref());

        let input = match validate_json(&req) {
            Ok(input) => input,
            Err(e) => return reject(&e, start, req.request_id, file_info),
        };

        self.run(Job {
            input,
            filename,
            output_method: req.output_method,
            max_inline_size: req.max_inline_size,
            request_id: req.request_id,
            file_info,
            start,
        })
        .await
    }

    /// Handle a multipart upload.
    pub async fn convert_upload(&self, req: UploadRequest) -> Reply {
        let start = Instant::now();
        let filename = req.filename.trim().to_string();
        let file_info = base_file_info(&filename, req.content_type.as_deref());

        if let Err(e) = validate_common(&filename, req.request_id.as_deref(), req.max_inline_size) {
            return reject(&e, start, req.request_id, file_info);
        }

        self.run(Job {
            input: InputSource::Upload(req.bytes),
            filename,
            output_method: req.output_method,
            max_inline_size: req.max_inline_size,
            request_id: req.request_id,
            file_info,
            start,
        })
        .await
    }

    /// Read a stored reference output.
    pub async fn read_output(&self, name: &str) -> Result<String, GatewayError> {
        self.storage.read_output(name).await
    }

    async fn run(&self, job: Job) -> Reply {
        let Job {
            input,
            filename,
            output_method,
            max_inline_size,
            request_id,
            mut file_info,
            start,
        } = job;

        let artifact = match self.resolver.resolve(input, &filename).await {
            Ok(artifact) => artifact,
            Err(e) if e.is_validation() => return reject(&e, start, request_id, file_info),
            Err(e) => {
                warn!(file = %filename, error = %e, "Input resolution failed");
                return Reply::Completed(ConvertResponse::from_error(
                    &e,
                    start.elapsed(),
                    request_id,
                    file_info,
                ));
            }
        };
        let guard = ArtifactGuard::new(self.storage.clone(), &artifact);
        file_info.extend(artifact.metadata());

        let outcome = self.client.convert(&artifact).await;
        let response = self
            .respond(outcome, &filename, output_method, max_inline_size, request_id, file_info, start)
            .await;

        guard.release().await;
        Reply::Completed(response)
    }

    #[allow(clippy::too_many_arguments)]
    async fn respond(
        &self,
        outcome: ConversionOutcome,
        filename: &str,
        output_method: OutputMethod,
        max_inline_size: u64,
        request_id: Option<String>,
        file_info: Map<String, Value>,
        start: Instant,
    ) -> ConvertResponse {
        let markdown = match outcome {
            ConversionOutcome {
                success: true,
                markdown: Some(markdown),
                ..
            } => markdown,
            failed => {
                return ConvertResponse::failure(
                    failed.error.unwrap_or_else(|| "Conversion failed".into()),
                    failed.error_code.unwrap_or("CONVERSION_FAILED"),
                    start.elapsed(),
                    request_id,
                    file_info,
                );
            }
        };

        match placement::place(&self.storage, markdown, filename, output_method, max_inline_size).await {
            Ok(placed) => {
                info!(
                    file = filename,
                    method = %placed.method(),
                    content_size = placed.content_size,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Conversion request completed"
                );
                ConvertResponse::placed(placed, start.elapsed(), request_id, file_info)
            }
            Err(e) => {
                warn!(file = filename, error = %e, "Failed to place output");
                ConvertResponse::from_error(&e, start.elapsed(), request_id, file_info)
            }
        }
    }
}

/// Deletes its artifact exactly once: on [`ArtifactGuard::release`] or, if
/// never released, on drop.
struct ArtifactGuard {
    storage: TempStorage,
    path: Option<PathBuf>,
}

impl ArtifactGuard {
    fn new(storage: TempStorage, artifact: &ConversionArtifact) -> Self {
        Self {
            storage,
            path: Some(artifact.path.clone()),
        }
    }

    async fn release(mut self) {
        if let Some(path) = self.path.take() {
            if !self.storage.delete(&path).await {
                warn!(path = %path.display(), "Artifact cleanup failed; sweeper will evict it");
            }
        }
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            // Path was produced by TempStorage::store, so it is already managed.
            match std::fs::remove_file(&path) {
                Ok(()) => warn!(path = %path.display(), "Artifact removed after aborted request"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove artifact"),
            }
        }
    }
}

fn reject(
    err: &GatewayError,
    start: Instant,
    request_id: Option<String>,
    file_info: Map<String, Value>,
) -> Reply {
    warn!(error = %err, error_code = err.code(), "Request rejected");
    Reply::Rejected(ConvertResponse::from_error(
        err,
        start.elapsed(),
        request_id,
        file_info,
    ))
}

fn base_file_info(filename: &str, content_type: Option<&str>) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert("filename".into(), filename.into());
    m.insert(
        "content_type".into(),
        content_type.map_or(Value::Null, Value::from),
    );
    m
}

/// Validate a JSON request and pick its input source.
pub fn validate_json(req: &ConvertRequest) -> Result<InputSource, GatewayError> {
    validate_common(req.filename.trim(), req.request_id.as_deref(), req.max_inline_size)?;

    if !(1..=10).contains(&req.priority) {
        return Err(GatewayError::InvalidRequest(
            "priority must be between 1 (highest) and 10 (lowest)".into(),
        ));
    }

    let content = req.file_content.as_deref().filter(|s| !s.trim().is_empty());
    let url = req.file_url.as_deref().filter(|s| !s.trim().is_empty());
    match (content, url) {
        (Some(content), None) => Ok(InputSource::Base64(content.to_string())),
        (None, Some(url)) => Ok(InputSource::Url(url.trim().to_string())),
        (Some(_), Some(_)) => Err(GatewayError::InvalidRequest(
            "file_content and file_url are mutually exclusive".into(),
        )),
        (None, None) => Err(GatewayError::InvalidRequest(
            "either file_content or file_url must be provided".into(),
        )),
    }
}

fn validate_common(
    filename: &str,
    request_id: Option<&str>,
    max_inline_size: u64,
) -> Result<(), GatewayError> {
    mime::validate_filename(filename)?;
    if let Some(id) = request_id {
        validate_request_id(id)?;
    }
    if max_inline_size == 0 {
        return Err(GatewayError::InvalidRequest(
            "max_inline_size must be greater than 0".into(),
        ));
    }
    Ok(())
}

/// Request ids are 8–128 characters of `[A-Za-z0-9_-]`.
pub fn validate_request_id(id: &str) -> Result<(), GatewayError> {
    if !(8..=128).contains(&id.len()) {
        return Err(GatewayError::InvalidRequest(
            "request_id must be between 8 and 128 characters".into(),
        ));
    }
    if !RE_REQUEST_ID.is_match(id) {
        return Err(GatewayError::InvalidRequest(
            "request_id contains invalid characters".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_rules() {
        assert!(validate_request_id("abcd-1234_XY").is_ok());
        assert!(validate_request_id("short").is_err());
        assert!(validate_request_id(&"a".repeat(129)).is_err());
        assert!(validate_request_id(&"a".repeat(128)).is_ok());
        assert!(validate_request_id("has space!").is_err());
        assert!(validate_request_id("ünïcode-ids").is_err());
    }

    #[test]
    fn json_requires_exactly_one_source() {
        let mut req = ConvertRequest::from_base64("YQ==", "a.pdf");
        assert!(matches!(validate_json(&req), Ok(InputSource::Base64(_))));

        req.file_url = Some("https://example.com/a.pdf".into());
        assert!(validate_json(&req).is_err());

        req.file_content = None;
        assert!(matches!(validate_json(&req), Ok(InputSource::Url(_))));

        req.file_url = Some("   ".into());
        assert!(validate_json(&req).is_err());
    }

    #[test]
    fn json_validates_priority_and_format() {
        let mut req = ConvertRequest::from_base64("YQ==", "a.pdf");
        req.priority = 11;
        assert!(validate_json(&req).is_err());
        req.priority = 1;
        assert!(validate_json(&req).is_ok());

        let req = ConvertRequest::from_base64("YQ==", "a.exe");
        assert_eq!(validate_json(&req).unwrap_err().code(), "UNSUPPORTED_FORMAT");
    }

    #[test]
    fn zero_inline_size_is_rejected() {
        let mut req = ConvertRequest::from_base64("YQ==", "a.pdf");
        req.max_inline_size = 0;
        assert!(validate_json(&req).is_err());
    }

    #[tokio::test]
    async fn dropped_guard_removes_artifact() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = TempStorage::init(dir.path(), 64).await.unwrap();
        let path = storage.store(b"abc", "a.txt").await.unwrap();
        let artifact = ConversionArtifact {
            path: path.clone(),
            filename: "a.txt".into(),
            size: 3,
            checksum: String::new(),
            source: crate::pipeline::input::SourceKind::Upload,
            source_url: None,
            content_type: None,
        };
        drop(ArtifactGuard::new(storage.clone(), &artifact));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn released_guard_deletes_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = TempStorage::init(dir.path(), 64).await.unwrap();
        let path = storage.store(b"abc", "a.txt").await.unwrap();
        let artifact = ConversionArtifact {
            path: path.clone(),
            filename: "a.txt".into(),
            size: 3,
            checksum: String::new(),
            source: crate::pipeline::input::SourceKind::Upload,
            source_url: None,
            content_type: None,
        };
        let guard = ArtifactGuard::new(storage.clone(), &artifact);
        guard.release().await;
        assert!(!path.exists());
    }
}
