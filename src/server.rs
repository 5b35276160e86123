//! HTTP surface of the gateway (axum).
//!
//! | Route | Auth |
//! |---|---|
//! | `GET /health` | open |
//! | `POST /v1/convert` (multipart) | token |
//! | `POST /v1/convert-json` | token |
//! | `GET /outputs/{filename}` | token |
//! | `GET /system/info` | token |
//!
//! Token auth reads `X-Service-Token` and is skipped entirely in dev mode.
//! Boundary validation failures answer 422 with a [`ConvertResponse`] body;
//! conversions that ran but failed answer 200 with `success = false`.

use crate::config::DEV_API_KEY;
use crate::convert::{Gateway, Reply};
use crate::error::GatewayError;
use crate::output::{now_rfc3339, ConvertRequest, ConvertResponse, UploadRequest};
use crate::storage::StorageUsage;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::sync::Arc;
use std::time::Instant;

/// Header carrying the shared service token.
pub const SERVICE_TOKEN_HEADER: &str = "x-service-token";

/// Slack on top of `max_file_size` for multipart framing and form fields.
const BODY_OVERHEAD: u64 = 256 * 1024;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthChecks {
    pub service_status: bool,
    pub temp_directory: bool,
    pub marker_api_configured: bool,
}

impl HealthChecks {
    fn all_ok(&self) -> bool {
        self.service_status && self.temp_directory && self.marker_api_configured
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub service: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub file_system: StorageUsage,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputFile {
    pub content: String,
    pub filename: String,
}

/// JSON body for non-conversion errors (auth, lookup, internal).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub timestamp: String,
}

// ============================================================================
// ROUTER
// ============================================================================

/// Build the application router around a shared gateway.
pub fn router(gateway: Arc<Gateway>) -> Router {
    let limit = body_limit(gateway.config().max_file_size);

    let protected = Router::new()
        .route("/v1/convert", post(convert_upload))
        .route("/v1/convert-json", post(convert_json))
        .route("/outputs/{filename}", get(get_output))
        .route("/system/info", get(system_info))
        .route_layer(middleware::from_fn_with_state(gateway.clone(), require_token));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(DefaultBodyLimit::max(limit))
        .with_state(gateway)
}

/// Largest accepted request body: base64 inflation of `max_file_size` plus
/// framing overhead.
fn body_limit(max_file_size: u64) -> usize {
    let encoded = max_file_size.saturating_mul(4) / 3 + 4;
    usize::try_from(encoded.saturating_add(BODY_OVERHEAD)).unwrap_or(usize::MAX)
}

// ============================================================================
// MIDDLEWARE
// ============================================================================

async fn require_token(
    State(gateway): State<Arc<Gateway>>,
    request: Request,
    next: Next,
) -> Response {
    let config = gateway.config();
    if config.dev_mode {
        return next.run(request).await;
    }

    let presented = request
        .headers()
        .get(SERVICE_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok());
    let rejection = match presented {
        None => Some("Missing service token"),
        Some(token)
            if config.service_token.is_empty()
                || !token_matches(token, &config.service_token) =>
        {
            Some("Invalid service token")
        }
        Some(_) => None,
    };

    match rejection {
        None => next.run(request).await,
        Some(message) => {
            tracing::warn!(path = %request.uri().path(), "{message}");
            unauthorized(message)
        }
    }
}

/// Length-then-bytes comparison without early exit on the first mismatch.
fn token_matches(presented: &str, expected: &str) -> bool {
    presented.len() == expected.len()
        && presented
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn unauthorized(message: &str) -> Response {
    error_response(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health
async fn health(State(gateway): State<Arc<Gateway>>) -> Json<HealthResponse> {
    let config = gateway.config();
    let checks = HealthChecks {
        service_status: true,
        temp_directory: gateway.storage().is_writable().await,
        marker_api_configured: !config.api_key.is_empty() && config.api_key != DEV_API_KEY,
    };
    let status = if checks.all_ok() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    Json(HealthResponse {
        status,
        service: config.service_name.clone(),
        version: config.service_version.clone(),
        timestamp: now_rfc3339(),
        uptime_seconds: gateway.uptime().as_secs(),
        checks,
    })
}

/// POST /v1/convert-json
async fn convert_json(
    State(gateway): State<Arc<Gateway>>,
    payload: Result<Json<ConvertRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(request)) => reply_response(gateway.convert_json(request).await),
        Err(rejection) => malformed(rejection.status(), rejection.body_text(), Instant::now()),
    }
}

/// POST /v1/convert
async fn convert_upload(State(gateway): State<Arc<Gateway>>, multipart: Multipart) -> Response {
    let start = Instant::now();
    match read_upload(multipart).await {
        Ok(request) => reply_response(gateway.convert_upload(request).await),
        Err((status, message)) => malformed(status, message, start),
    }
}

/// GET /outputs/{filename}
async fn get_output(
    State(gateway): State<Arc<Gateway>>,
    Path(filename): Path<String>,
) -> Result<Json<OutputFile>, GatewayError> {
    let content = gateway.read_output(&filename).await?;
    Ok(Json(OutputFile { content, filename }))
}

/// GET /system/info
async fn system_info(State(gateway): State<Arc<Gateway>>) -> Result<Json<SystemInfo>, GatewayError> {
    let config = gateway.config();
    Ok(Json(SystemInfo {
        service: config.service_name.clone(),
        version: config.service_version.clone(),
        uptime_seconds: gateway.uptime().as_secs(),
        file_system: gateway.storage().usage().await?,
        timestamp: now_rfc3339(),
    }))
}

/// Collect the multipart form into an [`UploadRequest`].
async fn read_upload(mut multipart: Multipart) -> Result<UploadRequest, (StatusCode, String)> {
    let mut file: Option<(Vec<u8>, String, Option<String>)> = None;
    let mut output_method = None;
    let mut max_inline_size = None;
    let mut request_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (e.status(), format!("Invalid multipart field: {}", e.body_text())))?
    {
        let name = field.name().map(str::to_string).unwrap_or_default();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().map(str::to_string).unwrap_or_default();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| (e.status(), format!("Failed to read upload: {}", e.body_text())))?;
                file = Some((bytes.to_vec(), filename, content_type));
            }
            "output_method" | "max_inline_size" | "request_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| (e.status(), format!("Invalid form field '{name}': {}", e.body_text())))?;
                match name.as_str() {
                    "output_method" => output_method = Some(text),
                    "max_inline_size" => max_inline_size = Some(text),
                    _ => request_id = Some(text),
                }
            }
            _ => {}
        }
    }

    let invalid = |message: String| (StatusCode::UNPROCESSABLE_ENTITY, message);
    let (bytes, filename, content_type) =
        file.ok_or_else(|| invalid("Missing form field 'file'".into()))?;

    let mut request = UploadRequest::new(bytes, filename);
    request.content_type = content_type;
    request.request_id = request_id.filter(|s| !s.is_empty());
    if let Some(method) = output_method.filter(|s| !s.trim().is_empty()) {
        request.output_method = method.parse().map_err(|e: GatewayError| invalid(e.to_string()))?;
    }
    if let Some(size) = max_inline_size.filter(|s| !s.trim().is_empty()) {
        request.max_inline_size = size
            .trim()
            .parse()
            .map_err(|_| invalid(format!("max_inline_size must be a positive integer, got '{size}'")))?;
    }
    Ok(request)
}

fn reply_response(reply: Reply) -> Response {
    let status = if reply.is_rejected() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::OK
    };
    (status, Json(reply.into_response())).into_response()
}

/// A request body that could not be parsed into a conversion request.
fn malformed(status: StatusCode, message: String, start: Instant) -> Response {
    let (status, code) = if status == StatusCode::PAYLOAD_TOO_LARGE {
        (status, "FILE_TOO_LARGE")
    } else {
        (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_REQUEST")
    };
    tracing::warn!(%status, error = %message, "Malformed conversion request");
    let body = ConvertResponse::failure(message, code, start.elapsed(), None, Map::new());
    (status, Json(body)).into_response()
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
        GatewayError::AccessDenied { .. } => StatusCode::FORBIDDEN,
        GatewayError::StorageUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        GatewayError::UpstreamStatus { .. } | GatewayError::Transport { .. } => StatusCode::BAD_GATEWAY,
        e if e.is_validation() => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let body = ErrorBody {
        error: code.to_string(),
        message: message.to_string(),
        timestamp: now_rfc3339(),
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            tracing::error!(error = %self, error_code = self.code(), "Request failed");
        }
        error_response(status, self.code(), &self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_comparison() {
        assert!(token_matches("secret-token", "secret-token"));
        assert!(!token_matches("secret-tokeN", "secret-token"));
        assert!(!token_matches("secret", "secret-token"));
        assert!(!token_matches("", "x"));
    }

    #[test]
    fn lookup_errors_map_to_404_and_403() {
        assert_eq!(
            status_for(&GatewayError::NotFound { name: "a.md".into() }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&GatewayError::AccessDenied { name: "../a".into() }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&GatewayError::InvalidRequest("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&GatewayError::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn body_limit_covers_base64_inflation() {
        let max = 3 * 1024 * 1024;
        assert!(body_limit(max) as u64 > max / 3 * 4);
        assert!(body_limit(u64::MAX) > 0);
    }
}
