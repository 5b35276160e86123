//! Request and result types exchanged with callers.

use crate::error::GatewayError;
use crate::pipeline::placement::{OutputMethod, OutputPlacementResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Default `max_inline_size`: 1 MiB.
pub const DEFAULT_MAX_INLINE_SIZE: u64 = 1024 * 1024;

/// Default (informational) request priority.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Result of one conversion attempt against the Marker API.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOutcome {
    pub success: bool,
    /// Present only on success.
    pub markdown: Option<String>,
    /// Present only on failure.
    pub error: Option<String>,
    /// Machine-readable code, present only on failure.
    pub error_code: Option<&'static str>,
    pub duration: Duration,
}

impl ConversionOutcome {
    pub fn succeeded(markdown: String, duration: Duration) -> Self {
        Self {
            success: true,
            markdown: Some(markdown),
            error: None,
            error_code: None,
            duration,
        }
    }

    pub fn failed(err: &GatewayError, duration: Duration) -> Self {
        Self {
            success: false,
            markdown: None,
            error: Some(err.to_string()),
            error_code: Some(err.code()),
            duration,
        }
    }
}

/// JSON conversion request (`POST /v1/convert-json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertRequest {
    /// Base64-encoded file content. Mutually exclusive with `file_url`.
    #[serde(default)]
    pub file_content: Option<String>,
    /// Remote file to download. Mutually exclusive with `file_content`.
    #[serde(default)]
    pub file_url: Option<String>,
    /// Original filename; its extension selects the format.
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    /// Caller's tracking id, echoed back.
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub output_method: OutputMethod,
    #[serde(default = "default_max_inline_size")]
    pub max_inline_size: u64,
    /// Accepted for compatibility; not acted on.
    #[serde(default)]
    pub callback_url: Option<String>,
    /// 1 (highest) to 10 (lowest). Informational only.
    #[serde(default = "default_priority")]
    pub priority: u8,
}

impl ConvertRequest {
    /// A base64 request with defaults for everything else.
    pub fn from_base64(content: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            file_content: Some(content.into()),
            ..Self::empty(filename)
        }
    }

    /// A URL request with defaults for everything else.
    pub fn from_url(url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            file_url: Some(url.into()),
            ..Self::empty(filename)
        }
    }

    fn empty(filename: impl Into<String>) -> Self {
        Self {
            file_content: None,
            file_url: None,
            filename: filename.into(),
            content_type: None,
            request_id: None,
            output_method: OutputMethod::default(),
            max_inline_size: DEFAULT_MAX_INLINE_SIZE,
            callback_url: None,
            priority: DEFAULT_PRIORITY,
        }
    }
}

fn default_max_inline_size() -> u64 {
    DEFAULT_MAX_INLINE_SIZE
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

/// Multipart upload request (`POST /v1/convert`).
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub bytes: Vec<u8>,
    pub filename: String,
    /// Content type declared on the multipart part.
    pub content_type: Option<String>,
    pub request_id: Option<String>,
    pub output_method: OutputMethod,
    pub max_inline_size: u64,
}

impl UploadRequest {
    pub fn new(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            bytes,
            filename: filename.into(),
            content_type: None,
            request_id: None,
            output_method: OutputMethod::default(),
            max_inline_size: DEFAULT_MAX_INLINE_SIZE,
        }
    }
}

/// Response body for both conversion endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Seconds spent on the request.
    pub processing_time: f64,
    #[serde(default)]
    pub file_info: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub timestamp: String,
    pub output_method: OutputMethod,
}

impl ConvertResponse {
    /// Successful response built from a placement decision.
    pub fn placed(
        placement: OutputPlacementResult,
        processing_time: Duration,
        request_id: Option<String>,
        file_info: Map<String, Value>,
    ) -> Self {
        Self {
            success: true,
            markdown_content: placement.inline_content().map(str::to_string),
            markdown_url: placement.locator().map(str::to_string),
            content_size: Some(placement.content_size),
            request_id,
            processing_time: processing_time.as_secs_f64(),
            file_info,
            error: None,
            error_code: None,
            timestamp: now_rfc3339(),
            output_method: placement.method(),
        }
    }

    /// Failure response. Failures always report `output_method = inline`.
    pub fn failure(
        error: impl Into<String>,
        error_code: impl Into<String>,
        processing_time: Duration,
        request_id: Option<String>,
        file_info: Map<String, Value>,
    ) -> Self {
        Self {
            success: false,
            markdown_content: None,
            markdown_url: None,
            content_size: None,
            request_id,
            processing_time: processing_time.as_secs_f64(),
            file_info,
            error: Some(error.into()),
            error_code: Some(error_code.into()),
            timestamp: now_rfc3339(),
            output_method: OutputMethod::Inline,
        }
    }

    /// Failure response for a [`GatewayError`].
    pub fn from_error(
        err: &GatewayError,
        processing_time: Duration,
        request_id: Option<String>,
        file_info: Map<String, Value>,
    ) -> Self {
        Self::failure(err.to_string(), err.code(), processing_time, request_id, file_info)
    }
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::placement::Placement;

    #[test]
    fn request_defaults() {
        let r: ConvertRequest =
            serde_json::from_str(r#"{"filename":"a.pdf","file_content":"YQ=="}"#).unwrap();
        assert_eq!(r.output_method, OutputMethod::Auto);
        assert_eq!(r.max_inline_size, 1_048_576);
        assert_eq!(r.priority, 5);
        assert!(r.file_url.is_none());
    }

    #[test]
    fn request_rejects_unknown_output_method() {
        let r = serde_json::from_str::<ConvertRequest>(
            r#"{"filename":"a.pdf","output_method":"stream"}"#,
        );
        assert!(r.is_err());
    }

    #[test]
    fn inline_response_has_content_and_no_url() {
        let placement = OutputPlacementResult {
            placement: Placement::Inline {
                content: "# A".into(),
            },
            content_size: 3,
        };
        let resp = ConvertResponse::placed(placement, Duration::from_millis(1500), None, Map::new());
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["markdown_content"], "# A");
        assert!(json.get("markdown_url").is_none());
        assert_eq!(json["output_method"], "inline");
        assert_eq!(json["processing_time"], 1.5);
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn reference_response_has_url_and_no_content() {
        let placement = OutputPlacementResult {
            placement: Placement::Reference {
                locator: "/outputs/a_12345678.md".into(),
            },
            content_size: 42,
        };
        let resp = ConvertResponse::placed(
            placement,
            Duration::ZERO,
            Some("req-12345678".into()),
            Map::new(),
        );
        assert_eq!(resp.markdown_url.as_deref(), Some("/outputs/a_12345678.md"));
        assert!(resp.markdown_content.is_none());
        assert_eq!(resp.content_size, Some(42));
        assert_eq!(resp.output_method, OutputMethod::Reference);
    }

    #[test]
    fn failure_outcome_carries_code() {
        let o = ConversionOutcome::failed(
            &GatewayError::RemoteConversionError {
                detail: "bad scan".into(),
            },
            Duration::ZERO,
        );
        assert!(!o.success);
        assert!(o.markdown.is_none());
        assert_eq!(o.error_code, Some("REMOTE_CONVERSION_ERROR"));
        assert!(o.error.unwrap().contains("bad scan"));
    }
}
