//! Input resolution: normalise an upload, base64 payload or remote URL into a
//! single managed artifact on disk.
//!
//! Whatever the source, the bytes are size-checked before anything is written,
//! hashed, and stored under a random name via [`TempStorage::store`]. The
//! resulting [`ConversionArtifact`] belongs to the request that created it;
//! the gateway deletes it when the request finishes.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::storage::TempStorage;
use base64::Engine;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where the artifact bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Upload,
    Base64,
    Url,
}

/// Raw request input, before resolution.
#[derive(Debug, Clone)]
pub enum InputSource {
    /// Bytes received directly (multipart upload).
    Upload(Vec<u8>),
    /// Base64-encoded file content.
    Base64(String),
    /// Remote file to download.
    Url(String),
}

/// A stored input file awaiting conversion.
#[derive(Debug, Clone)]
pub struct ConversionArtifact {
    /// Absolute path under the managed temp root.
    pub path: PathBuf,
    /// Filename supplied by the client.
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
    /// Hex SHA-256 of the raw bytes.
    pub checksum: String,
    pub source: SourceKind,
    /// Present for [`SourceKind::Url`].
    pub source_url: Option<String>,
    /// `Content-Type` reported by the remote server, if any.
    pub content_type: Option<String>,
}

impl ConversionArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Metadata merged into the response `file_info`.
    pub fn metadata(&self) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("source".into(), serde_json::json!(self.source));
        m.insert("size".into(), self.size.into());
        m.insert("checksum".into(), self.checksum.clone().into());
        if let Some(ref url) = self.source_url {
            m.insert("source_url".into(), url.clone().into());
            m.insert(
                "content_type".into(),
                self.content_type.clone().map_or(Value::Null, Value::from),
            );
        }
        m
    }
}

/// Turns [`InputSource`]s into stored [`ConversionArtifact`]s.
#[derive(Debug, Clone)]
pub struct InputResolver {
    storage: TempStorage,
    http: reqwest::Client,
}

impl InputResolver {
    pub fn new(storage: TempStorage, config: &GatewayConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(config.download_timeout())
            .user_agent(config.user_agent())
            .build()
            .map_err(|e| GatewayError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self { storage, http })
    }

    /// Resolve `input` into a stored artifact named after `filename`.
    pub async fn resolve(
        &self,
        input: InputSource,
        filename: &str,
    ) -> Result<ConversionArtifact, GatewayError> {
        let (bytes, source, source_url, content_type) = match input {
            InputSource::Upload(bytes) => (bytes, SourceKind::Upload, None, None),
            InputSource::Base64(encoded) => {
                let bytes = decode_base64(&encoded, self.storage.max_file_size())?;
                (bytes, SourceKind::Base64, None, None)
            }
            InputSource::Url(url) => {
                let (bytes, content_type) = self.download(&url).await?;
                (bytes, SourceKind::Url, Some(url), content_type)
            }
        };

        if bytes.is_empty() {
            return Err(GatewayError::EmptyFile);
        }
        self.storage.check_size(bytes.len() as u64)?;

        let checksum = checksum(&bytes);
        let path = self.storage.store(&bytes, filename).await?;
        debug!(
            path = %path.display(),
            source = ?source,
            checksum = &checksum[..12],
            "Input resolved"
        );

        Ok(ConversionArtifact {
            path,
            filename: filename.to_string(),
            size: bytes.len() as u64,
            checksum,
            source,
            source_url,
            content_type,
        })
    }

    /// Download `url`, enforcing the size limit against `Content-Length` and
    /// again on every received chunk. Oversized bodies are abandoned mid-read.
    async fn download(&self, url: &str) -> Result<(Vec<u8>, Option<String>), GatewayError> {
        let fetch_err = |reason: String| GatewayError::FetchError {
            url: url.to_string(),
            reason,
        };

        let parsed = reqwest::Url::parse(url).map_err(|e| fetch_err(format!("invalid URL: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(fetch_err("invalid file URL".into()));
        }

        info!(url, "Downloading input file");
        let mut response = self
            .http
            .get(parsed)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;

        if !response.status().is_success() {
            return Err(fetch_err(format!("HTTP {}", response.status())));
        }
        if let Some(len) = response.content_length() {
            self.storage.check_size(len)?;
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| fetch_err(e.to_string()))?
        {
            self.storage.check_size((bytes.len() + chunk.len()) as u64)?;
            bytes.extend_from_slice(&chunk);
        }

        Ok((bytes, content_type))
    }
}

/// Decode standard base64, ignoring surrounding whitespace and line breaks.
///
/// Payloads whose encoded length already implies more than `max_size`
/// decoded bytes are rejected before decoding.
pub fn decode_base64(encoded: &str, max_size: u64) -> Result<Vec<u8>, GatewayError> {
    let cleaned: String = encoded
        .trim()
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .collect();

    let estimated = (cleaned.len() as u64 / 4) * 3;
    if estimated > max_size.saturating_add(3) {
        return Err(GatewayError::FileTooLarge {
            size: estimated,
            max: max_size,
        });
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| GatewayError::InvalidEncoding {
            detail: e.to_string(),
        })?;

    if bytes.len() as u64 > max_size {
        return Err(GatewayError::FileTooLarge {
            size: bytes.len() as u64,
            max: max_size,
        });
    }
    Ok(bytes)
}

/// Hex SHA-256 digest used as the artifact checksum.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;

    #[test]
    fn base64_round_trips() {
        for sample in [&b"%PDF-1.4 tiny"[..], &[0u8, 255, 1, 254, 2][..], b"a"] {
            let encoded = STANDARD.encode(sample);
            let decoded = decode_base64(&encoded, 1024).unwrap();
            assert_eq!(decoded, sample);
            assert_eq!(STANDARD.encode(&decoded), encoded);
        }
    }

    #[test]
    fn base64_tolerates_line_breaks() {
        let encoded = STANDARD.encode(b"hello world, this wraps");
        let wrapped = format!("  {}\r\n{}\n", &encoded[..8], &encoded[8..]);
        assert_eq!(decode_base64(&wrapped, 1024).unwrap(), b"hello world, this wraps");
    }

    #[test]
    fn invalid_base64_is_invalid_encoding() {
        let err = decode_base64("not*base64!", 1024).unwrap_err();
        assert_eq!(err.code(), "INVALID_ENCODING");
    }

    #[test]
    fn oversized_base64_is_rejected() {
        let encoded = STANDARD.encode(vec![7u8; 100]);
        let err = decode_base64(&encoded, 99).unwrap_err();
        assert!(matches!(err, GatewayError::FileTooLarge { max: 99, .. }));
        assert!(decode_base64(&encoded, 100).is_ok());
    }

    #[test]
    fn checksum_is_sha256_hex() {
        assert_eq!(
            checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn url_metadata_includes_source_and_content_type() {
        let artifact = ConversionArtifact {
            path: PathBuf::from("/tmp/x"),
            filename: "a.pdf".into(),
            size: 3,
            checksum: "c".into(),
            source: SourceKind::Url,
            source_url: Some("https://example.com/a.pdf".into()),
            content_type: Some("application/pdf".into()),
        };
        let m = artifact.metadata();
        assert_eq!(m["source"], "url");
        assert_eq!(m["source_url"], "https://example.com/a.pdf");
        assert_eq!(m["content_type"], "application/pdf");
        assert_eq!(m["size"], 3);
    }

    #[test]
    fn base64_metadata_omits_url_fields() {
        let artifact = ConversionArtifact {
            path: PathBuf::from("/tmp/x"),
            filename: "a.pdf".into(),
            size: 3,
            checksum: "c".into(),
            source: SourceKind::Base64,
            source_url: None,
            content_type: None,
        };
        let m = artifact.metadata();
        assert_eq!(m["source"], "base64");
        assert!(!m.contains_key("source_url"));
    }
}
