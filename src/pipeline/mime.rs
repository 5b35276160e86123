//! MIME detection and filename validation.
//!
//! Detection order: content sniff, then extension lookup, then
//! `application/octet-stream`. Sniffing only recognises the formats the
//! gateway accepts; anything else falls through to the extension table.

use crate::error::GatewayError;
use std::path::Path;

pub const PDF: &str = "application/pdf";
pub const DOC: &str = "application/msword";
pub const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const TXT: &str = "text/plain";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Accepted extensions and their MIME types.
pub const SUPPORTED: &[(&str, &str)] = &[("pdf", PDF), ("docx", DOCX), ("doc", DOC), ("txt", TXT)];

/// Characters that may not appear in a client-supplied filename.
const FORBIDDEN: &[&str] = &["..", "/", "\\", ":", "*", "?", "\"", "<", ">", "|", "\0"];

/// Lower-cased extension of `filename`, if any.
pub fn extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// MIME type for a supported extension.
pub fn from_extension(filename: &str) -> Option<&'static str> {
    let ext = extension(filename)?;
    SUPPORTED
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
}

/// Identify a supported format from the leading bytes of the file.
pub fn sniff(bytes: &[u8], filename: &str) -> Option<&'static str> {
    if bytes.starts_with(b"%PDF") {
        return Some(PDF);
    }
    if bytes.starts_with(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]) {
        return Some(DOC);
    }
    if bytes.starts_with(b"PK\x03\x04") {
        // OOXML containers are zip files whose entry names start with word/
        let head = &bytes[..bytes.len().min(64 * 1024)];
        if head.windows(5).any(|w| w == b"word/") {
            return Some(DOCX);
        }
        return None;
    }
    // Plain text has no signature; only trust it when the name agrees.
    if from_extension(filename) == Some(TXT)
        && !bytes.contains(&0)
        && std::str::from_utf8(&bytes[..bytes.len().min(8 * 1024)]).is_ok()
    {
        return Some(TXT);
    }
    None
}

/// Detect the MIME type sent upstream for an artifact.
pub fn detect(filename: &str, bytes: &[u8]) -> &'static str {
    sniff(bytes, filename)
        .or_else(|| from_extension(filename))
        .unwrap_or(OCTET_STREAM)
}

/// Validate a client-supplied filename: non-empty, no path or reserved
/// characters, and a supported extension.
pub fn validate_filename(filename: &str) -> Result<(), GatewayError> {
    let name = filename.trim();
    if name.is_empty() {
        return Err(GatewayError::InvalidRequest("filename cannot be empty".into()));
    }
    if let Some(bad) = FORBIDDEN.iter().find(|c| name.contains(*c)) {
        return Err(GatewayError::InvalidRequest(format!(
            "filename contains invalid character: {bad:?}"
        )));
    }
    if from_extension(name).is_none() {
        return Err(GatewayError::UnsupportedFormat {
            filename: name.to_string(),
        });
    }
    Ok(())
}
