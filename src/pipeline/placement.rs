//! Output placement: return Markdown inline or store it and return a locator.

use crate::error::GatewayError;
use crate::storage::TempStorage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// How the caller wants the converted Markdown delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMethod {
    /// Content in the response body.
    Inline,
    /// Content stored server-side; response carries `/outputs/{name}`.
    Reference,
    /// Inline when it fits `max_inline_size`, reference otherwise. (default)
    #[default]
    Auto,
}

impl fmt::Display for OutputMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputMethod::Inline => "inline",
            OutputMethod::Reference => "reference",
            OutputMethod::Auto => "auto",
        })
    }
}

impl FromStr for OutputMethod {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(OutputMethod::Inline),
            "reference" => Ok(OutputMethod::Reference),
            "auto" => Ok(OutputMethod::Auto),
            other => Err(GatewayError::InvalidRequest(format!(
                "output_method must be inline, reference or auto, got '{other}'"
            ))),
        }
    }
}

/// Where the content ended up. Exactly one of content/locator exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Inline { content: String },
    Reference { locator: String },
}

/// Outcome of [`place`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPlacementResult {
    pub placement: Placement,
    /// UTF-8 byte length of the Markdown.
    pub content_size: u64,
}

impl OutputPlacementResult {
    /// The method actually applied (never [`OutputMethod::Auto`]).
    pub fn method(&self) -> OutputMethod {
        match self.placement {
            Placement::Inline { .. } => OutputMethod::Inline,
            Placement::Reference { .. } => OutputMethod::Reference,
        }
    }

    pub fn inline_content(&self) -> Option<&str> {
        match &self.placement {
            Placement::Inline { content } => Some(content),
            Placement::Reference { .. } => None,
        }
    }

    pub fn locator(&self) -> Option<&str> {
        match &self.placement {
            Placement::Reference { locator } => Some(locator),
            Placement::Inline { .. } => None,
        }
    }
}

/// Resolve `auto` against the content size. Explicit choices win.
pub fn decide(requested: OutputMethod, content_size: u64, max_inline_size: u64) -> OutputMethod {
    match requested {
        OutputMethod::Auto if content_size <= max_inline_size => OutputMethod::Inline,
        OutputMethod::Auto => OutputMethod::Reference,
        explicit => explicit,
    }
}

/// Place `content` according to `requested`, storing it when the decision
/// is [`OutputMethod::Reference`].
pub async fn place(
    storage: &TempStorage,
    content: String,
    filename: &str,
    requested: OutputMethod,
    max_inline_size: u64,
) -> Result<OutputPlacementResult, GatewayError> {
    let content_size = content.len() as u64;
    let method = decide(requested, content_size, max_inline_size);
    debug!(%requested, %method, content_size, max_inline_size, "Output placement decided");

    let placement = match method {
        OutputMethod::Reference => {
            let stored = storage.store_output(&content, filename).await?;
            Placement::Reference {
                locator: stored.locator(),
            }
        }
        _ => Placement::Inline { content },
    };

    Ok(OutputPlacementResult {
        placement,
        content_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn auto_threshold_is_inclusive() {
        assert_eq!(decide(OutputMethod::Auto, 10, 10), OutputMethod::Inline);
        assert_eq!(decide(OutputMethod::Auto, 11, 10), OutputMethod::Reference);
        assert_eq!(decide(OutputMethod::Auto, 0, 0), OutputMethod::Inline);
    }

    #[test]
    fn auto_decision_is_deterministic() {
        for size in [0u64, 1, 1023, 1024, 1025, 1 << 20] {
            let first = decide(OutputMethod::Auto, size, 1024);
            for _ in 0..3 {
                assert_eq!(decide(OutputMethod::Auto, size, 1024), first);
            }
        }
    }

    #[test]
    fn explicit_choice_overrides_size() {
        assert_eq!(decide(OutputMethod::Reference, 1, 1 << 20), OutputMethod::Reference);
        assert_eq!(decide(OutputMethod::Inline, 1 << 30, 10), OutputMethod::Inline);
    }

    #[test]
    fn parses_and_displays() {
        assert_eq!("Reference".parse::<OutputMethod>().unwrap(), OutputMethod::Reference);
        assert_eq!(OutputMethod::Auto.to_string(), "auto");
        assert!("stream".parse::<OutputMethod>().is_err());
    }

    #[tokio::test]
    async fn reference_stores_even_a_single_byte() {
        let dir = TempDir::new().unwrap();
        let storage = TempStorage::init(dir.path(), 1024).await.unwrap();
        let r = place(&storage, "x".into(), "a.pdf", OutputMethod::Reference, 1 << 20)
            .await
            .unwrap();
        assert_eq!(r.method(), OutputMethod::Reference);
        assert!(r.inline_content().is_none());
        let locator = r.locator().unwrap();
        let name = locator.strip_prefix("/outputs/").unwrap();
        assert_eq!(storage.read_output(name).await.unwrap(), "x");
    }

    #[tokio::test]
    async fn inline_has_no_storage_side_effect() {
        let dir = TempDir::new().unwrap();
        let storage = TempStorage::init(dir.path(), 1024).await.unwrap();
        let big = "é".repeat(100);
        let r = place(&storage, big.clone(), "a.pdf", OutputMethod::Inline, 10)
            .await
            .unwrap();
        assert_eq!(r.inline_content(), Some(big.as_str()));
        assert_eq!(r.content_size, 200, "size counts UTF-8 bytes");
        assert_eq!(storage.usage().await.unwrap().output_file_count, 0);
    }
}
