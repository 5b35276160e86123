//! # markdown-gateway
//!
//! HTTP gateway that converts documents (PDF, DOCX, DOC, TXT) to Markdown by
//! delegating to the Marker conversion API.
//!
//! Callers submit a file as a multipart upload, a base64 payload or a URL.
//! The gateway stores it under a managed temp directory, submits it to
//! Marker, polls until the job finishes, and hands the Markdown back either
//! inline or as a `/outputs/{name}` locator that can be fetched later.
//!
//! ## Request Lifecycle
//!
//! ```text
//! request
//!  │
//!  ├─ 1. Validate  filename, format, request_id, sizes
//!  ├─ 2. Resolve   upload / base64 / URL → stored artifact
//!  ├─ 3. Convert   submit (retried on transport errors) → poll
//!  ├─ 4. Place     inline or reference, per output_method
//!  └─ 5. Cleanup   artifact deleted exactly once
//! ```
//!
//! Stored outputs outlive the request and are evicted by the background
//! [`sweeper`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use markdown_gateway::{server, Gateway, GatewayConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig::builder()
//!         .api_key(std::env::var("MARKER_API_KEY")?)
//!         .service_token("change-me")
//!         .build()?;
//!     let gateway = Arc::new(Gateway::new(config).await?);
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
//!     axum::serve(listener, server::router(gateway)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mdgate` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod server;
pub mod storage;
pub mod sweeper;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{GatewayConfig, GatewayConfigBuilder};
pub use convert::{Gateway, Reply};
pub use error::GatewayError;
pub use output::{ConversionOutcome, ConvertRequest, ConvertResponse, UploadRequest};
pub use pipeline::placement::OutputMethod;
pub use storage::TempStorage;
