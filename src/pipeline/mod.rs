//! Stages a conversion request passes through.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ client ──▶ placement
//! (store)   (Marker)   (inline / reference)
//! ```
//!
//! 1. [`input`]: turn an upload, base64 payload or URL into a stored
//!    artifact; the only stage that downloads caller-supplied URLs
//! 2. [`client`]: submit the artifact to the Marker API, retrying
//!    transport failures, then poll until the job settles
//! 3. [`placement`]: return the Markdown inline or persist it and return
//!    a locator
//!
//! [`mime`] is shared by validation and submission.

pub mod client;
pub mod input;
pub mod mime;
pub mod placement;
