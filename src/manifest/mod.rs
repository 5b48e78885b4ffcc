//! Version manifest
//!
//! The update server publishes a small JSON document naming the latest
//! version and where its artifact lives:
//!
//! ```json
//! { "version": "1.4.0", "apkUrl": "https://example.com/app-1.4.0.apk",
//!   "sha256": "…", "size": 18874368 }
//! ```

mod client;
mod version;


use thiserror::Error;

use crate::core::types::SpecError;

pub use client::{ManifestClient, UpdateManifest};
pub use version::Version;

/// Error types for manifest handling
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Manifest request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Manifest server responded with HTTP {status}")]
    Status { status: u16 },

    #[error("Malformed manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Manifest does not describe a usable artifact: {0}")]
    Spec(#[from] SpecError),
}

/// Result type for manifest operations
pub type Result<T> = std::result::Result<T, ManifestError>;
