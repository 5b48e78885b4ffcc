//! update-fetcher core module
//!
//! Shared pieces used by every component:
//! - Configuration management
//! - Error types
//! - Request, digest and artifact types
//! - Small utilities

pub mod config;
pub mod error;
pub mod types;
pub mod utils;

pub use config::{ConfigError, FetcherConfig, HttpConfig, RetryConfig};
pub use error::{Result, UpdateError, UpdateErrorKind, VerificationFailure};
pub use types::{ArtifactHandle, ArtifactKey, Digest, DigestAlgorithm, SpecError, UpdateSpec};
