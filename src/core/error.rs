//! Error types for update-fetcher
//!
//! `UpdateError` is the terminal failure of an update operation. It is
//! `Clone` because one result is delivered to every caller attached to the
//! same in-flight key.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::Digest;

/// Result type alias for update operations
pub type Result<T> = std::result::Result<T, UpdateError>;

/// Why a completed artifact was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationFailure {
    #[error("size mismatch: expected {expected} bytes, found {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch { expected: Digest, actual: Digest },

    #[error("file unreadable: {detail}")]
    FileUnreadable { detail: String },
}

/// Terminal failure of `UpdateCoordinator::ensure_update`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    #[error("Network failure after {attempts} attempt(s): {detail}")]
    NetworkFailure { attempts: u32, detail: String },

    #[error("Server responded with HTTP {code}")]
    HttpError { code: u16 },

    #[error("Artifact failed verification: {reason}")]
    VerificationFailed { reason: VerificationFailure },

    #[error("Update cancelled")]
    Cancelled,

    #[error("Update failed: {detail}")]
    Unknown { detail: String },
}

/// Classification of an [`UpdateError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateErrorKind {
    NetworkFailure,
    HttpError(u16),
    VerificationFailed,
    Cancelled,
    Unknown,
}

impl UpdateError {
    pub fn kind(&self) -> UpdateErrorKind {
        match self {
            UpdateError::NetworkFailure { .. } => UpdateErrorKind::NetworkFailure,
            UpdateError::HttpError { code } => UpdateErrorKind::HttpError(*code),
            UpdateError::VerificationFailed { .. } => UpdateErrorKind::VerificationFailed,
            UpdateError::Cancelled => UpdateErrorKind::Cancelled,
            UpdateError::Unknown { .. } => UpdateErrorKind::Unknown,
        }
    }

    pub(crate) fn unknown(detail: impl Into<String>) -> Self {
        UpdateError::Unknown {
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for UpdateErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateErrorKind::NetworkFailure => write!(f, "network_failure"),
            UpdateErrorKind::HttpError(code) => write!(f, "http_error({})", code),
            UpdateErrorKind::VerificationFailed => write!(f, "verification_failed"),
            UpdateErrorKind::Cancelled => write!(f, "cancelled"),
            UpdateErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}
