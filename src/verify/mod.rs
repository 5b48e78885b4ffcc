//! Integrity verification
//!
//! Decides whether a completed artifact is trustworthy enough to install:
//! - Size check as a cheap fast-path rejection
//! - Streaming sha256/blake3 digest comparison
//! - Cancellable digest computation for large files

mod verifier;


pub use crate::core::error::VerificationFailure;
pub use verifier::{IntegrityVerifier, VerificationResult};
