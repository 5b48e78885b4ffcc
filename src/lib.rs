//! update-fetcher - resumable, verified update artifact fetching
//!
//! This crate provides the download-and-verify core of an in-app updater:
//! - Resumable HTTP transfers with cancellation and progress
//! - Size and digest verification before anything is handed out
//! - Single-flight `ensure_update` per artifact with retry and backoff
//! - Version manifest checks and an installer seam

pub mod coordinator;
pub mod core;
pub mod installer;
pub mod logging;
pub mod manifest;
pub mod transfer;
pub mod verify;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used items
pub use coordinator::{RetryPolicy, UpdateCoordinator, UpdateTicket};
pub use core::config::FetcherConfig;
pub use core::error::{Result, UpdateError, UpdateErrorKind, VerificationFailure};
pub use core::types::{ArtifactHandle, ArtifactKey, Digest, DigestAlgorithm, SpecError, UpdateSpec};
pub use installer::{CommandInstaller, FlowOutcome, Installer, UpdateFlow};
pub use manifest::{ManifestClient, UpdateManifest, Version};
pub use transfer::{TransferManager, TransferProgress};
pub use verify::{IntegrityVerifier, VerificationResult};
