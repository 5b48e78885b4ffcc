//! Core data types for update-fetcher
//!
//! Requests (`UpdateSpec`), identities (`ArtifactKey`), digests and the
//! verified `ArtifactHandle` handed to installers.

pub mod artifact;
pub mod digest;
pub mod spec;

pub use artifact::ArtifactHandle;
pub use digest::{Digest, DigestAlgorithm, DigestHasher};
pub use spec::{ArtifactKey, SpecError, UpdateSpec, UpdateSpecBuilder};
