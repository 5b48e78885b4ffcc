//! Verified artifact handed to installers

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::digest::Digest;
use super::spec::ArtifactKey;

/// A verified, ready-to-install artifact on local disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHandle {
    /// Key the artifact was fetched under
    pub key: ArtifactKey,
    /// Absolute path of the committed file
    pub path: PathBuf,
    /// Expected digest if one was given, otherwise sha256 of the file
    pub digest: Digest,
    /// File size in bytes
    pub size: u64,
}

impl ArtifactHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}
