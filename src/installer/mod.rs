//! Installation of verified artifacts
//!
//! This module provides:
//! - The `Installer` seam that receives an `ArtifactHandle`
//! - `CommandInstaller`, which hands the artifact to an external program
//! - `UpdateFlow`: manifest check, fetch, verify, install

mod command;
mod flow;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use crate::core::types::ArtifactHandle;

pub use command::CommandInstaller;
pub use flow::{FlowError, FlowOutcome, UpdateFlow};

/// Error types for installation
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Failed to launch installer {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Installer {program} exited unsuccessfully (code {code:?})")]
    Failed { program: String, code: Option<i32> },

    #[error("Artifact not found: {}", .0.display())]
    MissingArtifact(PathBuf),
}

/// Receives a verified artifact and installs it
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(&self, artifact: &ArtifactHandle) -> Result<(), InstallError>;
}
