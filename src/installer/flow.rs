//! End-to-end update flow: check, fetch, verify, install

use std::sync::Arc;
use thiserror::Error;

use super::{InstallError, Installer};
use crate::coordinator::UpdateCoordinator;
use crate::core::error::UpdateError;
use crate::core::types::ArtifactHandle;
use crate::manifest::{ManifestClient, ManifestError, UpdateManifest, Version};

/// Error types for the update flow
#[derive(Error, Debug)]
pub enum FlowError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Update(#[from] UpdateError),

    #[error(transparent)]
    Install(#[from] InstallError),
}

/// How a flow run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// The installed version is current
    UpToDate,
    /// A newer artifact was fetched, verified and installed
    Installed(ArtifactHandle),
}

pub struct UpdateFlow {
    manifest: ManifestClient,
    coordinator: UpdateCoordinator,
    installer: Arc<dyn Installer>,
    allow_unverified: bool,
}

impl UpdateFlow {
    pub fn new(
        manifest: ManifestClient,
        coordinator: UpdateCoordinator,
        installer: Arc<dyn Installer>,
    ) -> Self {
        Self {
            manifest,
            coordinator,
            installer,
            allow_unverified: false,
        }
    }

    /// Accept manifests that publish neither digest nor size
    pub fn allow_unverified(mut self, allow: bool) -> Self {
        self.allow_unverified = allow;
        self
    }

    /// The published release, if it is newer than `current`
    pub async fn check(&self, current: &Version) -> Result<Option<UpdateManifest>, FlowError> {
        let manifest = self.manifest.fetch().await?;
        if manifest.is_newer_than(current) {
            tracing::info!(
                current = %current,
                available = %manifest.version,
                "Update available"
            );
            Ok(Some(manifest))
        } else {
            tracing::debug!(current = %current, published = %manifest.version, "Up to date");
            Ok(None)
        }
    }

    /// Check, then fetch, verify and install the newer release if any
    pub async fn run(&self, current: &Version) -> Result<FlowOutcome, FlowError> {
        let Some(manifest) = self.check(current).await? else {
            return Ok(FlowOutcome::UpToDate);
        };

        let spec = manifest.to_spec(self.allow_unverified)?;
        let artifact = self.coordinator.ensure_update(spec).await?;
        self.installer.install(&artifact).await?;

        tracing::info!(version = %manifest.version, "Update installed");
        Ok(FlowOutcome::Installed(artifact))
    }
}
