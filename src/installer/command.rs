//! Installer that delegates to an external program

use async_trait::async_trait;
use std::ffi::OsString;

use super::{InstallError, Installer};
use crate::core::types::ArtifactHandle;

/// Runs `program args... <artifact path>` and waits for it to exit
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    program: OsString,
    args: Vec<OsString>,
}

impl CommandInstaller {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

#[async_trait]
impl Installer for CommandInstaller {
    async fn install(&self, artifact: &ArtifactHandle) -> Result<(), InstallError> {
        if !tokio::fs::try_exists(&artifact.path).await.unwrap_or(false) {
            return Err(InstallError::MissingArtifact(artifact.path.clone()));
        }

        tracing::info!(
            program = %self.program_name(),
            artifact = %artifact.path.display(),
            "Launching installer"
        );

        let status = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(&artifact.path)
            .status()
            .await
            .map_err(|source| InstallError::Launch {
                program: self.program_name(),
                source,
            })?;

        if !status.success() {
            return Err(InstallError::Failed {
                program: self.program_name(),
                code: status.code(),
            });
        }

        tracing::info!(key = %artifact.key, "Installer finished");
        Ok(())
    }
}
