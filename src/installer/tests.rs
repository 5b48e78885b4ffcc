//! Tests for the installer module

use super::*;
use crate::coordinator::UpdateCoordinator;
use crate::core::error::UpdateErrorKind;
use crate::manifest::{ManifestClient, Version};
use crate::test_support::{sha256_of, test_config, test_content, FixtureOptions, FixtureServer};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::TempDir;

/// Installer that records what it was asked to install
#[derive(Default)]
struct RecordingInstaller {
    installed: Mutex<Vec<ArtifactHandle>>,
    fail: bool,
}

#[async_trait]
impl Installer for RecordingInstaller {
    async fn install(&self, artifact: &ArtifactHandle) -> Result<(), InstallError> {
        self.installed.lock().push(artifact.clone());
        if self.fail {
            return Err(InstallError::Failed {
                program: "recording".to_string(),
                code: Some(1),
            });
        }
        Ok(())
    }
}

struct FlowFixture {
    artifacts: FixtureServer,
    manifests: FixtureServer,
    content: Vec<u8>,
    _temp_dir: TempDir,
    coordinator: UpdateCoordinator,
}

async fn flow_fixture(version: &str, artifact_options: FixtureOptions) -> FlowFixture {
    let content = test_content(200_000);
    let artifacts = FixtureServer::start(content.clone(), artifact_options).await;
    let manifest = serde_json::json!({
        "version": version,
        "apkUrl": artifacts.url(),
        "sha256": sha256_of(&content).hex(),
        "size": content.len(),
    });
    let manifests = FixtureServer::start(
        Vec::new(),
        FixtureOptions {
            manifest: Some(manifest.to_string()),
            ..Default::default()
        },
    )
    .await;

    let temp_dir = TempDir::new().unwrap();
    let coordinator = UpdateCoordinator::new(test_config(temp_dir.path())).unwrap();

    FlowFixture {
        artifacts,
        manifests,
        content,
        _temp_dir: temp_dir,
        coordinator,
    }
}

fn flow(fixture: &FlowFixture, installer: Arc<dyn Installer>) -> UpdateFlow {
    let client = ManifestClient::new(
        fixture.manifests.manifest_url(),
        &fixture.coordinator.config().http,
    )
    .unwrap();
    UpdateFlow::new(client, fixture.coordinator.clone(), installer)
}

// ============================================================================
// Update Flow Tests
// ============================================================================

#[tokio::test]
async fn test_flow_up_to_date_downloads_nothing() {
    let fixture = flow_fixture("1.0.0", FixtureOptions::default()).await;
    let installer = Arc::new(RecordingInstaller::default());

    let outcome = flow(&fixture, installer.clone())
        .run(&Version::new(1, 0, 0))
        .await
        .unwrap();

    assert_eq!(outcome, FlowOutcome::UpToDate);
    assert_eq!(fixture.artifacts.hits(), 0);
    assert!(installer.installed.lock().is_empty());
}

#[tokio::test]
async fn test_flow_installs_newer_release() {
    let fixture = flow_fixture("1.1.0", FixtureOptions::default()).await;
    let installer = Arc::new(RecordingInstaller::default());

    let outcome = flow(&fixture, installer.clone())
        .run(&Version::new(1, 0, 0))
        .await
        .unwrap();

    let FlowOutcome::Installed(handle) = outcome else {
        panic!("Expected Installed, got {:?}", outcome);
    };
    assert_eq!(handle.key.as_str(), "app-1.1.0");
    assert_eq!(tokio::fs::read(&handle.path).await.unwrap(), fixture.content);
    assert_eq!(installer.installed.lock().as_slice(), &[handle]);
}

#[tokio::test]
async fn test_flow_check_reports_manifest() {
    let fixture = flow_fixture("2.0.0-rc.1", FixtureOptions::default()).await;
    let installer = Arc::new(RecordingInstaller::default());
    let flow = flow(&fixture, installer);

    let available = flow.check(&Version::new(1, 9, 0)).await.unwrap().unwrap();
    assert_eq!(available.version, Version::with_prerelease(2, 0, 0, "rc.1"));
    assert!(flow.check(&Version::new(2, 0, 0)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_flow_propagates_fetch_failure() {
    let options = FixtureOptions {
        status: Some(500),
        ..Default::default()
    };
    let fixture = flow_fixture("1.1.0", options).await;
    let installer = Arc::new(RecordingInstaller::default());

    let err = flow(&fixture, installer.clone())
        .run(&Version::new(1, 0, 0))
        .await
        .unwrap_err();

    match err {
        FlowError::Update(e) => assert_eq!(e.kind(), UpdateErrorKind::HttpError(500)),
        other => panic!("Expected update error, got {:?}", other),
    }
    assert!(installer.installed.lock().is_empty());
}

#[tokio::test]
async fn test_flow_propagates_install_failure() {
    let fixture = flow_fixture("1.1.0", FixtureOptions::default()).await;
    let installer = Arc::new(RecordingInstaller {
        fail: true,
        ..Default::default()
    });

    let err = flow(&fixture, installer)
        .run(&Version::new(1, 0, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Install(InstallError::Failed { .. })));
}

// ============================================================================
// Command Installer Tests
// ============================================================================

async fn handle_in(temp_dir: &TempDir) -> ArtifactHandle {
    let path = temp_dir.path().join("app-1.0.0");
    tokio::fs::write(&path, b"payload").await.unwrap();
    ArtifactHandle {
        key: crate::core::types::ArtifactKey::new("app-1.0.0").unwrap(),
        path,
        digest: sha256_of(b"payload"),
        size: 7,
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_installer_passes_artifact_path() {
    let temp_dir = TempDir::new().unwrap();
    let handle = handle_in(&temp_dir).await;

    // The artifact path is appended and becomes $0 of the script
    let installer = CommandInstaller::new("sh").args(["-c", "test -s \"$0\""]);
    installer.install(&handle).await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_installer_nonzero_exit() {
    let temp_dir = TempDir::new().unwrap();
    let handle = handle_in(&temp_dir).await;

    let installer = CommandInstaller::new("sh").arg("-c").arg("exit 3");
    let err = installer.install(&handle).await.unwrap_err();
    assert!(matches!(err, InstallError::Failed { code: Some(3), .. }));
}

#[tokio::test]
async fn test_command_installer_missing_program() {
    let temp_dir = TempDir::new().unwrap();
    let handle = handle_in(&temp_dir).await;

    let installer = CommandInstaller::new("definitely-not-an-installer-binary");
    let err = installer.install(&handle).await.unwrap_err();
    assert!(matches!(err, InstallError::Launch { .. }));
}

#[tokio::test]
async fn test_command_installer_missing_artifact() {
    let temp_dir = TempDir::new().unwrap();
    let mut handle = handle_in(&temp_dir).await;
    handle.path = temp_dir.path().join("gone");

    let err = CommandInstaller::new("sh").install(&handle).await.unwrap_err();
    assert!(matches!(err, InstallError::MissingArtifact(_)));
}
