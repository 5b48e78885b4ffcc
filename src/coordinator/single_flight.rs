//! Single-flight update orchestration
//!
//! One in-flight operation per artifact key. Later callers for the same key
//! attach to the running operation and receive the same result.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;

use super::retry::RetryPolicy;
use crate::core::config::{ConfigError, ConfigResult, FetcherConfig};
use crate::core::error::{Result, UpdateError};
use crate::core::types::{ArtifactHandle, ArtifactKey, DigestAlgorithm, UpdateSpec};
use crate::transfer::{ProgressCallback, TransferError, TransferManager, TransferState};
use crate::verify::IntegrityVerifier;

type Outcome = Option<Result<ArtifactHandle>>;

struct InFlight {
    spec: UpdateSpec,
    cancel: CancellationToken,
    outcome: watch::Receiver<Outcome>,
}

struct CoordinatorInner {
    config: FetcherConfig,
    transfers: TransferManager,
    verifier: IntegrityVerifier,
    retry: RetryPolicy,
    permits: Semaphore,
    in_flight: Mutex<HashMap<ArtifactKey, InFlight>>,
}

/// Handle on an update operation, possibly shared with other callers
#[derive(Debug, Clone)]
pub struct UpdateTicket {
    key: ArtifactKey,
    cancel: CancellationToken,
    outcome: watch::Receiver<Outcome>,
}

impl UpdateTicket {
    pub fn key(&self) -> &ArtifactKey {
        &self.key
    }

    /// Cancel the operation for every caller attached to it
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the operation's terminal result
    pub async fn wait(mut self) -> Result<ArtifactHandle> {
        let outcome = match self.outcome.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(UpdateError::unknown(
                "update worker exited without reporting a result",
            ))
        })
    }
}

/// Removes the in-flight entry when the operation ends, even on panic
struct InFlightGuard {
    inner: Arc<CoordinatorInner>,
    key: ArtifactKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.lock().remove(&self.key);
    }
}

/// Ensures artifacts are present, verified and committed in the cache.
///
/// Cheap to clone; clones share the in-flight map and transfer pool.
#[derive(Clone)]
pub struct UpdateCoordinator {
    inner: Arc<CoordinatorInner>,
    progress: Option<ProgressCallback>,
}

impl UpdateCoordinator {
    /// Create a coordinator from a validated configuration
    pub fn new(config: FetcherConfig) -> ConfigResult<Self> {
        config.validate()?;
        let transfers = TransferManager::new(&config)
            .map_err(|e| ConfigError::Invalid(format!("http client: {}", e)))?;

        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                verifier: IntegrityVerifier::new(config.buffer_size),
                retry: RetryPolicy::from_config(&config.retry),
                permits: Semaphore::new(config.max_concurrent_transfers),
                in_flight: Mutex::new(HashMap::new()),
                transfers,
                config,
            }),
            progress: None,
        })
    }

    /// Set progress callback for transfers started through this handle
    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.inner.config
    }

    pub fn cache_dir(&self) -> &Path {
        self.inner.transfers.cache_dir()
    }

    pub fn transfers(&self) -> &TransferManager {
        &self.inner.transfers
    }

    /// Fetch, verify and commit `spec`, or return the cached artifact
    pub async fn ensure_update(&self, spec: UpdateSpec) -> Result<ArtifactHandle> {
        self.begin_update(spec).wait().await
    }

    /// Start (or join) the operation for `spec`'s key without waiting.
    ///
    /// Must be called from within a tokio runtime.
    pub fn begin_update(&self, spec: UpdateSpec) -> UpdateTicket {
        let key = spec.key().clone();
        let mut in_flight = self.inner.in_flight.lock();

        if let Some(existing) = in_flight.get(&key) {
            if existing.spec != spec {
                tracing::warn!(
                    key = %key,
                    running = %existing.spec.source_url(),
                    requested = %spec.source_url(),
                    "Attaching to in-flight update with a different spec"
                );
            } else {
                tracing::debug!(key = %key, "Attaching to in-flight update");
            }
            return UpdateTicket {
                key,
                cancel: existing.cancel.clone(),
                outcome: existing.outcome.clone(),
            };
        }

        let (sender, outcome) = watch::channel(None);
        let cancel = CancellationToken::new();
        in_flight.insert(
            key.clone(),
            InFlight {
                spec: spec.clone(),
                cancel: cancel.clone(),
                outcome: outcome.clone(),
            },
        );
        drop(in_flight);

        let guard = InFlightGuard {
            inner: self.inner.clone(),
            key: key.clone(),
        };
        let worker = Worker {
            inner: self.inner.clone(),
            spec,
            cancel: cancel.clone(),
            progress: self.progress.clone(),
        };

        tracing::info!(key = %key, "Update started");
        tokio::spawn(async move {
            let result = worker.execute().await;
            match &result {
                Ok(handle) => tracing::info!(
                    key = %handle.key,
                    path = %handle.path.display(),
                    size = handle.size,
                    "Update ready"
                ),
                Err(e) => tracing::warn!(
                    key = %worker.spec.key(),
                    kind = %e.kind(),
                    error = %e,
                    "Update failed"
                ),
            }
            drop(guard);
            let _ = sender.send(Some(result));
        });

        UpdateTicket {
            key,
            cancel,
            outcome,
        }
    }

    /// Cancel the in-flight operation for `key`
    pub fn cancel(&self, key: &ArtifactKey) -> bool {
        match self.inner.in_flight.lock().get(key) {
            Some(entry) => {
                tracing::info!(key = %key, "Cancelling update");
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Keys with an operation currently in flight
    pub fn in_flight(&self) -> Vec<ArtifactKey> {
        self.inner.in_flight.lock().keys().cloned().collect()
    }

    /// Delete the committed and staging files of `key`.
    ///
    /// Returns `false` without touching anything if `key` is in flight.
    pub async fn purge(&self, key: &ArtifactKey) -> Result<bool> {
        if self.inner.in_flight.lock().contains_key(key) {
            return Ok(false);
        }
        let transfers = &self.inner.transfers;
        let removed_final = remove_file(&transfers.final_path(key)).await?;
        let removed_staging = remove_file(&transfers.temp_path(key)).await?;
        Ok(removed_final || removed_staging)
    }

    /// Delete every cached artifact and staging file except those belonging
    /// to `keep` or to in-flight keys. Returns the removed paths.
    pub async fn retain_only(&self, keep: &[ArtifactKey]) -> Result<Vec<PathBuf>> {
        let busy = self.in_flight();
        let mut removed = Vec::new();

        for (path, key) in self.cache_entries().await? {
            if keep.contains(&key) || busy.contains(&key) {
                continue;
            }
            if remove_file(&path).await? {
                tracing::debug!(path = %path.display(), "Removed cached file");
                removed.push(path);
            }
        }

        Ok(removed)
    }

    /// Staging files present in the cache directory
    pub async fn list_staging(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .cache_entries()
            .await?
            .into_iter()
            .filter(|(path, _)| is_staging(path))
            .map(|(path, _)| path)
            .collect())
    }

    /// Files in the cache directory that belong to a valid key
    async fn cache_entries(&self) -> Result<Vec<(PathBuf, ArtifactKey)>> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(self.cache_dir()).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(io_failure(self.cache_dir(), e)),
        };

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| io_failure(self.cache_dir(), e))?
        {
            let path = entry.path();
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let stem = name.strip_suffix(ArtifactKey::STAGING_SUFFIX).unwrap_or(name);
            if let Ok(key) = ArtifactKey::new(stem) {
                entries.push((path, key));
            }
        }

        Ok(entries)
    }
}

/// Runs one update operation to its terminal result
struct Worker {
    inner: Arc<CoordinatorInner>,
    spec: UpdateSpec,
    cancel: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl Worker {
    async fn execute(&self) -> Result<ArtifactHandle> {
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(UpdateError::Cancelled),
            permit = self.inner.permits.acquire() => permit
                .map_err(|_| UpdateError::unknown("transfer pool closed"))?,
        };

        if let Some(handle) = self.cached().await? {
            return Ok(handle);
        }

        let state = self.fetch_with_retry().await?;
        self.verify_committed(&state).await
    }

    /// Return the committed artifact if it is present and still verifies
    async fn cached(&self) -> Result<Option<ArtifactHandle>> {
        let final_path = self.inner.transfers.final_path(self.spec.key());
        let exists = tokio::fs::try_exists(&final_path)
            .await
            .map_err(|e| io_failure(&final_path, e))?;
        if !exists {
            return Ok(None);
        }

        let verification = self
            .inner
            .verifier
            .verify_until(
                &final_path,
                self.spec.expected_digest(),
                self.spec.expected_size(),
                &self.cancel,
            )
            .await
            .ok_or(UpdateError::Cancelled)?;

        if verification.ok {
            tracing::debug!(key = %self.spec.key(), "Using cached artifact");
            return self.handle_for(final_path).await.map(Some);
        }

        tracing::warn!(
            key = %self.spec.key(),
            reason = ?verification.reason,
            "Cached artifact failed verification, discarding"
        );
        remove_file(&final_path).await?;
        Ok(None)
    }

    async fn fetch_with_retry(&self) -> Result<TransferState> {
        let transfers = &self.inner.transfers;
        let retry = &self.inner.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let ticket = transfers.begin_linked(self.spec.clone(), &self.cancel);
            let failed = match transfers.run(ticket, self.progress.clone()).await {
                Ok(state) => return Ok(state),
                Err(failed) => failed,
            };

            let error = match failed.error {
                TransferError::Cancelled => return Err(UpdateError::Cancelled),
                TransferError::Http { status } => {
                    return Err(UpdateError::HttpError { code: status })
                }
                TransferError::Io { detail } | TransferError::Request { detail } => {
                    return Err(UpdateError::Unknown { detail })
                }
                error @ TransferError::Network { .. } => error,
            };

            if !retry.allows_retry(attempt) {
                return Err(UpdateError::NetworkFailure {
                    attempts: attempt,
                    detail: error.to_string(),
                });
            }

            let delay = retry.delay_for(attempt);
            tracing::warn!(
                key = %self.spec.key(),
                attempt,
                max_attempts = retry.max_attempts(),
                staged = failed.state.bytes_written,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transfer failed, retrying"
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(UpdateError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn verify_committed(&self, state: &TransferState) -> Result<ArtifactHandle> {
        let verification = self
            .inner
            .verifier
            .verify_until(
                &state.final_path,
                self.spec.expected_digest(),
                self.spec.expected_size(),
                &self.cancel,
            )
            .await
            .ok_or(UpdateError::Cancelled)?;

        if let Err(reason) = verification.into_result() {
            tracing::warn!(
                key = %self.spec.key(),
                reason = %reason,
                "Downloaded artifact failed verification"
            );
            remove_file(&state.final_path).await?;
            return Err(UpdateError::VerificationFailed { reason });
        }

        self.handle_for(state.final_path.clone()).await
    }

    async fn handle_for(&self, path: PathBuf) -> Result<ArtifactHandle> {
        let size = tokio::fs::metadata(&path)
            .await
            .map_err(|e| io_failure(&path, e))?
            .len();

        let digest = match self.spec.expected_digest() {
            Some(digest) => digest.clone(),
            None => self
                .inner
                .verifier
                .digest_until(&path, DigestAlgorithm::Sha256, &self.cancel)
                .await
                .map_err(|e| io_failure(&path, e))?
                .ok_or(UpdateError::Cancelled)?,
        };

        Ok(ArtifactHandle {
            key: self.spec.key().clone(),
            path,
            digest,
            size,
        })
    }
}

fn is_staging(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(ArtifactKey::STAGING_SUFFIX))
        .unwrap_or(false)
}

fn io_failure(path: &Path, e: std::io::Error) -> UpdateError {
    UpdateError::unknown(format!("{}: {}", path.display(), e))
}

/// Remove a file; `Ok(false)` if it did not exist
async fn remove_file(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_failure(path, e)),
    }
}
