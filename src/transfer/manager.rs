//! Resumable HTTP transfers into the artifact cache

use dashmap::DashMap;
use futures::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::progress::{ProgressCallback, ProgressReporter};
use crate::core::config::FetcherConfig;
use crate::core::types::{ArtifactKey, UpdateSpec};

/// Error types for a single transfer attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Connect error, reset, idle timeout or truncated body
    #[error("Network error: {detail}")]
    Network { detail: String },

    #[error("Server responded with HTTP {status}")]
    Http { status: u16 },

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("IO error: {detail}")]
    Io { detail: String },

    /// The request could not be built or the client could not be created
    #[error("Invalid request: {detail}")]
    Request { detail: String },
}

impl TransferError {
    /// Only transient network failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Network { .. })
    }
}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        TransferError::Io {
            detail: e.to_string(),
        }
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            TransferError::Request {
                detail: e.to_string(),
            }
        } else {
            TransferError::Network {
                detail: e.to_string(),
            }
        }
    }
}

/// Result type for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;

/// Time-ordered identifier of one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(Uuid);

impl TransferId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Transfer lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// State of one transfer, owned by the task running it
#[derive(Debug, Clone)]
pub struct TransferState {
    pub id: TransferId,
    pub spec: UpdateSpec,
    pub bytes_written: u64,
    pub total_bytes: Option<u64>,
    pub status: TransferStatus,
    /// `<cache_dir>/<key>.part`
    pub temp_path: PathBuf,
    /// `<cache_dir>/<key>`
    pub final_path: PathBuf,
}

/// A transfer that ended without committing its file
#[derive(Error, Debug, Clone)]
#[error("transfer {} of {} failed: {}", .state.id, .state.spec.key(), .error)]
pub struct FailedTransfer {
    pub state: TransferState,
    pub error: TransferError,
}

/// A registered transfer that has not run yet.
///
/// Dropping an unrun ticket unregisters it.
#[derive(Debug)]
pub struct TransferTicket {
    id: TransferId,
    spec: UpdateSpec,
    token: CancellationToken,
    registration: Registration,
}

impl TransferTicket {
    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn key(&self) -> &ArtifactKey {
        self.spec.key()
    }

    /// Token that cancels this transfer when triggered
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }
}

struct ActiveTransfer {
    key: ArtifactKey,
    token: CancellationToken,
}

/// Removes a transfer from the active registry when its ticket or run ends
struct Registration {
    active: Arc<DashMap<TransferId, ActiveTransfer>>,
    id: TransferId,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).finish()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.active.remove(&self.id);
    }
}

/// How to treat the body of a response
enum BodyPlan {
    /// Write from `offset`, appending to the staging file
    Append { offset: u64, total: Option<u64> },
    /// Discard `discarded` staged bytes and write from zero
    Restart { discarded: u64, total: Option<u64> },
}

/// Downloads artifacts into `<cache_dir>/<key>.part` and commits them with
/// an atomic rename to `<cache_dir>/<key>`.
///
/// A staging file left by an earlier attempt is resumed with a `Range`
/// request. Retrying is the caller's business.
pub struct TransferManager {
    cache_dir: PathBuf,
    client: reqwest::Client,
    idle_timeout: Duration,
    progress_interval: Duration,
    active: Arc<DashMap<TransferId, ActiveTransfer>>,
    started: AtomicU64,
}

impl TransferManager {
    /// Create a transfer manager from configuration
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.http.connect_timeout())
            .user_agent(config.http.user_agent.clone())
            .build()
            .map_err(|e| TransferError::Request {
                detail: e.to_string(),
            })?;

        Ok(Self {
            cache_dir: config.cache_dir.clone(),
            client,
            idle_timeout: config.http.idle_timeout(),
            progress_interval: config.progress_interval(),
            active: Arc::new(DashMap::new()),
            started: AtomicU64::new(0),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Committed location of `key`
    pub fn final_path(&self, key: &ArtifactKey) -> PathBuf {
        self.cache_dir.join(key.final_file_name())
    }

    /// Staging location of `key`
    pub fn temp_path(&self, key: &ArtifactKey) -> PathBuf {
        self.cache_dir.join(key.staging_file_name())
    }

    /// Register a transfer with its own cancellation token
    pub fn begin(&self, spec: UpdateSpec) -> TransferTicket {
        self.register(spec, CancellationToken::new())
    }

    /// Register a transfer that is also cancelled when `parent` is
    pub fn begin_linked(&self, spec: UpdateSpec, parent: &CancellationToken) -> TransferTicket {
        self.register(spec, parent.child_token())
    }

    fn register(&self, spec: UpdateSpec, token: CancellationToken) -> TransferTicket {
        let id = TransferId::new();
        self.active.insert(
            id,
            ActiveTransfer {
                key: spec.key().clone(),
                token: token.clone(),
            },
        );
        self.started.fetch_add(1, Ordering::SeqCst);
        TransferTicket {
            id,
            spec,
            token,
            registration: Registration {
                active: self.active.clone(),
                id,
            },
        }
    }

    /// Register and run a transfer in one step
    pub async fn start(
        &self,
        spec: UpdateSpec,
        progress: Option<ProgressCallback>,
    ) -> std::result::Result<TransferState, FailedTransfer> {
        let ticket = self.begin(spec);
        self.run(ticket, progress).await
    }

    /// Run a registered transfer to completion, failure or cancellation
    pub async fn run(
        &self,
        ticket: TransferTicket,
        progress: Option<ProgressCallback>,
    ) -> std::result::Result<TransferState, FailedTransfer> {
        let TransferTicket {
            id,
            spec,
            token,
            registration: _registration,
        } = ticket;

        let key = spec.key().clone();
        let mut state = TransferState {
            id,
            temp_path: self.temp_path(&key),
            final_path: self.final_path(&key),
            spec,
            bytes_written: 0,
            total_bytes: None,
            status: TransferStatus::Pending,
        };
        let mut reporter = ProgressReporter::new(id, key, progress, self.progress_interval);

        state.status = TransferStatus::InProgress;
        match self.transfer(&mut state, &token, &mut reporter).await {
            Ok(()) => {
                state.status = TransferStatus::Completed;
                tracing::info!(
                    transfer_id = %id,
                    key = %state.spec.key(),
                    bytes = state.bytes_written,
                    "Transfer completed"
                );
                Ok(state)
            }
            Err(error) => {
                state.status = if error == TransferError::Cancelled {
                    TransferStatus::Cancelled
                } else {
                    TransferStatus::Failed
                };
                tracing::debug!(
                    transfer_id = %id,
                    key = %state.spec.key(),
                    bytes = state.bytes_written,
                    error = %error,
                    "Transfer ended without commit"
                );
                Err(FailedTransfer { state, error })
            }
        }
    }

    /// Request cancellation; returns false if the transfer is not active
    pub fn cancel(&self, id: TransferId) -> bool {
        match self.active.get(&id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of transfers begun since creation
    pub fn transfers_started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    /// Transfers currently registered
    pub fn active_transfers(&self) -> Vec<(TransferId, ArtifactKey)> {
        self.active
            .iter()
            .map(|entry| (*entry.key(), entry.value().key.clone()))
            .collect()
    }

    async fn transfer(
        &self,
        state: &mut TransferState,
        token: &CancellationToken,
        reporter: &mut ProgressReporter,
    ) -> Result<()> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;

        let (response, plan) = loop {
            if token.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            let offset = staging_len(&state.temp_path).await?;
            let response = self.send(state.spec.source_url(), offset, token).await?;
            let status = response.status();

            let plan = if status == StatusCode::PARTIAL_CONTENT {
                match content_range(response.headers()) {
                    Some((start, total)) if start == offset => {
                        Some(BodyPlan::Append { offset, total })
                    }
                    _ => None,
                }
            } else if status == StatusCode::RANGE_NOT_SATISFIABLE && offset > 0 {
                None
            } else if status.is_success() {
                Some(BodyPlan::Restart {
                    discarded: offset,
                    total: content_length(response.headers()),
                })
            } else {
                remove_if_exists(&state.temp_path).await?;
                tracing::warn!(
                    key = %state.spec.key(),
                    status = status.as_u16(),
                    "Server rejected artifact request"
                );
                return Err(TransferError::Http {
                    status: status.as_u16(),
                });
            };

            match plan {
                Some(plan) => break (response, plan),
                None if offset > 0 => {
                    tracing::warn!(
                        key = %state.spec.key(),
                        offset,
                        status = status.as_u16(),
                        "Resume rejected, discarding staging file"
                    );
                    remove_if_exists(&state.temp_path).await?;
                }
                None => {
                    return Err(TransferError::Http {
                        status: status.as_u16(),
                    })
                }
            }
        };

        let (mut file, offset, total) = match plan {
            BodyPlan::Append { offset, total } => {
                if offset > 0 {
                    tracing::info!(key = %state.spec.key(), offset, "Resuming transfer");
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&state.temp_path)
                    .await?;
                (file, offset, total)
            }
            BodyPlan::Restart { discarded, total } => {
                if discarded > 0 {
                    tracing::warn!(
                        key = %state.spec.key(),
                        discarded,
                        "Server ignored range, restarting from zero"
                    );
                }
                tracing::info!(
                    key = %state.spec.key(),
                    url = %state.spec.source_url(),
                    "Starting transfer"
                );
                let file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(&state.temp_path)
                    .await?;
                (file, 0, total)
            }
        };

        state.bytes_written = offset;
        state.total_bytes = total.or(state.spec.expected_size());
        reporter.begin_session(offset);

        let streamed = self
            .stream_body(response, &mut file, state, token, reporter)
            .await;
        // Staged bytes must be on disk before a retry measures the offset
        file.flush().await?;
        streamed?;

        if let Some(announced) = total {
            if state.bytes_written < announced {
                return Err(TransferError::Network {
                    detail: format!(
                        "body ended after {} of {} bytes",
                        state.bytes_written, announced
                    ),
                });
            }
        }

        file.sync_all().await?;
        drop(file);
        commit(&state.temp_path, &state.final_path).await?;
        reporter.finish(state.bytes_written, state.total_bytes);

        Ok(())
    }

    async fn stream_body(
        &self,
        response: reqwest::Response,
        file: &mut File,
        state: &mut TransferState,
        token: &CancellationToken,
        reporter: &mut ProgressReporter,
    ) -> Result<()> {
        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(TransferError::Cancelled),
                next = tokio::time::timeout(self.idle_timeout, stream.next()) => next,
            };

            let chunk = match next {
                Ok(Some(chunk)) => chunk?,
                Ok(None) => return Ok(()),
                Err(_) => {
                    return Err(TransferError::Network {
                        detail: format!(
                            "no data received for {}s",
                            self.idle_timeout.as_secs_f64()
                        ),
                    })
                }
            };

            file.write_all(&chunk).await?;
            state.bytes_written += chunk.len() as u64;
            reporter.report(state.bytes_written, state.total_bytes);
        }
    }

    async fn send(
        &self,
        url: &str,
        offset: u64,
        token: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(TransferError::Cancelled),
            sent = tokio::time::timeout(self.idle_timeout, request.send()) => match sent {
                Ok(response) => Ok(response?),
                Err(_) => Err(TransferError::Network {
                    detail: format!(
                        "no response within {}s",
                        self.idle_timeout.as_secs_f64()
                    ),
                }),
            },
        }
    }
}

/// Atomically move a finished staging file into place
async fn commit(temp_path: &Path, final_path: &Path) -> Result<()> {
    tokio::fs::rename(temp_path, final_path).await?;
    if let Some(parent) = final_path.parent() {
        // Persist the rename itself; not supported on every platform
        if let Ok(dir) = File::open(parent).await {
            let _ = dir.sync_all().await;
        }
    }
    Ok(())
}

async fn staging_len(path: &Path) -> Result<u64> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(metadata.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn content_range(headers: &HeaderMap) -> Option<(u64, Option<u64>)> {
    headers
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range)
}

/// Parse `bytes <start>-<end>/<total|*>` into the start offset and total size
pub(crate) fn parse_content_range(value: &str) -> Option<(u64, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (start, end) = range.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    if end < start {
        return None;
    }
    let total = match total.trim() {
        "*" => None,
        n => Some(n.parse().ok()?),
    };
    Some((start, total))
}
