//! Integrity verification of completed artifacts

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::core::error::VerificationFailure;
use crate::core::types::{Digest, DigestAlgorithm};

/// Outcome of one verification pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub ok: bool,
    pub reason: Option<VerificationFailure>,
}

impl VerificationResult {
    pub fn passed() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    pub fn failed(reason: VerificationFailure) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
        }
    }

    /// Convert into a `Result` for `?`-style handling
    pub fn into_result(self) -> Result<(), VerificationFailure> {
        match self.reason {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }
}

/// Checks a file against an expected size and digest.
///
/// Read-only: verifying the same unmodified file always gives the same answer.
#[derive(Debug, Clone)]
pub struct IntegrityVerifier {
    buffer_size: usize,
}

impl IntegrityVerifier {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    /// Verify `path`; size is checked first without reading content
    pub async fn verify(
        &self,
        path: &Path,
        expected_digest: Option<&Digest>,
        expected_size: Option<u64>,
    ) -> VerificationResult {
        let never = CancellationToken::new();
        self.verify_until(path, expected_digest, expected_size, &never)
            .await
            .unwrap_or_else(|| {
                VerificationResult::failed(VerificationFailure::FileUnreadable {
                    detail: "verification interrupted".to_string(),
                })
            })
    }

    /// Like [`verify`](Self::verify) but returns `None` if `cancel` fires
    /// while the digest is being computed
    pub async fn verify_until(
        &self,
        path: &Path,
        expected_digest: Option<&Digest>,
        expected_size: Option<u64>,
        cancel: &CancellationToken,
    ) -> Option<VerificationResult> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => {
                return Some(VerificationResult::failed(VerificationFailure::FileUnreadable {
                    detail: format!("{} is not a regular file", path.display()),
                }))
            }
            Err(e) => {
                return Some(VerificationResult::failed(VerificationFailure::FileUnreadable {
                    detail: format!("{}: {}", path.display(), e),
                }))
            }
        };

        if let Some(expected) = expected_size {
            if metadata.len() != expected {
                tracing::debug!(
                    path = %path.display(),
                    expected,
                    actual = metadata.len(),
                    "Size mismatch, skipping digest"
                );
                return Some(VerificationResult::failed(VerificationFailure::SizeMismatch {
                    expected,
                    actual: metadata.len(),
                }));
            }
        }

        let Some(expected) = expected_digest else {
            return Some(VerificationResult::passed());
        };

        match self.digest_until(path, expected.algorithm(), cancel).await {
            Ok(Some(actual)) if &actual == expected => Some(VerificationResult::passed()),
            Ok(Some(actual)) => Some(VerificationResult::failed(
                VerificationFailure::DigestMismatch {
                    expected: expected.clone(),
                    actual,
                },
            )),
            Ok(None) => None,
            Err(e) => Some(VerificationResult::failed(VerificationFailure::FileUnreadable {
                detail: format!("{}: {}", path.display(), e),
            })),
        }
    }

    /// Compute the digest of a whole file
    pub async fn digest_file(
        &self,
        path: &Path,
        algorithm: DigestAlgorithm,
    ) -> std::io::Result<Digest> {
        let never = CancellationToken::new();
        self.digest_until(path, algorithm, &never).await?.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Interrupted, "digest interrupted")
        })
    }

    /// Digest `path` chunk by chunk, stopping early if cancelled
    pub async fn digest_until(
        &self,
        path: &Path,
        algorithm: DigestAlgorithm,
        cancel: &CancellationToken,
    ) -> std::io::Result<Option<Digest>> {
        let mut file = File::open(path).await?;
        let mut hasher = algorithm.hasher();
        let mut buffer = vec![0u8; self.buffer_size];

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let n = file.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(Some(hasher.finalize()))
    }
}

impl Default for IntegrityVerifier {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}
