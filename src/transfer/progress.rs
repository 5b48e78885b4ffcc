//! Progress reporting for running transfers

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::TransferId;
use crate::core::types::ArtifactKey;
use crate::core::utils::calculate_percentage;

/// Snapshot of a running transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferProgress {
    pub transfer_id: TransferId,
    pub key: ArtifactKey,
    /// Bytes in the staging file, including any resumed prefix
    pub bytes_written: u64,
    /// Full artifact size when the server announced it
    pub total_bytes: Option<u64>,
    /// 0-100, or 0 when the total is unknown
    pub percentage: u8,
    /// Average speed of the current attempt in bytes/second
    pub speed_bps: u64,
}

/// Progress callback type
pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Emits at most one report per interval, plus a forced final one
pub(crate) struct ProgressReporter {
    transfer_id: TransferId,
    key: ArtifactKey,
    callback: Option<ProgressCallback>,
    interval: Duration,
    started_at: Instant,
    last_emit: Option<Instant>,
    session_start_bytes: u64,
}

impl ProgressReporter {
    pub(crate) fn new(
        transfer_id: TransferId,
        key: ArtifactKey,
        callback: Option<ProgressCallback>,
        interval: Duration,
    ) -> Self {
        Self {
            transfer_id,
            key,
            callback,
            interval,
            started_at: Instant::now(),
            last_emit: None,
            session_start_bytes: 0,
        }
    }

    /// Reset speed accounting at the start of a response body
    pub(crate) fn begin_session(&mut self, offset: u64) {
        self.started_at = Instant::now();
        self.session_start_bytes = offset;
    }

    pub(crate) fn report(&mut self, bytes_written: u64, total_bytes: Option<u64>) {
        let now = Instant::now();
        if let Some(last) = self.last_emit {
            if now.duration_since(last) < self.interval {
                return;
            }
        }
        self.emit(now, bytes_written, total_bytes);
    }

    pub(crate) fn finish(&mut self, bytes_written: u64, total_bytes: Option<u64>) {
        self.emit(Instant::now(), bytes_written, total_bytes);
    }

    fn emit(&mut self, now: Instant, bytes_written: u64, total_bytes: Option<u64>) {
        let Some(callback) = &self.callback else {
            return;
        };
        self.last_emit = Some(now);

        let elapsed = now.duration_since(self.started_at).as_secs_f64();
        let session_bytes = bytes_written.saturating_sub(self.session_start_bytes);
        let speed_bps = if elapsed > 0.0 {
            (session_bytes as f64 / elapsed) as u64
        } else {
            0
        };

        callback(TransferProgress {
            transfer_id: self.transfer_id,
            key: self.key.clone(),
            bytes_written,
            total_bytes,
            percentage: total_bytes
                .map(|total| calculate_percentage(bytes_written, total))
                .unwrap_or(0),
            speed_bps,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn collecting() -> (ProgressCallback, Arc<Mutex<Vec<TransferProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |p| sink.lock().push(p));
        (callback, seen)
    }

    #[test]
    fn test_reports_are_throttled() {
        let (callback, seen) = collecting();
        let key = ArtifactKey::new("app").unwrap();
        let mut reporter =
            ProgressReporter::new(TransferId::new(), key, Some(callback), Duration::from_secs(60));

        reporter.report(10, Some(100));
        reporter.report(20, Some(100));
        reporter.report(30, Some(100));
        assert_eq!(seen.lock().len(), 1);

        reporter.finish(100, Some(100));
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].percentage, 100);
    }

    #[test]
    fn test_unknown_total_reports_zero_percent() {
        let (callback, seen) = collecting();
        let key = ArtifactKey::new("app").unwrap();
        let mut reporter =
            ProgressReporter::new(TransferId::new(), key, Some(callback), Duration::ZERO);

        reporter.report(4096, None);
        assert_eq!(seen.lock()[0].percentage, 0);
        assert_eq!(seen.lock()[0].total_bytes, None);
    }

    #[test]
    fn test_no_callback_is_noop() {
        let key = ArtifactKey::new("app").unwrap();
        let mut reporter = ProgressReporter::new(TransferId::new(), key, None, Duration::ZERO);
        reporter.report(1, Some(2));
        reporter.finish(2, Some(2));
    }
}
