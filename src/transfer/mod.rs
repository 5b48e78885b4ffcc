//! Artifact transfer
//!
//! This module provides:
//! - Streaming HTTP downloads into a per-key staging file
//! - Resume via `Range` requests, with fallback when the server refuses
//! - Cooperative cancellation that also interrupts stalled reads
//! - Throttled progress reporting

mod manager;
mod progress;


pub use manager::{
    FailedTransfer, TransferError, TransferId, TransferManager, TransferState, TransferStatus,
    TransferTicket,
};
pub use progress::{ProgressCallback, TransferProgress};
