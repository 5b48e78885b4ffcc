//! Update coordination
//!
//! This module provides:
//! - `ensure_update` with one in-flight operation per artifact key
//! - Retry with exponential backoff around resumable transfers
//! - Mandatory verification before an artifact is handed out
//! - Cache retention helpers

mod retry;
mod single_flight;


pub use retry::RetryPolicy;
pub use single_flight::{UpdateCoordinator, UpdateTicket};
