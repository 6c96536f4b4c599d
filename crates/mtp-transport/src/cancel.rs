//! Cancellation token shared between a transfer and its abort handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Clonable cancellation flag.
///
/// The worker thread passes the token into every blocking transport call and
/// checks it at chunk boundaries; another thread cancels it to make the worker
/// give up promptly.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Re-arm the token for the next transaction
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}
