//! Cooperative cancellation.

use super::ConversionError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancel flag, polled by the pipeline between codec calls.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// `Err(Canceled)` once cancellation was requested.
    pub fn check(&self) -> Result<(), ConversionError> {
        if self.is_canceled() {
            Err(ConversionError::Canceled)
        } else {
            Ok(())
        }
    }
}
