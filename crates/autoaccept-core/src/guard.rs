//! Re-entrancy guard for acceptance passes.
//!
//! Only one pass may run at a time. A second request while one is in flight
//! is skipped, not queued. The flag is cleared by dropping the [`PassToken`],
//! which also happens when the task holding it panics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared in-flight flag.
#[derive(Debug, Clone, Default)]
pub struct PassGuard {
    busy: Arc<AtomicBool>,
}

/// Proof that a pass holds the guard. Releases it on drop.
#[derive(Debug)]
#[must_use = "the guard is released as soon as the token is dropped"]
pub struct PassToken {
    busy: Arc<AtomicBool>,
}

impl PassGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the guard, or `None` if a pass is already running.
    pub fn try_begin(&self) -> Option<PassToken> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PassToken {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for PassToken {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
