//! Execution state identity and cancellation
//!
//! Every execution context runs on behalf of exactly one state. Shared
//! values remember which state currently holds them, so the identity must be
//! cheap to copy and compare.

use crate::error::{ConcurrencyError, Result};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

static NEXT_STATE_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of an execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(u64);

impl StateId {
    /// Allocate a fresh, process-unique state id
    pub fn next() -> Self {
        StateId(NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value (for logging)
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state#{}", self.0)
    }
}

#[derive(Debug, Default)]
struct CancellationInner {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

/// Cancellation signal shared by an execution context and its blocking waits
///
/// Cloning yields a handle to the same signal. Cancelling wakes every thread
/// parked in [`CancellationToken::sleep`].
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<CancellationInner>,
}

impl CancellationToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation (idempotent)
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock.lock();
        self.inner.cond.notify_all();
    }

    /// Whether cancellation was signalled
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` if cancellation was signalled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ConcurrencyError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for at most `duration`, returning early on cancellation
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let mut guard = self.inner.lock.lock();
        if !self.is_cancelled() {
            self.inner.cond.wait_for(&mut guard, duration);
        }
        drop(guard);
        self.check()
    }
}
