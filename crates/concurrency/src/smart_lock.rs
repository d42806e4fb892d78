//! Two-tier lock for values that may become shared
//!
//! A value starts **private**: it is only reachable from the state that
//! created it, so locking is a no-op. When the value is exposed to another
//! execution context it is **shared** exactly once; from then on `lock`
//! provides real mutual exclusion keyed by the holding state.
//!
//! ```text
//! Private ──share()──▶ Shared
//!    ▲                    │
//!    └────── never ───────┘
//! ```
//!
//! The lock is re-entrant for the holding state so that a value can call
//! back into itself while already locked (e.g. sharing initializers that walk
//! nested values). Waiting for another holder is cancellation-aware.

use crate::error::{ConcurrencyError, Result};
use crate::state::{CancellationToken, StateId};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Current mode of a [`SmartLock`]
#[derive(Debug, Clone)]
pub enum LockMode {
    /// Value owned by a single state, locking is free
    Private,
    /// Value reachable from several states
    Shared(Arc<SharedLock>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holder {
    State(StateId),
    Forced,
}

#[derive(Debug, Default)]
struct HolderSlot {
    holder: Option<Holder>,
    depth: usize,
}

/// Mutex used once a value has been shared
#[derive(Debug)]
pub struct SharedLock {
    first_owner: StateId,
    slot: Mutex<HolderSlot>,
    released: Condvar,
}

impl SharedLock {
    fn new(first_owner: StateId) -> Self {
        SharedLock {
            first_owner,
            slot: Mutex::new(HolderSlot::default()),
            released: Condvar::new(),
        }
    }

    /// State that performed the promotion
    pub fn first_owner(&self) -> StateId {
        self.first_owner
    }

    /// State currently holding the lock, if any
    pub fn holder(&self) -> Option<StateId> {
        match self.slot.lock().holder {
            Some(Holder::State(id)) => Some(id),
            _ => None,
        }
    }

    fn acquire(
        &self,
        who: Holder,
        cancel: Option<&CancellationToken>,
        poll_interval: Duration,
    ) -> Result<()> {
        let mut slot = self.slot.lock();
        loop {
            match slot.holder {
                None => {
                    slot.holder = Some(who);
                    slot.depth = 1;
                    return Ok(());
                }
                Some(current @ Holder::State(_)) if current == who => {
                    slot.depth += 1;
                    return Ok(());
                }
                Some(_) => {
                    if let Some(token) = cancel {
                        token.check()?;
                    }
                    self.released.wait_for(&mut slot, poll_interval);
                    if let Some(token) = cancel {
                        token.check()?;
                    }
                }
            }
        }
    }

    fn release(&self, who: Holder) -> Result<()> {
        let mut slot = self.slot.lock();
        match slot.holder {
            Some(current) if current == who => {
                slot.depth -= 1;
                if slot.depth == 0 {
                    slot.holder = None;
                    self.released.notify_all();
                }
                Ok(())
            }
            _ => match who {
                Holder::State(id) => Err(ConcurrencyError::NotHolder(id)),
                Holder::Forced => panic!("force_unlock called on a lock that is not force-locked"),
            },
        }
    }
}

/// Lock that is a no-op until the protected value is shared
#[derive(Debug)]
pub struct SmartLock {
    mode: Mutex<LockMode>,
}

impl Default for SmartLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SmartLock {
    /// Create a private lock
    pub fn new() -> Self {
        SmartLock {
            mode: Mutex::new(LockMode::Private),
        }
    }

    /// Snapshot of the current mode
    pub fn mode(&self) -> LockMode {
        self.mode.lock().clone()
    }

    fn shared(&self) -> Option<Arc<SharedLock>> {
        match &*self.mode.lock() {
            LockMode::Private => None,
            LockMode::Shared(shared) => Some(Arc::clone(shared)),
        }
    }

    /// Whether the protected value has been shared
    pub fn is_value_shared(&self) -> bool {
        matches!(&*self.mode.lock(), LockMode::Shared(_))
    }

    /// State that shared the value, if it is shared
    pub fn first_owner(&self) -> Option<StateId> {
        self.shared().map(|s| s.first_owner())
    }

    /// Promote the value to shared
    ///
    /// The initializer runs exactly once, while `origin` holds the freshly
    /// created shared lock. Returns `true` if this call performed the
    /// promotion, `false` if the value was already shared.
    pub fn share<F: FnOnce()>(&self, origin: StateId, initializer: F) -> bool {
        let shared = {
            let mut mode = self.mode.lock();
            if let LockMode::Shared(_) = &*mode {
                return false;
            }
            let shared = Arc::new(SharedLock::new(origin));
            {
                let mut slot = shared.slot.lock();
                slot.holder = Some(Holder::State(origin));
                slot.depth = 1;
            }
            *mode = LockMode::Shared(Arc::clone(&shared));
            shared
        };

        trace!(state = %origin, "value promoted to shared");
        initializer();

        if let Err(e) = shared.release(Holder::State(origin)) {
            unreachable!("sharing state lost the lock during initialization: {e}");
        }
        true
    }

    /// Acquire the lock on behalf of `state`
    ///
    /// Returns immediately on a private value. On a shared value blocks until
    /// the lock is free or already held by `state`; `cancel` makes the wait
    /// return `Err(Cancelled)` promptly.
    pub fn lock(
        &self,
        state: StateId,
        cancel: &CancellationToken,
        poll_interval: Duration,
    ) -> Result<SmartLockGuard> {
        match self.shared() {
            None => Ok(SmartLockGuard {
                shared: None,
                holder: Holder::State(state),
            }),
            Some(shared) => {
                shared.acquire(Holder::State(state), Some(cancel), poll_interval)?;
                Ok(SmartLockGuard {
                    shared: Some(shared),
                    holder: Holder::State(state),
                })
            }
        }
    }

    /// Acquire a shared lock without any owning state
    ///
    /// Intended for internal bootstrap paths. A no-op on private values.
    pub fn force_lock(&self) {
        if let Some(shared) = self.shared() {
            // cannot fail: no cancellation token
            let _ = shared.acquire(Holder::Forced, None, Duration::from_millis(10));
        }
    }

    /// Release a lock taken with [`SmartLock::force_lock`]
    pub fn force_unlock(&self) {
        if let Some(shared) = self.shared() {
            // a forced release can only panic, never return an error
            let _ = shared.release(Holder::Forced);
        }
    }
}

/// RAII guard returned by [`SmartLock::lock`]
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SmartLockGuard {
    shared: Option<Arc<SharedLock>>,
    holder: Holder,
}

impl SmartLockGuard {
    /// Whether the guard protects a shared value
    pub fn is_real(&self) -> bool {
        self.shared.is_some()
    }

    /// Release the lock before the end of the scope
    pub fn unlock(self) {
        drop(self)
    }
}

impl Drop for SmartLockGuard {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            if let Err(e) = shared.release(self.holder) {
                tracing::error!(error = %e, "smart lock released by a non-holder");
            }
        }
    }
}
