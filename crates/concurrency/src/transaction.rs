//! Transactions as seen by the value layer
//!
//! A transaction does not version data here: it is an identity that values
//! use to serialize access (see [`crate::isolator`]) plus a completion signal
//! other execution contexts can wait on.

use crate::error::{ConcurrencyError, Result};
use crate::state::CancellationToken;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Status of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Transaction is running
    Active,
    /// Transaction committed
    Committed,
    /// Transaction was rolled back
    RolledBack,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Active => write!(f, "active"),
            TransactionStatus::Committed => write!(f, "committed"),
            TransactionStatus::RolledBack => write!(f, "rolled back"),
        }
    }
}

/// How strictly values isolate concurrent transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Every access waits for the holding transaction
    #[default]
    Serializable,
    /// Read-only accesses proceed while another transaction holds the value
    ReadUncommitted,
}

type EndCallback = Box<dyn FnOnce(TransactionStatus) + Send>;

struct TxState {
    status: TransactionStatus,
    on_end: Vec<EndCallback>,
}

struct TransactionInner {
    id: Uuid,
    read_only: bool,
    state: Mutex<TxState>,
    finished: Condvar,
}

/// Handle to a transaction; clones refer to the same transaction
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("read_only", &self.inner.read_only)
            .field("status", &self.status())
            .finish()
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Transaction {}

impl Transaction {
    /// Start a new active transaction
    pub fn new(read_only: bool) -> Self {
        Transaction {
            inner: Arc::new(TransactionInner {
                id: Uuid::new_v4(),
                read_only,
                state: Mutex::new(TxState {
                    status: TransactionStatus::Active,
                    on_end: Vec::new(),
                }),
                finished: Condvar::new(),
            }),
        }
    }

    /// Transaction id
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Whether the transaction only reads
    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    /// Current status
    pub fn status(&self) -> TransactionStatus {
        self.inner.state.lock().status
    }

    /// Whether the transaction is still running
    pub fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Active
    }

    /// Register a callback invoked once when the transaction ends
    ///
    /// Runs immediately if the transaction already ended.
    pub fn on_end<F>(&self, f: F)
    where
        F: FnOnce(TransactionStatus) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.status == TransactionStatus::Active {
            state.on_end.push(Box::new(f));
        } else {
            let status = state.status;
            drop(state);
            f(status);
        }
    }

    /// Commit the transaction
    pub fn commit(&self) -> Result<()> {
        self.finish(TransactionStatus::Committed)
    }

    /// Roll the transaction back
    pub fn rollback(&self) -> Result<()> {
        self.finish(TransactionStatus::RolledBack)
    }

    fn finish(&self, status: TransactionStatus) -> Result<()> {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if state.status != TransactionStatus::Active {
                return Err(ConcurrencyError::TransactionNotActive {
                    id: self.inner.id.to_string(),
                    status: state.status.to_string(),
                });
            }
            state.status = status;
            self.inner.finished.notify_all();
            std::mem::take(&mut state.on_end)
        };

        debug!(txn_id = %self.inner.id, %status, "transaction finished");
        for callback in callbacks {
            callback(status);
        }
        Ok(())
    }

    /// Block until the transaction ends
    ///
    /// Returns `Err(Cancelled)` as soon as `cancel` fires and
    /// `Err(WaitTimeout)` once `timeout` has elapsed.
    pub fn wait_finished(
        &self,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
        poll_interval: Duration,
    ) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.inner.state.lock();
        loop {
            if state.status != TransactionStatus::Active {
                return Ok(());
            }
            cancel.check()?;

            let mut wait = poll_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(ConcurrencyError::WaitTimeout {
                        holder: self.inner.id.to_string(),
                        millis: timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
                    });
                }
                wait = wait.min(deadline - now);
            }
            self.inner.finished.wait_for(&mut state, wait);
        }
    }
}
