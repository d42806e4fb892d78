//! Concurrency primitives for the Inox value model
//!
//! This crate provides the synchronization layer mutable values build on:
//! - StateId / CancellationToken: identity and cancellation of an execution context
//! - SmartLock: no-op lock that becomes a real re-entrant mutex once a value is shared
//! - Transaction: completion signal and identity used to serialize access
//! - TransactionIsolator: per-value gate waiting for other transactions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod isolator;
pub mod smart_lock;
pub mod state;
pub mod transaction;

pub use error::{ConcurrencyError, Result};
pub use isolator::{TransactionAccess, TransactionIsolator};
pub use smart_lock::{LockMode, SharedLock, SmartLock, SmartLockGuard};
pub use state::{CancellationToken, StateId};
pub use transaction::{IsolationLevel, Transaction, TransactionStatus};
