//! Per-value transaction gate
//!
//! A [`TransactionIsolator`] remembers the transaction that last accessed a
//! value. Accesses from other contexts wait for that transaction to end. This
//! is a serialization gate, not MVCC: no data is versioned here.
//!
//! | Holder              | Caller                        | Outcome                     |
//! |---------------------|-------------------------------|-----------------------------|
//! | none / ended        | any                           | proceed (caller's tx holds) |
//! | caller's own tx     | any                           | proceed                     |
//! | other active tx     | read-only, `ReadUncommitted`  | proceed                     |
//! | other active tx     | cannot block                  | `WaitRefused`               |
//! | other active tx     | otherwise                     | wait, then retry            |

use crate::error::{ConcurrencyError, Result};
use crate::state::CancellationToken;
use crate::transaction::{IsolationLevel, Transaction};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::debug;

/// Description of one access, built by the caller's execution context
#[derive(Debug, Clone)]
pub struct TransactionAccess {
    /// Transaction the caller runs in, if any
    pub transaction: Option<Transaction>,
    /// Isolation level of the caller
    pub isolation: IsolationLevel,
    /// Whether the access only reads
    pub read_only: bool,
    /// Whether the caller may block waiting for another transaction
    pub can_block: bool,
    /// Cancellation signal of the caller
    pub cancel: CancellationToken,
    /// Maximum time to wait for another transaction
    pub timeout: Option<Duration>,
    /// Wake-up interval while waiting
    pub poll_interval: Duration,
}

impl TransactionAccess {
    /// Access outside of any transaction
    pub fn untracked(read_only: bool) -> Self {
        TransactionAccess {
            transaction: None,
            isolation: IsolationLevel::default(),
            read_only,
            can_block: true,
            cancel: CancellationToken::new(),
            timeout: None,
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Gate serializing transactional access to one value
#[derive(Debug, Default)]
pub struct TransactionIsolator {
    holder: Mutex<Option<Transaction>>,
}

impl TransactionIsolator {
    /// Create an isolator with no holder
    pub fn new() -> Self {
        Self::default()
    }

    /// Transaction currently holding the value (ended transactions excluded)
    pub fn holder(&self) -> Option<Transaction> {
        self.holder.lock().as_ref().filter(|tx| tx.is_active()).cloned()
    }

    /// Wait until no other active transaction holds the value
    pub fn wait_if_other_transaction(&self, access: &TransactionAccess) -> Result<()> {
        loop {
            let other = {
                let mut holder = self.holder.lock();
                match holder.as_ref() {
                    Some(current) if current.is_active() => {
                        if access.transaction.as_ref() == Some(current) {
                            return Ok(());
                        }
                        current.clone()
                    }
                    _ => {
                        *holder = access.transaction.clone();
                        return Ok(());
                    }
                }
            };

            if access.read_only && access.isolation == IsolationLevel::ReadUncommitted {
                return Ok(());
            }
            if !access.can_block {
                return Err(ConcurrencyError::WaitRefused {
                    holder: other.id().to_string(),
                });
            }

            debug!(holder = %other.id(), read_only = access.read_only, "waiting for transaction");
            other.wait_finished(&access.cancel, access.timeout, access.poll_interval)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn access(tx: Option<&Transaction>, read_only: bool) -> TransactionAccess {
        TransactionAccess {
            transaction: tx.cloned(),
            poll_interval: Duration::from_millis(5),
            ..TransactionAccess::untracked(read_only)
        }
    }

    #[test]
    fn test_first_transaction_becomes_holder() {
        let isolator = TransactionIsolator::new();
        let tx = Transaction::new(false);
        isolator.wait_if_other_transaction(&access(Some(&tx), false)).unwrap();
        assert_eq!(isolator.holder(), Some(tx.clone()));

        // same transaction proceeds again
        isolator.wait_if_other_transaction(&access(Some(&tx), true)).unwrap();
    }

    #[test]
    fn test_no_transaction_no_holder() {
        let isolator = TransactionIsolator::new();
        isolator.wait_if_other_transaction(&access(None, false)).unwrap();
        assert!(isolator.holder().is_none());
    }

    #[test]
    fn test_wait_refused_when_not_blocking() {
        let isolator = TransactionIsolator::new();
        let tx1 = Transaction::new(false);
        let tx2 = Transaction::new(false);
        isolator.wait_if_other_transaction(&access(Some(&tx1), false)).unwrap();

        let mut second = access(Some(&tx2), false);
        second.can_block = false;
        let err = isolator.wait_if_other_transaction(&second).unwrap_err();
        assert!(matches!(err, ConcurrencyError::WaitRefused { .. }));
    }

    #[test]
    fn test_read_uncommitted_read_proceeds() {
        let isolator = TransactionIsolator::new();
        let tx1 = Transaction::new(false);
        isolator.wait_if_other_transaction(&access(Some(&tx1), false)).unwrap();

        let mut read = access(None, true);
        read.isolation = IsolationLevel::ReadUncommitted;
        read.can_block = false;
        isolator.wait_if_other_transaction(&read).unwrap();

        // a write under the same isolation still has to wait
        let mut write = access(None, false);
        write.isolation = IsolationLevel::ReadUncommitted;
        write.can_block = false;
        assert!(isolator.wait_if_other_transaction(&write).is_err());
    }

    #[test]
    fn test_holder_released_when_transaction_ends() {
        let isolator = Arc::new(TransactionIsolator::new());
        let tx1 = Transaction::new(false);
        isolator.wait_if_other_transaction(&access(Some(&tx1), false)).unwrap();

        let tx2 = Transaction::new(false);
        let handle = {
            let isolator = Arc::clone(&isolator);
            let tx2 = tx2.clone();
            thread::spawn(move || isolator.wait_if_other_transaction(&access(Some(&tx2), false)))
        };

        thread::sleep(Duration::from_millis(20));
        tx1.commit().unwrap();
        handle.join().unwrap().unwrap();
        assert_eq!(isolator.holder(), Some(tx2));
    }

    #[test]
    fn test_cancelled_wait() {
        let isolator = Arc::new(TransactionIsolator::new());
        let tx1 = Transaction::new(false);
        isolator.wait_if_other_transaction(&access(Some(&tx1), false)).unwrap();

        let waiting = access(None, false);
        let token = waiting.cancel.clone();
        let handle = {
            let isolator = Arc::clone(&isolator);
            thread::spawn(move || isolator.wait_if_other_transaction(&waiting))
        };

        thread::sleep(Duration::from_millis(20));
        token.cancel();
        let err = handle.join().unwrap().unwrap_err();
        assert_eq!(err, ConcurrencyError::Cancelled);
    }
}
