//! Multi-threaded tests for inox-concurrency
//!
//! These tests exercise the lock and isolator with real threads:
//!
//! 1. **Promotion** - sharing happens once even when raced
//! 2. **Mutual exclusion** - a shared lock admits one state at a time
//! 3. **Transaction gate** - transactions are serialized per value
//!
//! ## Running These Tests
//!
//! ```bash
//! cargo test --test concurrent_tests
//! ```

use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use inox_concurrency::{
    CancellationToken, ConcurrencyError, LockMode, SmartLock, StateId, Transaction,
    TransactionAccess, TransactionIsolator,
};

const POLL: Duration = Duration::from_millis(2);

// ============================================================================
// SECTION 1: Promotion
// ============================================================================

mod promotion {
    use super::*;

    #[test]
    fn test_racing_share_promotes_once() {
        let lock = Arc::new(SmartLock::new());
        let initializations = Arc::new(AtomicUsize::new(0));
        let promoted = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let initializations = Arc::clone(&initializations);
                let promoted = Arc::clone(&promoted);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    if lock.share(StateId::next(), || {
                        initializations.fetch_add(1, Ordering::SeqCst);
                    }) {
                        promoted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(initializations.load(Ordering::SeqCst), 1);
        assert_eq!(promoted.load(Ordering::SeqCst), 1);
        assert!(matches!(lock.mode(), LockMode::Shared(_)));
    }

    #[test]
    fn test_initializer_has_exclusive_access() {
        let lock = Arc::new(SmartLock::new());
        let origin = StateId::next();
        let entered = Arc::new(Barrier::new(2));
        let order = Arc::new(Mutex::new(Vec::new()));

        let waiter = {
            let lock = Arc::clone(&lock);
            let entered = Arc::clone(&entered);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                entered.wait();
                let token = CancellationToken::new();
                let guard = lock.lock(StateId::next(), &token, POLL).unwrap();
                assert!(guard.is_real());
                order.lock().push("waiter");
            })
        };

        {
            let order = Arc::clone(&order);
            lock.share(origin, move || {
                entered.wait();
                thread::sleep(Duration::from_millis(20));
                order.lock().push("initializer");
            });
        }
        waiter.join().unwrap();
        assert_eq!(*order.lock(), vec!["initializer", "waiter"]);
    }
}

// ============================================================================
// SECTION 2: Mutual exclusion
// ============================================================================

mod mutual_exclusion {
    use super::*;

    #[test]
    fn test_counter_under_shared_lock() {
        let lock = Arc::new(SmartLock::new());
        lock.share(StateId::next(), || {});
        let counter = Arc::new(Mutex::new(0u64));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    let state = StateId::next();
                    let token = CancellationToken::new();
                    for _ in 0..100 {
                        let _g = lock.lock(state, &token, POLL).unwrap();
                        // nested acquisition by the same state must not deadlock
                        let _inner = lock.lock(state, &token, POLL).unwrap();
                        let current = *counter.lock();
                        *counter.lock() = current + 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*counter.lock(), 400);
    }

    proptest! {
        #[test]
        fn prop_nested_locks_release_fully(depth in 1usize..16) {
            let lock = SmartLock::new();
            let state = StateId::next();
            let token = CancellationToken::new();
            lock.share(state, || {});

            let guards: Vec<_> = (0..depth)
                .map(|_| lock.lock(state, &token, POLL).unwrap())
                .collect();
            drop(guards);

            match lock.mode() {
                LockMode::Shared(shared) => prop_assert_eq!(shared.holder(), None),
                LockMode::Private => prop_assert!(false, "lock should be shared"),
            }
        }
    }
}

// ============================================================================
// SECTION 3: Transaction gate
// ============================================================================

mod transaction_gate {
    use super::*;

    fn access(tx: &Transaction) -> TransactionAccess {
        TransactionAccess {
            transaction: Some(tx.clone()),
            poll_interval: POLL,
            ..TransactionAccess::untracked(false)
        }
    }

    #[test]
    fn test_transactions_take_turns() {
        let isolator = Arc::new(TransactionIsolator::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let barrier = Arc::new(Barrier::new(3));

        let handles: Vec<_> = (0..3)
            .map(|i| {
                let isolator = Arc::clone(&isolator);
                let log = Arc::clone(&log);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let tx = Transaction::new(false);
                    barrier.wait();
                    isolator.wait_if_other_transaction(&access(&tx)).unwrap();
                    log.lock().push((i, "start"));
                    thread::sleep(Duration::from_millis(5));
                    log.lock().push((i, "end"));
                    tx.commit().unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let log = log.lock();
        assert_eq!(log.len(), 6);
        for pair in log.chunks(2) {
            assert_eq!(pair[0].0, pair[1].0, "transactions interleaved: {:?}", *log);
            assert_eq!(pair[0].1, "start");
            assert_eq!(pair[1].1, "end");
        }
    }

    #[test]
    fn test_wait_times_out() {
        let isolator = TransactionIsolator::new();
        let tx1 = Transaction::new(false);
        isolator.wait_if_other_transaction(&access(&tx1)).unwrap();

        let tx2 = Transaction::new(false);
        let mut second = access(&tx2);
        second.timeout = Some(Duration::from_millis(15));
        let err = isolator.wait_if_other_transaction(&second).unwrap_err();
        assert!(matches!(err, ConcurrencyError::WaitTimeout { .. }));
    }
}
