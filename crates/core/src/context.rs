//! Execution contexts
//!
//! A [`Context`] is the handle every value operation receives. It carries:
//!
//! - the identity of the executing state (used by shared locks)
//! - a cancellation signal honored by every blocking wait
//! - the granted permissions, checked by values with an identity URL
//! - the current transaction, if any
//! - the registries (parsers, loading functions, constraints)

use crate::error::{Error, Result};
use crate::registry::Registries;
use crate::resource::{Url, UrlPattern};
use inox_concurrency::{
    CancellationToken, IsolationLevel, SmartLock, SmartLockGuard, StateId, Transaction,
    TransactionAccess,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default wake-up interval of blocking waits
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Permissions
// ============================================================================

/// Kind of access a permission grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionKind {
    /// Read a resource
    Read,
    /// Create or update a resource
    Write,
    /// Delete a resource
    Delete,
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionKind::Read => write!(f, "read"),
            PermissionKind::Write => write!(f, "write"),
            PermissionKind::Delete => write!(f, "delete"),
        }
    }
}

/// Resource a permission applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PermissionEntity {
    /// Exactly one URL
    Url(Url),
    /// Every URL matched by the pattern
    UrlPattern(UrlPattern),
}

impl PermissionEntity {
    fn includes(&self, other: &PermissionEntity) -> bool {
        match (self, other) {
            (PermissionEntity::Url(a), PermissionEntity::Url(b)) => a == b,
            (PermissionEntity::UrlPattern(p), PermissionEntity::Url(u)) => p.test(u),
            (PermissionEntity::UrlPattern(p), PermissionEntity::UrlPattern(q)) => {
                p == q || (p.is_prefix_pattern() && q.prefix().starts_with(p.prefix()))
            }
            (PermissionEntity::Url(_), PermissionEntity::UrlPattern(_)) => false,
        }
    }
}

impl fmt::Display for PermissionEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionEntity::Url(u) => write!(f, "{u}"),
            PermissionEntity::UrlPattern(p) => write!(f, "{p}"),
        }
    }
}

/// Permission granted to, or required from, a context
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Permission {
    /// Kind of access
    pub kind: PermissionKind,
    /// Resource
    pub entity: PermissionEntity,
}

impl Permission {
    /// Create a permission
    pub fn new(kind: PermissionKind, entity: PermissionEntity) -> Self {
        Permission { kind, entity }
    }

    /// Permission on a value identified by `url` (database entities, durable containers)
    pub fn database(kind: PermissionKind, url: Url) -> Self {
        Permission::new(kind, PermissionEntity::Url(url))
    }

    /// Permission on every URL starting with `prefix` (`ldb://main/...`)
    pub fn url_prefix(kind: PermissionKind, prefix: &str) -> Result<Self> {
        let pattern = UrlPattern::new(prefix)?;
        Ok(Permission::new(kind, PermissionEntity::UrlPattern(pattern)))
    }

    /// Whether this permission grants `other`
    pub fn includes(&self, other: &Permission) -> bool {
        self.kind == other.kind && self.entity.includes(&other.entity)
    }
}

// ============================================================================
// Context
// ============================================================================

/// Configuration of one execution context
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Granted permissions
    pub permissions: Vec<Permission>,
    /// Isolation level of the context's accesses
    pub isolation: IsolationLevel,
    /// Maximum time spent waiting for another transaction (`None`: no limit)
    pub transaction_wait_timeout: Option<Duration>,
    /// Whether the context may block waiting for another transaction
    pub can_block: bool,
    /// Wake-up interval of blocking waits
    pub lock_poll_interval: Duration,
    /// Registries, the process-wide ones when `None`
    pub registries: Option<Arc<Registries>>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig {
            permissions: Vec::new(),
            isolation: IsolationLevel::default(),
            transaction_wait_timeout: None,
            can_block: true,
            lock_poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
            registries: None,
        }
    }
}

struct ContextInner {
    state_id: StateId,
    cancel: CancellationToken,
    config: ContextConfig,
    registries: Arc<Registries>,
    transaction: Mutex<Option<Transaction>>,
}

/// Handle to an execution context; clones refer to the same context
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("state_id", &self.inner.state_id)
            .field("cancelled", &self.inner.cancel.is_cancelled())
            .field("transaction", &self.transaction().map(|tx| tx.id()))
            .finish()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.inner.state_id == other.inner.state_id
    }
}

impl Context {
    /// Create a context running on behalf of a fresh state
    pub fn new(config: ContextConfig) -> Self {
        let registries = config
            .registries
            .clone()
            .unwrap_or_else(Registries::process_default);
        Context {
            inner: Arc::new(ContextInner {
                state_id: StateId::next(),
                cancel: CancellationToken::new(),
                config,
                registries,
                transaction: Mutex::new(None),
            }),
        }
    }

    /// New context with the same configuration and registries but its own
    /// state, cancellation signal and transaction
    pub fn fork(&self) -> Context {
        let mut config = self.inner.config.clone();
        config.registries = Some(Arc::clone(&self.inner.registries));
        Context::new(config)
    }

    /// Identity of the executing state
    pub fn state_id(&self) -> StateId {
        self.inner.state_id
    }

    /// Cancellation signal of the context
    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Cancel the context, in-flight waits return `Cancelled`
    pub fn cancel(&self) {
        debug!(state = %self.inner.state_id, "context cancelled");
        self.inner.cancel.cancel();
    }

    /// Whether the context was cancelled
    pub fn is_done(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Registries of the context
    pub fn registries(&self) -> &Arc<Registries> {
        &self.inner.registries
    }

    /// Isolation level of the context
    pub fn isolation(&self) -> IsolationLevel {
        self.inner.config.isolation
    }

    /// Wake-up interval of blocking waits
    pub fn lock_poll_interval(&self) -> Duration {
        self.inner.config.lock_poll_interval
    }

    /// Fail unless one of the granted permissions includes `required`
    pub fn check_has_permission(&self, required: &Permission) -> Result<()> {
        if self
            .inner
            .config
            .permissions
            .iter()
            .any(|granted| granted.includes(required))
        {
            return Ok(());
        }
        Err(Error::PermissionDenied {
            kind: required.kind,
            entity: required.entity.to_string(),
        })
    }

    /// Start a transaction, fails if one is already running
    pub fn start_transaction(&self, read_only: bool) -> Result<Transaction> {
        let mut current = self.inner.transaction.lock();
        if let Some(tx) = current.as_ref().filter(|tx| tx.is_active()) {
            return Err(Error::InvalidArgument(format!(
                "a transaction is already running: {}",
                tx.id()
            )));
        }
        let tx = Transaction::new(read_only);
        debug!(state = %self.inner.state_id, txn_id = %tx.id(), read_only, "transaction started");
        *current = Some(tx.clone());
        Ok(tx)
    }

    /// Running transaction, if any
    pub fn transaction(&self) -> Option<Transaction> {
        self.inner
            .transaction
            .lock()
            .as_ref()
            .filter(|tx| tx.is_active())
            .cloned()
    }

    /// Commit the running transaction
    pub fn commit_transaction(&self) -> Result<()> {
        self.take_transaction()?.commit()?;
        Ok(())
    }

    /// Roll the running transaction back
    pub fn rollback_transaction(&self) -> Result<()> {
        self.take_transaction()?.rollback()?;
        Ok(())
    }

    fn take_transaction(&self) -> Result<Transaction> {
        self.inner
            .transaction
            .lock()
            .take()
            .ok_or_else(|| Error::InvalidArgument("no transaction is running".to_string()))
    }

    /// Access descriptor for a value's transaction isolator
    pub fn access(&self, read_only: bool) -> TransactionAccess {
        TransactionAccess {
            transaction: self.transaction(),
            isolation: self.inner.config.isolation,
            read_only,
            can_block: self.inner.config.can_block,
            cancel: self.inner.cancel.clone(),
            timeout: self.inner.config.transaction_wait_timeout,
            poll_interval: self.inner.config.lock_poll_interval,
        }
    }

    /// Lock a value's smart lock on behalf of this context
    pub fn lock_value(&self, lock: &SmartLock) -> Result<SmartLockGuard> {
        let guard = lock.lock(
            self.inner.state_id,
            &self.inner.cancel,
            self.inner.config.lock_poll_interval,
        )?;
        Ok(guard)
    }
}
