//! Registered object constraints
//!
//! Objects refer to their constraint by [`ConstraintId`] so the pattern is
//! stored once and looked up on every write.

use crate::pattern::ObjectPattern;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identifier of a registered constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintId(u64);

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "constraint#{}", self.0)
    }
}

/// Object patterns registered as constraints
#[derive(Debug, Default)]
pub struct ConstraintRegistry {
    next_id: AtomicU64,
    patterns: DashMap<ConstraintId, Arc<ObjectPattern>>,
}

impl ConstraintRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pattern, returns its id
    pub fn register(&self, pattern: ObjectPattern) -> ConstraintId {
        let id = ConstraintId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.patterns.insert(id, Arc::new(pattern));
        id
    }

    /// Pattern registered under `id`
    pub fn get(&self, id: ConstraintId) -> Option<Arc<ObjectPattern>> {
        self.patterns.get(&id).map(|p| Arc::clone(p.value()))
    }

    /// Number of registered constraints
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether no constraint is registered
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
