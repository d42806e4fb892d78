//! Handlers applying migration operations
//!
//! A migration specification maps path patterns to functions, one map per
//! operation kind:
//!
//! | Map               | Called with        | Returns           |
//! |-------------------|--------------------|-------------------|
//! | `deletions`       | the removed value  | ignored           |
//! | `inclusions`      | nothing            | the new value     |
//! | `replacements`    | the previous value | the next value    |
//! | `initializations` | nothing            | the initial value |

use crate::error::{DatabaseError, Result};
use inox_core::{MigrationOp, NativeFunction, Path, PathPattern};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Kind of migration handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// Handles removals
    Deletion,
    /// Handles inclusions
    Inclusion,
    /// Handles replacements
    Replacement,
    /// Handles initializations
    Initialization,
}

impl HandlerKind {
    /// Kind of handler applying `op`
    pub fn of(op: &MigrationOp) -> Self {
        match op {
            MigrationOp::Removal { .. } => HandlerKind::Deletion,
            MigrationOp::Inclusion { .. } => HandlerKind::Inclusion,
            MigrationOp::Replacement { .. } => HandlerKind::Replacement,
            MigrationOp::Initialization { .. } => HandlerKind::Initialization,
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerKind::Deletion => f.write_str("deletion"),
            HandlerKind::Inclusion => f.write_str("inclusion"),
            HandlerKind::Replacement => f.write_str("replacement"),
            HandlerKind::Initialization => f.write_str("initialization"),
        }
    }
}

type HandlerMap = BTreeMap<PathPattern, Arc<NativeFunction>>;

/// Migration handlers keyed by path pattern
#[derive(Debug, Clone, Default)]
pub struct MigrationHandlers {
    deletions: HandlerMap,
    inclusions: HandlerMap,
    replacements: HandlerMap,
    initializations: HandlerMap,
}

impl MigrationHandlers {
    /// No handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the handler of `kind` for the paths matched by `pattern`
    ///
    /// Fails if `pattern` is not a valid path pattern, or if it already has
    /// a handler of the same kind.
    pub fn with_handler(mut self, kind: HandlerKind, pattern: &str, f: NativeFunction) -> Result<Self> {
        let pattern = PathPattern::new(pattern)?;
        let map = self.map_mut(kind);
        if map.contains_key(&pattern) {
            return Err(DatabaseError::InvalidMigrationObject(format!(
                "{kind} handler defined twice for {pattern}"
            )));
        }
        map.insert(pattern, Arc::new(f));
        Ok(self)
    }

    /// Add a deletion handler
    pub fn deletion(self, pattern: &str, f: NativeFunction) -> Result<Self> {
        self.with_handler(HandlerKind::Deletion, pattern, f)
    }

    /// Add an inclusion handler
    pub fn inclusion(self, pattern: &str, f: NativeFunction) -> Result<Self> {
        self.with_handler(HandlerKind::Inclusion, pattern, f)
    }

    /// Add a replacement handler
    pub fn replacement(self, pattern: &str, f: NativeFunction) -> Result<Self> {
        self.with_handler(HandlerKind::Replacement, pattern, f)
    }

    /// Add an initialization handler
    pub fn initialization(self, pattern: &str, f: NativeFunction) -> Result<Self> {
        self.with_handler(HandlerKind::Initialization, pattern, f)
    }

    fn map(&self, kind: HandlerKind) -> &HandlerMap {
        match kind {
            HandlerKind::Deletion => &self.deletions,
            HandlerKind::Inclusion => &self.inclusions,
            HandlerKind::Replacement => &self.replacements,
            HandlerKind::Initialization => &self.initializations,
        }
    }

    fn map_mut(&mut self, kind: HandlerKind) -> &mut HandlerMap {
        match kind {
            HandlerKind::Deletion => &mut self.deletions,
            HandlerKind::Inclusion => &mut self.inclusions,
            HandlerKind::Replacement => &mut self.replacements,
            HandlerKind::Initialization => &mut self.initializations,
        }
    }

    /// Number of handlers of `kind`
    pub fn count(&self, kind: HandlerKind) -> usize {
        self.map(kind).len()
    }

    /// Whether no handler is defined
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty()
            && self.inclusions.is_empty()
            && self.replacements.is_empty()
            && self.initializations.is_empty()
    }

    /// Handler of `op`: a pattern equal to the pseudo path wins over a
    /// pattern matching it
    pub fn handler_for(&self, op: &MigrationOp) -> Option<Arc<NativeFunction>> {
        let map = self.map(HandlerKind::of(op));
        let pseudo_path = op.pseudo_path();
        if let Some((_, f)) = map.iter().find(|(pattern, _)| pattern.as_str() == pseudo_path) {
            return Some(Arc::clone(f));
        }
        let path = Path::new(pseudo_path).ok()?;
        map.iter()
            .find(|(pattern, _)| pattern.includes(&path))
            .map(|(_, f)| Arc::clone(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inox_core::{Pattern, Value, ValueKind};

    fn handler(name: &str) -> NativeFunction {
        NativeFunction::new(name, |_, _| Ok(Value::Int(1)))
    }

    fn int() -> Pattern {
        Pattern::Type(ValueKind::Int)
    }

    #[test]
    fn test_handler_lookup() {
        let handlers = MigrationHandlers::new()
            .inclusion("/users", handler("include"))
            .unwrap()
            .deletion("/old/...", handler("delete"))
            .unwrap();
        assert_eq!(handlers.count(HandlerKind::Inclusion), 1);
        assert_eq!(handlers.count(HandlerKind::Replacement), 0);

        let inclusion = MigrationOp::Inclusion {
            value: int(),
            optional: false,
            pseudo_path: "/users".to_string(),
        };
        assert_eq!(handlers.handler_for(&inclusion).unwrap().name(), "include");

        let removal = MigrationOp::Removal {
            value: int(),
            pseudo_path: "/old/a".to_string(),
        };
        assert_eq!(handlers.handler_for(&removal).unwrap().name(), "delete");

        let replacement = MigrationOp::Replacement {
            current: int(),
            next: Pattern::Type(ValueKind::Str),
            pseudo_path: "/users".to_string(),
        };
        assert!(handlers.handler_for(&replacement).is_none());
    }

    #[test]
    fn test_wildcard_pseudo_paths() {
        let handlers = MigrationHandlers::new()
            .replacement("/users/*/name", handler("rename"))
            .unwrap();
        let op = MigrationOp::Replacement {
            current: int(),
            next: Pattern::Type(ValueKind::Str),
            pseudo_path: "/users/*/name".to_string(),
        };
        assert_eq!(handlers.handler_for(&op).unwrap().name(), "rename");
    }

    #[test]
    fn test_invalid_handlers() {
        assert!(MigrationHandlers::new().inclusion("users", handler("a")).is_err());
        let twice = MigrationHandlers::new()
            .inclusion("/a", handler("a"))
            .unwrap()
            .inclusion("/a", handler("b"));
        assert!(matches!(twice, Err(DatabaseError::InvalidMigrationObject(_))));
    }
}
