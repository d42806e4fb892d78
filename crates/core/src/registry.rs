//! Registries injected into execution contexts
//!
//! Parsers, loading functions and constraints are looked up through a
//! [`Registries`] value reachable from the [`Context`](crate::Context).
//! Tests build their own with [`Registries::with_defaults`]; everything else
//! shares the process-wide instance.

use crate::constraint::ConstraintRegistry;
use crate::containers::set::load_set;
use crate::parser::{IxonParser, JsonParser, ParserRegistry, IXON_MIME_TYPE, JSON_MIME_TYPE};
use crate::pattern::PatternKind;
use crate::storage::{load_object, LoadingRegistry};
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Process-wide registries, built once on first use
static PROCESS_REGISTRIES: Lazy<Arc<Registries>> = Lazy::new(|| {
    debug!("initializing process registries");
    Arc::new(Registries::with_defaults())
});

/// Parser, loading-function and constraint registries
#[derive(Default)]
pub struct Registries {
    parsers: ParserRegistry,
    loading: LoadingRegistry,
    constraints: ConstraintRegistry,
}

impl fmt::Debug for Registries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registries")
            .field("parsers", &self.parsers.mime_types())
            .field("loading", &self.loading.kinds())
            .field("constraints", &self.constraints.len())
            .finish()
    }
}

impl Registries {
    /// Registries with nothing registered
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registries with the built-in parsers and loading functions
    pub fn with_defaults() -> Self {
        let registries = Self::empty();
        registries
            .parsers
            .register(JSON_MIME_TYPE, Arc::new(JsonParser));
        registries
            .parsers
            .register(IXON_MIME_TYPE, Arc::new(IxonParser));
        registries
            .loading
            .register(PatternKind::Object, Arc::new(load_object));
        registries
            .loading
            .register(PatternKind::Set, Arc::new(load_set));
        registries
    }

    /// Process-wide registries
    pub fn process_default() -> Arc<Registries> {
        Arc::clone(&PROCESS_REGISTRIES)
    }

    /// Parsers keyed by MIME type
    pub fn parsers(&self) -> &ParserRegistry {
        &self.parsers
    }

    /// Loading functions keyed by pattern kind
    pub fn loading(&self) -> &LoadingRegistry {
        &self.loading
    }

    /// Object constraints
    pub fn constraints(&self) -> &ConstraintRegistry {
        &self.constraints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let registries = Registries::with_defaults();
        assert!(registries.parsers().get(JSON_MIME_TYPE).is_some());
        assert!(registries.parsers().get(IXON_MIME_TYPE).is_some());
        assert!(registries.loading().get(PatternKind::Object).is_some());
        assert!(registries.loading().get(PatternKind::Set).is_some());
        assert!(registries.loading().get(PatternKind::List).is_none());
    }

    #[test]
    fn test_fresh_registries_are_isolated() {
        let a = Registries::with_defaults();
        let b = Registries::empty();
        assert!(a.parsers().get(JSON_MIME_TYPE).is_some());
        assert!(b.parsers().get(JSON_MIME_TYPE).is_none());
    }

    #[test]
    fn test_process_default_is_shared() {
        assert!(Arc::ptr_eq(
            &Registries::process_default(),
            &Registries::process_default()
        ));
    }
}
