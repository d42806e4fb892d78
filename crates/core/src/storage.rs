//! Serialized value storage and loading functions
//!
//! A [`SerializedValueStorage`] maps absolute paths to serialized (JSON)
//! representations. A loading function, registered per [`PatternKind`] in a
//! [`LoadingRegistry`], materializes the value stored at a path into a live
//! value that persists its own mutations back to the storage.

use crate::containers::Object;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::json::{parse_json_repr, to_json_repr};
use crate::pattern::{Pattern, PatternKind};
use crate::resource::{Path, Url};
use crate::value::Value;
use crate::watch::{mutation_callback, MutationWatchingConfig, Watchable, WatchingDepth};
use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

// ============================================================================
// Storage
// ============================================================================

/// Key-value storage of serialized values
pub trait SerializedValueStorage: Send + Sync {
    /// URL of the storage, values get URLs under it
    fn base_url(&self) -> Url;

    /// Serialized value stored at `key`
    fn get_serialized(&self, ctx: &Context, key: &Path) -> Result<Option<String>>;

    /// Store `serialized` at `key`
    fn set_serialized(&self, ctx: &Context, key: &Path, serialized: &str) -> Result<()>;
}

/// Storage keeping serialized values in memory
#[derive(Debug)]
pub struct InMemoryValueStorage {
    base_url: Url,
    values: DashMap<String, String>,
}

impl InMemoryValueStorage {
    /// Create an empty storage
    pub fn new(base_url: Url) -> Self {
        InMemoryValueStorage {
            base_url,
            values: DashMap::new(),
        }
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy of every (key, serialized value) pair, sorted by key
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .values
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort();
        entries
    }
}

impl SerializedValueStorage for InMemoryValueStorage {
    fn base_url(&self) -> Url {
        self.base_url.clone()
    }

    fn get_serialized(&self, _ctx: &Context, key: &Path) -> Result<Option<String>> {
        Ok(self.values.get(key.as_str()).map(|v| v.value().clone()))
    }

    fn set_serialized(&self, _ctx: &Context, key: &Path, serialized: &str) -> Result<()> {
        self.values.insert(key.to_string(), serialized.to_string());
        Ok(())
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Arguments of a loading function
#[derive(Clone)]
pub struct InstanceLoadArgs {
    /// Path of the value in the storage
    pub key: Path,
    /// Pattern the loaded value must match
    pub pattern: Pattern,
    /// Storage holding the value
    pub storage: Arc<dyn SerializedValueStorage>,
    /// Whether a missing value is replaced by the pattern's default value
    pub allow_missing: bool,
}

impl fmt::Debug for InstanceLoadArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceLoadArgs")
            .field("key", &self.key)
            .field("pattern", &self.pattern)
            .field("allow_missing", &self.allow_missing)
            .finish()
    }
}

/// Function materializing a stored value
pub type LoadInstanceFn = dyn Fn(&Context, InstanceLoadArgs) -> Result<Value> + Send + Sync;

/// Loading functions keyed by pattern kind
#[derive(Default)]
pub struct LoadingRegistry {
    functions: DashMap<PatternKind, Arc<LoadInstanceFn>>,
}

impl fmt::Debug for LoadingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadingRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl LoadingRegistry {
    /// Register the loading function of patterns of kind `kind`
    ///
    /// # Panics
    ///
    /// Panics if a function is already registered for `kind`.
    pub fn register(&self, kind: PatternKind, f: Arc<LoadInstanceFn>) {
        if self.functions.contains_key(&kind) {
            panic!("a loading function is already registered for {kind} patterns");
        }
        self.functions.insert(kind, f);
        debug!(%kind, "loading function registered");
    }

    /// Loading function of patterns of kind `kind`
    pub fn get(&self, kind: PatternKind) -> Option<Arc<LoadInstanceFn>> {
        self.functions.get(&kind).map(|f| Arc::clone(f.value()))
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<PatternKind> {
        let mut kinds: Vec<PatternKind> = self.functions.iter().map(|e| *e.key()).collect();
        kinds.sort();
        kinds
    }

    /// Whether values matching `pattern` can be loaded
    pub fn has_loading_function(&self, pattern: &Pattern) -> bool {
        self.functions.contains_key(&pattern.kind())
    }

    /// Load the value described by `args` with the function of its pattern
    pub fn load(&self, ctx: &Context, args: InstanceLoadArgs) -> Result<Value> {
        let kind = args.pattern.kind();
        let f = self.get(kind).ok_or(Error::NoLoadingFunction(kind))?;
        f(ctx, args)
    }
}

// ============================================================================
// Objects
// ============================================================================

/// Loading function of object patterns
///
/// The loaded object receives the URL `<base URL><key>` and is deep-watched:
/// every mutation re-serializes it to the storage. A missing value is
/// replaced by the pattern's default value, and stored, when
/// `allow_missing` is set.
pub fn load_object(ctx: &Context, args: InstanceLoadArgs) -> Result<Value> {
    if !matches!(args.pattern, Pattern::Object(_)) {
        return Err(Error::InvalidArgument(format!(
            "an object pattern is expected, got a pattern of kind {}",
            args.pattern.kind()
        )));
    }
    let (value, missing) = match args.storage.get_serialized(ctx, &args.key)? {
        Some(data) => (parse_json_repr(ctx, &data, Some(&args.pattern))?, false),
        None if args.allow_missing => (args.pattern.default_value(ctx)?, true),
        None => return Err(Error::NonExistingValue(args.key.to_string())),
    };
    let object = match value {
        Value::Object(object) => object,
        other => {
            return Err(Error::Serialization(format!(
                "the value stored at {} is a {}, not an object",
                args.key,
                other.kind()
            )))
        }
    };

    if object.url().is_none() {
        let url = args.storage.base_url().append_absolute_path(&args.key)?;
        object.set_url_once(ctx, url)?;
    }

    let persistence = Arc::new(ObjectPersistence {
        object: Arc::downgrade(&object),
        storage: Arc::clone(&args.storage),
        key: args.key.clone(),
        pattern: args.pattern.clone(),
        write_lock: parking_lot::Mutex::new(()),
    });
    if missing {
        persistence.persist(ctx)?;
    }

    let callback = mutation_callback(move |ctx, _| persistence.persist_after_mutation(ctx));
    object.on_mutation(ctx, callback, MutationWatchingConfig::with_depth(WatchingDepth::Deep))?;

    debug!(path = %args.key, "object loaded");
    Ok(Value::Object(object))
}

struct ObjectPersistence {
    object: Weak<Object>,
    storage: Arc<dyn SerializedValueStorage>,
    key: Path,
    pattern: Pattern,
    write_lock: parking_lot::Mutex<()>,
}

impl ObjectPersistence {
    fn persist(&self, ctx: &Context) -> Result<()> {
        let object = match self.object.upgrade() {
            Some(object) => object,
            None => return Ok(()),
        };
        let _serial = self.write_lock.lock();
        let data = to_json_repr(ctx, &Value::Object(object), Some(&self.pattern))?;
        self.storage.set_serialized(ctx, &self.key, &data)
    }

    /// Persist after a mutation, returns whether the callback stays registered
    fn persist_after_mutation(&self, ctx: &Context) -> bool {
        if self.object.strong_count() == 0 {
            return false;
        }
        if let Err(e) = self.persist(ctx) {
            warn!(path = %self.key, error = %e, "failed to persist object after mutation");
        }
        true
    }
}
