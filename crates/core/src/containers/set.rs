//! Set of serializable values keyed by a uniqueness key
//!
//! The key of an element is computed from the set's [`UniquenessConstraint`]:
//! the canonical representation of the element, its identity URL or the
//! representation of one of its properties. Two distinct elements with the
//! same key cannot coexist.
//!
//! A set loaded from a [`SerializedValueStorage`] is durable: every add and
//! remove re-serializes the whole set, and mutable elements are deep-watched
//! so that their mutations are persisted too.

use super::{check_all_sharable, share_or_clone_all, Object, PotentiallySharable};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::json::{from_json_value, to_json_value};
use crate::pattern::{Pattern, SetPattern};
use crate::repr::write_repr;
use crate::resource::{Path, Url};
use crate::storage::{InstanceLoadArgs, SerializedValueStorage};
use crate::value::Value;
use crate::watch::{
    mutation_callback, unwatch_child, watch_child, CallbackHandle, ChildPosition, Mutation,
    MutationCallback, MutationWatcher, MutationWatchingConfig, WatchHub, Watchable, WatchingDepth,
};
use inox_concurrency::{SmartLock, StateId, TransactionIsolator};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};
use ulid::Ulid;

/// Property of a configuration object holding the element pattern
pub const CONFIG_ELEMENT_KEY: &str = "element";
/// Property of a configuration object holding the uniqueness constraint
pub const CONFIG_UNIQUE_KEY: &str = "unique";

/// Rule used to compute the key of a set element
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UniquenessConstraint {
    /// Canonical representation of the element
    #[default]
    Repr,
    /// Identity URL of the element
    Url,
    /// Representation of the named property of the element
    PropertyValue(String),
}

impl fmt::Display for UniquenessConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniquenessConstraint::Repr => f.write_str("#repr"),
            UniquenessConstraint::Url => f.write_str("#url"),
            UniquenessConstraint::PropertyValue(name) => write!(f, ".{name}"),
        }
    }
}

impl UniquenessConstraint {
    /// Parse the `unique` value of a configuration object
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Identifier(id) if id == "url" => Ok(UniquenessConstraint::Url),
            Value::Identifier(id) if id == "repr" => Ok(UniquenessConstraint::Repr),
            Value::PropertyName(name) => Ok(UniquenessConstraint::PropertyValue(name.clone())),
            other => Err(Error::InvalidArgument(format!(
                "invalid uniqueness constraint of kind {}",
                other.kind()
            ))),
        }
    }

    /// Key of `element` under this constraint
    pub fn key_of(&self, ctx: &Context, element: &Value) -> Result<String> {
        match self {
            UniquenessConstraint::Repr => write_repr(element),
            UniquenessConstraint::Url => element
                .url()
                .map(|url| url.as_str().to_string())
                .ok_or_else(|| Error::NoUniqueKey("element has no URL".to_string())),
            UniquenessConstraint::PropertyValue(name) => {
                let value = element
                    .prop(ctx, name)
                    .map_err(|e| Error::NoUniqueKey(e.to_string()))?;
                write_repr(&value)
            }
        }
    }
}

/// Element pattern and uniqueness constraint of a set
#[derive(Debug, Clone, PartialEq)]
pub struct SetConfig {
    /// Pattern every element must match
    pub element: Pattern,
    /// Rule computing element keys
    pub uniqueness: UniquenessConstraint,
}

impl Default for SetConfig {
    fn default() -> Self {
        SetConfig {
            element: Pattern::Serializable,
            uniqueness: UniquenessConstraint::Repr,
        }
    }
}

#[derive(Default)]
struct SetData {
    elements: BTreeMap<String, Value>,
    element_callbacks: Option<HashMap<String, CallbackHandle>>,
}

struct SetPersistence {
    storage: Arc<dyn SerializedValueStorage>,
    path: Path,
    url: Url,
    this: Weak<Set>,
    write_lock: Mutex<()>,
    persist_callbacks: Mutex<HashMap<String, CallbackHandle>>,
}

/// Set of serializable values
pub struct Set {
    lock: SmartLock,
    isolator: TransactionIsolator,
    data: Mutex<SetData>,
    hub: OnceCell<Arc<WatchHub>>,
    config: SetConfig,
    persistence: Option<SetPersistence>,
}

impl fmt::Debug for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Set")
            .field("len", &self.len())
            .field("config", &self.config)
            .field("url", &self.url())
            .finish()
    }
}

impl Set {
    fn empty(config: SetConfig, persistence: Option<SetPersistence>) -> Self {
        Set {
            lock: SmartLock::new(),
            isolator: TransactionIsolator::new(),
            data: Mutex::new(SetData::default()),
            hub: OnceCell::new(),
            config,
            persistence,
        }
    }

    /// Create a set holding `elements`
    pub fn new(ctx: &Context, elements: Vec<Value>, config: SetConfig) -> Result<Self> {
        let set = Self::empty(config, None);
        for element in elements {
            set.add(ctx, element)?;
        }
        Ok(set)
    }

    /// Create a set configured by an object with the optional properties
    /// `element` (a pattern) and `unique` (`#url`, `#repr` or a property name)
    pub fn from_config_object(ctx: &Context, elements: Vec<Value>, config: &Object) -> Result<Self> {
        let mut set_config = SetConfig::default();
        for (key, value) in config.entry_map(ctx)? {
            match key.as_str() {
                CONFIG_ELEMENT_KEY => match value {
                    Value::Pattern(pattern) => set_config.element = pattern.as_ref().clone(),
                    other => {
                        return Err(Error::InvalidArgument(format!(
                            "invalid value for .{CONFIG_ELEMENT_KEY}: a pattern is expected, got {}",
                            other.kind()
                        )))
                    }
                },
                CONFIG_UNIQUE_KEY => set_config.uniqueness = UniquenessConstraint::from_value(&value)?,
                other => {
                    return Err(Error::InvalidArgument(format!(
                        "unexpected property .{other} in set configuration"
                    )))
                }
            }
        }
        Self::new(ctx, elements, set_config)
    }

    fn hub(&self) -> &Arc<WatchHub> {
        self.hub.get_or_init(WatchHub::new)
    }

    /// Configuration of the set
    pub fn config(&self) -> &SetConfig {
        &self.config
    }

    /// Pattern matching this set
    pub fn pattern(&self) -> SetPattern {
        SetPattern::new(self.config.element.clone(), self.config.uniqueness.clone())
    }

    /// Identity URL, only durable sets have one
    pub fn url(&self) -> Option<Url> {
        self.persistence.as_ref().map(|p| p.url.clone())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.lock().elements.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an element with the key of `element` is present
    pub fn has(&self, ctx: &Context, element: &Value) -> Result<bool> {
        if !self.config.element.test(ctx, element) {
            return Err(Error::ElementPatternMismatch);
        }
        let key = self.config.uniqueness.key_of(ctx, element)?;
        self.isolator.wait_if_other_transaction(&ctx.access(true))?;
        let _guard = ctx.lock_value(&self.lock)?;
        Ok(self.data.lock().elements.contains_key(&key))
    }

    /// Element with uniqueness key `key`
    pub fn get(&self, ctx: &Context, key: &str) -> Result<Option<Value>> {
        self.isolator.wait_if_other_transaction(&ctx.access(true))?;
        let _guard = ctx.lock_value(&self.lock)?;
        let element = self.data.lock().elements.get(key).cloned();
        if self.is_shared() {
            return Ok(element.map(|e| e.check_shared_or_clone()));
        }
        Ok(element)
    }

    /// Elements ordered by key
    pub fn elements(&self, ctx: &Context) -> Result<Vec<Value>> {
        self.isolator.wait_if_other_transaction(&ctx.access(true))?;
        let _guard = ctx.lock_value(&self.lock)?;
        let elements: Vec<Value> = self.data.lock().elements.values().cloned().collect();
        if self.is_shared() {
            return Ok(elements.iter().map(Value::check_shared_or_clone).collect());
        }
        Ok(elements)
    }

    /// Copy of the (key, element) pairs without locking the smart lock
    pub(crate) fn snapshot_entries(&self) -> Vec<(String, Value)> {
        self.data
            .lock()
            .elements
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Add `element`, re-adding the same element is a no-op
    ///
    /// Fails with [`Error::DuplicateKey`] if a different element has the same
    /// key. Elements of a durable set unique by URL receive a URL under the
    /// set's URL when they have none. A durable set is persisted before the
    /// element becomes visible, the set is unchanged if persisting fails.
    pub fn add(&self, ctx: &Context, element: Value) -> Result<()> {
        if let Some((added, key)) = self.insert(ctx, element, true)? {
            self.watch_for_persistence(ctx, &key, &added);
        }
        Ok(())
    }

    /// Remove the element with the key of `element`, no-op if there is none
    ///
    /// An element without a key (no URL, missing property) was never added.
    pub fn remove(&self, ctx: &Context, element: &Value) -> Result<()> {
        let key = match self.config.uniqueness.key_of(ctx, element) {
            Ok(key) => key,
            Err(Error::NoUniqueKey(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        self.isolator.wait_if_other_transaction(&ctx.access(false))?;
        let guard = ctx.lock_value(&self.lock)?;
        let removed = match self.data.lock().elements.remove(&key) {
            Some(removed) => removed,
            None => return Ok(()),
        };
        if let Err(e) = self.persist(ctx) {
            self.data.lock().elements.insert(key, removed);
            return Err(e);
        }
        let handle = self
            .data
            .lock()
            .element_callbacks
            .as_mut()
            .and_then(|c| c.remove(&key));

        if let Some(p) = &self.persistence {
            let persist_handle = p.persist_callbacks.lock().remove(&key);
            unwatch_child(ctx, &removed, persist_handle);
        }
        if let Some(hub) = self.hub.get() {
            unwatch_child(ctx, &removed, handle);
            let mutation = Mutation::remove_set_element(removed, WatchingDepth::Shallow, "/");
            hub.inform_watchers(&mutation);
            drop(guard);
            hub.call_microtasks(ctx, &mutation);
        }
        Ok(())
    }

    /// Insert, persisting the set first when `persist` is set; returns the
    /// stored element and its key or `None` when the element was already
    /// present
    fn insert(&self, ctx: &Context, element: Value, persist: bool) -> Result<Option<(Value, String)>> {
        if !element.is_serializable() {
            return Err(Error::NotSerializable(element.kind()));
        }
        if !self.config.element.test(ctx, &element) {
            return Err(Error::ElementPatternMismatch);
        }
        self.isolator.wait_if_other_transaction(&ctx.access(false))?;
        let element = if self.is_shared() {
            element.share_or_clone(ctx.state_id())?
        } else {
            element
        };

        let guard = ctx.lock_value(&self.lock)?;
        if self.config.uniqueness == UniquenessConstraint::Url && element.url().is_none() {
            let p = self
                .persistence
                .as_ref()
                .ok_or_else(|| Error::NoUniqueKey("element has no URL".to_string()))?;
            let url = p
                .url
                .to_dir_url()
                .append_absolute_path(&Path::new(format!("/{}", Ulid::new()))?)?;
            element.set_url_once(ctx, url)?;
        }
        let key = self.config.uniqueness.key_of(ctx, &element)?;

        {
            let mut data = self.data.lock();
            if let Some(current) = data.elements.get(&key) {
                if current.is_same(&element) {
                    return Ok(None);
                }
                return Err(Error::DuplicateKey(key));
            }
            data.elements.insert(key.clone(), element.clone());
        }
        if persist {
            if let Err(e) = self.persist(ctx) {
                self.data.lock().elements.remove(&key);
                return Err(e);
            }
        }

        if let Some(hub) = self.hub.get() {
            if let Some(depth) = hub.child_depth() {
                self.watch_element(ctx, hub, &key, &element, depth);
            }
            let mutation = Mutation::add_set_element(element.clone(), WatchingDepth::Shallow, "/");
            hub.inform_watchers(&mutation);
            drop(guard);
            hub.call_microtasks(ctx, &mutation);
        }
        Ok(Some((element, key)))
    }

    fn watch_element(&self, ctx: &Context, hub: &Arc<WatchHub>, key: &str, element: &Value, depth: WatchingDepth) {
        match watch_child(hub, ctx, element, ChildPosition::Fixed(format!("/{key}")), depth) {
            Ok(Some(handle)) => {
                if let Some(callbacks) = self.data.lock().element_callbacks.as_mut() {
                    callbacks.insert(key.to_string(), handle);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(key, error = %e, "failed to watch set element"),
        }
    }

    fn raise_watching_depth(&self, ctx: &Context, depth: WatchingDepth) -> Result<()> {
        let hub = self.hub();
        if !hub.raise_depth(depth) {
            return Ok(());
        }
        let child_depth = match hub.child_depth() {
            Some(d) => d,
            None => return Ok(()),
        };

        let _guard = ctx.lock_value(&self.lock)?;
        let (elements, previous) = {
            let mut data = self.data.lock();
            let previous = data.element_callbacks.take().unwrap_or_default();
            (data.elements.clone(), previous)
        };
        for (key, handle) in previous {
            if let Some(element) = elements.get(&key) {
                unwatch_child(ctx, element, Some(handle));
            }
        }

        let mut handles = HashMap::new();
        for (key, element) in &elements {
            if let Some(handle) = watch_child(hub, ctx, element, ChildPosition::Fixed(format!("/{key}")), child_depth)? {
                handles.insert(key.clone(), handle);
            }
        }
        debug!(elements = elements.len(), depth = ?child_depth, "watching set elements");
        self.data.lock().element_callbacks = Some(handles);
        Ok(())
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    fn watch_for_persistence(&self, ctx: &Context, key: &str, element: &Value) {
        let (p, watchable) = match (&self.persistence, element.as_watchable()) {
            (Some(p), Some(watchable)) => (p, watchable),
            _ => return,
        };
        let this = p.this.clone();
        let callback: MutationCallback = mutation_callback(move |ctx, _| match this.upgrade() {
            Some(set) => {
                if let Err(e) = set.persist(ctx) {
                    warn!(error = %e, "failed to persist set after element mutation");
                }
                true
            }
            None => false,
        });
        match watchable.on_mutation(ctx, callback, MutationWatchingConfig::with_depth(WatchingDepth::Deep)) {
            Ok(handle) => {
                p.persist_callbacks.lock().insert(key.to_string(), handle);
            }
            Err(e) => warn!(key, error = %e, "failed to watch set element for persistence"),
        }
    }

    /// Serialize the whole set to its storage, no-op for non-durable sets
    fn persist(&self, ctx: &Context) -> Result<()> {
        let p = match &self.persistence {
            Some(p) => p,
            None => return Ok(()),
        };
        let _serial = p.write_lock.lock();
        let elements = self.snapshot_entries();
        let mut reprs = Vec::with_capacity(elements.len());
        for (_, element) in &elements {
            reprs.push(to_json_value(ctx, element, Some(&self.config.element))?);
        }
        let data = serde_json::to_string(&serde_json::Value::Array(reprs))?;
        if let Err(e) = p.storage.set_serialized(ctx, &p.path, &data) {
            error!(path = %p.path, error = %e, "failed to persist set");
            return Err(e);
        }
        debug!(path = %p.path, elements = elements.len(), "set persisted");
        Ok(())
    }
}

impl PotentiallySharable for Set {
    fn is_sharable(&self) -> std::result::Result<(), String> {
        if self.is_shared() {
            return Ok(());
        }
        let entries = self.snapshot_entries();
        check_all_sharable(entries.iter().map(|(_, v)| v))
    }

    fn share(&self, origin: StateId) {
        let promoted = self.lock.share(origin, || {
            let entries = self.snapshot_entries();
            let (keys, values): (Vec<String>, Vec<Value>) = entries.into_iter().unzip();
            let shared = share_or_clone_all(&values, origin);
            self.data.lock().elements = keys.into_iter().zip(shared).collect();
        });
        if promoted {
            debug!(origin = %origin, "set shared");
        }
    }

    fn smart_lock(&self) -> &SmartLock {
        &self.lock
    }
}

impl Watchable for Set {
    fn watcher(&self, ctx: &Context, config: MutationWatchingConfig) -> Result<MutationWatcher> {
        let watcher = self.hub().add_watcher(config);
        self.raise_watching_depth(ctx, config.depth)?;
        Ok(watcher)
    }

    fn on_mutation(
        &self,
        ctx: &Context,
        callback: MutationCallback,
        config: MutationWatchingConfig,
    ) -> Result<CallbackHandle> {
        let handle = self.hub().add_callback(callback, config);
        self.raise_watching_depth(ctx, config.depth)?;
        Ok(handle)
    }

    fn remove_mutation_callback(&self, _ctx: &Context, handle: CallbackHandle) {
        if let Some(hub) = self.hub.get() {
            hub.remove_callback(handle);
        }
    }
}

/// Loading function of set patterns
///
/// The stored representation is a JSON array of the elements written under
/// the element pattern. A missing value gives an empty set when
/// `allow_missing` is set.
pub fn load_set(ctx: &Context, args: InstanceLoadArgs) -> Result<Value> {
    let pattern = match &args.pattern {
        Pattern::Set(pattern) => pattern.clone(),
        other => {
            return Err(Error::InvalidArgument(format!(
                "a set pattern is expected, got a pattern of kind {}",
                other.kind()
            )))
        }
    };
    let data = match args.storage.get_serialized(ctx, &args.key)? {
        Some(data) => data,
        None if args.allow_missing => "[]".to_string(),
        None => return Err(Error::NonExistingValue(args.key.to_string())),
    };
    let url = args.storage.base_url().append_absolute_path(&args.key)?;

    let config = pattern.config().clone();
    let set = Arc::new_cyclic(|this| {
        Set::empty(
            config,
            Some(SetPersistence {
                storage: Arc::clone(&args.storage),
                path: args.key.clone(),
                url,
                this: this.clone(),
                write_lock: Mutex::new(()),
                persist_callbacks: Mutex::new(HashMap::new()),
            }),
        )
    });

    let elements = match serde_json::from_str::<serde_json::Value>(&data)? {
        serde_json::Value::Array(elements) => elements,
        _ => {
            return Err(Error::Serialization(format!(
                "the stored representation of the set at {} is not an array",
                args.key
            )))
        }
    };
    for repr in &elements {
        let element = from_json_value(ctx, repr, Some(pattern.element()))?;
        if let Some((element, key)) = set.insert(ctx, element, false)? {
            set.watch_for_persistence(ctx, &key, &element);
        }
    }
    debug!(path = %args.key, elements = set.len(), "set loaded");
    Ok(Value::Set(set))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextConfig, Permission, PermissionKind};
    use crate::pattern::{ObjectPattern, Pattern};
    use crate::storage::InMemoryValueStorage;
    use crate::value::ValueKind;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// In-memory storage whose writes fail while `failing` is set
    struct FlakyStorage {
        inner: InMemoryValueStorage,
        failing: AtomicBool,
    }

    impl SerializedValueStorage for FlakyStorage {
        fn base_url(&self) -> Url {
            self.inner.base_url()
        }

        fn get_serialized(&self, ctx: &Context, key: &Path) -> Result<Option<String>> {
            self.inner.get_serialized(ctx, key)
        }

        fn set_serialized(&self, ctx: &Context, key: &Path, serialized: &str) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::InvalidArgument("disk full".to_string()));
            }
            self.inner.set_serialized(ctx, key, serialized)
        }
    }

    fn main_db_permissions() -> Vec<Permission> {
        [PermissionKind::Read, PermissionKind::Write, PermissionKind::Delete]
            .into_iter()
            .map(|kind| Permission::url_prefix(kind, "ldb://main/...").unwrap())
            .collect()
    }

    fn ctx() -> Context {
        Context::new(ContextConfig {
            permissions: main_db_permissions(),
            ..ContextConfig::default()
        })
    }

    fn int_set(ctx: &Context) -> Set {
        Set::new(
            ctx,
            Vec::new(),
            SetConfig {
                element: Pattern::Type(ValueKind::Int),
                uniqueness: UniquenessConstraint::Repr,
            },
        )
        .unwrap()
    }

    fn user(name: &str) -> Value {
        Value::from(Object::from_entries([("name", Value::from(name))]).unwrap())
    }

    fn durable_users(ctx: &Context, storage: &Arc<InMemoryValueStorage>) -> Arc<Set> {
        durable_users_in(ctx, Arc::clone(storage) as Arc<dyn SerializedValueStorage>)
    }

    fn durable_users_in(ctx: &Context, storage: Arc<dyn SerializedValueStorage>) -> Arc<Set> {
        let pattern = Pattern::Set(SetPattern::new(
            Pattern::Object(ObjectPattern::exact([("name", Pattern::Type(ValueKind::Str))])),
            UniquenessConstraint::Url,
        ));
        let args = InstanceLoadArgs {
            key: Path::new("/users").unwrap(),
            pattern,
            storage,
            allow_missing: true,
        };
        match load_set(ctx, args).unwrap() {
            Value::Set(set) => set,
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn test_add_has_remove() {
        let ctx = ctx();
        let set = int_set(&ctx);
        set.add(&ctx, Value::Int(1)).unwrap();
        set.add(&ctx, Value::Int(2)).unwrap();
        assert!(set.has(&ctx, &Value::Int(1)).unwrap());
        assert_eq!(set.len(), 2);

        set.remove(&ctx, &Value::Int(1)).unwrap();
        assert!(!set.has(&ctx, &Value::Int(1)).unwrap());
        assert_eq!(set.get(&ctx, "2").unwrap(), Some(Value::Int(2)));
    }

    #[test]
    fn test_remove_absent_element_is_silent() {
        let ctx = ctx();
        let set = int_set(&ctx);
        let watcher = set.watcher(&ctx, MutationWatchingConfig::default()).unwrap();
        set.remove(&ctx, &Value::Int(42)).unwrap();
        assert!(set.is_empty());
        assert!(watcher.next_mutation(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_element_pattern_is_enforced() {
        let ctx = ctx();
        let set = int_set(&ctx);
        assert_eq!(set.add(&ctx, Value::from("a")).unwrap_err(), Error::ElementPatternMismatch);
        assert_eq!(set.has(&ctx, &Value::from("a")).unwrap_err(), Error::ElementPatternMismatch);
    }

    #[test]
    fn test_repr_uniqueness_rejects_equal_distinct_elements() {
        let ctx = ctx();
        let set = Set::new(&ctx, Vec::new(), SetConfig::default()).unwrap();
        let first = user("foo");
        set.add(&ctx, first.clone()).unwrap();

        // same element again: no-op
        set.add(&ctx, first.clone()).unwrap();
        assert_eq!(set.len(), 1);

        let err = set.add(&ctx, user("foo")).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(_)));
        set.add(&ctx, user("bar")).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_property_value_uniqueness() {
        let ctx = ctx();
        let config = SetConfig {
            element: Pattern::Serializable,
            uniqueness: UniquenessConstraint::PropertyValue("name".to_string()),
        };
        let set = Set::new(&ctx, vec![user("foo")], config).unwrap();
        assert!(set.get(&ctx, "\"foo\"").unwrap().is_some());
        assert!(matches!(set.add(&ctx, user("foo")), Err(Error::DuplicateKey(_))));
        assert!(matches!(set.add(&ctx, Value::Int(1)), Err(Error::NoUniqueKey(_))));
    }

    #[test]
    fn test_url_uniqueness_needs_urls_without_storage() {
        let ctx = ctx();
        let config = SetConfig {
            element: Pattern::Serializable,
            uniqueness: UniquenessConstraint::Url,
        };
        let set = Set::new(&ctx, Vec::new(), config).unwrap();
        assert!(matches!(set.add(&ctx, user("foo")), Err(Error::NoUniqueKey(_))));
    }

    #[test]
    fn test_from_config_object() {
        let ctx = ctx();
        let config = Object::from_entries([
            ("element", Value::from(Pattern::Type(ValueKind::Int))),
            ("unique", Value::Identifier("repr".to_string())),
        ])
        .unwrap();
        let set = Set::from_config_object(&ctx, vec![Value::Int(1)], &config).unwrap();
        assert_eq!(set.config().element, Pattern::Type(ValueKind::Int));

        let bad = Object::from_entries([("other", Value::Int(1))]).unwrap();
        assert!(Set::from_config_object(&ctx, Vec::new(), &bad).is_err());
    }

    #[test]
    fn test_durable_set_synthesizes_urls_and_persists() {
        let ctx = ctx();
        let storage = Arc::new(InMemoryValueStorage::new(Url::new("ldb://main/").unwrap()));
        let set = durable_users(&ctx, &storage);
        assert_eq!(set.url().unwrap().as_str(), "ldb://main/users");

        let element = user("foo");
        set.add(&ctx, element.clone()).unwrap();
        let url = element.url().unwrap();
        assert!(url.as_str().starts_with("ldb://main/users/"));
        assert_eq!(url.as_str().len(), "ldb://main/users/".len() + 26);

        let stored = storage.get_serialized(&ctx, &Path::new("/users").unwrap()).unwrap().unwrap();
        assert!(stored.contains("foo"));

        // mutations of elements are persisted
        match &element {
            Value::Object(o) => o.set_prop(&ctx, "name", Value::from("bar")).unwrap(),
            _ => unreachable!(),
        }
        let stored = storage.get_serialized(&ctx, &Path::new("/users").unwrap()).unwrap().unwrap();
        assert!(stored.contains("bar"));

        set.remove(&ctx, &element).unwrap();
        let stored = storage.get_serialized(&ctx, &Path::new("/users").unwrap()).unwrap().unwrap();
        assert_eq!(stored, "[]");
    }

    #[test]
    fn test_load_set_reads_stored_elements() {
        let ctx = ctx();
        let storage = Arc::new(InMemoryValueStorage::new(Url::new("ldb://main/").unwrap()));
        {
            let set = durable_users(&ctx, &storage);
            set.add(&ctx, user("foo")).unwrap();
            set.add(&ctx, user("bar")).unwrap();
        }
        let reloaded = durable_users(&ctx, &storage);
        assert_eq!(reloaded.len(), 2);
        for element in reloaded.elements(&ctx).unwrap() {
            assert!(element.url().is_some());
        }
    }

    #[test]
    fn test_load_missing_set() {
        let ctx = ctx();
        let storage = Arc::new(InMemoryValueStorage::new(Url::new("ldb://main/").unwrap()));
        let args = InstanceLoadArgs {
            key: Path::new("/missing").unwrap(),
            pattern: Pattern::Set(SetPattern::new(Pattern::Serializable, UniquenessConstraint::Repr)),
            storage: storage as Arc<dyn SerializedValueStorage>,
            allow_missing: false,
        };
        assert!(matches!(load_set(&ctx, args), Err(Error::NonExistingValue(_))));
    }

    #[test]
    fn test_mutations() {
        let ctx = ctx();
        let set = int_set(&ctx);
        let watcher = set.watcher(&ctx, MutationWatchingConfig::default()).unwrap();
        set.add(&ctx, Value::Int(1)).unwrap();
        set.add(&ctx, Value::Int(1)).unwrap();
        set.remove(&ctx, &Value::Int(1)).unwrap();

        let added = watcher.next_mutation(Duration::from_millis(10)).unwrap();
        assert_eq!(added.kind, crate::watch::MutationKind::AddSetElement);
        let removed = watcher.next_mutation(Duration::from_millis(10)).unwrap();
        assert_eq!(removed.kind, crate::watch::MutationKind::RemoveSetElement);
        assert!(watcher.next_mutation(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_failed_persistence_leaves_set_unchanged() {
        let ctx = ctx();
        let storage = Arc::new(FlakyStorage {
            inner: InMemoryValueStorage::new(Url::new("ldb://main/").unwrap()),
            failing: AtomicBool::new(true),
        });
        let set = durable_users_in(&ctx, Arc::clone(&storage) as Arc<dyn SerializedValueStorage>);
        let watcher = set.watcher(&ctx, MutationWatchingConfig::default()).unwrap();

        assert!(matches!(set.add(&ctx, user("foo")), Err(Error::InvalidArgument(_))));
        assert!(set.is_empty());
        assert!(watcher.next_mutation(Duration::from_millis(5)).is_none());
        assert!(storage.inner.is_empty());

        storage.failing.store(false, Ordering::SeqCst);
        let element = user("bar");
        set.add(&ctx, element.clone()).unwrap();
        assert_eq!(
            watcher.next_mutation(Duration::from_millis(10)).unwrap().kind,
            crate::watch::MutationKind::AddSetElement
        );

        storage.failing.store(true, Ordering::SeqCst);
        assert!(set.remove(&ctx, &element).is_err());
        assert_eq!(set.len(), 1);
        assert!(set.has(&ctx, &element).unwrap());
        assert!(watcher.next_mutation(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_remove_element_without_key_is_silent() {
        let ctx = ctx();
        let storage = Arc::new(InMemoryValueStorage::new(Url::new("ldb://main/").unwrap()));
        let set = durable_users(&ctx, &storage);
        set.add(&ctx, user("foo")).unwrap();
        set.remove(&ctx, &user("never added")).unwrap();
        assert_eq!(set.len(), 1);

        let by_name = Set::new(
            &ctx,
            vec![user("foo")],
            SetConfig {
                element: Pattern::Serializable,
                uniqueness: UniquenessConstraint::PropertyValue("name".to_string()),
            },
        )
        .unwrap();
        by_name.remove(&ctx, &Value::Int(1)).unwrap();
        assert_eq!(by_name.len(), 1);
    }
}
