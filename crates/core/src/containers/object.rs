//! Mutable object
//!
//! An object maps property names to serializable values. Properties are kept
//! in two parallel vectors sorted by name; when the object is watched deeper
//! than shallow a third vector holds the callback handle registered on each
//! property value. The three vectors are always permuted together.
//!
//! Properties named `0`, `1`, ... are index keys: they model array-like
//! access and cannot be set after construction.
//!
//! ## Write path
//!
//! ```text
//! set_prop(ctx, name, value)
//!   -> wait for other transaction
//!   -> share/clone value if the object is shared
//!   -> lock (real only when shared)
//!   -> permission check (identity URL)
//!   -> constraint test on the candidate properties
//!   -> apply, emit one mutation, unlock, run microtasks
//! ```

use super::{check_all_sharable, share_or_clone_all, PotentiallySharable};
use crate::constraint::ConstraintId;
use crate::context::{Context, Permission, PermissionKind};
use crate::error::{Error, Result};
use crate::resource::{Path, Url};
use crate::value::{Value, ValueKind};
use crate::watch::{
    unwatch_child, watch_child, CallbackHandle, ChildPosition, Mutation, MutationCallback,
    MutationWatcher, MutationWatchingConfig, WatchHub, Watchable, WatchingDepth,
};
use inox_concurrency::{SmartLock, StateId, TransactionIsolator};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Unordered property map used to build objects
pub type ValMap = HashMap<String, Value>;

/// Whether `name` is an index key (`0`, `1`, `42`, not `01`)
pub fn is_index_key(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| b.is_ascii_digit())
        && (name.len() == 1 || !name.starts_with('0'))
}

type PropCallbacks = Vec<Option<CallbackHandle>>;

struct ObjectData {
    keys: Vec<String>,
    values: Vec<Value>,
    prop_callbacks: Option<PropCallbacks>,
    implicit_prop_count: usize,
    url: Option<Url>,
    constraint: Option<ConstraintId>,
}

/// Sort parallel property vectors by key
///
/// Values and callback handles are moved with their key.
pub(crate) fn sort_props(
    keys: Vec<String>,
    values: Vec<Value>,
    callbacks: Option<PropCallbacks>,
) -> (Vec<String>, Vec<Value>, Option<PropCallbacks>) {
    assert_eq!(keys.len(), values.len(), "keys and values out of lockstep");
    if let Some(callbacks) = &callbacks {
        assert_eq!(keys.len(), callbacks.len(), "keys and callbacks out of lockstep");
    }

    let mut order: Vec<usize> = (0..keys.len()).collect();
    order.sort_by(|&a, &b| keys[a].cmp(&keys[b]));
    if order.iter().enumerate().all(|(i, &j)| i == j) {
        return (keys, values, callbacks);
    }

    let mut keys: Vec<Option<String>> = keys.into_iter().map(Some).collect();
    let mut values: Vec<Option<Value>> = values.into_iter().map(Some).collect();
    let mut callbacks: Option<Vec<Option<Option<CallbackHandle>>>> =
        callbacks.map(|c| c.into_iter().map(Some).collect());

    let mut sorted_keys = Vec::with_capacity(order.len());
    let mut sorted_values = Vec::with_capacity(order.len());
    let mut sorted_callbacks = callbacks.as_ref().map(|c| Vec::with_capacity(c.len()));
    for &i in &order {
        sorted_keys.push(keys[i].take().unwrap_or_default());
        sorted_values.push(values[i].take().unwrap_or(Value::Nil));
        if let (Some(from), Some(to)) = (callbacks.as_mut(), sorted_callbacks.as_mut()) {
            to.push(from[i].take().flatten());
        }
    }
    (sorted_keys, sorted_values, sorted_callbacks)
}

fn count_index_keys(keys: &[String]) -> usize {
    keys.iter().filter(|k| is_index_key(k)).count()
}

/// Mutable object
pub struct Object {
    lock: SmartLock,
    isolator: TransactionIsolator,
    data: Mutex<ObjectData>,
    hub: OnceCell<Arc<WatchHub>>,
}

impl Default for Object {
    fn default() -> Self {
        Object::new()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data.lock();
        f.debug_struct("Object")
            .field("keys", &data.keys)
            .field("url", &data.url)
            .field("shared", &self.lock.is_value_shared())
            .finish()
    }
}

impl Object {
    /// Create an empty object
    pub fn new() -> Self {
        Self::from_sorted(Vec::new(), Vec::new())
    }

    fn from_sorted(keys: Vec<String>, values: Vec<Value>) -> Self {
        Object {
            lock: SmartLock::new(),
            isolator: TransactionIsolator::new(),
            data: Mutex::new(ObjectData {
                implicit_prop_count: count_index_keys(&keys),
                keys,
                values,
                prop_callbacks: None,
                url: None,
                constraint: None,
            }),
            hub: OnceCell::new(),
        }
    }

    /// Create an object from a property map
    pub fn from_map(map: ValMap) -> Result<Self> {
        let (keys, values): (Vec<String>, Vec<Value>) = map.into_iter().unzip();
        if let Some(v) = values.iter().find(|v| !v.is_serializable()) {
            return Err(Error::NotSerializable(v.kind()));
        }
        let (keys, values, _) = sort_props(keys, values, None);
        Ok(Self::from_sorted(keys, values))
    }

    /// Create an object from a list of properties, names must be unique
    pub fn from_entries<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Result<Self> {
        let mut map = ValMap::new();
        for (k, v) in entries {
            let k = k.into();
            if map.contains_key(&k) {
                return Err(Error::InvalidArgument(format!("duplicate property .{k}")));
            }
            map.insert(k, v);
        }
        Self::from_map(map)
    }

    fn hub(&self) -> &Arc<WatchHub> {
        self.hub.get_or_init(WatchHub::new)
    }

    // ========================================================================
    // Identity and constraint
    // ========================================================================

    /// Identity URL of the object
    pub fn url(&self) -> Option<Url> {
        self.data.lock().url.clone()
    }

    /// Give the object its identity URL, fails if it already has one
    pub fn set_url_once(&self, ctx: &Context, url: Url) -> Result<()> {
        let _guard = ctx.lock_value(&self.lock)?;
        let mut data = self.data.lock();
        if data.url.is_some() {
            return Err(Error::UrlAlreadySet);
        }
        data.url = Some(url);
        Ok(())
    }

    /// Set the URL of an object under construction
    pub(crate) fn init_url(&self, url: Url) {
        self.data.lock().url = Some(url);
    }

    /// Attach a registered constraint, re-tested on every write
    pub fn set_constraint(&self, ctx: &Context, id: ConstraintId) -> Result<()> {
        let _guard = ctx.lock_value(&self.lock)?;
        self.data.lock().constraint = Some(id);
        Ok(())
    }

    /// Constraint of the object
    pub fn constraint(&self) -> Option<ConstraintId> {
        self.data.lock().constraint
    }

    fn check_permission(&self, ctx: &Context, kind: PermissionKind, name: &str) -> Result<()> {
        let url = match self.url() {
            Some(url) => url,
            None => return Ok(()),
        };
        let prop_url = url.to_dir_url().append_relative_path(&Path::new(format!("./{name}"))?)?;
        ctx.check_has_permission(&Permission::database(kind, prop_url))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Value of property `name`
    pub fn prop(&self, ctx: &Context, name: &str) -> Result<Value> {
        self.read_prop(ctx, name, false, true)
    }

    /// Value of property `name` for a caller that will not store it
    ///
    /// The access is read-only for the transaction isolator and clonable
    /// values are not copied.
    pub fn prop_not_stored(&self, ctx: &Context, name: &str) -> Result<Value> {
        self.read_prop(ctx, name, true, false)
    }

    fn read_prop(&self, ctx: &Context, name: &str, read_only: bool, stored: bool) -> Result<Value> {
        self.isolator.wait_if_other_transaction(&ctx.access(read_only))?;
        let _guard = ctx.lock_value(&self.lock)?;
        self.check_permission(ctx, PermissionKind::Read, name)?;

        let data = self.data.lock();
        let value = match data.keys.binary_search_by(|k| k.as_str().cmp(name)) {
            Ok(i) => data.values[i].clone(),
            Err(_) => {
                return Err(Error::PropertyDoesNotExist {
                    property: name.to_string(),
                    kind: ValueKind::Object,
                })
            }
        };
        drop(data);

        if stored && self.is_shared() {
            return Ok(value.check_shared_or_clone());
        }
        Ok(value)
    }

    /// Names of the properties, sorted
    pub fn property_names(&self, ctx: &Context) -> Result<Vec<String>> {
        self.isolator.wait_if_other_transaction(&ctx.access(true))?;
        let _guard = ctx.lock_value(&self.lock)?;
        Ok(self.data.lock().keys.clone())
    }

    /// Property names as `PropertyName` values
    pub fn keys(&self, ctx: &Context) -> Result<Vec<Value>> {
        Ok(self
            .property_names(ctx)?
            .into_iter()
            .map(Value::PropertyName)
            .collect())
    }

    /// Whether property `name` exists
    pub fn has_prop(&self, ctx: &Context, name: &str) -> Result<bool> {
        self.isolator.wait_if_other_transaction(&ctx.access(true))?;
        let _guard = ctx.lock_value(&self.lock)?;
        Ok(self.data.lock().keys.iter().any(|k| k == name))
    }

    /// Whether a property holds a value equal to `value`
    pub fn has_prop_value(&self, ctx: &Context, value: &Value) -> Result<bool> {
        self.isolator.wait_if_other_transaction(&ctx.access(true))?;
        let _guard = ctx.lock_value(&self.lock)?;
        let values = self.data.lock().values.clone();
        Ok(values.iter().any(|v| v == value))
    }

    /// Consistent copy of the properties
    pub fn entry_map(&self, ctx: &Context) -> Result<BTreeMap<String, Value>> {
        self.isolator.wait_if_other_transaction(&ctx.access(true))?;
        let _guard = ctx.lock_value(&self.lock)?;
        let shared = self.is_shared();
        Ok(self
            .snapshot_entries()
            .into_iter()
            .map(|(k, v)| {
                let v = if shared { v.check_shared_or_clone() } else { v };
                (k, v)
            })
            .collect())
    }

    /// Visit every property of a private object, in key order
    ///
    /// # Panics
    ///
    /// Panics if the object is shared.
    pub fn for_each_entry(&self, mut f: impl FnMut(&str, &Value) -> Result<()>) -> Result<()> {
        assert!(!self.is_shared(), "for_each_entry called on a shared object");
        for (k, v) in self.snapshot_entries() {
            f(&k, &v)?;
        }
        Ok(())
    }

    /// Values of the index keys of a private object, in index order
    ///
    /// # Panics
    ///
    /// Panics if the object is shared.
    pub fn indexed(&self) -> Vec<Value> {
        assert!(!self.is_shared(), "indexed called on a shared object");
        let data = self.data.lock();
        (0..data.implicit_prop_count)
            .map(|i| {
                let key = i.to_string();
                let pos = data
                    .keys
                    .binary_search(&key)
                    .unwrap_or_else(|_| panic!("index key {key} not found"));
                data.values[pos].clone()
            })
            .collect()
    }

    /// Number of index keys
    pub fn len(&self) -> usize {
        self.data.lock().implicit_prop_count
    }

    /// Whether the object has no index key
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value of index key `i`
    pub fn at(&self, ctx: &Context, i: usize) -> Result<Value> {
        let len = self.len();
        if i >= len {
            return Err(Error::IndexOutOfBounds { index: i, len });
        }
        self.prop(ctx, &i.to_string())
    }

    /// Copy of the properties without locking the smart lock
    pub(crate) fn snapshot_entries(&self) -> Vec<(String, Value)> {
        let data = self.data.lock();
        data.keys.iter().cloned().zip(data.values.iter().cloned()).collect()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Set property `name` to `value`
    ///
    /// Fails without changing the object if `name` is an index key, the
    /// value is not serializable, a permission is missing or the object would
    /// no longer match its constraint.
    pub fn set_prop(&self, ctx: &Context, name: &str, value: Value) -> Result<()> {
        if !value.is_serializable() {
            return Err(Error::NotSerializable(value.kind()));
        }
        self.isolator.wait_if_other_transaction(&ctx.access(false))?;
        let value = if self.is_shared() {
            value.share_or_clone(ctx.state_id())?
        } else {
            value
        };

        let guard = ctx.lock_value(&self.lock)?;
        if is_index_key(name) {
            return Err(Error::CannotSetIndexKey(name.to_string()));
        }
        self.check_permission(ctx, PermissionKind::Write, name)?;

        let constraint = self
            .constraint()
            .and_then(|id| ctx.registries().constraints().get(id));
        if let Some(pattern) = constraint {
            let mut candidate = self.snapshot_entries();
            match candidate.iter_mut().find(|(k, _)| k == name) {
                Some(entry) => entry.1 = value.clone(),
                None => candidate.push((name.to_string(), value.clone())),
            }
            if !pattern.test_entries(ctx, &candidate) {
                warn!(property = name, "constraint violation, write rolled back");
                return Err(Error::ConstraintViolation {
                    property: name.to_string(),
                });
            }
        }

        let (mutation, replaced) = {
            let mut data = self.data.lock();
            match data.keys.binary_search_by(|k| k.as_str().cmp(name)) {
                Ok(i) => {
                    let previous = std::mem::replace(&mut data.values[i], value.clone());
                    let handle = data.prop_callbacks.as_mut().and_then(|c| c[i].take());
                    let m = Mutation::update_prop(name, value.clone(), WatchingDepth::Shallow, format!("/{name}"));
                    (m, Some((previous, handle)))
                }
                Err(_) => {
                    data.keys.push(name.to_string());
                    data.values.push(value.clone());
                    if let Some(callbacks) = data.prop_callbacks.as_mut() {
                        callbacks.push(None);
                    }
                    let keys = std::mem::take(&mut data.keys);
                    let values = std::mem::take(&mut data.values);
                    let callbacks = data.prop_callbacks.take();
                    let (keys, values, callbacks) = sort_props(keys, values, callbacks);
                    data.keys = keys;
                    data.values = values;
                    data.prop_callbacks = callbacks;
                    let m = Mutation::add_prop(name, value.clone(), WatchingDepth::Shallow, format!("/{name}"));
                    (m, None)
                }
            }
        };

        if let Some(hub) = self.hub.get() {
            if let Some((previous, handle)) = replaced {
                unwatch_child(ctx, &previous, handle);
            }
            if let Some(child_depth) = hub.child_depth() {
                self.watch_prop_value(ctx, hub, name, &value, child_depth);
            }
            hub.inform_watchers(&mutation);
            drop(guard);
            hub.call_microtasks(ctx, &mutation);
        }
        Ok(())
    }

    fn watch_prop_value(&self, ctx: &Context, hub: &Arc<WatchHub>, name: &str, value: &Value, depth: WatchingDepth) {
        let position = ChildPosition::Fixed(format!("/{name}"));
        match watch_child(hub, ctx, value, position, depth) {
            Ok(handle) => {
                let mut data = self.data.lock();
                if let (Ok(i), Some(callbacks)) = (
                    data.keys.binary_search_by(|k| k.as_str().cmp(name)),
                    data.prop_callbacks.as_mut(),
                ) {
                    callbacks[i] = handle;
                }
            }
            Err(e) => warn!(property = name, error = %e, "failed to watch property value"),
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
        let (entries, previous) = {
            let mut data = self.data.lock();
            let entries: Vec<(String, Value)> =
                data.keys.iter().cloned().zip(data.values.iter().cloned()).collect();
            (entries, data.prop_callbacks.take())
        };
        if let Some(previous) = previous {
            for ((_, v), handle) in entries.iter().zip(previous) {
                unwatch_child(ctx, v, handle);
            }
        }

        let mut handles = Vec::with_capacity(entries.len());
        for (name, v) in &entries {
            handles.push(watch_child(hub, ctx, v, ChildPosition::Fixed(format!("/{name}")), child_depth)?);
        }
        debug!(props = entries.len(), depth = ?child_depth, "watching object properties");
        self.data.lock().prop_callbacks = Some(handles);
        Ok(())
    }
}

impl PotentiallySharable for Object {
    fn is_sharable(&self) -> std::result::Result<(), String> {
        if self.is_shared() {
            return Ok(());
        }
        check_all_sharable(&self.data.lock().values.clone())
    }

    fn share(&self, origin: StateId) {
        let promoted = self.lock.share(origin, || {
            let values = self.data.lock().values.clone();
            let shared = share_or_clone_all(&values, origin);
            self.data.lock().values = shared;
        });
        if promoted {
            debug!(origin = %origin, "object shared");
        }
    }

    fn smart_lock(&self) -> &SmartLock {
        &self.lock
    }
}

impl Watchable for Object {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::List;
    use crate::context::ContextConfig;
    use crate::pattern::{ObjectPattern, Pattern};
    use crate::registry::Registries;
    use crate::watch::{mutation_callback, MutationKind};
    use inox_concurrency::ConcurrencyError;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ctx() -> Context {
        Context::new(ContextConfig {
            registries: Some(Arc::new(Registries::with_defaults())),
            ..Default::default()
        })
    }

    fn object(entries: Vec<(&str, Value)>) -> Arc<Object> {
        Arc::new(Object::from_entries(entries).unwrap())
    }

    #[test]
    fn test_is_index_key() {
        assert!(is_index_key("0"));
        assert!(is_index_key("12"));
        assert!(!is_index_key("01"));
        assert!(!is_index_key(""));
        assert!(!is_index_key("a1"));
    }

    #[test]
    fn test_from_map_sorts_and_counts_index_keys() {
        let ctx = ctx();
        let obj = object(vec![("b", Value::Int(2)), ("1", Value::Int(11)), ("a", Value::Int(1)), ("0", Value::Int(10))]);
        assert_eq!(obj.property_names(&ctx).unwrap(), vec!["0", "1", "a", "b"]);
        assert_eq!(obj.len(), 2);
        assert_eq!(obj.indexed(), vec![Value::Int(10), Value::Int(11)]);
        assert_eq!(obj.at(&ctx, 1).unwrap(), Value::Int(11));
        assert!(matches!(obj.at(&ctx, 2), Err(Error::IndexOutOfBounds { index: 2, len: 2 })));
    }

    #[test]
    fn test_from_entries_rejects_duplicates() {
        let err = Object::from_entries([("a", Value::Int(1)), ("a", Value::Int(2))]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_set_prop_add_and_update() {
        let ctx = ctx();
        let obj = object(vec![("b", Value::Int(2))]);
        obj.set_prop(&ctx, "a", Value::Int(1)).unwrap();
        obj.set_prop(&ctx, "c", Value::Int(3)).unwrap();
        obj.set_prop(&ctx, "b", Value::Int(20)).unwrap();

        assert_eq!(obj.property_names(&ctx).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(obj.prop(&ctx, "b").unwrap(), Value::Int(20));
        assert!(obj.has_prop(&ctx, "c").unwrap());
        assert!(obj.has_prop_value(&ctx, &Value::Int(3)).unwrap());
        assert!(!obj.has_prop_value(&ctx, &Value::Int(2)).unwrap());
    }

    #[test]
    fn test_missing_prop() {
        let err = Object::new().prop(&ctx(), "a").unwrap_err();
        assert!(matches!(err, Error::PropertyDoesNotExist { kind: ValueKind::Object, .. }));
    }

    #[test]
    fn test_cannot_set_index_key() {
        let ctx = ctx();
        let obj = object(vec![("0", Value::Int(1))]);
        let err = obj.set_prop(&ctx, "0", Value::Int(2)).unwrap_err();
        assert_eq!(err, Error::CannotSetIndexKey("0".to_string()));
        assert_eq!(obj.prop(&ctx, "0").unwrap(), Value::Int(1));
    }

    #[test]
    fn test_functions_cannot_be_stored() {
        let ctx = ctx();
        let f = Value::from(crate::value::NativeFunction::new("f", |_, _| Ok(Value::Nil)));
        assert_eq!(
            Object::new().set_prop(&ctx, "f", f).unwrap_err(),
            Error::NotSerializable(ValueKind::Function)
        );
    }

    #[test]
    fn test_constraint_violation_rolls_back() {
        let ctx = ctx();
        let obj = object(vec![("a", Value::Int(1))]);
        let id = ctx
            .registries()
            .constraints()
            .register(ObjectPattern::exact([("a", Pattern::Type(ValueKind::Int))]));
        obj.set_constraint(&ctx, id).unwrap();

        let err = obj.set_prop(&ctx, "a", Value::from("x")).unwrap_err();
        assert_eq!(err, Error::ConstraintViolation { property: "a".to_string() });
        assert_eq!(obj.prop(&ctx, "a").unwrap(), Value::Int(1));

        // exact constraint: new properties are rejected too
        assert!(obj.set_prop(&ctx, "b", Value::Int(2)).is_err());
        assert!(!obj.has_prop(&ctx, "b").unwrap());

        obj.set_prop(&ctx, "a", Value::Int(5)).unwrap();
        assert_eq!(obj.prop(&ctx, "a").unwrap(), Value::Int(5));
    }

    #[test]
    fn test_url_permission_checks() {
        let url = Url::new("ldb://main/users/").unwrap();
        let ctx = Context::new(ContextConfig {
            permissions: vec![Permission::database(
                PermissionKind::Read,
                Url::new("ldb://main/users/name").unwrap(),
            )],
            ..Default::default()
        });
        let obj = object(vec![("name", Value::from("foo")), ("age", Value::Int(3))]);
        obj.set_url_once(&ctx, url.clone()).unwrap();
        assert_eq!(obj.set_url_once(&ctx, url).unwrap_err(), Error::UrlAlreadySet);

        assert_eq!(obj.prop(&ctx, "name").unwrap(), Value::from("foo"));
        assert!(matches!(obj.prop(&ctx, "age"), Err(Error::PermissionDenied { kind: PermissionKind::Read, .. })));
        assert!(matches!(
            obj.set_prop(&ctx, "name", Value::from("bar")),
            Err(Error::PermissionDenied { kind: PermissionKind::Write, .. })
        ));
        assert_eq!(obj.prop(&ctx, "name").unwrap(), Value::from("foo"));
    }

    #[test]
    fn test_one_mutation_per_write() {
        let ctx = ctx();
        let obj = object(vec![("a", Value::Int(1))]);
        let watcher = obj.watcher(&ctx, MutationWatchingConfig::default()).unwrap();

        obj.set_prop(&ctx, "a", Value::Int(2)).unwrap();
        obj.set_prop(&ctx, "b", Value::Int(3)).unwrap();
        let _ = obj.set_prop(&ctx, "0", Value::Int(3));

        let first = watcher.next_mutation(Duration::from_millis(10)).unwrap();
        assert_eq!(first.kind, MutationKind::UpdateProp);
        assert_eq!(first.path, "/a");
        let second = watcher.next_mutation(Duration::from_millis(10)).unwrap();
        assert_eq!(second.kind, MutationKind::AddProp);
        assert_eq!(second.values[1], Value::Int(3));
        assert!(watcher.next_mutation(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_microtask_may_reenter_object() {
        let ctx = ctx();
        let obj = object(vec![("a", Value::Int(1))]);
        obj.share(ctx.state_id());

        let target = Arc::clone(&obj);
        obj.on_mutation(
            &ctx,
            mutation_callback(move |ctx, _| {
                // runs after the lock was released
                target.prop(ctx, "a").is_ok()
            }),
            MutationWatchingConfig::default(),
        )
        .unwrap();
        obj.set_prop(&ctx, "a", Value::Int(2)).unwrap();
    }

    #[test]
    fn test_deep_watching_relays_child_mutations() {
        let ctx = ctx();
        let inner = object(vec![("b", Value::Int(1))]);
        let outer = object(vec![("a", Value::Object(Arc::clone(&inner)))]);

        let shallow = outer.watcher(&ctx, MutationWatchingConfig::with_depth(WatchingDepth::Shallow)).unwrap();
        let deep = outer.watcher(&ctx, MutationWatchingConfig::with_depth(WatchingDepth::Deep)).unwrap();

        inner.set_prop(&ctx, "b", Value::Int(2)).unwrap();
        let relayed = deep.next_mutation(Duration::from_millis(10)).unwrap();
        assert_eq!(relayed.path, "/a/b");
        assert_eq!(relayed.depth, WatchingDepth::Intermediate);
        assert!(shallow.next_mutation(Duration::from_millis(5)).is_none());

        // replaced values stop being relayed
        outer.set_prop(&ctx, "a", Value::Int(0)).unwrap();
        assert_eq!(deep.next_mutation(Duration::from_millis(10)).unwrap().path, "/a");
        inner.set_prop(&ctx, "b", Value::Int(3)).unwrap();
        assert!(deep.next_mutation(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_deep_watched_object_containing_itself() {
        let ctx = ctx();
        let obj = object(vec![("a", Value::Int(1))]);
        let deep = obj.watcher(&ctx, MutationWatchingConfig::with_depth(WatchingDepth::Deep)).unwrap();

        obj.set_prop(&ctx, "me", Value::Object(Arc::clone(&obj))).unwrap();
        assert_eq!(deep.next_mutation(Duration::from_millis(10)).unwrap().path, "/me");
        assert_eq!(deep.next_mutation(Duration::from_millis(10)).unwrap().path, "/me/me");
        assert!(deep.next_mutation(Duration::from_millis(5)).is_none());

        obj.set_prop(&ctx, "a", Value::Int(2)).unwrap();
        assert_eq!(deep.next_mutation(Duration::from_millis(10)).unwrap().path, "/a");
        assert_eq!(deep.next_mutation(Duration::from_millis(10)).unwrap().path, "/me/a");
        assert!(deep.next_mutation(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_callbacks_follow_their_property_after_sort() {
        let ctx = ctx();
        let list = Arc::new(List::new(vec![Value::Int(1)]).unwrap());
        let obj = object(vec![("m", Value::List(Arc::clone(&list)))]);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        obj.on_mutation(
            &ctx,
            mutation_callback(move |_, m| {
                if m.path.starts_with("/m/") {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                true
            }),
            MutationWatchingConfig::with_depth(WatchingDepth::Intermediate),
        )
        .unwrap();

        // "a" sorts before "m": the handle of "m" moves to index 1
        obj.set_prop(&ctx, "a", Value::Int(0)).unwrap();
        list.append(&ctx, vec![Value::Int(2)]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // replacing "a" must not unregister the callback of "m"
        obj.set_prop(&ctx, "a", Value::Int(1)).unwrap();
        list.append(&ctx, vec![Value::Int(3)]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_share_twice_is_idempotent() {
        let ctx = ctx();
        let array = Value::from(crate::containers::Array::new(vec![Value::Int(1)]).unwrap());
        let obj = object(vec![("arr", array.clone())]);

        obj.share(ctx.state_id());
        let after_first = obj.prop_not_stored(&ctx, "arr").unwrap();
        assert!(!after_first.is_same(&array));

        obj.share(ctx.state_id());
        let after_second = obj.prop_not_stored(&ctx, "arr").unwrap();
        assert!(after_second.is_same(&after_first));
        assert!(obj.is_shared());
    }

    #[test]
    #[should_panic(expected = "shared object")]
    fn test_indexed_panics_on_shared_object() {
        let obj = object(vec![("0", Value::Int(1))]);
        obj.share(StateId::next());
        let _ = obj.indexed();
    }

    #[test]
    fn test_shared_object_stays_sharable() {
        let obj = object(vec![("a", Value::from(List::new(vec![Value::Int(1)]).unwrap()))]);
        assert!(obj.is_sharable().is_ok());
        obj.share(StateId::next());
        assert!(obj.is_sharable().is_ok());
        match obj.snapshot_entries()[0].1.clone() {
            Value::List(l) => assert!(l.is_shared()),
            other => panic!("unexpected value {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn prop_sort_is_a_permutation_of_parallel_vectors(keys in proptest::collection::hash_set("[a-z0-9]{1,4}", 0..16)) {
            let keys: Vec<String> = keys.into_iter().collect();
            let values: Vec<Value> = keys.iter().map(|k| Value::Str(k.clone())).collect();
            let callbacks: Vec<Option<CallbackHandle>> = vec![None; keys.len()];

            let (sorted_keys, sorted_values, sorted_callbacks) = sort_props(keys.clone(), values, Some(callbacks));
            prop_assert!(sorted_keys.windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(sorted_keys.len(), keys.len());
            prop_assert_eq!(sorted_callbacks.map(|c| c.len()), Some(keys.len()));
            for (k, v) in sorted_keys.iter().zip(&sorted_values) {
                prop_assert_eq!(v, &Value::Str(k.clone()));
            }
        }

        #[test]
        fn prop_keys_sorted_after_any_writes(names in proptest::collection::vec("[a-z]{1,3}", 1..20)) {
            let ctx = ctx();
            let obj = Object::new();
            for (i, name) in names.iter().enumerate() {
                obj.set_prop(&ctx, name, Value::Int(i as i64)).unwrap();
            }
            let entries = obj.snapshot_entries();
            prop_assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
            for (name, value) in entries {
                let last = names.iter().rposition(|n| *n == name).unwrap();
                prop_assert_eq!(value, Value::Int(last as i64));
            }
        }
    }

    #[test]
    fn test_reads_wait_for_other_transaction() {
        let owner = ctx();
        let obj = object(vec![("a", Value::Int(1))]);
        owner.start_transaction(false).unwrap();
        obj.set_prop(&owner, "a", Value::Int(2)).unwrap();

        let other = Context::new(ContextConfig {
            can_block: false,
            registries: Some(Arc::new(Registries::with_defaults())),
            ..Default::default()
        });
        let refused = |err: Error| matches!(err, Error::Concurrency(ConcurrencyError::WaitRefused { .. }));
        assert!(refused(obj.property_names(&other).unwrap_err()));
        assert!(refused(obj.keys(&other).unwrap_err()));
        assert!(refused(obj.has_prop(&other, "a").unwrap_err()));
        assert!(refused(obj.has_prop_value(&other, &Value::Int(2)).unwrap_err()));
        assert!(refused(obj.entry_map(&other).unwrap_err()));

        owner.commit_transaction().unwrap();
        assert_eq!(obj.property_names(&other).unwrap(), vec!["a".to_string()]);
        assert!(obj.has_prop_value(&other, &Value::Int(2)).unwrap());
    }

}
