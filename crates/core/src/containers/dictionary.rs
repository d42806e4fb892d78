//! Mutable dictionary
//!
//! Entries are keyed by the canonical representation of their key, not by
//! the key's identity: two equal keys share one entry. The key value and the
//! entry value are stored together so they are always added and removed at
//! the same time.

use super::{check_all_sharable, share_or_clone_all, PotentiallySharable};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::repr::{parse_repr, write_repr};
use crate::value::Value;
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

#[derive(Clone)]
struct DictEntry {
    key: Value,
    value: Value,
}

#[derive(Default)]
struct DictData {
    entries: BTreeMap<String, DictEntry>,
    entry_callbacks: Option<HashMap<String, CallbackHandle>>,
}

/// Mutable dictionary with arbitrary serializable keys
pub struct Dictionary {
    lock: SmartLock,
    isolator: TransactionIsolator,
    data: Mutex<DictData>,
    hub: OnceCell<Arc<WatchHub>>,
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data.lock();
        f.debug_struct("Dictionary")
            .field("keys", &data.entries.keys().collect::<Vec<_>>())
            .field("shared", &self.lock.is_value_shared())
            .finish()
    }
}

fn key_repr(key: &Value) -> Result<String> {
    if !key.is_serializable() {
        return Err(Error::NotSerializable(key.kind()));
    }
    write_repr(key)
}

impl Dictionary {
    fn with_entries(entries: BTreeMap<String, DictEntry>) -> Self {
        Dictionary {
            lock: SmartLock::new(),
            isolator: TransactionIsolator::new(),
            data: Mutex::new(DictData {
                entries,
                entry_callbacks: None,
            }),
            hub: OnceCell::new(),
        }
    }

    /// Create a dictionary from entries keyed by key representation
    ///
    /// `"/a"` is the path `/a`, `"\"a\""` the string `a`.
    pub fn new<K: AsRef<str>>(entries: impl IntoIterator<Item = (K, Value)>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for (repr, value) in entries {
            let key = parse_repr(repr.as_ref())?;
            if !value.is_serializable() {
                return Err(Error::NotSerializable(value.kind()));
            }
            // the canonical form may differ from the given one ("1.0" vs "1.0e0")
            map.insert(key_repr(&key)?, DictEntry { key, value });
        }
        Ok(Self::with_entries(map))
    }

    /// Create a dictionary from parallel key and value lists
    pub fn from_key_value_lists(keys: Vec<Value>, values: Vec<Value>) -> Result<Self> {
        if keys.len() != values.len() {
            return Err(Error::InvalidArgument(format!(
                "{} keys for {} values",
                keys.len(),
                values.len()
            )));
        }
        let mut map = BTreeMap::new();
        for (key, value) in keys.into_iter().zip(values) {
            if !value.is_serializable() {
                return Err(Error::NotSerializable(value.kind()));
            }
            map.insert(key_repr(&key)?, DictEntry { key, value });
        }
        Ok(Self::with_entries(map))
    }

    fn hub(&self) -> &Arc<WatchHub> {
        self.hub.get_or_init(WatchHub::new)
    }

    /// Value associated with `key`
    pub fn value(&self, ctx: &Context, key: &Value) -> Result<Option<Value>> {
        let repr = key_repr(key)?;
        self.isolator.wait_if_other_transaction(&ctx.access(true))?;
        let _guard = ctx.lock_value(&self.lock)?;
        let value = self.data.lock().entries.get(&repr).map(|e| e.value.clone());
        if self.is_shared() {
            return Ok(value.map(|v| v.check_shared_or_clone()));
        }
        Ok(value)
    }

    /// Whether an entry exists for `key`
    pub fn has(&self, ctx: &Context, key: &Value) -> Result<bool> {
        let repr = key_repr(key)?;
        self.isolator.wait_if_other_transaction(&ctx.access(true))?;
        let _guard = ctx.lock_value(&self.lock)?;
        Ok(self.data.lock().entries.contains_key(&repr))
    }

    /// Keys, ordered by representation
    pub fn keys(&self, ctx: &Context) -> Result<Vec<Value>> {
        self.isolator.wait_if_other_transaction(&ctx.access(true))?;
        let _guard = ctx.lock_value(&self.lock)?;
        Ok(self.data.lock().entries.values().map(|e| e.key.clone()).collect())
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.data.lock().entries.len()
    }

    /// Whether the dictionary is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit a consistent copy of the entries, ordered by key representation
    pub fn for_each_entry(&self, ctx: &Context, mut f: impl FnMut(&Value, &Value) -> Result<()>) -> Result<()> {
        self.isolator.wait_if_other_transaction(&ctx.access(true))?;
        let entries = {
            let _guard = ctx.lock_value(&self.lock)?;
            self.snapshot_entries()
        };
        for (_, key, value) in &entries {
            f(key, value)?;
        }
        Ok(())
    }

    /// Copy of the entries as (representation, key, value)
    pub(crate) fn snapshot_entries(&self) -> Vec<(String, Value, Value)> {
        self.data
            .lock()
            .entries
            .iter()
            .map(|(repr, e)| (repr.clone(), e.key.clone(), e.value.clone()))
            .collect()
    }

    /// Associate `value` with `key`
    pub fn set_value(&self, ctx: &Context, key: Value, value: Value) -> Result<()> {
        if !value.is_serializable() {
            return Err(Error::NotSerializable(value.kind()));
        }
        let repr = key_repr(&key)?;
        self.isolator.wait_if_other_transaction(&ctx.access(false))?;
        let (key, value) = if self.is_shared() {
            (key.share_or_clone(ctx.state_id())?, value.share_or_clone(ctx.state_id())?)
        } else {
            (key, value)
        };

        let guard = ctx.lock_value(&self.lock)?;
        let (mutation, replaced) = {
            let mut data = self.data.lock();
            let handle = data.entry_callbacks.as_mut().and_then(|c| c.remove(&repr));
            let previous = data.entries.insert(
                repr.clone(),
                DictEntry {
                    key: key.clone(),
                    value: value.clone(),
                },
            );
            let path = format!("/{repr}");
            match previous {
                Some(previous) => (
                    Mutation::update_entry(key, value.clone(), WatchingDepth::Shallow, path),
                    Some((previous.value, handle)),
                ),
                None => (Mutation::add_entry(key, value.clone(), WatchingDepth::Shallow, path), None),
            }
        };

        if let Some(hub) = self.hub.get() {
            if let Some((previous, handle)) = replaced {
                unwatch_child(ctx, &previous, handle);
            }
            if let Some(depth) = hub.child_depth() {
                self.watch_entry_value(ctx, hub, &repr, &value, depth);
            }
            hub.inform_watchers(&mutation);
            drop(guard);
            hub.call_microtasks(ctx, &mutation);
        }
        Ok(())
    }

    /// Remove the entry of `key`, no-op if there is none
    pub fn remove(&self, ctx: &Context, key: &Value) -> Result<()> {
        let repr = key_repr(key)?;
        self.isolator.wait_if_other_transaction(&ctx.access(false))?;
        let guard = ctx.lock_value(&self.lock)?;
        let (removed, handle) = {
            let mut data = self.data.lock();
            let handle = data.entry_callbacks.as_mut().and_then(|c| c.remove(&repr));
            (data.entries.remove(&repr), handle)
        };
        let removed = match removed {
            Some(removed) => removed,
            None => return Ok(()),
        };

        if let Some(hub) = self.hub.get() {
            unwatch_child(ctx, &removed.value, handle);
            let mutation = Mutation::remove_entry(removed.key, WatchingDepth::Shallow, format!("/{repr}"));
            hub.inform_watchers(&mutation);
            drop(guard);
            hub.call_microtasks(ctx, &mutation);
        }
        Ok(())
    }

    fn watch_entry_value(&self, ctx: &Context, hub: &Arc<WatchHub>, repr: &str, value: &Value, depth: WatchingDepth) {
        match watch_child(hub, ctx, value, ChildPosition::Fixed(format!("/{repr}")), depth) {
            Ok(Some(handle)) => {
                if let Some(callbacks) = self.data.lock().entry_callbacks.as_mut() {
                    callbacks.insert(repr.to_string(), handle);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(key = repr, error = %e, "failed to watch entry value"),
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
            let previous = data.entry_callbacks.take().unwrap_or_default();
            (data.entries.clone(), previous)
        };
        for (repr, handle) in previous {
            if let Some(entry) = entries.get(&repr) {
                unwatch_child(ctx, &entry.value, Some(handle));
            }
        }

        let mut handles = HashMap::new();
        for (repr, entry) in &entries {
            if let Some(handle) = watch_child(hub, ctx, &entry.value, ChildPosition::Fixed(format!("/{repr}")), child_depth)? {
                handles.insert(repr.clone(), handle);
            }
        }
        debug!(entries = entries.len(), depth = ?child_depth, "watching dictionary entries");
        self.data.lock().entry_callbacks = Some(handles);
        Ok(())
    }
}

impl PotentiallySharable for Dictionary {
    fn is_sharable(&self) -> std::result::Result<(), String> {
        if self.is_shared() {
            return Ok(());
        }
        let entries = self.snapshot_entries();
        check_all_sharable(entries.iter().flat_map(|(_, k, v)| [k, v]))
    }

    fn share(&self, origin: StateId) {
        let promoted = self.lock.share(origin, || {
            let entries = self.data.lock().entries.clone();
            let mut shared = BTreeMap::new();
            for (repr, entry) in entries {
                let pair = share_or_clone_all(&[entry.key, entry.value], origin);
                let [key, value]: [Value; 2] = pair
                    .try_into()
                    .unwrap_or_else(|_| unreachable!("two values in, two values out"));
                shared.insert(repr, DictEntry { key, value });
            }
            self.data.lock().entries = shared;
        });
        if promoted {
            debug!(origin = %origin, "dictionary shared");
        }
    }

    fn smart_lock(&self) -> &SmartLock {
        &self.lock
    }
}

impl Watchable for Dictionary {
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
    use crate::resource::Path;
    use crate::watch::MutationKind;
    use inox_concurrency::ConcurrencyError;
    use std::time::Duration;

    fn ctx() -> Context {
        Context::new(ContextConfig::default())
    }

    fn path(s: &str) -> Value {
        Value::Path(Path::new(s).unwrap())
    }

    #[test]
    fn test_path_key_identity() {
        let ctx = ctx();
        let dict = Dictionary::new([("/a", Value::Int(0))]).unwrap();
        assert_eq!(dict.value(&ctx, &path("/a")).unwrap(), Some(Value::Int(0)));
        assert_eq!(dict.value(&ctx, &path("/b")).unwrap(), None);
        // the string "/a" is a different key
        assert_eq!(dict.value(&ctx, &Value::from("/a")).unwrap(), None);
    }

    #[test]
    fn test_invalid_key_repr() {
        assert!(matches!(Dictionary::new([("{", Value::Int(0))]), Err(Error::Parse { .. })));
    }

    #[test]
    fn test_set_and_remove() {
        let ctx = ctx();
        let dict = Dictionary::from_key_value_lists(vec![Value::Int(1)], vec![Value::from("one")]).unwrap();
        dict.set_value(&ctx, Value::Int(2), Value::from("two")).unwrap();
        dict.set_value(&ctx, Value::Int(1), Value::from("uno")).unwrap();

        assert_eq!(dict.len(), 2);
        assert_eq!(dict.keys(&ctx).unwrap(), vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(dict.value(&ctx, &Value::Int(1)).unwrap(), Some(Value::from("uno")));

        dict.remove(&ctx, &Value::Int(1)).unwrap();
        dict.remove(&ctx, &Value::Int(3)).unwrap();
        assert!(!dict.has(&ctx, &Value::Int(1)).unwrap());
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn test_mismatched_lists() {
        assert!(Dictionary::from_key_value_lists(vec![Value::Int(1)], vec![]).is_err());
    }

    #[test]
    fn test_mutations() {
        let ctx = ctx();
        let dict = Dictionary::new([("1", Value::Int(1))]).unwrap();
        let watcher = dict.watcher(&ctx, MutationWatchingConfig::default()).unwrap();

        dict.set_value(&ctx, Value::Int(1), Value::Int(2)).unwrap();
        dict.set_value(&ctx, Value::Int(2), Value::Int(2)).unwrap();
        dict.remove(&ctx, &Value::Int(1)).unwrap();

        let kinds: Vec<MutationKind> = std::iter::from_fn(|| watcher.next_mutation(Duration::from_millis(5)))
            .map(|m| m.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![MutationKind::UpdateEntry, MutationKind::AddEntry, MutationKind::RemoveEntry]
        );
    }

    #[test]
    fn test_deep_watching_entry_values() {
        let ctx = ctx();
        let list = Arc::new(List::new(vec![]).unwrap());
        let dict = Dictionary::new([("#a", Value::List(Arc::clone(&list)))]).unwrap();
        let watcher = dict
            .watcher(&ctx, MutationWatchingConfig::with_depth(WatchingDepth::Intermediate))
            .unwrap();

        list.append(&ctx, vec![Value::Int(1)]).unwrap();
        let m = watcher.next_mutation(Duration::from_millis(10)).unwrap();
        assert!(m.path.starts_with("/#a/"));

        dict.remove(&ctx, &Value::Identifier("a".into())).unwrap();
        assert_eq!(watcher.next_mutation(Duration::from_millis(10)).unwrap().kind, MutationKind::RemoveEntry);
        list.append(&ctx, vec![Value::Int(2)]).unwrap();
        assert!(watcher.next_mutation(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_share_values_and_keys() {
        let ctx = ctx();
        let dict = Dictionary::new([("1", Value::from(List::new(vec![]).unwrap()))]).unwrap();
        assert!(dict.is_sharable().is_ok());
        dict.share(ctx.state_id());
        dict.share(ctx.state_id());
        assert!(dict.is_shared());
        match dict.value(&ctx, &Value::Int(1)).unwrap() {
            Some(Value::List(l)) => assert!(l.is_shared()),
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn test_reads_wait_for_other_transaction() {
        let owner = ctx();
        let dict = Dictionary::new([("1", Value::Int(1))]).unwrap();
        owner.start_transaction(false).unwrap();
        dict.set_value(&owner, Value::Int(1), Value::Int(2)).unwrap();

        let other = Context::new(ContextConfig {
            can_block: false,
            ..ContextConfig::default()
        });
        let refused = |err: Error| matches!(err, Error::Concurrency(ConcurrencyError::WaitRefused { .. }));
        assert!(refused(dict.keys(&other).unwrap_err()));
        assert!(refused(dict.for_each_entry(&other, |_, _| Ok(())).unwrap_err()));

        owner.commit_transaction().unwrap();
        let mut seen = Vec::new();
        dict.for_each_entry(&other, |k, v| {
            seen.push((k.clone(), v.clone()));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![(Value::Int(1), Value::Int(2))]);
    }

}
