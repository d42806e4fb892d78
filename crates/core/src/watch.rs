//! Mutation records, watchers and microtask callbacks
//!
//! Every structural change to a container is described by one [`Mutation`].
//! Containers hand each mutation to two kinds of observers:
//!
//! - **Watchers** ([`MutationWatcher`]): queues filled without blocking the
//!   mutator and drained by the observer at its own pace.
//! - **Microtasks** ([`MutationCallbacks`]): synchronous callbacks invoked
//!   after the container released its lock, addressed by generational
//!   [`CallbackHandle`]s.
//!
//! ## Depth
//!
//! A mutation made directly on a container has depth `Shallow`. Containers
//! watched deeper than `Shallow` register a callback on each watchable child
//! and re-emit the child's mutations one level deeper with a prefixed path:
//!
//! ```text
//! child /b changed      (Shallow)       -> parent sees /a/b (Intermediate)
//! grandchild /c changed (Shallow)       -> parent sees /a/b/c (Deep)
//! ```

use crate::context::Context;
use crate::value::Value;
use parking_lot::{Condvar, Mutex};
use slab::Slab;
use smallvec::{smallvec, SmallVec};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{trace, warn};

/// Maximum number of undelivered mutations kept by a watcher
pub const WATCHER_QUEUE_CAPACITY: usize = 1024;

// ============================================================================
// Depth
// ============================================================================

/// How far mutations propagate to an observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum WatchingDepth {
    /// No depth given, treated as `Shallow`
    #[default]
    Unspecified,
    /// Direct mutations only
    Shallow,
    /// Direct mutations and mutations of direct children
    Intermediate,
    /// Mutations at any depth
    Deep,
}

impl WatchingDepth {
    /// Whether a depth was given
    pub fn is_specified(self) -> bool {
        self != WatchingDepth::Unspecified
    }

    fn normalized(self) -> Self {
        if self == WatchingDepth::Unspecified {
            WatchingDepth::Shallow
        } else {
            self
        }
    }

    /// Depth of a mutation re-emitted by the parent container
    pub fn plus_one(self) -> Self {
        match self.normalized() {
            WatchingDepth::Shallow => WatchingDepth::Intermediate,
            _ => WatchingDepth::Deep,
        }
    }

    /// Whether an observer configured with this depth must see a mutation of
    /// depth `mutation_depth`
    pub fn must_inform(self, mutation_depth: WatchingDepth) -> bool {
        mutation_depth.normalized() <= self.normalized()
    }

    /// Depth a container registers on its children with, if any
    pub fn child_depth(self) -> Option<WatchingDepth> {
        match self {
            WatchingDepth::Intermediate => Some(WatchingDepth::Shallow),
            WatchingDepth::Deep => Some(WatchingDepth::Deep),
            _ => None,
        }
    }
}

/// Configuration of a watcher or mutation callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MutationWatchingConfig {
    /// Propagation depth
    pub depth: WatchingDepth,
}

impl MutationWatchingConfig {
    /// Configuration with the given depth
    pub fn with_depth(depth: WatchingDepth) -> Self {
        MutationWatchingConfig { depth }
    }
}

// ============================================================================
// Mutation
// ============================================================================

/// Kind of structural change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    /// New object property
    AddProp,
    /// Existing object property replaced
    UpdateProp,
    /// New dictionary entry
    AddEntry,
    /// Existing dictionary entry replaced
    UpdateEntry,
    /// Dictionary entry removed
    RemoveEntry,
    /// Sequence element replaced
    SetElemAtIndex,
    /// Sequence range replaced
    SetSliceAtRange,
    /// Element inserted into a sequence
    InsertElemAtIndex,
    /// Sequence inserted into a sequence
    InsertSequenceAtIndex,
    /// Element removed from a sequence
    RemovePosition,
    /// Range removed from a sequence
    RemovePositionRange,
    /// Element added to a set
    AddSetElement,
    /// Element removed from a set
    RemoveSetElement,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MutationKind::AddProp => "add-prop",
            MutationKind::UpdateProp => "update-prop",
            MutationKind::AddEntry => "add-entry",
            MutationKind::UpdateEntry => "update-entry",
            MutationKind::RemoveEntry => "remove-entry",
            MutationKind::SetElemAtIndex => "set-elem-at-index",
            MutationKind::SetSliceAtRange => "set-slice-at-range",
            MutationKind::InsertElemAtIndex => "insert-elem-at-index",
            MutationKind::InsertSequenceAtIndex => "insert-sequence-at-index",
            MutationKind::RemovePosition => "remove-position",
            MutationKind::RemovePositionRange => "remove-position-range",
            MutationKind::AddSetElement => "add-set-element",
            MutationKind::RemoveSetElement => "remove-set-element",
        };
        f.write_str(s)
    }
}

/// One structural change to a container
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// Kind of change
    pub kind: MutationKind,
    /// Data of the change (property name, key, index, new values)
    pub values: SmallVec<[Value; 2]>,
    /// How far the change is from the observed container
    pub depth: WatchingDepth,
    /// Location of the change relative to the observed container
    pub path: String,
}

impl Mutation {
    fn new(
        kind: MutationKind,
        values: SmallVec<[Value; 2]>,
        depth: WatchingDepth,
        path: impl Into<String>,
    ) -> Self {
        Mutation {
            kind,
            values,
            depth,
            path: path.into(),
        }
    }

    /// New property `name` set to `value`
    pub fn add_prop(name: &str, value: Value, depth: WatchingDepth, path: impl Into<String>) -> Self {
        let values = smallvec![Value::PropertyName(name.to_string()), value];
        Self::new(MutationKind::AddProp, values, depth, path)
    }

    /// Property `name` replaced by `value`
    pub fn update_prop(name: &str, value: Value, depth: WatchingDepth, path: impl Into<String>) -> Self {
        let values = smallvec![Value::PropertyName(name.to_string()), value];
        Self::new(MutationKind::UpdateProp, values, depth, path)
    }

    /// New entry `key` set to `value`
    pub fn add_entry(key: Value, value: Value, depth: WatchingDepth, path: impl Into<String>) -> Self {
        Self::new(MutationKind::AddEntry, smallvec![key, value], depth, path)
    }

    /// Entry `key` replaced by `value`
    pub fn update_entry(key: Value, value: Value, depth: WatchingDepth, path: impl Into<String>) -> Self {
        Self::new(MutationKind::UpdateEntry, smallvec![key, value], depth, path)
    }

    /// Entry `key` removed
    pub fn remove_entry(key: Value, depth: WatchingDepth, path: impl Into<String>) -> Self {
        Self::new(MutationKind::RemoveEntry, smallvec![key], depth, path)
    }

    /// Element at `index` replaced by `value`
    pub fn set_elem_at_index(index: usize, value: Value, depth: WatchingDepth, path: impl Into<String>) -> Self {
        let values = smallvec![Value::Int(index as i64), value];
        Self::new(MutationKind::SetElemAtIndex, values, depth, path)
    }

    /// Elements in `start..end` replaced by the elements of `seq`
    pub fn set_slice_at_range(
        start: usize,
        end: usize,
        seq: Value,
        depth: WatchingDepth,
        path: impl Into<String>,
    ) -> Self {
        let values = smallvec![Value::Int(start as i64), Value::Int(end as i64), seq];
        Self::new(MutationKind::SetSliceAtRange, values, depth, path)
    }

    /// `value` inserted at `index`
    pub fn insert_elem_at_index(index: usize, value: Value, depth: WatchingDepth, path: impl Into<String>) -> Self {
        let values = smallvec![Value::Int(index as i64), value];
        Self::new(MutationKind::InsertElemAtIndex, values, depth, path)
    }

    /// Elements of `seq` inserted at `index`
    pub fn insert_sequence_at_index(index: usize, seq: Value, depth: WatchingDepth, path: impl Into<String>) -> Self {
        let values = smallvec![Value::Int(index as i64), seq];
        Self::new(MutationKind::InsertSequenceAtIndex, values, depth, path)
    }

    /// Element at `index` removed
    pub fn remove_position(index: usize, depth: WatchingDepth, path: impl Into<String>) -> Self {
        Self::new(MutationKind::RemovePosition, smallvec![Value::Int(index as i64)], depth, path)
    }

    /// Elements in `start..end` removed
    pub fn remove_position_range(start: usize, end: usize, depth: WatchingDepth, path: impl Into<String>) -> Self {
        let values = smallvec![Value::Int(start as i64), Value::Int(end as i64)];
        Self::new(MutationKind::RemovePositionRange, values, depth, path)
    }

    /// `value` added to a set
    pub fn add_set_element(value: Value, depth: WatchingDepth, path: impl Into<String>) -> Self {
        Self::new(MutationKind::AddSetElement, smallvec![value], depth, path)
    }

    /// `value` removed from a set
    pub fn remove_set_element(value: Value, depth: WatchingDepth, path: impl Into<String>) -> Self {
        Self::new(MutationKind::RemoveSetElement, smallvec![value], depth, path)
    }

    /// Same mutation seen from the parent: path prefixed, one level deeper
    pub fn relocated(&self, prefix: &str) -> Mutation {
        let path = if self.path == "/" {
            prefix.to_string()
        } else {
            format!("{prefix}{}", self.path)
        };
        Mutation {
            kind: self.kind,
            values: self.values.clone(),
            depth: self.depth.plus_one(),
            path,
        }
    }
}

// ============================================================================
// Watchers
// ============================================================================

struct WatcherInner {
    config: MutationWatchingConfig,
    queue: Mutex<VecDeque<Mutation>>,
    available: Condvar,
    stopped: AtomicBool,
}

/// Queue of mutations observed on one value
///
/// Cloning yields a handle to the same queue.
#[derive(Clone)]
pub struct MutationWatcher {
    inner: Arc<WatcherInner>,
}

impl fmt::Debug for MutationWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationWatcher")
            .field("config", &self.inner.config)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl MutationWatcher {
    /// Create a watcher
    pub fn new(config: MutationWatchingConfig) -> Self {
        MutationWatcher {
            inner: Arc::new(WatcherInner {
                config,
                queue: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Configuration of the watcher
    pub fn config(&self) -> MutationWatchingConfig {
        self.inner.config
    }

    /// Enqueue a mutation without ever blocking on the consumer
    ///
    /// When the queue is full the oldest undelivered mutation is dropped.
    pub fn inform_about_async(&self, mutation: &Mutation) {
        if self.is_stopped() || !self.inner.config.depth.must_inform(mutation.depth) {
            return;
        }
        let mut queue = self.inner.queue.lock();
        if queue.len() >= WATCHER_QUEUE_CAPACITY {
            queue.pop_front();
            warn!(capacity = WATCHER_QUEUE_CAPACITY, "watcher queue full, dropping oldest mutation");
        }
        queue.push_back(mutation.clone());
        self.inner.available.notify_one();
    }

    /// Next mutation, waiting at most `timeout`
    pub fn next_mutation(&self, timeout: Duration) -> Option<Mutation> {
        let mut queue = self.inner.queue.lock();
        if let Some(m) = queue.pop_front() {
            return Some(m);
        }
        if self.is_stopped() {
            return None;
        }
        self.inner.available.wait_for(&mut queue, timeout);
        queue.pop_front()
    }

    /// Stop the watcher, it is dropped by its value on the next mutation
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let _queue = self.inner.queue.lock();
        self.inner.available.notify_all();
    }

    /// Whether the watcher was stopped
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }
}

/// Watchers registered on one value
#[derive(Debug, Default)]
pub struct ValueWatchers {
    watchers: Mutex<Vec<MutationWatcher>>,
}

impl ValueWatchers {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watcher
    pub fn add(&self, watcher: MutationWatcher) {
        self.watchers.lock().push(watcher);
    }

    /// Number of live watchers
    pub fn len(&self) -> usize {
        self.watchers.lock().iter().filter(|w| !w.is_stopped()).count()
    }

    /// Whether there is no live watcher
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inform every watcher whose depth covers the mutation, dropping stopped ones
    pub fn inform_about_async(&self, mutation: &Mutation) {
        let mut watchers = self.watchers.lock();
        let before = watchers.len();
        watchers.retain(|w| !w.is_stopped());
        if watchers.len() != before {
            trace!(dropped = before - watchers.len(), "stopped watchers removed");
        }
        for watcher in watchers.iter() {
            watcher.inform_about_async(mutation);
        }
    }

    /// Stop every watcher
    pub fn stop_all(&self) {
        for watcher in self.watchers.lock().drain(..) {
            watcher.stop();
        }
    }
}

// ============================================================================
// Microtask callbacks
// ============================================================================

/// Microtask invoked with each mutation; returns whether to stay registered
pub type MutationCallback = Arc<dyn Fn(&Context, &Mutation) -> bool + Send + Sync>;

/// Wrap a closure into a [`MutationCallback`]
pub fn mutation_callback<F>(f: F) -> MutationCallback
where
    F: Fn(&Context, &Mutation) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Stable reference to a registered callback
///
/// A slot index is reused only after the callback was removed, and the
/// generation makes stale handles inert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle {
    index: usize,
    generation: u64,
}

struct CallbackSlot {
    generation: u64,
    depth: WatchingDepth,
    callback: MutationCallback,
}

/// Arena of microtask callbacks
#[derive(Default)]
pub struct MutationCallbacks {
    slots: Mutex<Slab<CallbackSlot>>,
    next_generation: AtomicU64,
}

impl fmt::Debug for MutationCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationCallbacks")
            .field("len", &self.len())
            .finish()
    }
}

impl MutationCallbacks {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback
    pub fn add(&self, callback: MutationCallback, config: MutationWatchingConfig) -> CallbackHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let index = self.slots.lock().insert(CallbackSlot {
            generation,
            depth: config.depth,
            callback,
        });
        CallbackHandle { index, generation }
    }

    /// Unregister a callback, returns false for stale handles
    pub fn remove(&self, handle: CallbackHandle) -> bool {
        let mut slots = self.slots.lock();
        match slots.get(handle.index) {
            Some(slot) if slot.generation == handle.generation => {
                slots.remove(handle.index);
                true
            }
            _ => false,
        }
    }

    /// Whether the handle refers to a registered callback
    pub fn contains(&self, handle: CallbackHandle) -> bool {
        matches!(self.slots.lock().get(handle.index), Some(slot) if slot.generation == handle.generation)
    }

    /// Number of registered callbacks
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether no callback is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke the callbacks whose depth covers the mutation
    ///
    /// Callbacks run without the arena lock held, so they may register or
    /// remove callbacks. Callbacks returning `false` are unregistered.
    pub fn call_microtasks(&self, ctx: &Context, mutation: &Mutation) {
        let due: Vec<(CallbackHandle, MutationCallback)> = self
            .slots
            .lock()
            .iter()
            .filter(|(_, slot)| slot.depth.must_inform(mutation.depth))
            .map(|(index, slot)| {
                let handle = CallbackHandle {
                    index,
                    generation: slot.generation,
                };
                (handle, Arc::clone(&slot.callback))
            })
            .collect();

        for (handle, callback) in due {
            if !callback(ctx, mutation) {
                self.remove(handle);
            }
        }
    }
}

// ============================================================================
// Watchable values
// ============================================================================

/// Values that emit mutations
pub trait Watchable: Send + Sync {
    /// Create a watcher receiving the mutations of this value
    fn watcher(&self, ctx: &Context, config: MutationWatchingConfig) -> crate::Result<MutationWatcher>;

    /// Register a microtask callback
    fn on_mutation(
        &self,
        ctx: &Context,
        callback: MutationCallback,
        config: MutationWatchingConfig,
    ) -> crate::Result<CallbackHandle>;

    /// Unregister a microtask callback
    fn remove_mutation_callback(&self, ctx: &Context, handle: CallbackHandle);
}

/// Location of a child inside its parent, used to prefix relayed mutations
#[derive(Debug, Clone)]
pub(crate) enum ChildPosition {
    /// Stable location (property name, key representation)
    Fixed(String),
    /// Sequence index, updated when elements shift
    Index(Arc<AtomicUsize>),
}

impl ChildPosition {
    fn prefix(&self) -> String {
        match self {
            ChildPosition::Fixed(prefix) => prefix.clone(),
            ChildPosition::Index(index) => format!("/{}", index.load(Ordering::SeqCst)),
        }
    }
}

/// Watchers, callbacks and watching depth of one container
#[derive(Debug, Default)]
pub(crate) struct WatchHub {
    watchers: ValueWatchers,
    callbacks: MutationCallbacks,
    depth: Mutex<WatchingDepth>,
}

impl WatchHub {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current watching depth (maximum requested so far)
    pub(crate) fn depth(&self) -> WatchingDepth {
        *self.depth.lock()
    }

    /// Depth children must be watched with, if any
    pub(crate) fn child_depth(&self) -> Option<WatchingDepth> {
        self.depth().child_depth()
    }

    /// Raise the watching depth, returns whether children must be re-watched
    pub(crate) fn raise_depth(&self, requested: WatchingDepth) -> bool {
        let mut depth = self.depth.lock();
        let previous = *depth;
        *depth = previous.max(requested.normalized());
        previous.child_depth() != depth.child_depth()
    }

    pub(crate) fn add_watcher(&self, config: MutationWatchingConfig) -> MutationWatcher {
        let watcher = MutationWatcher::new(config);
        self.watchers.add(watcher.clone());
        watcher
    }

    pub(crate) fn add_callback(&self, callback: MutationCallback, config: MutationWatchingConfig) -> CallbackHandle {
        self.callbacks.add(callback, config)
    }

    pub(crate) fn remove_callback(&self, handle: CallbackHandle) {
        self.callbacks.remove(handle);
    }

    /// Inform watchers, may be called while the container is locked
    pub(crate) fn inform_watchers(&self, mutation: &Mutation) {
        self.watchers.inform_about_async(mutation);
    }

    /// Run microtasks, must be called after the container was unlocked
    pub(crate) fn call_microtasks(&self, ctx: &Context, mutation: &Mutation) {
        self.callbacks.call_microtasks(ctx, mutation);
    }

    /// Callback relaying a child's mutations to this hub.
    ///
    /// A relay reached again while it is still relaying on the same thread
    /// (a container watching itself through its children) stops there.
    fn relay(self: &Arc<Self>, position: ChildPosition) -> MutationCallback {
        let hub: Weak<WatchHub> = Arc::downgrade(self);
        let relay_id = NEXT_RELAY_ID.fetch_add(1, Ordering::Relaxed);
        mutation_callback(move |ctx, mutation| match hub.upgrade() {
            Some(hub) => {
                let Some(_active) = ActiveRelay::enter(relay_id) else {
                    trace!(relay_id, path = %mutation.path, "relay cycle cut");
                    return true;
                };
                let relocated = mutation.relocated(&position.prefix());
                hub.inform_watchers(&relocated);
                hub.call_microtasks(ctx, &relocated);
                true
            }
            None => false,
        })
    }
}

static NEXT_RELAY_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static ACTIVE_RELAYS: RefCell<SmallVec<[u64; 8]>> = RefCell::new(SmallVec::new());
}

/// Marks a relay as running on the current thread until dropped
struct ActiveRelay(u64);

impl ActiveRelay {
    fn enter(relay_id: u64) -> Option<Self> {
        ACTIVE_RELAYS.with(|active| {
            let mut active = active.borrow_mut();
            if active.contains(&relay_id) {
                return None;
            }
            active.push(relay_id);
            Some(ActiveRelay(relay_id))
        })
    }
}

impl Drop for ActiveRelay {
    fn drop(&mut self) {
        ACTIVE_RELAYS.with(|active| active.borrow_mut().retain(|id| *id != self.0));
    }
}

/// Register a relay callback on `child` if it is watchable
pub(crate) fn watch_child(
    hub: &Arc<WatchHub>,
    ctx: &Context,
    child: &Value,
    position: ChildPosition,
    depth: WatchingDepth,
) -> crate::Result<Option<CallbackHandle>> {
    match child.as_watchable() {
        Some(watchable) => {
            let handle = watchable.on_mutation(
                ctx,
                hub.relay(position),
                MutationWatchingConfig::with_depth(depth),
            )?;
            Ok(Some(handle))
        }
        None => Ok(None),
    }
}

/// Remove a relay callback previously registered on `child`
pub(crate) fn unwatch_child(ctx: &Context, child: &Value, handle: Option<CallbackHandle>) {
    if let (Some(handle), Some(watchable)) = (handle, child.as_watchable()) {
        watchable.remove_mutation_callback(ctx, handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn ctx() -> Context {
        Context::new(Default::default())
    }

    #[test]
    fn test_depth_ordering() {
        assert!(WatchingDepth::Deep.must_inform(WatchingDepth::Intermediate));
        assert!(WatchingDepth::Shallow.must_inform(WatchingDepth::Shallow));
        assert!(WatchingDepth::Unspecified.must_inform(WatchingDepth::Shallow));
        assert!(!WatchingDepth::Shallow.must_inform(WatchingDepth::Intermediate));
        assert!(!WatchingDepth::Intermediate.must_inform(WatchingDepth::Deep));

        assert_eq!(WatchingDepth::Shallow.plus_one(), WatchingDepth::Intermediate);
        assert_eq!(WatchingDepth::Intermediate.plus_one(), WatchingDepth::Deep);
        assert_eq!(WatchingDepth::Deep.plus_one(), WatchingDepth::Deep);
    }

    #[test]
    fn test_relocated_mutation() {
        let m = Mutation::update_prop("b", Value::Int(1), WatchingDepth::Shallow, "/b");
        let relocated = m.relocated("/a");
        assert_eq!(relocated.path, "/a/b");
        assert_eq!(relocated.depth, WatchingDepth::Intermediate);
        assert_eq!(relocated.kind, MutationKind::UpdateProp);
    }

    #[test]
    fn test_watcher_receives_in_order() {
        let watcher = MutationWatcher::new(MutationWatchingConfig::default());
        for i in 0..3 {
            watcher.inform_about_async(&Mutation::remove_position(i, WatchingDepth::Shallow, format!("/{i}")));
        }
        for i in 0..3 {
            let m = watcher.next_mutation(Duration::from_millis(10)).unwrap();
            assert_eq!(m.path, format!("/{i}"));
        }
        assert!(watcher.next_mutation(Duration::from_millis(1)).is_none());
    }

    #[test]
    fn test_watcher_queue_is_bounded() {
        let watcher = MutationWatcher::new(MutationWatchingConfig::default());
        for i in 0..WATCHER_QUEUE_CAPACITY + 5 {
            watcher.inform_about_async(&Mutation::remove_position(i, WatchingDepth::Shallow, "/"));
        }
        let first = watcher.next_mutation(Duration::from_millis(1)).unwrap();
        assert_eq!(first.values[0], Value::Int(5));
    }

    #[test]
    fn test_shallow_watcher_ignores_deeper_mutations() {
        let watchers = ValueWatchers::new();
        let shallow = MutationWatcher::new(MutationWatchingConfig::with_depth(WatchingDepth::Shallow));
        let deep = MutationWatcher::new(MutationWatchingConfig::with_depth(WatchingDepth::Deep));
        watchers.add(shallow.clone());
        watchers.add(deep.clone());

        let m = Mutation::remove_position(0, WatchingDepth::Intermediate, "/a/0");
        watchers.inform_about_async(&m);
        assert!(shallow.next_mutation(Duration::from_millis(1)).is_none());
        assert_eq!(deep.next_mutation(Duration::from_millis(1)), Some(m));
    }

    #[test]
    fn test_stopped_watchers_are_dropped() {
        let watchers = ValueWatchers::new();
        let w = MutationWatcher::new(MutationWatchingConfig::default());
        watchers.add(w.clone());
        assert_eq!(watchers.len(), 1);
        w.stop();
        watchers.inform_about_async(&Mutation::remove_position(0, WatchingDepth::Shallow, "/0"));
        assert!(watchers.is_empty());
    }

    #[test]
    fn test_callback_returning_false_is_unregistered() {
        let callbacks = MutationCallbacks::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handle = callbacks.add(
            mutation_callback(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                false
            }),
            MutationWatchingConfig::default(),
        );

        let ctx = ctx();
        let m = Mutation::remove_position(0, WatchingDepth::Shallow, "/0");
        callbacks.call_microtasks(&ctx, &m);
        callbacks.call_microtasks(&ctx, &m);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!callbacks.contains(handle));
    }

    #[test]
    fn test_stale_handle_does_not_remove_reused_slot() {
        let callbacks = MutationCallbacks::new();
        let first = callbacks.add(mutation_callback(|_, _| true), MutationWatchingConfig::default());
        assert!(callbacks.remove(first));

        let second = callbacks.add(mutation_callback(|_, _| true), MutationWatchingConfig::default());
        // same slot, different generation
        assert!(!callbacks.remove(first));
        assert!(callbacks.contains(second));
    }

    #[test]
    fn test_callback_may_register_another_callback() {
        let callbacks = Arc::new(MutationCallbacks::new());
        let inner = Arc::clone(&callbacks);
        callbacks.add(
            mutation_callback(move |_, _| {
                inner.add(mutation_callback(|_, _| true), MutationWatchingConfig::default());
                false
            }),
            MutationWatchingConfig::default(),
        );
        callbacks.call_microtasks(&ctx(), &Mutation::remove_position(0, WatchingDepth::Shallow, "/0"));
        assert_eq!(callbacks.len(), 1);
    }
}
