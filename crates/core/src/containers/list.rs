//! Mutable list
//!
//! Elements live in an [`UnderlyingList`]: lists of integers or floats use a
//! packed store until a value of another kind is inserted, then the store is
//! widened to generic values. Public operations do not depend on the store.
//!
//! When the list is watched deeper than shallow, every element has a slot
//! holding the callback handle registered on it and its current position.
//! Slots are inserted and removed together with elements, and positions are
//! renumbered after every shift so relayed mutations carry the right index.

use super::{check_all_sharable, share_or_clone_all, PotentiallySharable};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::pattern::Pattern;
use crate::value::Value;
use crate::watch::{
    unwatch_child, watch_child, CallbackHandle, ChildPosition, Mutation, MutationCallback,
    MutationWatcher, MutationWatchingConfig, WatchHub, Watchable, WatchingDepth,
};
use inox_concurrency::{SmartLock, StateId, TransactionIsolator};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

// ============================================================================
// Backing store
// ============================================================================

/// Backing store of a list
#[derive(Debug, Clone, PartialEq)]
pub enum UnderlyingList {
    /// Generic values
    Values(Vec<Value>),
    /// Packed integers
    Ints(Vec<i64>),
    /// Packed floats
    Floats(Vec<f64>),
}

fn packed_int(v: Value) -> i64 {
    match v {
        Value::Int(i) => i,
        other => unreachable!("packed int list received a {}", other.kind()),
    }
}

fn packed_float(v: Value) -> f64 {
    match v {
        Value::Float(x) => x,
        other => unreachable!("packed float list received a {}", other.kind()),
    }
}

impl UnderlyingList {
    /// Pick the most compact store for `values`
    pub fn from_values(values: Vec<Value>) -> Self {
        if values.is_empty() {
            return UnderlyingList::Values(values);
        }
        if values.iter().all(|v| matches!(v, Value::Int(_))) {
            return UnderlyingList::Ints(values.into_iter().map(packed_int).collect());
        }
        if values.iter().all(|v| matches!(v, Value::Float(_))) {
            return UnderlyingList::Floats(values.into_iter().map(packed_float).collect());
        }
        UnderlyingList::Values(values)
    }

    /// Whether a packed store is used
    pub fn is_packed(&self) -> bool {
        !matches!(self, UnderlyingList::Values(_))
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            UnderlyingList::Values(v) => v.len(),
            UnderlyingList::Ints(v) => v.len(),
            UnderlyingList::Floats(v) => v.len(),
        }
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `i`
    pub fn at(&self, i: usize) -> Option<Value> {
        match self {
            UnderlyingList::Values(v) => v.get(i).cloned(),
            UnderlyingList::Ints(v) => v.get(i).map(|x| Value::Int(*x)),
            UnderlyingList::Floats(v) => v.get(i).map(|x| Value::Float(*x)),
        }
    }

    /// Elements as values
    pub fn to_values(&self) -> Vec<Value> {
        match self {
            UnderlyingList::Values(v) => v.clone(),
            UnderlyingList::Ints(v) => v.iter().map(|x| Value::Int(*x)).collect(),
            UnderlyingList::Floats(v) => v.iter().map(|x| Value::Float(*x)).collect(),
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            UnderlyingList::Values(_) => true,
            UnderlyingList::Ints(_) => matches!(value, Value::Int(_)),
            UnderlyingList::Floats(_) => matches!(value, Value::Float(_)),
        }
    }

    fn prepare(&mut self, incoming: &[Value]) {
        if !incoming.iter().all(|v| self.accepts(v)) {
            *self = UnderlyingList::Values(self.to_values());
        }
    }

    /// Replace the elements in `start..end` with `values`
    fn splice(&mut self, start: usize, end: usize, values: Vec<Value>) -> Vec<Value> {
        self.prepare(&values);
        match self {
            UnderlyingList::Values(v) => v.splice(start..end, values).collect(),
            UnderlyingList::Ints(v) => v
                .splice(start..end, values.into_iter().map(packed_int))
                .map(Value::Int)
                .collect(),
            UnderlyingList::Floats(v) => v
                .splice(start..end, values.into_iter().map(packed_float))
                .map(Value::Float)
                .collect(),
        }
    }
}

// ============================================================================
// List
// ============================================================================

struct ChildSlot {
    handle: Option<CallbackHandle>,
    position: Arc<AtomicUsize>,
}

impl ChildSlot {
    fn at(position: usize) -> Self {
        ChildSlot {
            handle: None,
            position: Arc::new(AtomicUsize::new(position)),
        }
    }
}

struct ListData {
    elements: UnderlyingList,
    element_callbacks: Option<Vec<ChildSlot>>,
}

impl ListData {
    /// Replace `start..end` by `values`, keeping slots in lockstep
    fn splice(&mut self, start: usize, end: usize, values: Vec<Value>) -> Vec<(Value, Option<CallbackHandle>)> {
        let inserted = values.len();
        let removed = self.elements.splice(start, end, values);
        let handles: Vec<Option<CallbackHandle>> = match self.element_callbacks.as_mut() {
            Some(slots) => {
                let fresh = (start..start + inserted).map(ChildSlot::at);
                let handles = slots.splice(start..end, fresh).map(|s| s.handle).collect();
                for (i, slot) in slots.iter().enumerate().skip(start) {
                    slot.position.store(i, Ordering::SeqCst);
                }
                handles
            }
            None => vec![None; removed.len()],
        };
        debug_assert!(self
            .element_callbacks
            .as_ref()
            .map_or(true, |s| s.len() == self.elements.len()));
        removed.into_iter().zip(handles).collect()
    }
}

struct Change {
    mutation: Mutation,
    removed: Vec<(Value, Option<CallbackHandle>)>,
    inserted: Range<usize>,
    output: Option<Value>,
}

fn check_range(start: usize, end: usize, len: usize) -> Result<()> {
    if start > end || end > len {
        return Err(Error::InvalidRange { start, end, len });
    }
    Ok(())
}

fn range_path(start: usize, end: usize) -> String {
    format!("/{start}..{}", end.saturating_sub(1))
}

fn seq_value(values: Vec<Value>) -> Value {
    Value::Array(Arc::new(super::Array::new(values).unwrap_or_else(|e| {
        unreachable!("list elements are serializable: {e}")
    })))
}

/// Mutable list
pub struct List {
    lock: SmartLock,
    isolator: TransactionIsolator,
    data: Mutex<ListData>,
    element_pattern: Option<Pattern>,
    hub: OnceCell<Arc<WatchHub>>,
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("List")
            .field("elements", &self.data.lock().elements)
            .field("shared", &self.lock.is_value_shared())
            .finish()
    }
}

impl List {
    /// Create a list of serializable values
    pub fn new(elements: Vec<Value>) -> Result<Self> {
        if let Some(v) = elements.iter().find(|v| !v.is_serializable()) {
            return Err(Error::NotSerializable(v.kind()));
        }
        Ok(List {
            lock: SmartLock::new(),
            isolator: TransactionIsolator::new(),
            data: Mutex::new(ListData {
                elements: UnderlyingList::from_values(elements),
                element_callbacks: None,
            }),
            element_pattern: None,
            hub: OnceCell::new(),
        })
    }

    /// Create a list whose elements must all match `pattern`
    pub fn with_element_pattern(ctx: &Context, elements: Vec<Value>, pattern: Pattern) -> Result<Self> {
        let mut list = Self::new(Vec::new())?;
        list.check_element_pattern(ctx, &pattern, &elements)?;
        if let Some(v) = elements.iter().find(|v| !v.is_serializable()) {
            return Err(Error::NotSerializable(v.kind()));
        }
        list.data.get_mut().elements = UnderlyingList::from_values(elements);
        list.element_pattern = Some(pattern);
        Ok(list)
    }

    fn hub(&self) -> &Arc<WatchHub> {
        self.hub.get_or_init(WatchHub::new)
    }

    fn check_element_pattern(&self, ctx: &Context, pattern: &Pattern, values: &[Value]) -> Result<()> {
        match values.iter().position(|v| !pattern.test(ctx, v)) {
            Some(i) => Err(Error::PatternMismatch {
                path: format!("/{i}"),
                expected: pattern.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Pattern every element must match
    pub fn element_pattern(&self) -> Option<&Pattern> {
        self.element_pattern.as_ref()
    }

    /// Copy of the backing store
    pub fn underlying(&self) -> UnderlyingList {
        self.data.lock().elements.clone()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.lock().elements.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `i`
    pub fn at(&self, ctx: &Context, i: usize) -> Result<Value> {
        self.isolator.wait_if_other_transaction(&ctx.access(true))?;
        let _guard = ctx.lock_value(&self.lock)?;
        let data = self.data.lock();
        let value = data.elements.at(i).ok_or(Error::IndexOutOfBounds {
            index: i,
            len: data.elements.len(),
        })?;
        drop(data);
        if self.is_shared() {
            return Ok(value.check_shared_or_clone());
        }
        Ok(value)
    }

    /// Consistent copy of the elements
    pub fn elements(&self, ctx: &Context) -> Result<Vec<Value>> {
        self.isolator.wait_if_other_transaction(&ctx.access(true))?;
        let _guard = ctx.lock_value(&self.lock)?;
        let values = self.snapshot();
        if self.is_shared() {
            return Ok(values.iter().map(Value::check_shared_or_clone).collect());
        }
        Ok(values)
    }

    pub(crate) fn snapshot(&self) -> Vec<Value> {
        self.data.lock().elements.to_values()
    }

    /// New list with the elements sorted; only ints, floats and strings
    pub fn sorted(&self, ctx: &Context) -> Result<List> {
        let mut values = self.elements(ctx)?;
        if values.iter().all(|v| matches!(v, Value::Int(_))) {
            values.sort_by_key(|v| v.as_int());
        } else if values.iter().all(|v| matches!(v, Value::Float(_))) {
            values.sort_by(|a, b| match (a, b) {
                (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
                _ => std::cmp::Ordering::Equal,
            });
        } else if values.iter().all(|v| matches!(v, Value::Str(_))) {
            values.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
        } else {
            return Err(Error::InvalidArgument(
                "only lists of integers, floats or strings can be sorted".to_string(),
            ));
        }
        List::new(values)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    fn write(
        &self,
        ctx: &Context,
        values: Vec<Value>,
        op: impl FnOnce(&mut ListData, Vec<Value>) -> Result<Change>,
    ) -> Result<Option<Value>> {
        if let Some(v) = values.iter().find(|v| !v.is_serializable()) {
            return Err(Error::NotSerializable(v.kind()));
        }
        if let Some(pattern) = &self.element_pattern {
            self.check_element_pattern(ctx, pattern, &values)?;
        }
        self.isolator.wait_if_other_transaction(&ctx.access(false))?;
        let values = if self.is_shared() {
            values
                .iter()
                .map(|v| v.share_or_clone(ctx.state_id()))
                .collect::<Result<Vec<_>>>()?
        } else {
            values
        };

        let guard = ctx.lock_value(&self.lock)?;
        let change = op(&mut self.data.lock(), values)?;

        if let Some(hub) = self.hub.get() {
            for (value, handle) in &change.removed {
                unwatch_child(ctx, value, *handle);
            }
            if let Some(depth) = hub.child_depth() {
                for i in change.inserted.clone() {
                    self.watch_element(ctx, hub, i, depth);
                }
            }
            hub.inform_watchers(&change.mutation);
            drop(guard);
            hub.call_microtasks(ctx, &change.mutation);
        }
        Ok(change.output)
    }

    fn watch_element(&self, ctx: &Context, hub: &Arc<WatchHub>, i: usize, depth: WatchingDepth) {
        let (value, position) = {
            let data = self.data.lock();
            let position = data
                .element_callbacks
                .as_ref()
                .and_then(|slots| slots.get(i))
                .map(|slot| Arc::clone(&slot.position));
            match (data.elements.at(i), position) {
                (Some(value), Some(position)) => (value, position),
                _ => return,
            }
        };
        match watch_child(hub, ctx, &value, ChildPosition::Index(position), depth) {
            Ok(handle) => {
                if let Some(slot) = self
                    .data
                    .lock()
                    .element_callbacks
                    .as_mut()
                    .and_then(|slots| slots.get_mut(i))
                {
                    slot.handle = handle;
                }
            }
            Err(e) => warn!(index = i, error = %e, "failed to watch list element"),
        }
    }

    /// Replace the element at `i`
    pub fn set(&self, ctx: &Context, i: usize, value: Value) -> Result<()> {
        self.write(ctx, vec![value], |data, values| {
            let len = data.elements.len();
            if i >= len {
                return Err(Error::IndexOutOfBounds { index: i, len });
            }
            let value = values[0].clone();
            let removed = data.splice(i, i + 1, values);
            Ok(Change {
                mutation: Mutation::set_elem_at_index(i, value, WatchingDepth::Shallow, format!("/{i}")),
                removed,
                inserted: i..i + 1,
                output: None,
            })
        })?;
        Ok(())
    }

    /// Replace the elements in `start..end` with `seq`, lengths must match
    pub fn set_slice(&self, ctx: &Context, start: usize, end: usize, seq: Vec<Value>) -> Result<()> {
        self.write(ctx, seq, |data, values| {
            check_range(start, end, data.elements.len())?;
            if values.len() != end - start {
                return Err(Error::InvalidArgument(format!(
                    "slice {start}..{end} cannot be replaced by {} elements",
                    values.len()
                )));
            }
            let seq = seq_value(values.clone());
            let removed = data.splice(start, end, values);
            Ok(Change {
                mutation: Mutation::set_slice_at_range(start, end, seq, WatchingDepth::Shallow, range_path(start, end)),
                removed,
                inserted: start..end,
                output: None,
            })
        })?;
        Ok(())
    }

    /// Insert `value` at `i`
    pub fn insert_element(&self, ctx: &Context, value: Value, i: usize) -> Result<()> {
        self.write(ctx, vec![value], |data, values| {
            let len = data.elements.len();
            if i > len {
                return Err(Error::IndexOutOfBounds { index: i, len });
            }
            let value = values[0].clone();
            data.splice(i, i, values);
            Ok(Change {
                mutation: Mutation::insert_elem_at_index(i, value, WatchingDepth::Shallow, format!("/{i}")),
                removed: Vec::new(),
                inserted: i..i + 1,
                output: None,
            })
        })?;
        Ok(())
    }

    fn insert_values(&self, ctx: &Context, seq: Vec<Value>, at: Option<usize>) -> Result<()> {
        self.write(ctx, seq, |data, values| {
            let len = data.elements.len();
            let i = at.unwrap_or(len);
            if i > len {
                return Err(Error::IndexOutOfBounds { index: i, len });
            }
            let count = values.len();
            let seq = seq_value(values.clone());
            data.splice(i, i, values);
            Ok(Change {
                mutation: Mutation::insert_sequence_at_index(i, seq, WatchingDepth::Shallow, format!("/{i}")),
                removed: Vec::new(),
                inserted: i..i + count,
                output: None,
            })
        })?;
        Ok(())
    }

    /// Insert the elements of `seq` at `i`
    pub fn insert_sequence(&self, ctx: &Context, seq: Vec<Value>, i: usize) -> Result<()> {
        self.insert_values(ctx, seq, Some(i))
    }

    /// Append elements
    pub fn append(&self, ctx: &Context, elements: Vec<Value>) -> Result<()> {
        self.insert_values(ctx, elements, None)
    }

    /// Append the elements of a list, tuple or array
    pub fn append_sequence(&self, ctx: &Context, seq: &Value) -> Result<()> {
        let elements = match seq {
            Value::List(l) => l.elements(ctx)?,
            Value::Tuple(t) => t.elements().to_vec(),
            Value::Array(a) => a.elements(),
            other => {
                return Err(Error::InvalidArgument(format!(
                    "a {} is not a sequence",
                    other.kind()
                )))
            }
        };
        self.append(ctx, elements)
    }

    /// Remove the element at `i`
    pub fn remove_position(&self, ctx: &Context, i: usize) -> Result<()> {
        self.remove_at(ctx, Some(i)).map(|_| ())
    }

    fn remove_at(&self, ctx: &Context, at: Option<usize>) -> Result<Value> {
        let output = self.write(ctx, Vec::new(), |data, _| {
            let len = data.elements.len();
            if len == 0 && at.is_none() {
                return Err(Error::EmptyList);
            }
            let i = at.unwrap_or(len.saturating_sub(1));
            if i >= len {
                return Err(Error::IndexOutOfBounds { index: i, len });
            }
            let removed = data.splice(i, i + 1, Vec::new());
            let output = removed.first().map(|(v, _)| v.clone());
            Ok(Change {
                mutation: Mutation::remove_position(i, WatchingDepth::Shallow, format!("/{i}")),
                removed,
                inserted: 0..0,
                output,
            })
        })?;
        Ok(output.unwrap_or(Value::Nil))
    }

    /// Remove the elements in `start..end`
    pub fn remove_position_range(&self, ctx: &Context, start: usize, end: usize) -> Result<()> {
        self.write(ctx, Vec::new(), |data, _| {
            check_range(start, end, data.elements.len())?;
            let removed = data.splice(start, end, Vec::new());
            Ok(Change {
                mutation: Mutation::remove_position_range(start, end, WatchingDepth::Shallow, range_path(start, end)),
                removed,
                inserted: 0..0,
                output: None,
            })
        })?;
        Ok(())
    }

    /// Remove and return the first element
    pub fn dequeue(&self, ctx: &Context) -> Result<Value> {
        if self.is_empty() {
            return Err(Error::EmptyList);
        }
        self.remove_at(ctx, Some(0)).map_err(|e| match e {
            Error::IndexOutOfBounds { len: 0, .. } => Error::EmptyList,
            other => other,
        })
    }

    /// Remove and return the last element
    pub fn pop(&self, ctx: &Context) -> Result<Value> {
        self.remove_at(ctx, None)
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
        let (values, previous) = {
            let mut data = self.data.lock();
            let slots: Vec<ChildSlot> = (0..data.elements.len()).map(ChildSlot::at).collect();
            let previous = data.element_callbacks.replace(slots);
            (data.elements.to_values(), previous)
        };
        if let Some(previous) = previous {
            for (value, slot) in values.iter().zip(previous) {
                unwatch_child(ctx, value, slot.handle);
            }
        }
        for i in 0..values.len() {
            self.watch_element(ctx, hub, i, child_depth);
        }
        debug!(elements = values.len(), depth = ?child_depth, "watching list elements");
        Ok(())
    }
}

impl PotentiallySharable for List {
    fn is_sharable(&self) -> std::result::Result<(), String> {
        if self.is_shared() {
            return Ok(());
        }
        check_all_sharable(&self.snapshot())
    }

    fn share(&self, origin: StateId) {
        let promoted = self.lock.share(origin, || {
            // packed stores only hold primitives
            let values = match &self.data.lock().elements {
                UnderlyingList::Values(values) => values.clone(),
                _ => return,
            };
            let shared = share_or_clone_all(&values, origin);
            self.data.lock().elements = UnderlyingList::Values(shared);
        });
        if promoted {
            debug!(origin = %origin, "list shared");
        }
    }

    fn smart_lock(&self) -> &SmartLock {
        &self.lock
    }
}

impl Watchable for List {
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
    use crate::containers::Object;
    use crate::context::ContextConfig;
    use crate::value::ValueKind;
    use crate::watch::MutationKind;
    use std::time::Duration;

    fn ctx() -> Context {
        Context::new(ContextConfig::default())
    }

    fn ints(xs: &[i64]) -> Vec<Value> {
        xs.iter().map(|x| Value::Int(*x)).collect()
    }

    #[test]
    fn test_packed_store_widens() {
        let ctx = ctx();
        let list = List::new(ints(&[1, 2])).unwrap();
        assert!(list.underlying().is_packed());

        list.append(&ctx, vec![Value::from("a")]).unwrap();
        assert!(!list.underlying().is_packed());
        assert_eq!(list.elements(&ctx).unwrap(), vec![Value::Int(1), Value::Int(2), Value::from("a")]);
    }

    #[test]
    fn test_insert_and_remove() {
        let ctx = ctx();
        let list = List::new(ints(&[1, 4])).unwrap();
        list.insert_element(&ctx, Value::Int(2), 1).unwrap();
        list.insert_sequence(&ctx, ints(&[3]), 2).unwrap();
        assert_eq!(list.elements(&ctx).unwrap(), ints(&[1, 2, 3, 4]));

        list.remove_position(&ctx, 0).unwrap();
        list.remove_position_range(&ctx, 1, 3).unwrap();
        assert_eq!(list.elements(&ctx).unwrap(), ints(&[2]));

        assert!(matches!(list.remove_position(&ctx, 1), Err(Error::IndexOutOfBounds { index: 1, len: 1 })));
        assert!(matches!(list.remove_position_range(&ctx, 1, 0), Err(Error::InvalidRange { .. })));
        assert!(list.insert_element(&ctx, Value::Nil, 5).is_err());
    }

    #[test]
    fn test_set_and_set_slice() {
        let ctx = ctx();
        let list = List::new(ints(&[1, 2, 3])).unwrap();
        list.set(&ctx, 0, Value::Int(10)).unwrap();
        list.set_slice(&ctx, 1, 3, ints(&[20, 30])).unwrap();
        assert_eq!(list.elements(&ctx).unwrap(), ints(&[10, 20, 30]));

        assert!(list.set(&ctx, 3, Value::Nil).is_err());
        assert!(matches!(list.set_slice(&ctx, 0, 2, ints(&[1])), Err(Error::InvalidArgument(_))));
        assert_eq!(list.elements(&ctx).unwrap(), ints(&[10, 20, 30]));
    }

    #[test]
    fn test_dequeue_and_pop() {
        let ctx = ctx();
        let list = List::new(ints(&[1, 2, 3])).unwrap();
        assert_eq!(list.dequeue(&ctx).unwrap(), Value::Int(1));
        assert_eq!(list.pop(&ctx).unwrap(), Value::Int(3));
        assert_eq!(list.pop(&ctx).unwrap(), Value::Int(2));
        assert_eq!(list.pop(&ctx).unwrap_err(), Error::EmptyList);
        assert_eq!(list.dequeue(&ctx).unwrap_err(), Error::EmptyList);
    }

    #[test]
    fn test_append_sequence() {
        let ctx = ctx();
        let list = List::new(vec![]).unwrap();
        let other = Value::from(List::new(ints(&[1, 2])).unwrap());
        list.append_sequence(&ctx, &other).unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.append_sequence(&ctx, &Value::Int(1)).is_err());
    }

    #[test]
    fn test_sorted() {
        let ctx = ctx();
        let list = List::new(ints(&[3, 1, 2])).unwrap();
        assert_eq!(list.sorted(&ctx).unwrap().elements(&ctx).unwrap(), ints(&[1, 2, 3]));

        let strings = List::new(vec![Value::from("b"), Value::from("a")]).unwrap();
        assert_eq!(
            strings.sorted(&ctx).unwrap().elements(&ctx).unwrap(),
            vec![Value::from("a"), Value::from("b")]
        );
        let mixed = List::new(vec![Value::from("b"), Value::Int(1)]).unwrap();
        assert!(mixed.sorted(&ctx).is_err());
    }

    #[test]
    fn test_element_pattern() {
        let ctx = ctx();
        let list = List::with_element_pattern(&ctx, ints(&[1]), Pattern::Type(ValueKind::Int)).unwrap();
        assert!(matches!(list.append(&ctx, vec![Value::from("a")]), Err(Error::PatternMismatch { .. })));
        assert_eq!(list.len(), 1);
        assert!(List::with_element_pattern(&ctx, vec![Value::Nil], Pattern::Type(ValueKind::Int)).is_err());
    }

    #[test]
    fn test_mutation_paths() {
        let ctx = ctx();
        let list = List::new(ints(&[0, 1, 2, 3])).unwrap();
        let watcher = list.watcher(&ctx, MutationWatchingConfig::default()).unwrap();

        list.set_slice(&ctx, 1, 3, ints(&[5, 6])).unwrap();
        list.remove_position_range(&ctx, 0, 2).unwrap();
        list.pop(&ctx).unwrap();

        let m = watcher.next_mutation(Duration::from_millis(5)).unwrap();
        assert_eq!((m.kind, m.path.as_str()), (MutationKind::SetSliceAtRange, "/1..2"));
        let m = watcher.next_mutation(Duration::from_millis(5)).unwrap();
        assert_eq!((m.kind, m.path.as_str()), (MutationKind::RemovePositionRange, "/0..1"));
        let m = watcher.next_mutation(Duration::from_millis(5)).unwrap();
        assert_eq!((m.kind, m.path.as_str()), (MutationKind::RemovePosition, "/1"));
        assert!(watcher.next_mutation(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_child_positions_shift_with_insertions() {
        let ctx = ctx();
        let child = Arc::new(Object::from_entries([("a", Value::Int(1))]).unwrap());
        let list = List::new(vec![Value::Object(Arc::clone(&child))]).unwrap();
        let watcher = list
            .watcher(&ctx, MutationWatchingConfig::with_depth(WatchingDepth::Intermediate))
            .unwrap();

        list.insert_element(&ctx, Value::Int(0), 0).unwrap();
        let _insert = watcher.next_mutation(Duration::from_millis(5)).unwrap();

        child.set_prop(&ctx, "a", Value::Int(2)).unwrap();
        assert_eq!(watcher.next_mutation(Duration::from_millis(10)).unwrap().path, "/1/a");

        list.remove_position(&ctx, 0).unwrap();
        let _remove = watcher.next_mutation(Duration::from_millis(5)).unwrap();
        child.set_prop(&ctx, "a", Value::Int(3)).unwrap();
        assert_eq!(watcher.next_mutation(Duration::from_millis(10)).unwrap().path, "/0/a");

        list.remove_position(&ctx, 0).unwrap();
        let _remove = watcher.next_mutation(Duration::from_millis(5)).unwrap();
        child.set_prop(&ctx, "a", Value::Int(4)).unwrap();
        assert!(watcher.next_mutation(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_share_shares_elements() {
        let ctx = ctx();
        let child = Value::from(Object::new());
        let list = List::new(vec![child.clone()]).unwrap();
        list.share(ctx.state_id());
        match &child {
            Value::Object(o) => assert!(o.is_shared()),
            _ => unreachable!(),
        }
        assert!(list.at(&ctx, 0).unwrap().is_same(&child));
    }
}
