//! Value model
//!
//! [`Value`] is the tagged union every container stores. Primitive values
//! are held inline, containers behind an `Arc` so that cloning a `Value`
//! never copies a container: two clones of `Value::Object` refer to the same
//! object.
//!
//! ## Kinds
//!
//! | Group       | Variants                                                      |
//! |-------------|---------------------------------------------------------------|
//! | primitives  | `Nil`, `Bool`, `Int`, `Float`, `Str`                          |
//! | resources   | `Path`, `PathPattern`, `Url`, `Host`                          |
//! | names       | `Identifier`, `PropertyName`                                  |
//! | immutable   | `Record`, `Tuple`, `Pattern`                                  |
//! | mutable     | `Object`, `Dictionary`, `List`, `Array`, `Set`                |
//! | other       | `Function` (never serializable)                               |

use crate::containers::{Array, Dictionary, List, Object, PotentiallySharable, Record, Set, Tuple};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::pattern::Pattern;
use crate::repr::write_repr;
use crate::resource::{Host, Path, PathPattern, Url};
use crate::watch::Watchable;
use inox_concurrency::StateId;
use std::fmt;
use std::sync::Arc;

/// Nesting depth past which structural equality gives up
pub const MAX_EQUALITY_DEPTH: usize = 64;

// ============================================================================
// Kinds
// ============================================================================

/// Kind of a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    /// `nil`
    Nil,
    /// Boolean
    Bool,
    /// 64-bit signed integer
    Int,
    /// 64-bit float
    Float,
    /// String
    Str,
    /// Path
    Path,
    /// Path pattern
    PathPattern,
    /// URL
    Url,
    /// Host
    Host,
    /// Identifier (`#name`)
    Identifier,
    /// Property name (`.name`)
    PropertyName,
    /// Immutable object
    Record,
    /// Immutable sequence
    Tuple,
    /// Mutable object
    Object,
    /// Mutable dictionary
    Dictionary,
    /// Mutable list
    List,
    /// Fixed-length sequence
    Array,
    /// Set
    Set,
    /// Pattern
    Pattern,
    /// Native function
    Function,
}

impl ValueKind {
    /// Every kind, in declaration order
    pub const ALL: [ValueKind; 20] = [
        ValueKind::Nil,
        ValueKind::Bool,
        ValueKind::Int,
        ValueKind::Float,
        ValueKind::Str,
        ValueKind::Path,
        ValueKind::PathPattern,
        ValueKind::Url,
        ValueKind::Host,
        ValueKind::Identifier,
        ValueKind::PropertyName,
        ValueKind::Record,
        ValueKind::Tuple,
        ValueKind::Object,
        ValueKind::Dictionary,
        ValueKind::List,
        ValueKind::Array,
        ValueKind::Set,
        ValueKind::Pattern,
        ValueKind::Function,
    ];

    /// Name used in error messages and untyped JSON representations
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Nil => "nil",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "string",
            ValueKind::Path => "path",
            ValueKind::PathPattern => "path-pattern",
            ValueKind::Url => "url",
            ValueKind::Host => "host",
            ValueKind::Identifier => "identifier",
            ValueKind::PropertyName => "property-name",
            ValueKind::Record => "record",
            ValueKind::Tuple => "tuple",
            ValueKind::Object => "object",
            ValueKind::Dictionary => "dictionary",
            ValueKind::List => "list",
            ValueKind::Array => "array",
            ValueKind::Set => "set",
            ValueKind::Pattern => "pattern",
            ValueKind::Function => "function",
        }
    }

    /// Kind named `name`
    pub fn from_name(name: &str) -> Option<ValueKind> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Native functions
// ============================================================================

/// Signature of a native function body
pub type NativeFn = dyn Fn(&Context, &[Value]) -> Result<Value> + Send + Sync;

/// Function implemented in Rust, used as migration handler or mapper
pub struct NativeFunction {
    name: String,
    f: Arc<NativeFn>,
    sharable: bool,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("sharable", &self.sharable)
            .finish()
    }
}

impl NativeFunction {
    /// Create a sharable function
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Context, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        NativeFunction {
            name: name.into(),
            f: Arc::new(f),
            sharable: true,
        }
    }

    /// Create a function bound to its creating context
    pub fn non_sharable<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Context, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        NativeFunction {
            sharable: false,
            ..Self::new(name, f)
        }
    }

    /// Name of the function
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the function may be called from other execution contexts
    pub fn is_sharable(&self) -> bool {
        self.sharable
    }

    /// Call the function
    pub fn call(&self, ctx: &Context, args: &[Value]) -> Result<Value> {
        (self.f)(ctx, args)
    }
}

// ============================================================================
// Value
// ============================================================================

/// A value of the Inox value model
#[derive(Clone)]
pub enum Value {
    /// `nil`
    Nil,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// String
    Str(String),
    /// Path
    Path(Path),
    /// Path pattern
    PathPattern(PathPattern),
    /// URL
    Url(Url),
    /// Host
    Host(Host),
    /// Identifier
    Identifier(String),
    /// Property name
    PropertyName(String),
    /// Immutable object
    Record(Arc<Record>),
    /// Immutable sequence
    Tuple(Arc<Tuple>),
    /// Mutable object
    Object(Arc<Object>),
    /// Mutable dictionary
    Dictionary(Arc<Dictionary>),
    /// Mutable list
    List(Arc<List>),
    /// Fixed-length sequence
    Array(Arc<Array>),
    /// Set
    Set(Arc<Set>),
    /// Pattern
    Pattern(Arc<Pattern>),
    /// Native function
    Function(Arc<NativeFunction>),
}

impl Value {
    /// Kind of the value
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Nil => ValueKind::Nil,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::Path(_) => ValueKind::Path,
            Value::PathPattern(_) => ValueKind::PathPattern,
            Value::Url(_) => ValueKind::Url,
            Value::Host(_) => ValueKind::Host,
            Value::Identifier(_) => ValueKind::Identifier,
            Value::PropertyName(_) => ValueKind::PropertyName,
            Value::Record(_) => ValueKind::Record,
            Value::Tuple(_) => ValueKind::Tuple,
            Value::Object(_) => ValueKind::Object,
            Value::Dictionary(_) => ValueKind::Dictionary,
            Value::List(_) => ValueKind::List,
            Value::Array(_) => ValueKind::Array,
            Value::Set(_) => ValueKind::Set,
            Value::Pattern(_) => ValueKind::Pattern,
            Value::Function(_) => ValueKind::Function,
        }
    }

    /// Whether the value can change after construction
    pub fn is_mutable(&self) -> bool {
        matches!(
            self,
            Value::Object(_) | Value::Dictionary(_) | Value::List(_) | Value::Array(_) | Value::Set(_)
        )
    }

    /// Whether the value can be stored in a container
    pub fn is_serializable(&self) -> bool {
        !matches!(self, Value::Function(_))
    }

    /// Check whether the value can be exposed to other execution contexts,
    /// returns the reason when it cannot
    pub fn is_sharable(&self) -> std::result::Result<(), String> {
        match self {
            Value::Object(o) => o.is_sharable(),
            Value::Dictionary(d) => d.is_sharable(),
            Value::List(l) => l.is_sharable(),
            Value::Set(s) => s.is_sharable(),
            Value::Array(a) => a.is_clonable(),
            Value::Function(f) if !f.is_sharable() => {
                Err(format!("function {} is bound to its context", f.name()))
            }
            _ => Ok(()),
        }
    }

    /// Share the value with other execution contexts, or clone it when it
    /// can only be copied
    pub fn share_or_clone(&self, origin: StateId) -> Result<Value> {
        match self {
            Value::Object(o) => share(o.as_ref(), origin).map(|_| self.clone()),
            Value::Dictionary(d) => share(d.as_ref(), origin).map(|_| self.clone()),
            Value::List(l) => share(l.as_ref(), origin).map(|_| self.clone()),
            Value::Set(s) => share(s.as_ref(), origin).map(|_| self.clone()),
            Value::Array(a) => Ok(Value::Array(Arc::new(a.clone_for_sharing(origin)?))),
            Value::Function(f) if !f.is_sharable() => Err(Error::NotSharable(format!(
                "function {} is bound to its context",
                f.name()
            ))),
            _ => Ok(self.clone()),
        }
    }

    /// Value handed out by a shared container: clonable values are copied so
    /// the caller never aliases the container's copy
    pub fn check_shared_or_clone(&self) -> Value {
        match self {
            Value::Array(a) => Value::Array(Arc::new(a.as_ref().clone())),
            _ => self.clone(),
        }
    }

    /// Watchable view of a container
    pub fn as_watchable(&self) -> Option<Arc<dyn Watchable>> {
        match self {
            Value::Object(o) => Some(Arc::clone(o) as Arc<dyn Watchable>),
            Value::Dictionary(d) => Some(Arc::clone(d) as Arc<dyn Watchable>),
            Value::List(l) => Some(Arc::clone(l) as Arc<dyn Watchable>),
            Value::Set(s) => Some(Arc::clone(s) as Arc<dyn Watchable>),
            _ => None,
        }
    }

    /// Identity URL of the value, if any
    pub fn url(&self) -> Option<Url> {
        match self {
            Value::Object(o) => o.url(),
            Value::Set(s) => s.url(),
            _ => None,
        }
    }

    /// Give the value its identity URL
    pub fn set_url_once(&self, ctx: &Context, url: Url) -> Result<()> {
        match self {
            Value::Object(o) => o.set_url_once(ctx, url),
            _ => Err(Error::DoesNotAcceptUrl(self.kind())),
        }
    }

    /// Property `name` of a property-bearing value
    pub fn prop(&self, ctx: &Context, name: &str) -> Result<Value> {
        match self {
            Value::Object(o) => o.prop(ctx, name),
            Value::Record(r) => r.prop(name),
            _ => Err(Error::PropertyDoesNotExist {
                property: name.to_string(),
                kind: self.kind(),
            }),
        }
    }

    /// Elements of an iterable value
    ///
    /// Objects and dictionaries yield their values in key order.
    pub fn iterate_elements(&self, ctx: &Context) -> Result<Vec<Value>> {
        match self {
            Value::List(l) => l.elements(ctx),
            Value::Tuple(t) => Ok(t.elements().to_vec()),
            Value::Array(a) => Ok(a.elements()),
            Value::Set(s) => s.elements(ctx),
            Value::Object(o) => Ok(o.entry_map(ctx)?.into_values().collect()),
            Value::Dictionary(d) => {
                let mut values = Vec::with_capacity(d.len());
                d.for_each_entry(ctx, |_, v| {
                    values.push(v.clone());
                    Ok(())
                })?;
                Ok(values)
            }
            _ => Err(Error::InvalidArgument(format!(
                "value of kind {} is not iterable",
                self.kind()
            ))),
        }
    }

    /// String content of a `Str`
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content of an `Int`
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Whether both values are the same: containers by identity, other
    /// values by equality
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Dictionary(a), Value::Dictionary(b)) => Arc::ptr_eq(a, b),
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            _ => self == other,
        }
    }
}

fn share<T: PotentiallySharable + ?Sized>(value: &T, origin: StateId) -> Result<()> {
    value.is_sharable().map_err(Error::NotSharable)?;
    value.share(origin);
    Ok(())
}

// ============================================================================
// Equality
// ============================================================================

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        equal_at_depth(self, other, 0)
    }
}

fn equal_at_depth(a: &Value, b: &Value, depth: usize) -> bool {
    if depth > MAX_EQUALITY_DEPTH {
        return false;
    }
    let next = depth + 1;
    let all_equal = |xs: &[Value], ys: &[Value]| {
        xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| equal_at_depth(x, y, next))
    };
    let entries_equal = |xs: &[(String, Value)], ys: &[(String, Value)]| {
        xs.len() == ys.len()
            && xs
                .iter()
                .zip(ys)
                .all(|((kx, vx), (ky, vy))| kx == ky && equal_at_depth(vx, vy, next))
    };

    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Path(x), Value::Path(y)) => x == y,
        (Value::PathPattern(x), Value::PathPattern(y)) => x == y,
        (Value::Url(x), Value::Url(y)) => x == y,
        (Value::Host(x), Value::Host(y)) => x == y,
        (Value::Identifier(x), Value::Identifier(y)) => x == y,
        (Value::PropertyName(x), Value::PropertyName(y)) => x == y,
        (Value::Record(x), Value::Record(y)) => {
            Arc::ptr_eq(x, y) || entries_equal(x.entries(), y.entries())
        }
        (Value::Tuple(x), Value::Tuple(y)) => {
            Arc::ptr_eq(x, y) || all_equal(x.elements(), y.elements())
        }
        (Value::Object(x), Value::Object(y)) => {
            Arc::ptr_eq(x, y) || entries_equal(&x.snapshot_entries(), &y.snapshot_entries())
        }
        (Value::Dictionary(x), Value::Dictionary(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            let (xs, ys) = (x.snapshot_entries(), y.snapshot_entries());
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(&ys)
                    .all(|((rx, _, vx), (ry, _, vy))| rx == ry && equal_at_depth(vx, vy, next))
        }
        (Value::List(x), Value::List(y)) => {
            Arc::ptr_eq(x, y) || all_equal(&x.snapshot(), &y.snapshot())
        }
        (Value::Array(x), Value::Array(y)) => {
            Arc::ptr_eq(x, y) || all_equal(&x.elements(), &y.elements())
        }
        (Value::Set(x), Value::Set(y)) => {
            Arc::ptr_eq(x, y) || (x.config() == y.config() && entries_equal(&x.snapshot_entries(), &y.snapshot_entries()))
        }
        (Value::Pattern(x), Value::Pattern(y)) => Arc::ptr_eq(x, y) || x == y,
        (Value::Function(x), Value::Function(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x:?})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Path(p) => write!(f, "Path({p})"),
            Value::PathPattern(p) => write!(f, "PathPattern({p})"),
            Value::Url(u) => write!(f, "Url({u})"),
            Value::Host(h) => write!(f, "Host({h})"),
            Value::Identifier(s) => write!(f, "Identifier({s})"),
            Value::PropertyName(s) => write!(f, "PropertyName({s})"),
            Value::Pattern(p) => write!(f, "Pattern({p})"),
            Value::Function(func) => write!(f, "Function({})", func.name()),
            _ => match write_repr(self) {
                Ok(repr) => write!(f, "{}({repr})", self.kind()),
                Err(_) => write!(f, "{}(..)", self.kind()),
            },
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Path> for Value {
    fn from(p: Path) -> Self {
        Value::Path(p)
    }
}

impl From<Url> for Value {
    fn from(u: Url) -> Self {
        Value::Url(u)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(Arc::new(o))
    }
}

impl From<List> for Value {
    fn from(l: List) -> Self {
        Value::List(Arc::new(l))
    }
}

impl From<Dictionary> for Value {
    fn from(d: Dictionary) -> Self {
        Value::Dictionary(Arc::new(d))
    }
}

impl From<Array> for Value {
    fn from(a: Array) -> Self {
        Value::Array(Arc::new(a))
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(Arc::new(r))
    }
}

impl From<Tuple> for Value {
    fn from(t: Tuple) -> Self {
        Value::Tuple(Arc::new(t))
    }
}

impl From<Pattern> for Value {
    fn from(p: Pattern) -> Self {
        Value::Pattern(Arc::new(p))
    }
}

impl From<NativeFunction> for Value {
    fn from(f: NativeFunction) -> Self {
        Value::Function(Arc::new(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;

    fn ctx() -> Context {
        Context::new(ContextConfig::default())
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in ValueKind::ALL {
            assert_eq!(ValueKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ValueKind::from_name("unknown"), None);
    }

    #[test]
    fn test_structural_equality() {
        let a = Value::from(List::new(vec![Value::Int(1), Value::from("a")]).unwrap());
        let b = Value::from(List::new(vec![Value::Int(1), Value::from("a")]).unwrap());
        assert_eq!(a, b);
        assert!(!a.is_same(&b));
        assert!(a.is_same(&a.clone()));

        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::Str("/a".into()), Value::Path(Path::new("/a").unwrap()));
    }

    #[test]
    fn test_functions_are_not_serializable() {
        let f = Value::from(NativeFunction::new("f", |_, _| Ok(Value::Nil)));
        assert!(!f.is_serializable());
        assert!(f.is_sharable().is_ok());

        let bound = Value::from(NativeFunction::non_sharable("g", |_, _| Ok(Value::Nil)));
        assert!(bound.is_sharable().is_err());
        assert!(matches!(
            bound.share_or_clone(StateId::next()),
            Err(Error::NotSharable(_))
        ));
    }

    #[test]
    fn test_share_or_clone_array_copies() {
        let array = Value::from(Array::new(vec![Value::Int(1)]).unwrap());
        let copy = array.share_or_clone(StateId::next()).unwrap();
        assert_eq!(array, copy);
        assert!(!array.is_same(&copy));
    }

    #[test]
    fn test_share_or_clone_object_shares_in_place() {
        let object = Value::from(Object::new());
        let shared = object.share_or_clone(StateId::next()).unwrap();
        assert!(object.is_same(&shared));
        match &object {
            Value::Object(o) => assert!(o.is_shared()),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_prop_on_non_object() {
        let err = Value::Int(1).prop(&ctx(), "a").unwrap_err();
        assert!(matches!(err, Error::PropertyDoesNotExist { kind: ValueKind::Int, .. }));
    }

    #[test]
    fn test_iterate_elements() {
        let ctx = ctx();
        let tuple = Value::from(Tuple::new(vec![Value::Int(1), Value::Int(2)]).unwrap());
        assert_eq!(tuple.iterate_elements(&ctx).unwrap(), vec![Value::Int(1), Value::Int(2)]);
        assert!(Value::Int(1).iterate_elements(&ctx).is_err());
    }

    #[test]
    fn test_debug_uses_repr() {
        let list = Value::from(List::new(vec![Value::Int(1)]).unwrap());
        assert_eq!(format!("{list:?}"), "list([1])");
    }
}
