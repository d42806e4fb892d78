//! Patterns: structural descriptors of values
//!
//! Patterns validate values ([`Pattern::test`]), drive typed JSON parsing and
//! describe database schemas. They are immutable and compared structurally,
//! which is what schema migration relies on.
//!
//! An [`ObjectPattern`] is **exact** unless marked inexact: an exact pattern
//! rejects objects bearing a property it does not declare.

use crate::containers::{Dictionary, List, Object, Record, Set, SetConfig, Tuple, UniquenessConstraint};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::repr::write_repr;
use crate::value::{Value, ValueKind};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Kind of a pattern, used to key loading functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PatternKind {
    /// Matches any value
    Any,
    /// Matches serializable values
    Serializable,
    /// Matches values of a kind
    Type,
    /// Matches one value
    ExactValue,
    /// Matches integers in a range
    IntRange,
    /// Matches objects
    Object,
    /// Matches records
    Record,
    /// Matches lists
    List,
    /// Matches tuples
    Tuple,
    /// Matches sets
    Set,
    /// Matches values matched by its cases
    Union,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PatternKind::Any => "any",
            PatternKind::Serializable => "serializable",
            PatternKind::Type => "type",
            PatternKind::ExactValue => "exact-value",
            PatternKind::IntRange => "int-range",
            PatternKind::Object => "object",
            PatternKind::Record => "record",
            PatternKind::List => "list",
            PatternKind::Tuple => "tuple",
            PatternKind::Set => "set",
            PatternKind::Union => "union",
        };
        f.write_str(s)
    }
}

/// Structural descriptor of values
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// Any value
    Any,
    /// Any serializable value
    Serializable,
    /// Any value of the kind
    Type(ValueKind),
    /// Values equal to the given one
    ExactValue(Value),
    /// Integers in an inclusive range
    IntRange(IntRangePattern),
    /// Objects
    Object(ObjectPattern),
    /// Records
    Record(RecordPattern),
    /// Lists
    List(ListPattern),
    /// Tuples
    Tuple(TuplePattern),
    /// Sets
    Set(SetPattern),
    /// Union of patterns
    Union(UnionPattern),
}

/// Integers in `start..=end`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntRangePattern {
    /// Lowest accepted integer
    pub start: i64,
    /// Highest accepted integer
    pub end: i64,
}

// ============================================================================
// Object pattern
// ============================================================================

/// Pattern of objects and records: declared properties, optional ones and
/// whether undeclared properties are tolerated
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectPattern {
    entries: BTreeMap<String, Pattern>,
    optional: BTreeSet<String>,
    inexact: bool,
}

/// Records are described by the same shape as objects
pub type RecordPattern = ObjectPattern;

impl ObjectPattern {
    /// Create a pattern; optional names that are not declared are ignored
    pub fn new<K, O>(
        entries: impl IntoIterator<Item = (K, Pattern)>,
        optional: impl IntoIterator<Item = O>,
        inexact: bool,
    ) -> Self
    where
        K: Into<String>,
        O: Into<String>,
    {
        let entries: BTreeMap<String, Pattern> = entries.into_iter().map(|(k, p)| (k.into(), p)).collect();
        let optional = optional
            .into_iter()
            .map(Into::into)
            .filter(|name| entries.contains_key(name))
            .collect();
        ObjectPattern {
            entries,
            optional,
            inexact,
        }
    }

    /// Exact pattern with only required properties
    pub fn exact<K: Into<String>>(entries: impl IntoIterator<Item = (K, Pattern)>) -> Self {
        Self::new(entries, Vec::<String>::new(), false)
    }

    /// Inexact pattern with only required properties
    pub fn inexact<K: Into<String>>(entries: impl IntoIterator<Item = (K, Pattern)>) -> Self {
        Self::new(entries, Vec::<String>::new(), true)
    }

    /// Visit every declared property in name order
    pub fn for_each_entry(&self, mut visit: impl FnMut(&str, &Pattern, bool) -> Result<()>) -> Result<()> {
        for (name, pattern) in &self.entries {
            visit(name, pattern, self.optional.contains(name))?;
        }
        Ok(())
    }

    /// Pattern of property `name`
    pub fn entry(&self, name: &str) -> Option<&Pattern> {
        self.entries.get(name)
    }

    /// Whether property `name` is optional
    pub fn is_optional(&self, name: &str) -> bool {
        self.optional.contains(name)
    }

    /// Whether undeclared properties are tolerated
    pub fn is_inexact(&self) -> bool {
        self.inexact
    }

    /// Number of declared properties
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no property is declared
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Test a set of properties against the pattern
    pub fn test_entries(&self, ctx: &Context, entries: &[(String, Value)]) -> bool {
        for (name, pattern) in &self.entries {
            match entries.iter().find(|(k, _)| k == name) {
                Some((_, value)) => {
                    if !pattern.test(ctx, value) {
                        return false;
                    }
                }
                None if self.optional.contains(name) => {}
                None => return false,
            }
        }
        self.inexact || entries.iter().all(|(k, _)| self.entries.contains_key(k))
    }

    fn default_entries(&self, ctx: &Context) -> Result<Vec<(String, Value)>> {
        let mut entries = Vec::new();
        for (name, pattern) in &self.entries {
            if !self.optional.contains(name) {
                entries.push((name.clone(), pattern.default_value(ctx)?));
            }
        }
        Ok(entries)
    }

    fn fmt_entries(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, pattern)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            let optional = if self.optional.contains(name) { "?" } else { "" };
            write!(f, "{name}{optional}: {pattern}")?;
        }
        if self.inexact {
            if !self.entries.is_empty() {
                f.write_str(", ")?;
            }
            f.write_str("...")?;
        }
        f.write_str("}")
    }
}

// ============================================================================
// Sequence, set and union patterns
// ============================================================================

/// Pattern of lists and tuples
#[derive(Debug, Clone, PartialEq)]
pub enum ListPattern {
    /// Any number of elements matching the pattern
    Of(Box<Pattern>),
    /// One element per pattern
    Elements(Vec<Pattern>),
}

/// Tuples are described by the same shape as lists
pub type TuplePattern = ListPattern;

impl ListPattern {
    /// General pattern: any number of elements matching `element`
    pub fn of(element: Pattern) -> Self {
        ListPattern::Of(Box::new(element))
    }

    fn test_elements(&self, ctx: &Context, elements: &[Value]) -> bool {
        match self {
            ListPattern::Of(p) => elements.iter().all(|e| p.test(ctx, e)),
            ListPattern::Elements(ps) => {
                ps.len() == elements.len() && ps.iter().zip(elements).all(|(p, e)| p.test(ctx, e))
            }
        }
    }

    /// Pattern of the element at `i`
    pub fn element_at(&self, i: usize) -> Option<&Pattern> {
        match self {
            ListPattern::Of(p) => Some(p),
            ListPattern::Elements(ps) => ps.get(i),
        }
    }

    fn default_elements(&self, ctx: &Context) -> Result<Vec<Value>> {
        match self {
            ListPattern::Of(_) => Ok(Vec::new()),
            ListPattern::Elements(ps) => ps.iter().map(|p| p.default_value(ctx)).collect(),
        }
    }
}

/// Pattern of sets: element pattern and uniqueness constraint
#[derive(Debug, Clone, PartialEq)]
pub struct SetPattern {
    config: Box<SetConfig>,
}

impl SetPattern {
    /// Create a set pattern
    pub fn new(element: Pattern, uniqueness: UniquenessConstraint) -> Self {
        SetPattern {
            config: Box::new(SetConfig { element, uniqueness }),
        }
    }

    /// Configuration of the matching sets
    pub fn config(&self) -> &SetConfig {
        &self.config
    }

    /// Pattern of the elements
    pub fn element(&self) -> &Pattern {
        &self.config.element
    }

    /// Uniqueness constraint of the elements
    pub fn uniqueness(&self) -> &UniquenessConstraint {
        &self.config.uniqueness
    }
}

/// Union of patterns
#[derive(Debug, Clone, PartialEq)]
pub struct UnionPattern {
    cases: Vec<Pattern>,
    disjoint: bool,
}

impl UnionPattern {
    /// Union matching values matched by at least one case
    pub fn new(cases: Vec<Pattern>) -> Self {
        UnionPattern { cases, disjoint: false }
    }

    /// Union matching values matched by exactly one case
    pub fn disjoint(cases: Vec<Pattern>) -> Self {
        UnionPattern { cases, disjoint: true }
    }

    /// Cases of the union
    pub fn cases(&self) -> &[Pattern] {
        &self.cases
    }

    /// Whether exactly one case must match
    pub fn is_disjoint(&self) -> bool {
        self.disjoint
    }
}

// ============================================================================
// Pattern
// ============================================================================

impl Pattern {
    /// Kind of the pattern
    pub fn kind(&self) -> PatternKind {
        match self {
            Pattern::Any => PatternKind::Any,
            Pattern::Serializable => PatternKind::Serializable,
            Pattern::Type(_) => PatternKind::Type,
            Pattern::ExactValue(_) => PatternKind::ExactValue,
            Pattern::IntRange(_) => PatternKind::IntRange,
            Pattern::Object(_) => PatternKind::Object,
            Pattern::Record(_) => PatternKind::Record,
            Pattern::List(_) => PatternKind::List,
            Pattern::Tuple(_) => PatternKind::Tuple,
            Pattern::Set(_) => PatternKind::Set,
            Pattern::Union(_) => PatternKind::Union,
        }
    }

    /// Whether `value` matches the pattern
    pub fn test(&self, ctx: &Context, value: &Value) -> bool {
        match (self, value) {
            (Pattern::Any, _) => true,
            (Pattern::Serializable, v) => v.is_serializable(),
            (Pattern::Type(kind), v) => v.kind() == *kind,
            (Pattern::ExactValue(expected), v) => expected == v,
            (Pattern::IntRange(range), Value::Int(i)) => range.start <= *i && *i <= range.end,
            (Pattern::Object(p), Value::Object(o)) => p.test_entries(ctx, &o.snapshot_entries()),
            (Pattern::Record(p), Value::Record(r)) => p.test_entries(ctx, r.entries()),
            (Pattern::List(p), Value::List(l)) => p.test_elements(ctx, &l.snapshot()),
            (Pattern::Tuple(p), Value::Tuple(t)) => p.test_elements(ctx, t.elements()),
            (Pattern::Set(p), Value::Set(s)) => s.config() == p.config(),
            (Pattern::Union(u), v) => {
                let matching = u.cases.iter().filter(|c| c.test(ctx, v)).count();
                if u.disjoint {
                    matching == 1
                } else {
                    matching > 0
                }
            }
            _ => false,
        }
    }

    /// Value used when a stored value matching the pattern is missing
    pub fn default_value(&self, ctx: &Context) -> Result<Value> {
        match self {
            Pattern::Type(kind) => default_value_of_kind(*kind),
            Pattern::ExactValue(v) => Ok(v.clone()),
            Pattern::IntRange(range) => Ok(Value::Int(range.start)),
            Pattern::Object(p) => Ok(Value::from(Object::from_entries(p.default_entries(ctx)?)?)),
            Pattern::Record(p) => Ok(Value::from(Record::new(p.default_entries(ctx)?)?)),
            Pattern::List(p) => Ok(Value::from(List::new(p.default_elements(ctx)?)?)),
            Pattern::Tuple(p) => Ok(Value::from(Tuple::new(p.default_elements(ctx)?)?)),
            Pattern::Set(p) => Ok(Value::Set(std::sync::Arc::new(Set::new(
                ctx,
                Vec::new(),
                p.config().clone(),
            )?))),
            Pattern::Union(u) => match u.cases.first() {
                Some(case) => case.default_value(ctx),
                None => Err(no_default(self)),
            },
            Pattern::Any | Pattern::Serializable => Err(no_default(self)),
        }
    }
}

fn no_default(pattern: &Pattern) -> Error {
    Error::InvalidArgument(format!("pattern {pattern} has no default value"))
}

fn default_value_of_kind(kind: ValueKind) -> Result<Value> {
    let value = match kind {
        ValueKind::Nil => Value::Nil,
        ValueKind::Bool => Value::Bool(false),
        ValueKind::Int => Value::Int(0),
        ValueKind::Float => Value::Float(0.0),
        ValueKind::Str => Value::Str(String::new()),
        ValueKind::Object => Value::from(Object::new()),
        ValueKind::Record => Value::from(Record::new(Vec::<(String, Value)>::new())?),
        ValueKind::Tuple => Value::from(Tuple::new(Vec::new())?),
        ValueKind::List => Value::from(List::new(Vec::new())?),
        ValueKind::Dictionary => Value::from(Dictionary::new(Vec::<(String, Value)>::new())?),
        _ => {
            return Err(Error::InvalidArgument(format!(
                "values of kind {kind} have no default value"
            )))
        }
    };
    Ok(value)
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Any => f.write_str("%any"),
            Pattern::Serializable => f.write_str("%serializable"),
            Pattern::Type(kind) => write!(f, "%{kind}"),
            Pattern::ExactValue(v) => match write_repr(v) {
                Ok(repr) => write!(f, "%({repr})"),
                Err(_) => write!(f, "%({})", v.kind()),
            },
            Pattern::IntRange(r) => write!(f, "%int({}..{})", r.start, r.end),
            Pattern::Object(p) => {
                f.write_str("%")?;
                p.fmt_entries(f)
            }
            Pattern::Record(p) => {
                f.write_str("%record")?;
                p.fmt_entries(f)
            }
            Pattern::List(p) | Pattern::Tuple(p) => {
                let prefix = if matches!(self, Pattern::List(_)) { "%" } else { "%tuple" };
                match p {
                    ListPattern::Of(e) => write!(f, "{prefix}[]{e}"),
                    ListPattern::Elements(ps) => {
                        write!(f, "{prefix}[")?;
                        for (i, p) in ps.iter().enumerate() {
                            if i > 0 {
                                f.write_str(", ")?;
                            }
                            write!(f, "{p}")?;
                        }
                        f.write_str("]")
                    }
                }
            }
            Pattern::Set(p) => write!(f, "%Set({}, {})", p.element(), p.uniqueness()),
            Pattern::Union(u) => {
                f.write_str("%(")?;
                for (i, case) in u.cases.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{case}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::Object;
    use crate::context::ContextConfig;

    fn ctx() -> Context {
        Context::new(ContextConfig::default())
    }

    fn int() -> Pattern {
        Pattern::Type(ValueKind::Int)
    }

    fn obj(entries: Vec<(&str, Value)>) -> Value {
        Value::from(Object::from_entries(entries).unwrap())
    }

    #[test]
    fn test_exact_vs_inexact() {
        let ctx = ctx();
        let value = obj(vec![("a", Value::Int(1)), ("b", Value::Int(2))]);
        let exact = Pattern::Object(ObjectPattern::exact([("a", int())]));
        let inexact = Pattern::Object(ObjectPattern::inexact([("a", int())]));
        assert!(!exact.test(&ctx, &value));
        assert!(inexact.test(&ctx, &value));
        assert!(exact.test(&ctx, &obj(vec![("a", Value::Int(1))])));
    }

    #[test]
    fn test_optional_entries() {
        let ctx = ctx();
        let pattern = Pattern::Object(ObjectPattern::new([("a", int()), ("b", int())], ["b"], false));
        assert!(pattern.test(&ctx, &obj(vec![("a", Value::Int(1))])));
        assert!(!pattern.test(&ctx, &obj(vec![("b", Value::Int(1))])));
        assert!(!pattern.test(&ctx, &obj(vec![("a", Value::Int(1)), ("b", Value::from("x"))])));
    }

    #[test]
    fn test_for_each_entry_in_name_order() {
        let pattern = ObjectPattern::new([("b", int()), ("a", int())], ["b"], false);
        let mut seen = Vec::new();
        pattern
            .for_each_entry(|name, _, optional| {
                seen.push((name.to_string(), optional));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![("a".to_string(), false), ("b".to_string(), true)]);
    }

    #[test]
    fn test_list_and_tuple_patterns() {
        let ctx = ctx();
        let list = Value::from(List::new(vec![Value::Int(1), Value::Int(2)]).unwrap());
        assert!(Pattern::List(ListPattern::of(int())).test(&ctx, &list));
        assert!(Pattern::List(ListPattern::Elements(vec![int(), int()])).test(&ctx, &list));
        assert!(!Pattern::List(ListPattern::Elements(vec![int()])).test(&ctx, &list));
        assert!(!Pattern::Tuple(ListPattern::of(int())).test(&ctx, &list));
    }

    #[test]
    fn test_union_patterns() {
        let ctx = ctx();
        let cases = vec![int(), Pattern::IntRange(IntRangePattern { start: 0, end: 10 })];
        assert!(Pattern::Union(UnionPattern::new(cases.clone())).test(&ctx, &Value::Int(5)));
        assert!(!Pattern::Union(UnionPattern::disjoint(cases.clone())).test(&ctx, &Value::Int(5)));
        assert!(Pattern::Union(UnionPattern::disjoint(cases)).test(&ctx, &Value::Int(50)));
    }

    #[test]
    fn test_structural_equality() {
        let a = Pattern::Object(ObjectPattern::new([("a", int())], ["a"], false));
        let b = Pattern::Object(ObjectPattern::new([("a", int())], ["a"], false));
        let c = Pattern::Object(ObjectPattern::new([("a", int())], Vec::<String>::new(), false));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_nested_set_patterns() {
        let inner = Pattern::Set(SetPattern::new(int(), UniquenessConstraint::Repr));
        let outer = SetPattern::new(inner.clone(), UniquenessConstraint::Repr);
        assert_eq!(outer.element(), &inner);
        assert_eq!(outer.config().element, inner);
        assert_eq!(Pattern::Set(outer.clone()), Pattern::Set(outer));
    }

    #[test]
    fn test_default_values() {
        let ctx = ctx();
        let pattern = Pattern::Object(ObjectPattern::new(
            [("a", int()), ("b", Pattern::Type(ValueKind::Str)), ("c", int())],
            ["c"],
            false,
        ));
        let value = pattern.default_value(&ctx).unwrap();
        assert_eq!(value, obj(vec![("a", Value::Int(0)), ("b", Value::from(""))]));
        assert!(pattern.test(&ctx, &value));
        assert!(Pattern::Any.default_value(&ctx).is_err());
    }

    #[test]
    fn test_display() {
        let pattern = Pattern::Object(ObjectPattern::new([("a", int()), ("b", int())], ["b"], true));
        assert_eq!(pattern.to_string(), "%{a: %int, b?: %int, ...}");
        assert_eq!(Pattern::List(ListPattern::of(int())).to_string(), "%[]%int");
    }
}
