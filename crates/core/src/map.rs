//! Mapping over iterables
//!
//! [`map`] applies a [`Mapper`] to every element of an iterable value and
//! collects the results into a new [`List`]. The mapper kind is resolved once
//! per call.

use crate::containers::{List, Object};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::pattern::Pattern;
use crate::value::{NativeFunction, Value};
use std::sync::Arc;
use tracing::debug;

/// How each element is mapped
#[derive(Debug, Clone)]
pub enum Mapper {
    /// New object holding the listed properties of the element
    KeyProjection(Vec<String>),
    /// Value of one property of the element
    PropertyProjection(String),
    /// Result of calling a sharable function with the element
    Function(Arc<NativeFunction>),
    /// Result of a [`Mapping`]
    ComputedMapping(Mapping),
}

/// Key of a [`Mapping`] entry
#[derive(Debug, Clone)]
pub enum MappingKey {
    /// Matches elements equal to the value
    Static(Value),
    /// Matches elements matched by the pattern
    Pattern(Pattern),
}

/// Result of a [`Mapping`] entry
#[derive(Debug, Clone)]
pub enum MappingResult {
    /// The value itself
    Constant(Value),
    /// Result of calling the function with the element
    Computed(Arc<NativeFunction>),
}

/// Ordered list of key/result entries
///
/// Static keys are checked before pattern keys. An element matched by no
/// entry maps to `nil`.
#[derive(Debug, Clone, Default)]
pub struct Mapping {
    entries: Vec<(MappingKey, MappingResult)>,
}

impl Mapping {
    /// Empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry
    pub fn with_entry(mut self, key: MappingKey, result: MappingResult) -> Self {
        self.entries.push((key, result));
        self
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the mapping has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Result for `element`
    pub fn compute(&self, ctx: &Context, element: &Value) -> Result<Value> {
        let static_match = self.entries.iter().find(|(key, _)| match key {
            MappingKey::Static(v) => v == element,
            MappingKey::Pattern(_) => false,
        });
        let entry = static_match.or_else(|| {
            self.entries.iter().find(|(key, _)| match key {
                MappingKey::Pattern(p) => p.test(ctx, element),
                MappingKey::Static(_) => false,
            })
        });
        match entry {
            Some((_, MappingResult::Constant(v))) => Ok(v.clone()),
            Some((_, MappingResult::Computed(f))) => f.call(ctx, std::slice::from_ref(element)),
            None => Ok(Value::Nil),
        }
    }

    fn check_sharable(&self) -> Result<()> {
        for (_, result) in &self.entries {
            if let MappingResult::Computed(f) = result {
                check_sharable_function(f)?;
            }
        }
        Ok(())
    }
}

fn check_sharable_function(f: &NativeFunction) -> Result<()> {
    if !f.is_sharable() {
        return Err(Error::NotSharable(format!(
            "only sharable functions are allowed as mappers, {} is not sharable",
            f.name()
        )));
    }
    Ok(())
}

/// Map every element of `iterable` with `mapper`
pub fn map(ctx: &Context, iterable: &Value, mapper: &Mapper) -> Result<List> {
    match mapper {
        Mapper::Function(f) => check_sharable_function(f)?,
        Mapper::ComputedMapping(m) => m.check_sharable()?,
        Mapper::KeyProjection(_) | Mapper::PropertyProjection(_) => {}
    }

    let elements = iterable.iterate_elements(ctx)?;
    let mut results = Vec::with_capacity(elements.len());
    for element in &elements {
        let result = match mapper {
            Mapper::KeyProjection(keys) => {
                let mut entries = Vec::with_capacity(keys.len());
                for key in keys {
                    entries.push((key.clone(), element.prop(ctx, key)?));
                }
                Value::from(Object::from_entries(entries)?)
            }
            Mapper::PropertyProjection(name) => element.prop(ctx, name)?,
            Mapper::Function(f) => f.call(ctx, std::slice::from_ref(element))?,
            Mapper::ComputedMapping(m) => m.compute(ctx, element)?,
        };
        results.push(result);
    }
    debug!(elements = results.len(), "iterable mapped");
    List::new(results)
}
