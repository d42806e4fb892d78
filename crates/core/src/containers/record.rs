//! Immutable object and sequence
//!
//! Records and tuples only hold immutable serializable values, so they are
//! shared by reference without locking and never emit mutations.

use crate::error::{Error, Result};
use crate::value::{Value, ValueKind};

fn check_immutable(value: &Value, container: ValueKind) -> Result<()> {
    if !value.is_serializable() {
        return Err(Error::NotSerializable(value.kind()));
    }
    if value.is_mutable() {
        return Err(Error::InvalidArgument(format!(
            "a {container} cannot hold a mutable value ({})",
            value.kind()
        )));
    }
    Ok(())
}

/// Immutable object with sorted properties
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    entries: Vec<(String, Value)>,
}

impl Record {
    /// Create a record, names must be unique
    pub fn new<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Result<Self> {
        let mut entries: Vec<(String, Value)> = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        for (_, v) in &entries {
            check_immutable(v, ValueKind::Record)?;
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        if let Some(w) = entries.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(Error::InvalidArgument(format!("duplicate property .{}", w[0].0)));
        }
        Ok(Record { entries })
    }

    /// Properties, sorted by name
    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    /// Value of property `name`
    pub fn prop(&self, name: &str) -> Result<Value> {
        self.entries
            .binary_search_by(|(k, _)| k.as_str().cmp(name))
            .map(|i| self.entries[i].1.clone())
            .map_err(|_| Error::PropertyDoesNotExist {
                property: name.to_string(),
                kind: ValueKind::Record,
            })
    }

    /// Whether property `name` exists
    pub fn has_prop(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == name)
    }

    /// Property names, sorted
    pub fn property_names(&self) -> Vec<String> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Number of properties
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the record has no property
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Immutable sequence
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    elements: Vec<Value>,
}

impl Tuple {
    /// Create a tuple
    pub fn new(elements: Vec<Value>) -> Result<Self> {
        for v in &elements {
            check_immutable(v, ValueKind::Tuple)?;
        }
        Ok(Tuple { elements })
    }

    /// Elements
    pub fn elements(&self) -> &[Value] {
        &self.elements
    }

    /// Element at `i`
    pub fn at(&self, i: usize) -> Result<Value> {
        self.elements.get(i).cloned().ok_or(Error::IndexOutOfBounds {
            index: i,
            len: self.elements.len(),
        })
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the tuple is empty
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}
