//! Fixed-length sequence
//!
//! Arrays are never shared: a container exposing an array to another
//! execution context hands out a copy.

use crate::error::{Error, Result};
use crate::value::Value;
use inox_concurrency::StateId;
use parking_lot::Mutex;
use std::fmt;

/// Fixed-length mutable sequence
pub struct Array {
    elements: Mutex<Vec<Value>>,
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Array").field(&*self.elements.lock()).finish()
    }
}

impl Clone for Array {
    fn clone(&self) -> Self {
        Array {
            elements: Mutex::new(self.elements()),
        }
    }
}

impl Array {
    /// Create an array of serializable values
    pub fn new(elements: Vec<Value>) -> Result<Self> {
        if let Some(v) = elements.iter().find(|v| !v.is_serializable()) {
            return Err(Error::NotSerializable(v.kind()));
        }
        Ok(Array {
            elements: Mutex::new(elements),
        })
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.elements.lock().len()
    }

    /// Whether the array is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `i`
    pub fn at(&self, i: usize) -> Result<Value> {
        let elements = self.elements.lock();
        elements.get(i).cloned().ok_or(Error::IndexOutOfBounds {
            index: i,
            len: elements.len(),
        })
    }

    /// Replace the element at `i`
    pub fn set(&self, i: usize, value: Value) -> Result<()> {
        if !value.is_serializable() {
            return Err(Error::NotSerializable(value.kind()));
        }
        let mut elements = self.elements.lock();
        let len = elements.len();
        let slot = elements
            .get_mut(i)
            .ok_or(Error::IndexOutOfBounds { index: i, len })?;
        *slot = value;
        Ok(())
    }

    /// New array holding the elements in `start..end`
    pub fn slice(&self, start: usize, end: usize) -> Result<Array> {
        let elements = self.elements.lock();
        if start > end || end > elements.len() {
            return Err(Error::InvalidRange {
                start,
                end,
                len: elements.len(),
            });
        }
        Ok(Array {
            elements: Mutex::new(elements[start..end].to_vec()),
        })
    }

    /// Copy of the elements
    pub fn elements(&self) -> Vec<Value> {
        self.elements.lock().clone()
    }

    /// Whether every element can be shared or cloned
    pub fn is_clonable(&self) -> std::result::Result<(), String> {
        super::check_all_sharable(&self.elements())
    }

    /// Copy handed to another execution context
    pub fn clone_for_sharing(&self, origin: StateId) -> Result<Array> {
        let elements = self
            .elements()
            .iter()
            .map(|v| v.share_or_clone(origin))
            .collect::<Result<Vec<_>>>()?;
        Ok(Array {
            elements: Mutex::new(elements),
        })
    }
}
