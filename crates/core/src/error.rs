//! Error types for the value layer
//!
//! This module defines the errors returned by value, container, pattern and
//! representation operations. Programming-contract violations (double
//! registration, bookkeeping invariants) panic instead.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use crate::context::PermissionKind;
use crate::pattern::PatternKind;
use crate::value::ValueKind;
use inox_concurrency::ConcurrencyError;
use thiserror::Error;

/// Result type alias for value operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the value layer
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Lock or transaction wait failed
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    /// The execution context lacks a permission
    #[error("permission denied: {kind} {entity}")]
    PermissionDenied {
        /// Required permission kind
        kind: PermissionKind,
        /// Entity the permission applies to
        entity: String,
    },

    /// A write was rolled back because the object no longer matched its constraint
    #[error("constraint violation when setting property .{property}")]
    ConstraintViolation {
        /// Property being written
        property: String,
    },

    /// Containers only hold serializable values
    #[error("value of kind {0} is not serializable")]
    NotSerializable(ValueKind),

    /// Value cannot be shared or cloned across execution contexts
    #[error("value is not sharable: {0}")]
    NotSharable(String),

    /// Index keys ("0", "1", ...) are immutable
    #[error("cannot set the value of index key property .{0}")]
    CannotSetIndexKey(String),

    /// Property lookup on a value without that property
    #[error("property .{property} does not exist on value of kind {kind}")]
    PropertyDoesNotExist {
        /// Property name
        property: String,
        /// Kind of the value
        kind: ValueKind,
    },

    /// Value does not support property assignment
    #[error("cannot set a property of a value of kind {0}")]
    CannotSetProp(ValueKind),

    /// Index outside of a sequence
    #[error("index {index} out of bounds (length {len})")]
    IndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Sequence length
        len: usize,
    },

    /// Range outside of a sequence or reversed
    #[error("invalid range {start}..{end} (length {len})")]
    InvalidRange {
        /// Range start (inclusive)
        start: usize,
        /// Range end (exclusive)
        end: usize,
        /// Sequence length
        len: usize,
    },

    /// Dequeue or pop on an empty list
    #[error("cannot remove an element from an empty list")]
    EmptyList,

    /// Identity URL can only be set once
    #[error("URL already set")]
    UrlAlreadySet,

    /// Value does not accept an identity URL
    #[error("value of kind {0} does not accept a URL")]
    DoesNotAcceptUrl(ValueKind),

    /// Another element with the same uniqueness key is in the set
    #[error("a value with the same key is already present: {0}")]
    DuplicateKey(String),

    /// Element rejected by the set's element pattern
    #[error("value does not match the element pattern of the set")]
    ElementPatternMismatch,

    /// Uniqueness key cannot be computed for an element
    #[error("failed to get unique key: {0}")]
    NoUniqueKey(String),

    /// Value rejected by a pattern
    #[error("value at {path} does not match the expected pattern {expected}")]
    PatternMismatch {
        /// Location of the value
        path: String,
        /// Description of the expected pattern
        expected: String,
    },

    /// A required object property is missing
    #[error("missing required property .{0}")]
    MissingRequiredProperty(String),

    /// No loading function registered for a pattern kind
    #[error("no loading function registered for {0} patterns")]
    NoLoadingFunction(PatternKind),

    /// A stored value does not exist
    #[error("failed to load non-existing value at {0}")]
    NonExistingValue(String),

    /// Malformed textual representation
    #[error("parse error at index {index}: {message}")]
    Parse {
        /// Byte offset of the error
        index: usize,
        /// Description
        message: String,
    },

    /// Tested string exceeds a fixed byte-length ceiling
    #[error("tested string is too large ({len} bytes, maximum {max})")]
    TestedStringTooLarge {
        /// Length of the string
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Representation nested too deeply
    #[error("maximum representation depth reached")]
    MaxDepthReached,

    /// JSON encoding or decoding failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid argument to a constructor or function
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Storage backend failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Shorthand for [`Error::Parse`]
    pub fn parse(index: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            index,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_constraint_violation() {
        let err = Error::ConstraintViolation {
            property: "a".to_string(),
        };
        assert!(err.to_string().contains(".a"));
    }

    #[test]
    fn test_error_from_concurrency() {
        let err: Error = ConcurrencyError::Cancelled.into();
        assert!(matches!(err, Error::Concurrency(ConcurrencyError::Cancelled)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
