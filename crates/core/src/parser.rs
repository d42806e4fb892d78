//! Stateless parsers keyed by MIME type
//!
//! A parser turns a string into a [`Value`]. `validate` and `parse` treat an
//! oversized input differently: `validate` panics, `parse` returns
//! [`Error::TestedStringTooLarge`]. Callers rely on the difference.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::json::parse_json_repr;
use crate::repr::parse_repr;
use crate::resource::{check_tested_len, DEFAULT_MAX_TESTED_STRING_BYTE_LENGTH};
use crate::value::Value;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// MIME type of the JSON representation
pub const JSON_MIME_TYPE: &str = "application/json";
/// MIME type of the canonical representation
pub const IXON_MIME_TYPE: &str = "application/ixon";

/// Parser without per-call state
pub trait StatelessParser: Send + Sync {
    /// Whether `s` is a valid input
    ///
    /// # Panics
    ///
    /// Panics if `s` is longer than [`DEFAULT_MAX_TESTED_STRING_BYTE_LENGTH`].
    fn validate(&self, ctx: &Context, s: &str) -> bool;

    /// Parse `s` into a value
    fn parse(&self, ctx: &Context, s: &str) -> Result<Value>;
}

fn assert_not_too_large(s: &str) {
    if let Err(e) = check_tested_len(s, DEFAULT_MAX_TESTED_STRING_BYTE_LENGTH) {
        panic!("{e}");
    }
}

/// Parser of the untyped JSON representation
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl StatelessParser for JsonParser {
    fn validate(&self, _ctx: &Context, s: &str) -> bool {
        assert_not_too_large(s);
        serde_json::from_str::<serde_json::Value>(s).is_ok()
    }

    fn parse(&self, ctx: &Context, s: &str) -> Result<Value> {
        check_tested_len(s, DEFAULT_MAX_TESTED_STRING_BYTE_LENGTH)?;
        parse_json_repr(ctx, s, None)
    }
}

/// Parser of the canonical representation
#[derive(Debug, Clone, Copy, Default)]
pub struct IxonParser;

impl StatelessParser for IxonParser {
    fn validate(&self, _ctx: &Context, s: &str) -> bool {
        assert_not_too_large(s);
        parse_repr(s).is_ok()
    }

    fn parse(&self, _ctx: &Context, s: &str) -> Result<Value> {
        check_tested_len(s, DEFAULT_MAX_TESTED_STRING_BYTE_LENGTH)?;
        parse_repr(s)
    }
}

/// Parsers keyed by MIME type
#[derive(Default)]
pub struct ParserRegistry {
    parsers: DashMap<String, Arc<dyn StatelessParser>>,
}

impl fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("mime_types", &self.mime_types())
            .finish()
    }
}

impl ParserRegistry {
    /// Register the parser of `mime`
    ///
    /// # Panics
    ///
    /// Panics if a parser is already registered for `mime`.
    pub fn register(&self, mime: &str, parser: Arc<dyn StatelessParser>) {
        match self.parsers.entry(mime.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                panic!("a parser is already registered for mime {mime}")
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(parser);
            }
        }
        debug!(mime, "parser registered");
    }

    /// Parser of `mime`
    pub fn get(&self, mime: &str) -> Option<Arc<dyn StatelessParser>> {
        self.parsers.get(mime).map(|p| Arc::clone(p.value()))
    }

    /// Parse `s` with the parser of `mime`
    pub fn parse(&self, ctx: &Context, mime: &str, s: &str) -> Result<Value> {
        let parser = self
            .get(mime)
            .ok_or_else(|| Error::InvalidArgument(format!("no parser registered for mime {mime}")))?;
        parser.parse(ctx, s)
    }

    /// Registered MIME types, sorted
    pub fn mime_types(&self) -> Vec<String> {
        let mut mimes: Vec<String> = self.parsers.iter().map(|e| e.key().clone()).collect();
        mimes.sort();
        mimes
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
    fn test_json_parser() {
        let ctx = ctx();
        assert!(JsonParser.validate(&ctx, r#"{"a": 1}"#));
        assert!(!JsonParser.validate(&ctx, "{"));
        assert_eq!(JsonParser.parse(&ctx, "\"a\"").unwrap(), Value::from("a"));
        assert!(JsonParser.parse(&ctx, "{").is_err());
    }

    #[test]
    fn test_ixon_parser() {
        let ctx = ctx();
        assert!(IxonParser.validate(&ctx, "[1, 2]"));
        assert!(!IxonParser.validate(&ctx, "[1, "));
        assert_eq!(IxonParser.parse(&ctx, "12").unwrap(), Value::Int(12));
    }

    #[test]
    fn test_parse_too_large_is_error() {
        let ctx = ctx();
        let s = " ".repeat(DEFAULT_MAX_TESTED_STRING_BYTE_LENGTH + 1);
        assert!(matches!(
            JsonParser.parse(&ctx, &s),
            Err(Error::TestedStringTooLarge { .. })
        ));
        assert!(matches!(
            IxonParser.parse(&ctx, &s),
            Err(Error::TestedStringTooLarge { .. })
        ));
    }

    #[test]
    #[should_panic]
    fn test_validate_too_large_panics() {
        let s = " ".repeat(DEFAULT_MAX_TESTED_STRING_BYTE_LENGTH + 1);
        JsonParser.validate(&ctx(), &s);
    }

    #[test]
    fn test_registry() {
        let registry = ParserRegistry::default();
        registry.register(JSON_MIME_TYPE, Arc::new(JsonParser));
        assert!(registry.get(JSON_MIME_TYPE).is_some());
        assert!(registry.get(IXON_MIME_TYPE).is_none());
        assert_eq!(registry.mime_types(), vec![JSON_MIME_TYPE.to_string()]);
        assert_eq!(registry.parse(&ctx(), JSON_MIME_TYPE, "true").unwrap(), Value::Bool(true));
        assert!(registry.parse(&ctx(), IXON_MIME_TYPE, "true").is_err());
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_duplicate_registration_panics() {
        let registry = ParserRegistry::default();
        registry.register(JSON_MIME_TYPE, Arc::new(JsonParser));
        registry.register(JSON_MIME_TYPE, Arc::new(JsonParser));
    }
}
