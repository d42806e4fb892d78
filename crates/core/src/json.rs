//! JSON representation
//!
//! When the expected pattern determines the kind of a value, the value is
//! written bare: integers as JSON strings (to survive 64-bit round trips),
//! floats as numbers, paths and URLs as strings, objects as JSON objects
//! (with their URL under `"_url_"`) and sequences as arrays.
//!
//! Without such a pattern the kind is recorded by wrapping the value:
//! `{"int__value": "1"}`. `nil`, booleans and strings are always written
//! bare since JSON already distinguishes them.

use crate::containers::{Array, Dictionary, List, Object, Record, Set, SetConfig, Tuple, ValMap};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::migration::join_pseudo_path;
use crate::pattern::{ListPattern, ObjectPattern, Pattern};
use crate::repr::{MAX_REPR_DEPTH, URL_PROPERTY_KEY};
use crate::resource::{Host, Path, PathPattern, Url};
use crate::value::{Value, ValueKind};
use serde_json::{Map, Number, Value as Json};
use std::sync::Arc;

/// Suffix of the single key wrapping an untyped value
pub const JSON_UNTYPED_VALUE_SUFFIX: &str = "__value";

/// JSON representation of `value` as a string
pub fn to_json_repr(ctx: &Context, value: &Value, pattern: Option<&Pattern>) -> Result<String> {
    Ok(serde_json::to_string(&to_json_value(ctx, value, pattern)?)?)
}

/// Parse a JSON representation written under `pattern`
pub fn parse_json_repr(ctx: &Context, s: &str, pattern: Option<&Pattern>) -> Result<Value> {
    let json: Json = serde_json::from_str(s)?;
    from_json_value(ctx, &json, pattern)
}

/// JSON representation of `value`
pub fn to_json_value(ctx: &Context, value: &Value, pattern: Option<&Pattern>) -> Result<Json> {
    write_json(ctx, value, pattern, "/", 0)
}

/// Value represented by `json` written under `pattern`
pub fn from_json_value(ctx: &Context, json: &Json, pattern: Option<&Pattern>) -> Result<Value> {
    read_json(ctx, json, pattern, "/", 0)
}

/// Kind determined by a pattern, `None` when values must be wrapped
fn typed_kind(pattern: Option<&Pattern>) -> Option<ValueKind> {
    match pattern? {
        Pattern::Type(kind) => Some(*kind),
        Pattern::ExactValue(v) => Some(v.kind()),
        Pattern::IntRange(_) => Some(ValueKind::Int),
        Pattern::Object(_) => Some(ValueKind::Object),
        Pattern::Record(_) => Some(ValueKind::Record),
        Pattern::List(_) => Some(ValueKind::List),
        Pattern::Tuple(_) => Some(ValueKind::Tuple),
        Pattern::Set(_) => Some(ValueKind::Set),
        Pattern::Any | Pattern::Serializable | Pattern::Union(_) => None,
    }
}

fn mismatch(path: &str, pattern: &Pattern) -> Error {
    Error::PatternMismatch {
        path: path.to_string(),
        expected: pattern.to_string(),
    }
}

fn object_pattern(pattern: Option<&Pattern>) -> Option<&ObjectPattern> {
    match pattern {
        Some(Pattern::Object(p)) | Some(Pattern::Record(p)) => Some(p),
        _ => None,
    }
}

fn list_pattern(pattern: Option<&Pattern>) -> Option<&ListPattern> {
    match pattern {
        Some(Pattern::List(p)) | Some(Pattern::Tuple(p)) => Some(p),
        _ => None,
    }
}

// ============================================================================
// Writing
// ============================================================================

fn write_json(ctx: &Context, value: &Value, pattern: Option<&Pattern>, path: &str, depth: usize) -> Result<Json> {
    if depth > MAX_REPR_DEPTH {
        return Err(Error::MaxDepthReached);
    }
    match (pattern, typed_kind(pattern)) {
        (_, Some(kind)) if kind == value.kind() => write_typed(ctx, value, pattern, path, depth),
        (Some(p), Some(_)) => Err(mismatch(path, p)),
        _ => match value {
            Value::Nil | Value::Bool(_) | Value::Str(_) => write_typed(ctx, value, None, path, depth),
            _ => {
                let mut wrapper = Map::new();
                wrapper.insert(
                    format!("{}{JSON_UNTYPED_VALUE_SUFFIX}", value.kind()),
                    write_typed(ctx, value, None, path, depth)?,
                );
                Ok(Json::Object(wrapper))
            }
        },
    }
}

fn write_typed(ctx: &Context, value: &Value, pattern: Option<&Pattern>, path: &str, depth: usize) -> Result<Json> {
    let next = depth + 1;
    let json = match value {
        Value::Nil => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::String(i.to_string()),
        Value::Float(x) => Number::from_f64(*x)
            .map(Json::Number)
            .ok_or_else(|| Error::Serialization(format!("{x} has no JSON representation")))?,
        Value::Str(s) => Json::String(s.clone()),
        Value::Path(p) => Json::String(p.to_string()),
        Value::PathPattern(p) => Json::String(p.to_string()),
        Value::Url(u) => Json::String(u.to_string()),
        Value::Host(h) => Json::String(h.to_string()),
        Value::Identifier(name) | Value::PropertyName(name) => Json::String(name.clone()),
        Value::Object(o) => {
            let mut map = Map::new();
            if let Some(url) = o.url() {
                map.insert(URL_PROPERTY_KEY.to_string(), Json::String(url.to_string()));
            }
            let entry_patterns = object_pattern(pattern);
            for (name, v) in o.snapshot_entries() {
                let entry_pattern = entry_patterns.and_then(|p| p.entry(&name));
                let json = write_json(ctx, &v, entry_pattern, &join_pseudo_path(path, &name), next)?;
                map.insert(name, json);
            }
            Json::Object(map)
        }
        Value::Record(r) => {
            let mut map = Map::new();
            let entry_patterns = object_pattern(pattern);
            for (name, v) in r.entries() {
                let entry_pattern = entry_patterns.and_then(|p| p.entry(name));
                map.insert(
                    name.clone(),
                    write_json(ctx, v, entry_pattern, &join_pseudo_path(path, name), next)?,
                );
            }
            Json::Object(map)
        }
        Value::List(l) => write_elements(ctx, &l.snapshot(), list_pattern(pattern), path, next)?,
        Value::Tuple(t) => write_elements(ctx, t.elements(), list_pattern(pattern), path, next)?,
        Value::Array(a) => write_elements(ctx, &a.elements(), None, path, next)?,
        Value::Dictionary(d) => {
            let mut map = Map::new();
            for (repr, _, v) in d.snapshot_entries() {
                let json = write_json(ctx, &v, None, &join_pseudo_path(path, &repr), next)?;
                map.insert(repr, json);
            }
            Json::Object(map)
        }
        Value::Set(s) => {
            let element_pattern = match pattern {
                Some(Pattern::Set(p)) => p.element().clone(),
                // untyped sets are read back with the default configuration
                _ => Pattern::Serializable,
            };
            let mut elements = Vec::new();
            for (key, v) in s.snapshot_entries() {
                elements.push(write_json(ctx, &v, Some(&element_pattern), &join_pseudo_path(path, &key), next)?);
            }
            Json::Array(elements)
        }
        Value::Pattern(_) | Value::Function(_) => {
            return Err(Error::Serialization(format!(
                "values of kind {} have no JSON representation",
                value.kind()
            )))
        }
    };
    Ok(json)
}

fn write_elements(
    ctx: &Context,
    elements: &[Value],
    pattern: Option<&ListPattern>,
    path: &str,
    depth: usize,
) -> Result<Json> {
    let mut out = Vec::with_capacity(elements.len());
    for (i, e) in elements.iter().enumerate() {
        let element_pattern = pattern.and_then(|p| p.element_at(i));
        out.push(write_json(ctx, e, element_pattern, &join_pseudo_path(path, &i.to_string()), depth)?);
    }
    Ok(Json::Array(out))
}

// ============================================================================
// Parsing
// ============================================================================

fn read_json(ctx: &Context, json: &Json, pattern: Option<&Pattern>, path: &str, depth: usize) -> Result<Value> {
    if depth > MAX_REPR_DEPTH {
        return Err(Error::MaxDepthReached);
    }
    let value = match typed_kind(pattern) {
        Some(kind) => read_typed(ctx, json, kind, pattern, path, depth)?,
        None => read_untyped(ctx, json, path, depth)?,
    };
    if let Some(pattern) = pattern {
        if !pattern.test(ctx, &value) {
            return Err(mismatch(path, pattern));
        }
    }
    Ok(value)
}

fn read_untyped(ctx: &Context, json: &Json, path: &str, depth: usize) -> Result<Value> {
    match json {
        Json::Null => Ok(Value::Nil),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::String(s) => Ok(Value::Str(s.clone())),
        Json::Object(map) if map.len() == 1 => {
            let (key, inner) = map
                .iter()
                .next()
                .ok_or_else(|| Error::Serialization("empty wrapper".to_string()))?;
            let kind = key
                .strip_suffix(JSON_UNTYPED_VALUE_SUFFIX)
                .and_then(ValueKind::from_name)
                .ok_or_else(|| Error::Serialization(format!("impossible to determine type at {path}: {key}")))?;
            read_typed(ctx, inner, kind, None, path, depth)
        }
        _ => Err(Error::Serialization(format!("impossible to determine type at {path}"))),
    }
}

fn expect_str<'a>(json: &'a Json, kind: ValueKind, path: &str) -> Result<&'a str> {
    json.as_str()
        .ok_or_else(|| Error::Serialization(format!("a string is expected for a value of kind {kind} at {path}")))
}

fn read_typed(
    ctx: &Context,
    json: &Json,
    kind: ValueKind,
    pattern: Option<&Pattern>,
    path: &str,
    depth: usize,
) -> Result<Value> {
    let next = depth + 1;
    let value = match kind {
        ValueKind::Nil => match json {
            Json::Null => Value::Nil,
            _ => return Err(Error::Serialization(format!("null is expected at {path}"))),
        },
        ValueKind::Bool => Value::Bool(
            json.as_bool()
                .ok_or_else(|| Error::Serialization(format!("a boolean is expected at {path}")))?,
        ),
        ValueKind::Int => {
            let s = expect_str(json, kind, path)?;
            Value::Int(
                s.parse::<i64>()
                    .map_err(|e| Error::Serialization(format!("failed to parse integer at {path}: {e}")))?,
            )
        }
        ValueKind::Float => Value::Float(
            json.as_f64()
                .ok_or_else(|| Error::Serialization(format!("a number is expected at {path}")))?,
        ),
        ValueKind::Str => Value::Str(expect_str(json, kind, path)?.to_string()),
        ValueKind::Path => Value::Path(Path::new(expect_str(json, kind, path)?)?),
        ValueKind::PathPattern => Value::PathPattern(PathPattern::new(expect_str(json, kind, path)?)?),
        ValueKind::Url => Value::Url(Url::new(expect_str(json, kind, path)?)?),
        ValueKind::Host => Value::Host(Host::new(expect_str(json, kind, path)?)?),
        ValueKind::Identifier => Value::Identifier(expect_str(json, kind, path)?.to_string()),
        ValueKind::PropertyName => Value::PropertyName(expect_str(json, kind, path)?.to_string()),
        ValueKind::Object => read_object(ctx, json, object_pattern(pattern), path, next)?,
        ValueKind::Record => {
            let entries = read_entries(ctx, json, object_pattern(pattern), path, next, false)?.0;
            Value::from(Record::new(entries)?)
        }
        ValueKind::List => Value::from(List::new(read_elements(ctx, json, list_pattern(pattern), path, next)?)?),
        ValueKind::Tuple => Value::from(Tuple::new(read_elements(ctx, json, list_pattern(pattern), path, next)?)?),
        ValueKind::Array => Value::from(Array::new(read_elements(ctx, json, None, path, next)?)?),
        ValueKind::Dictionary => {
            let map = json
                .as_object()
                .ok_or_else(|| Error::Serialization(format!("an object is expected at {path}")))?;
            let mut entries = Vec::with_capacity(map.len());
            for (repr, v) in map {
                entries.push((repr.as_str(), read_json(ctx, v, None, &join_pseudo_path(path, repr), next)?));
            }
            Value::from(Dictionary::new(entries)?)
        }
        ValueKind::Set => {
            let config = match pattern {
                Some(Pattern::Set(p)) => p.config().clone(),
                _ => SetConfig::default(),
            };
            let items = json
                .as_array()
                .ok_or_else(|| Error::Serialization(format!("an array is expected at {path}")))?;
            let mut elements = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                elements.push(read_json(ctx, item, Some(&config.element), &join_pseudo_path(path, &i.to_string()), next)?);
            }
            Value::Set(Arc::new(Set::new(ctx, elements, config)?))
        }
        ValueKind::Pattern | ValueKind::Function => {
            return Err(Error::Serialization(format!(
                "values of kind {kind} have no JSON representation"
            )))
        }
    };
    Ok(value)
}

fn read_object(ctx: &Context, json: &Json, pattern: Option<&ObjectPattern>, path: &str, depth: usize) -> Result<Value> {
    let (entries, url) = read_entries(ctx, json, pattern, path, depth, true)?;
    let object = Object::from_map(entries.into_iter().collect::<ValMap>())?;
    if let Some(url) = url {
        object.init_url(url);
    }
    Ok(Value::from(object))
}

type Entries = (Vec<(String, Value)>, Option<Url>);

fn read_entries(
    ctx: &Context,
    json: &Json,
    pattern: Option<&ObjectPattern>,
    path: &str,
    depth: usize,
    accepts_url: bool,
) -> Result<Entries> {
    let map = json
        .as_object()
        .ok_or_else(|| Error::Serialization(format!("an object is expected at {path}")))?;
    let mut entries = Vec::with_capacity(map.len());
    let mut url = None;
    for (name, v) in map {
        if accepts_url && name == URL_PROPERTY_KEY {
            url = Some(Url::new(expect_str(v, ValueKind::Url, path)?)?);
            continue;
        }
        let entry_pattern = pattern.and_then(|p| p.entry(name));
        entries.push((name.clone(), read_json(ctx, v, entry_pattern, &join_pseudo_path(path, name), depth)?));
    }
    if let Some(pattern) = pattern {
        let mut missing = None;
        pattern.for_each_entry(|name, _, optional| {
            if missing.is_none() && !optional && !map.contains_key(name) {
                missing = Some(name.to_string());
            }
            Ok(())
        })?;
        if let Some(name) = missing {
            return Err(Error::MissingRequiredProperty(name));
        }
    }
    Ok((entries, url))
}

fn read_elements(ctx: &Context, json: &Json, pattern: Option<&ListPattern>, path: &str, depth: usize) -> Result<Vec<Value>> {
    let items = json
        .as_array()
        .ok_or_else(|| Error::Serialization(format!("an array is expected at {path}")))?;
    let mut elements = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let element_pattern = pattern.and_then(|p| p.element_at(i));
        elements.push(read_json(ctx, item, element_pattern, &join_pseudo_path(path, &i.to_string()), depth)?);
    }
    Ok(elements)
}
