//! Canonical textual representation (IXON)
//!
//! Every serializable value except sets and patterns has exactly one
//! canonical representation. It keys dictionary entries and computes the
//! uniqueness key of set elements, so two structurally equal values always
//! have the same representation.
//!
//! | Value | Representation |
//! |-------|----------------|
//! | nil, booleans | `nil`, `true`, `false` |
//! | integers, floats | `1`, `-2`, `1.0`, `1e20` |
//! | strings | JSON string literal |
//! | paths, path patterns | `/a/b`, ``/`a b` ``, `%/a/*` |
//! | URLs, hosts | `https://example.com/a`, `https://example.com` |
//! | identifiers, property names | `#name`, `.name` |
//! | lists, tuples, arrays | `[1, 2]`, `#[1, 2]`, `Array(1, 2)` |
//! | objects, records | `{"_url_": ldb://main/u, "a": 1}`, `#{"a": 1}` |
//! | dictionaries | `:{"a": 1, /p: 2}` |
//!
//! Unquoted tokens (paths, URLs, hosts) end at whitespace, `,`, `)`, `]`,
//! `}`, `"` or at a `:` followed by whitespace.

use crate::containers::{Array, Dictionary, List, Object, Record, Tuple};
use crate::error::{Error, Result};
use crate::resource::{Host, Path, PathPattern, Url};
use crate::value::{Value, ValueKind};
use std::sync::Arc;

/// Nesting depth past which writing or parsing fails
pub const MAX_REPR_DEPTH: usize = 64;

/// Property holding the URL of an object
pub const URL_PROPERTY_KEY: &str = "_url_";

const PATH_SAFE_PUNCTUATION: &str = "/._-~+@*=!$&;:%?#";

// ============================================================================
// Writing
// ============================================================================

/// Canonical representation of `value`
pub fn write_repr(value: &Value) -> Result<String> {
    let mut out = String::new();
    write_value(&mut out, value, 0)?;
    Ok(out)
}

fn write_value(out: &mut String, value: &Value, depth: usize) -> Result<()> {
    if depth > MAX_REPR_DEPTH {
        return Err(Error::MaxDepthReached);
    }
    let next = depth + 1;
    match value {
        Value::Nil => out.push_str("nil"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(x) => {
            if !x.is_finite() {
                return Err(Error::InvalidArgument(format!("{x} has no representation")));
            }
            out.push_str(&format!("{x:?}"));
        }
        Value::Str(s) => out.push_str(&serde_json::to_string(s)?),
        Value::Path(p) => write_path(out, "", p.as_str())?,
        Value::PathPattern(p) => write_path(out, "%", p.as_str())?,
        Value::Url(u) => write_raw(out, u.as_str())?,
        Value::Host(h) => write_raw(out, h.as_str())?,
        Value::Identifier(name) => {
            out.push('#');
            out.push_str(name);
        }
        Value::PropertyName(name) => {
            out.push('.');
            out.push_str(name);
        }
        Value::Record(r) => {
            out.push_str("#{");
            write_entries(out, r.entries().iter().map(|(k, v)| (k.as_str(), v)), next)?;
            out.push('}');
        }
        Value::Tuple(t) => {
            out.push_str("#[");
            write_elements(out, t.elements(), next)?;
            out.push(']');
        }
        Value::Object(o) => {
            out.push('{');
            let entries = o.snapshot_entries();
            if let Some(url) = o.url() {
                out.push_str(&serde_json::to_string(URL_PROPERTY_KEY)?);
                out.push_str(": ");
                write_raw(out, url.as_str())?;
                if !entries.is_empty() {
                    out.push_str(", ");
                }
            }
            write_entries(out, entries.iter().map(|(k, v)| (k.as_str(), v)), next)?;
            out.push('}');
        }
        Value::Dictionary(d) => {
            out.push_str(":{");
            for (i, (repr, _, v)) in d.snapshot_entries().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(repr);
                out.push_str(": ");
                write_value(out, v, next)?;
            }
            out.push('}');
        }
        Value::List(l) => {
            out.push('[');
            write_elements(out, &l.snapshot(), next)?;
            out.push(']');
        }
        Value::Array(a) => {
            out.push_str("Array(");
            write_elements(out, &a.elements(), next)?;
            out.push(')');
        }
        Value::Set(_) | Value::Pattern(_) => {
            return Err(Error::InvalidArgument(format!(
                "values of kind {} have no canonical representation",
                value.kind()
            )))
        }
        Value::Function(_) => return Err(Error::NotSerializable(ValueKind::Function)),
    }
    Ok(())
}

fn write_elements(out: &mut String, elements: &[Value], depth: usize) -> Result<()> {
    for (i, e) in elements.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_value(out, e, depth)?;
    }
    Ok(())
}

fn write_entries<'a>(
    out: &mut String,
    entries: impl Iterator<Item = (&'a str, &'a Value)>,
    depth: usize,
) -> Result<()> {
    for (i, (k, v)) in entries.enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&serde_json::to_string(k)?);
        out.push_str(": ");
        write_value(out, v, depth)?;
    }
    Ok(())
}

fn is_raw_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | ')' | ']' | '}' | '"' | '`')
}

fn write_raw(out: &mut String, s: &str) -> Result<()> {
    if s.chars().any(is_raw_delimiter) {
        return Err(Error::InvalidArgument(format!("{s:?} has no representation")));
    }
    out.push_str(s);
    Ok(())
}

fn write_path(out: &mut String, prefix: &str, path: &str) -> Result<()> {
    out.push_str(prefix);
    let safe = path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || PATH_SAFE_PUNCTUATION.contains(c));
    if safe {
        out.push_str(path);
        return Ok(());
    }
    let lead_len = ["../", "./", "/"]
        .iter()
        .find(|lead| path.starts_with(*lead))
        .map(|lead| lead.len())
        .unwrap_or(0);
    let (lead, rest) = path.split_at(lead_len);
    if rest.contains('`') {
        return Err(Error::InvalidArgument(format!("path {path:?} has no representation")));
    }
    out.push_str(lead);
    out.push('`');
    out.push_str(rest);
    out.push('`');
    Ok(())
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse a canonical representation
pub fn parse_repr(s: &str) -> Result<Value> {
    let mut parser = ReprParser { s, i: 0, depth: 0 };
    parser.skip_whitespace();
    let value = parser.parse_value()?;
    parser.skip_whitespace();
    if parser.i != s.len() {
        return Err(Error::parse(parser.i, "unexpected trailing characters"));
    }
    Ok(value)
}

struct ReprParser<'a> {
    s: &'a str,
    i: usize,
    depth: usize,
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

impl<'a> ReprParser<'a> {
    fn rest(&self) -> &'a str {
        &self.s[self.i..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.i = self.s.len() - trimmed.len();
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.peek() == Some(c) {
            self.i += c.len_utf8();
            Ok(())
        } else {
            Err(Error::parse(self.i, format!("'{c}' expected")))
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_REPR_DEPTH {
            return Err(Error::MaxDepthReached);
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_value(&mut self) -> Result<Value> {
        let start = self.i;
        let rest = self.rest();
        let c = match self.peek() {
            Some(c) => c,
            None => return Err(Error::parse(start, "value expected")),
        };
        match c {
            '"' => Ok(Value::Str(self.parse_string()?)),
            '[' => {
                self.i += 1;
                let elements = self.parse_sequence(']')?;
                List::new(elements).map(Value::from).map_err(|e| Error::parse(start, e.to_string()))
            }
            '{' => {
                self.i += 1;
                self.parse_object(start)
            }
            '#' if rest.starts_with("#[") => {
                self.i += 2;
                let elements = self.parse_sequence(']')?;
                Tuple::new(elements).map(Value::from).map_err(|e| Error::parse(start, e.to_string()))
            }
            '#' if rest.starts_with("#{") => {
                self.i += 2;
                let entries = self.parse_string_keyed_entries()?;
                Record::new(entries).map(Value::from).map_err(|e| Error::parse(start, e.to_string()))
            }
            '#' => {
                self.i += 1;
                Ok(Value::Identifier(self.parse_name()?))
            }
            ':' if rest.starts_with(":{") => {
                self.i += 2;
                self.parse_dictionary(start)
            }
            '%' => {
                self.i += 1;
                let path = self.parse_path()?;
                PathPattern::new(path)
                    .map(Value::PathPattern)
                    .map_err(|e| Error::parse(start, e.to_string()))
            }
            '/' => Ok(Value::Path(self.parse_path_value(start)?)),
            '.' if rest.starts_with("./") || rest.starts_with("../") => Ok(Value::Path(self.parse_path_value(start)?)),
            '.' => {
                self.i += 1;
                Ok(Value::PropertyName(self.parse_name()?))
            }
            '-' | '0'..='9' => self.parse_number(),
            c if c.is_ascii_alphabetic() => self.parse_word(),
            _ => Err(Error::parse(start, format!("unexpected character {c:?}"))),
        }
    }

    fn parse_string(&mut self) -> Result<String> {
        let start = self.i;
        let bytes = self.s.as_bytes();
        let mut j = start + 1;
        loop {
            match bytes.get(j) {
                None => return Err(Error::parse(start, "unterminated string")),
                Some(b'\\') => j += 2,
                Some(b'"') => break,
                Some(_) => j += 1,
            }
        }
        let literal = self
            .s
            .get(start..=j)
            .ok_or_else(|| Error::parse(start, "unterminated string"))?;
        let value: String = serde_json::from_str(literal).map_err(|e| Error::parse(start, e.to_string()))?;
        self.i = j + 1;
        Ok(value)
    }

    fn parse_name(&mut self) -> Result<String> {
        let start = self.i;
        let len = self.rest().find(|c: char| !is_ident_char(c)).unwrap_or(self.rest().len());
        if len == 0 {
            return Err(Error::parse(start, "name expected"));
        }
        self.i += len;
        Ok(self.s[start..self.i].to_string())
    }

    fn at_raw_end(&self) -> bool {
        let mut chars = self.rest().chars();
        match chars.next() {
            None => true,
            Some(':') => chars.next().is_some_and(char::is_whitespace),
            Some(c) => is_raw_delimiter(c) && c != '`',
        }
    }

    fn parse_raw(&mut self) -> Result<String> {
        let start = self.i;
        let mut out = String::new();
        while !self.at_raw_end() {
            let c = self.peek().unwrap_or_default();
            if c == '`' {
                let close = self.rest()[1..]
                    .find('`')
                    .ok_or_else(|| Error::parse(self.i, "unterminated quoted path section"))?;
                out.push_str(&self.rest()[1..1 + close]);
                self.i += close + 2;
            } else {
                out.push(c);
                self.i += c.len_utf8();
            }
        }
        if out.is_empty() {
            return Err(Error::parse(start, "unexpected end of token"));
        }
        Ok(out)
    }

    fn parse_path(&mut self) -> Result<String> {
        let start = self.i;
        let raw = self.parse_raw()?;
        if !(raw.starts_with('/') || raw.starts_with("./") || raw.starts_with("../")) {
            return Err(Error::parse(start, "path expected"));
        }
        Ok(raw)
    }

    fn parse_path_value(&mut self, start: usize) -> Result<Path> {
        let path = self.parse_path()?;
        Path::new(path).map_err(|e| Error::parse(start, e.to_string()))
    }

    fn parse_number(&mut self) -> Result<Value> {
        let start = self.i;
        let bytes = self.s.as_bytes();
        let mut j = start;
        let mut is_float = false;
        if bytes.get(j) == Some(&b'-') {
            j += 1;
        }
        while j < bytes.len() {
            match bytes[j] {
                b'0'..=b'9' => j += 1,
                b'.' => {
                    is_float = true;
                    j += 1;
                }
                b'e' | b'E' => {
                    is_float = true;
                    j += 1;
                    if matches!(bytes.get(j), Some(b'+') | Some(b'-')) {
                        j += 1;
                    }
                }
                _ => break,
            }
        }
        let literal = &self.s[start..j];
        self.i = j;
        if is_float {
            literal
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| Error::parse(start, format!("invalid float {literal:?}: {e}")))
        } else {
            literal
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| Error::parse(start, format!("invalid integer {literal:?}: {e}")))
        }
    }

    fn parse_word(&mut self) -> Result<Value> {
        let start = self.i;
        let len = self
            .rest()
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')))
            .unwrap_or(self.rest().len());
        let word = &self.s[start..start + len];
        let after = &self.s[start + len..];

        if after.starts_with("://") {
            let raw = self.parse_raw()?;
            let authority_and_path = &raw[len + 3..];
            if authority_and_path.is_empty() {
                return Err(Error::parse(start, "scheme without host"));
            }
            let value = if authority_and_path.contains(['/', '?', '#']) {
                Url::new(raw).map(Value::Url)
            } else {
                Host::new(raw).map(Value::Host)
            };
            return value.map_err(|e| Error::parse(start, e.to_string()));
        }

        self.i = start + len;
        match word {
            "nil" => Ok(Value::Nil),
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            "Array" if after.starts_with('(') => {
                self.i += 1;
                let elements = self.parse_sequence(')')?;
                Array::new(elements).map(Value::from).map_err(|e| Error::parse(start, e.to_string()))
            }
            _ => Err(Error::parse(start, format!("unknown keyword {word:?}"))),
        }
    }

    /// Comma-separated values up to `close`, the opening bracket is consumed
    fn parse_sequence(&mut self, close: char) -> Result<Vec<Value>> {
        self.enter()?;
        let mut elements = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(close) {
            self.i += 1;
            self.leave();
            return Ok(elements);
        }
        loop {
            self.skip_whitespace();
            elements.push(self.parse_value()?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => self.i += 1,
                Some(c) if c == close => {
                    self.i += 1;
                    break;
                }
                _ => return Err(Error::parse(self.i, format!("',' or '{close}' expected"))),
            }
        }
        self.leave();
        Ok(elements)
    }

    /// Entries with string keys up to `}`, the opening brace is consumed
    fn parse_string_keyed_entries(&mut self) -> Result<Vec<(String, Value)>> {
        let mut entries = Vec::new();
        self.parse_entries(|parser| {
            parser.skip_whitespace();
            if parser.peek() != Some('"') {
                return Err(Error::parse(parser.i, "property name expected"));
            }
            let key = parser.parse_string()?;
            parser.skip_whitespace();
            parser.expect(':')?;
            parser.skip_whitespace();
            let value = parser.parse_value()?;
            entries.push((key, value));
            Ok(())
        })?;
        Ok(entries)
    }

    fn parse_entries(&mut self, mut entry: impl FnMut(&mut Self) -> Result<()>) -> Result<()> {
        self.enter()?;
        self.skip_whitespace();
        if self.peek() == Some('}') {
            self.i += 1;
            self.leave();
            return Ok(());
        }
        loop {
            entry(self)?;
            self.skip_whitespace();
            match self.peek() {
                Some(',') => self.i += 1,
                Some('}') => {
                    self.i += 1;
                    break;
                }
                _ => return Err(Error::parse(self.i, "',' or '}' expected")),
            }
        }
        self.leave();
        Ok(())
    }

    fn parse_object(&mut self, start: usize) -> Result<Value> {
        let mut entries = self.parse_string_keyed_entries()?;
        let mut url = None;
        if let Some(i) = entries.iter().position(|(k, _)| k == URL_PROPERTY_KEY) {
            match entries.remove(i).1 {
                Value::Url(u) => url = Some(u),
                other => {
                    return Err(Error::parse(
                        start,
                        format!("{URL_PROPERTY_KEY} should be a URL, not a value of kind {}", other.kind()),
                    ))
                }
            }
        }
        let object = Object::from_entries(entries).map_err(|e| Error::parse(start, e.to_string()))?;
        if let Some(url) = url {
            object.init_url(url);
        }
        Ok(Value::Object(Arc::new(object)))
    }

    fn parse_dictionary(&mut self, start: usize) -> Result<Value> {
        let mut keys = Vec::new();
        let mut values = Vec::new();
        self.parse_entries(|parser| {
            parser.skip_whitespace();
            keys.push(parser.parse_value()?);
            parser.skip_whitespace();
            parser.expect(':')?;
            parser.skip_whitespace();
            values.push(parser.parse_value()?);
            Ok(())
        })?;
        Dictionary::from_key_value_lists(keys, values)
            .map(Value::from)
            .map_err(|e| Error::parse(start, e.to_string()))
    }
}
