//! Resource names: paths, path patterns, URLs, hosts and their patterns
//!
//! Resource names are plain string newtypes; patterns over them implement
//! `includes`. Tests against untrusted input are bounded by fixed byte-length
//! ceilings: pattern tests (`includes`/`test`) panic when the ceiling is
//! exceeded, parsing functions return [`Error::TestedStringTooLarge`].

use crate::error::{Error, Result};
use std::fmt;

/// Maximum byte length of a path tested against a globbing path pattern
pub const MAX_TESTED_PATH_BYTE_LENGTH: usize = 4095;
/// Maximum byte length of a URL tested against a URL pattern
pub const MAX_TESTED_URL_BYTE_LENGTH: usize = 8000;
/// Maximum byte length of a host pattern tested against another host pattern
pub const MAX_TESTED_HOST_PATTERN_BYTE_LENGTH: usize = 100;
/// Maximum byte length of a string handed to a parser
pub const DEFAULT_MAX_TESTED_STRING_BYTE_LENGTH: usize = 10_000_000;

/// Suffix of prefix path and URL patterns
pub const PREFIX_PATTERN_SUFFIX: &str = "/...";

/// Return `Err(TestedStringTooLarge)` when `s` exceeds `max` bytes
pub fn check_tested_len(s: &str, max: usize) -> Result<()> {
    if s.len() > max {
        return Err(Error::TestedStringTooLarge { len: s.len(), max });
    }
    Ok(())
}

fn assert_tested_len(s: &str, max: usize, what: &str) {
    if s.len() > max {
        panic!("tested {what} is too large ({} bytes, maximum {max})", s.len());
    }
}

// ============================================================================
// Path
// ============================================================================

/// Absolute (`/a/b`) or relative (`./a`, `../a`) path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(String);

impl Path {
    /// Create a path, the string must start with `/`, `./` or `../`
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if !(s.starts_with('/') || s.starts_with("./") || s.starts_with("../")) {
            return Err(Error::InvalidArgument(format!(
                "path should start with '/', './' or '../': {s:?}"
            )));
        }
        Ok(Path(s))
    }

    /// Underlying string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the path ends with `/`
    pub fn is_dir_path(&self) -> bool {
        self.0.ends_with('/')
    }

    /// Whether the path starts with `/`
    pub fn is_absolute(&self) -> bool {
        self.0.starts_with('/')
    }

    /// Whether the path starts with `./` or `../`
    pub fn is_relative(&self) -> bool {
        !self.is_absolute()
    }

    /// Last segment, without trailing slash
    pub fn basename(&self) -> &str {
        let trimmed = self.0.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or("")
    }

    /// Join a segment name to a directory path
    pub fn join_entry(&self, name: &str) -> Path {
        let mut s = self.0.clone();
        if !s.ends_with('/') {
            s.push('/');
        }
        s.push_str(name);
        Path(s)
    }

    /// Convert into a prefix pattern (`/dir/...`)
    pub fn to_prefix_pattern(&self) -> PathPattern {
        let mut s = self.0.trim_end_matches('/').to_string();
        s.push_str(PREFIX_PATTERN_SUFFIX);
        PathPattern(s)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// PathPattern
// ============================================================================

/// Globbing (`/a/*.json`, `/a/**`) or prefix (`/a/...`) path pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathPattern(String);

impl PathPattern {
    /// Create a path pattern, the string must start with `/`, `./` or `../`
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        Path::new(s.clone())?;
        Ok(PathPattern(s))
    }

    /// Underlying string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the pattern ends with `/...`
    pub fn is_prefix_pattern(&self) -> bool {
        self.0.ends_with(PREFIX_PATTERN_SUFFIX)
    }

    /// Whether the pattern is a globbing pattern
    pub fn is_globbing_pattern(&self) -> bool {
        !self.is_prefix_pattern()
    }

    /// Prefix matched by a prefix pattern (keeps the trailing `/`)
    pub fn prefix(&self) -> &str {
        if self.is_prefix_pattern() {
            &self.0[..self.0.len() - "...".len()]
        } else {
            &self.0
        }
    }

    /// Whether `path` matches
    ///
    /// # Panics
    ///
    /// Panics if a path tested against a globbing pattern exceeds
    /// [`MAX_TESTED_PATH_BYTE_LENGTH`].
    pub fn includes(&self, path: &Path) -> bool {
        if self.is_prefix_pattern() {
            return path.as_str().starts_with(self.prefix());
        }
        assert_tested_len(path.as_str(), MAX_TESTED_PATH_BYTE_LENGTH, "path");
        glob_match(&self.0, path.as_str())
    }

    /// Whether every path matched by `other` is matched by this pattern
    pub fn includes_pattern(&self, other: &PathPattern) -> bool {
        if self.is_prefix_pattern() {
            return other.as_str().starts_with(self.prefix());
        }
        self == other
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Glob matching where `*` and `?` stay within a segment and a `**` segment
/// spans any number of segments
fn glob_match(pattern: &str, path: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();
    match_segments(&pattern_segments, &path_segments)
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((&"**", rest)) => (0..=path.len()).any(|skip| match_segments(rest, &path[skip..])),
        Some((segment, rest)) => match path.split_first() {
            Some((first, path_rest)) => {
                match_segment(segment.as_bytes(), first.as_bytes()) && match_segments(rest, path_rest)
            }
            None => false,
        },
    }
}

fn match_segment(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.first() {
        None => text.is_empty(),
        Some(b'*') => (0..=text.len()).any(|i| match_segment(&pattern[1..], &text[i..])),
        Some(b'?') => !text.is_empty() && match_segment(&pattern[1..], &text[1..]),
        Some(b'[') => {
            let Some(close) = pattern.iter().position(|&b| b == b']') else {
                return text.first() == Some(&b'[') && match_segment(&pattern[1..], &text[1..]);
            };
            let Some(&c) = text.first() else {
                return false;
            };
            let class = &pattern[1..close];
            let (negated, class) = match class.first() {
                Some(b'!') | Some(b'^') => (true, &class[1..]),
                _ => (false, class),
            };
            let mut matched = false;
            let mut i = 0;
            while i < class.len() {
                if i + 2 < class.len() && class[i + 1] == b'-' {
                    matched |= class[i] <= c && c <= class[i + 2];
                    i += 3;
                } else {
                    matched |= class[i] == c;
                    i += 1;
                }
            }
            matched != negated && match_segment(&pattern[close + 1..], &text[1..])
        }
        Some(&b) => text.first() == Some(&b) && match_segment(&pattern[1..], &text[1..]),
    }
}

// ============================================================================
// Scheme, Host, Url
// ============================================================================

/// URL scheme without `://` (e.g. `https`, `ldb`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scheme(String);

impl Scheme {
    /// Create a scheme
    pub fn new(s: impl Into<String>) -> Self {
        Scheme(s.into())
    }

    /// Underlying string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn split_scheme(s: &str) -> Option<(&str, &str)> {
    let idx = s.find("://")?;
    let scheme = &s[..idx];
    if scheme.is_empty()
        || !scheme
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'-' || b == b'.')
    {
        return None;
    }
    Some((scheme, &s[idx + 3..]))
}

/// Scheme and authority (`https://example.com`, `ldb://main`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Host(String);

impl Host {
    /// Create a host, the string must be `scheme://authority` without path
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        match split_scheme(&s) {
            Some((_, authority)) if !authority.is_empty() && !authority.contains('/') => {
                Ok(Host(s))
            }
            _ => Err(Error::InvalidArgument(format!("invalid host: {s:?}"))),
        }
    }

    /// Underlying string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Scheme of the host
    pub fn scheme(&self) -> Scheme {
        Scheme::new(split_scheme(&self.0).map(|(s, _)| s).unwrap_or_default())
    }

    /// Build a URL from this host and an absolute path
    pub fn url_with_path(&self, path: &Path) -> Result<Url> {
        if !path.is_absolute() {
            return Err(Error::InvalidArgument(format!(
                "absolute path expected: {path}"
            )));
        }
        Url::new(format!("{}{}", self.0, path))
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Absolute URL (`scheme://authority/path?query#fragment`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Url(String);

impl Url {
    /// Create a URL, the string must have a scheme and an authority
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        match split_scheme(&s) {
            Some((_, rest)) if !rest.is_empty() && !rest.starts_with('/') => Ok(Url(s)),
            _ => Err(Error::InvalidArgument(format!("invalid URL: {s:?}"))),
        }
    }

    /// Underlying string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn authority_end(&self) -> usize {
        let start = self.0.find("://").map(|i| i + 3).unwrap_or(0);
        self.0[start..]
            .find(['/', '?', '#'])
            .map(|i| start + i)
            .unwrap_or(self.0.len())
    }

    fn path_end(&self) -> usize {
        let start = self.authority_end();
        self.0[start..]
            .find(['?', '#'])
            .map(|i| start + i)
            .unwrap_or(self.0.len())
    }

    /// Scheme of the URL
    pub fn scheme(&self) -> Scheme {
        Scheme::new(split_scheme(&self.0).map(|(s, _)| s).unwrap_or_default())
    }

    /// Scheme and authority
    pub fn host(&self) -> Host {
        Host(self.0[..self.authority_end()].to_string())
    }

    /// Path of the URL (`/` when empty)
    pub fn path(&self) -> Path {
        let path = &self.0[self.authority_end()..self.path_end()];
        if path.is_empty() {
            Path("/".to_string())
        } else {
            Path(path.to_string())
        }
    }

    /// URL with a path ending in `/`, query and fragment dropped
    pub fn to_dir_url(&self) -> Url {
        let mut s = self.0[..self.path_end()].to_string();
        if !s.ends_with('/') {
            s.push('/');
        }
        Url(s)
    }

    /// Append a `./`-relative path to a URL with a directory path
    pub fn append_relative_path(&self, rel: &Path) -> Result<Url> {
        if !rel.as_str().starts_with("./") {
            return Err(Error::InvalidArgument(format!(
                "relative path starting with './' expected: {rel}"
            )));
        }
        self.append_path(&rel.as_str()[2..])
    }

    /// Append an absolute path to a URL with a directory path
    pub fn append_absolute_path(&self, abs: &Path) -> Result<Url> {
        if !abs.is_absolute() {
            return Err(Error::InvalidArgument(format!(
                "absolute path expected: {abs}"
            )));
        }
        self.append_path(&abs.as_str()[1..])
    }

    fn append_path(&self, unprefixed: &str) -> Result<Url> {
        if !self.path().is_dir_path() {
            return Err(Error::InvalidArgument(format!(
                "paths can only be appended to a URL whose path ends with '/': {self}"
            )));
        }
        let base = &self.0[..self.path_end()];
        let mut s = base.to_string();
        if !s.ends_with('/') {
            s.push('/');
        }
        s.push_str(unprefixed);
        Ok(Url(s))
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Patterns over hosts and URLs
// ============================================================================

/// Host pattern where `*` matches one label and `**` any number of labels
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPattern(String);

impl HostPattern {
    /// Create a host pattern (`https://*.example.com`)
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        match split_scheme(&s) {
            Some((_, authority)) if !authority.is_empty() && !authority.contains('/') => {
                Ok(HostPattern(s))
            }
            _ => Err(Error::InvalidArgument(format!("invalid host pattern: {s:?}"))),
        }
    }

    /// Underlying string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `host` matches (default ports are ignored)
    pub fn includes(&self, host: &Host) -> bool {
        let (Some((p_scheme, p_auth)), Some((h_scheme, h_auth))) =
            (split_scheme(&self.0), split_scheme(host.as_str()))
        else {
            return false;
        };
        if p_scheme != h_scheme {
            return false;
        }
        let p_auth = strip_default_port(p_scheme, p_auth);
        let h_auth = strip_default_port(h_scheme, h_auth);
        let p_labels: Vec<&str> = p_auth.split('.').collect();
        let h_labels: Vec<&str> = h_auth.split('.').collect();
        match_labels(&p_labels, &h_labels)
    }

    /// Whether every host matched by `other` is matched by this pattern
    ///
    /// # Panics
    ///
    /// Panics if `other` exceeds [`MAX_TESTED_HOST_PATTERN_BYTE_LENGTH`].
    pub fn includes_pattern(&self, other: &HostPattern) -> bool {
        assert_tested_len(other.as_str(), MAX_TESTED_HOST_PATTERN_BYTE_LENGTH, "host pattern");
        if self.0.contains("**") {
            let (Some((p_scheme, p_auth)), Some((o_scheme, o_auth))) =
                (split_scheme(&self.0), split_scheme(other.as_str()))
            else {
                return false;
            };
            let p_labels: Vec<&str> = p_auth.split('.').collect();
            let o_labels: Vec<&str> = o_auth.split('.').collect();
            return p_scheme == o_scheme && match_labels(&p_labels, &o_labels);
        }
        if other.0.contains("**") {
            return false;
        }
        self == other
    }
}

fn strip_default_port<'a>(scheme: &str, authority: &'a str) -> &'a str {
    match scheme {
        "https" => authority.strip_suffix(":443").unwrap_or(authority),
        "http" => authority.strip_suffix(":80").unwrap_or(authority),
        _ => authority,
    }
}

fn match_labels(pattern: &[&str], labels: &[&str]) -> bool {
    match pattern.split_first() {
        None => labels.is_empty(),
        Some((&"**", rest)) => {
            (1..=labels.len()).any(|take| match_labels(rest, &labels[take..]))
        }
        Some((label, rest)) => match labels.split_first() {
            Some((first, labels_rest)) => {
                match_segment(label.as_bytes(), first.as_bytes()) && match_labels(rest, labels_rest)
            }
            None => false,
        },
    }
}

/// URL pattern: a prefix pattern (`https://example.com/a/...`) or an exact URL
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UrlPattern(String);

impl UrlPattern {
    /// Create a URL pattern
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        Url::new(s.clone())?;
        Ok(UrlPattern(s))
    }

    /// Underlying string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the pattern ends with `/...`
    pub fn is_prefix_pattern(&self) -> bool {
        self.0.ends_with(PREFIX_PATTERN_SUFFIX)
    }

    /// Prefix matched by a prefix pattern (keeps the trailing `/`)
    pub fn prefix(&self) -> &str {
        if self.is_prefix_pattern() {
            &self.0[..self.0.len() - "...".len()]
        } else {
            &self.0
        }
    }

    /// Whether `url` matches, query and fragment are ignored by prefix patterns
    ///
    /// # Panics
    ///
    /// Panics if `url` exceeds [`MAX_TESTED_URL_BYTE_LENGTH`].
    pub fn test(&self, url: &Url) -> bool {
        assert_tested_len(url.as_str(), MAX_TESTED_URL_BYTE_LENGTH, "URL");
        if self.is_prefix_pattern() {
            let s = url.as_str();
            let end = s.find(['?', '#']).unwrap_or(s.len());
            return s[..end].starts_with(self.prefix());
        }
        self.0 == url.as_str()
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
