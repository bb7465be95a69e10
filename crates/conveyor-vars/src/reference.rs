//! Variable references.
//!
//! A reference names a variable inside a credential source and optionally
//! drills into fields of its value:
//!
//! ```text
//! path                  -> default source
//! vault:path.field      -> named source "vault", field "field"
//! .:local-var           -> build-local scope
//! "dotted.path".field   -> quoted segments may contain '.' or ':'
//! ```

use std::fmt;

use serde_json::Value;

use crate::error::{VarsError, VarsResult};

/// Source name of the build-local scope.
pub const LOCAL_SOURCE: &str = ".";

/// A parsed variable reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Reference {
    /// Credential source; empty for the default source.
    pub source: String,
    /// Variable name within the source.
    pub path: String,
    /// Fields to traverse inside the value.
    pub fields: Vec<String>,
}

impl Reference {
    /// Reference to `path` in the default source.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            source: String::new(),
            path: path.into(),
            fields: Vec::new(),
        }
    }

    /// Reference to `path` in the build-local scope.
    pub fn local(path: impl Into<String>) -> Self {
        Self::new(path).with_source(LOCAL_SOURCE)
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    /// Whether the reference points into the build-local scope.
    pub fn is_local(&self) -> bool {
        self.source == LOCAL_SOURCE
    }

    /// Parse `[source:]path[.field...]`.
    pub fn parse(raw: &str) -> VarsResult<Self> {
        let raw = raw.trim();
        let invalid = |reason: &str| VarsError::InvalidReference {
            reference: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("empty reference"));
        }

        let (source, rest) = match find_unquoted(raw, ':') {
            Some(idx) => (&raw[..idx], &raw[idx + 1..]),
            None => ("", raw),
        };

        let segments = split_segments(rest).map_err(|reason| invalid(reason))?;
        let mut segments = segments.into_iter();
        let path = segments
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| invalid("missing var name"))?;

        Ok(Self {
            source: source.to_string(),
            path,
            fields: segments.collect(),
        })
    }

    /// The dotted name without the source prefix, as used for redaction tracking.
    pub fn name(&self) -> String {
        let mut name = quote_segment(&self.path);
        for field in &self.fields {
            name.push('.');
            name.push_str(&quote_segment(field));
        }
        name
    }

    /// Walk `fields` into `value`.
    pub fn traverse(&self, value: Value) -> VarsResult<Value> {
        let mut current = value;
        for field in &self.fields {
            current = match current {
                Value::Object(mut map) => {
                    map.remove(field).ok_or_else(|| VarsError::MissingField {
                        reference: self.to_string(),
                        field: field.clone(),
                    })?
                }
                _ => {
                    return Err(VarsError::MissingField {
                        reference: self.to_string(),
                        field: field.clone(),
                    })
                }
            };
        }
        Ok(current)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            write!(f, "{}", self.name())
        } else {
            write!(f, "{}:{}", self.source, self.name())
        }
    }
}

pub(crate) fn quote_segment(segment: &str) -> String {
    if segment.contains('.') || segment.contains(':') {
        format!("\"{}\"", segment)
    } else {
        segment.to_string()
    }
}

fn find_unquoted(raw: &str, needle: char) -> Option<usize> {
    let mut in_quote = false;
    for (idx, c) in raw.char_indices() {
        match c {
            '"' => in_quote = !in_quote,
            c if c == needle && !in_quote => return Some(idx),
            _ => {}
        }
    }
    None
}

fn split_segments(raw: &str) -> Result<Vec<String>, &'static str> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;

    for c in raw.chars() {
        match c {
            '"' => in_quote = !in_quote,
            '.' if !in_quote => {
                if current.is_empty() {
                    return Err("empty path segment");
                }
                segments.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }

    if in_quote {
        return Err("unterminated quote");
    }
    if current.is_empty() {
        return Err("empty path segment");
    }
    segments.push(current);
    Ok(segments)
}
