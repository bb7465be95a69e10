//! Redaction tracking for interpolated credentials.
//!
//! Every sensitive value that flows into a build (credentials fetched from a
//! source, or local vars loaded without `reveal`) is recorded here under its
//! dotted name so that log writers can mask it later.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde_json::Value;

use crate::reference::{quote_segment, Reference};

/// Replacement text for masked values.
pub const REDACTED: &str = "((redacted))";

/// Visitor over tracked credentials.
pub trait TrackedVarsIterator {
    fn track(&mut self, name: &str, value: &str);
}

/// Collects tracked credentials into a map keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackedVarsMap(BTreeMap<String, String>);

impl TrackedVarsMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl TrackedVarsIterator for TrackedVarsMap {
    fn track(&mut self, name: &str, value: &str) {
        self.0.insert(name.to_string(), value.to_string());
    }
}

/// Thread-safe index of interpolated credentials.
#[derive(Debug, Default)]
pub struct CredVarsTracker {
    enabled: bool,
    interpolated: RwLock<BTreeMap<String, String>>,
}

impl CredVarsTracker {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            interpolated: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Record `value` under `reference`. Mappings and sequences are flattened so
    /// each leaf is tracked as `<name>.<key>`.
    pub fn track(&self, reference: &Reference, value: &Value) {
        if !self.enabled {
            return;
        }

        let mut leaves = Vec::new();
        flatten(reference.name(), value, &mut leaves);

        let mut interpolated = self
            .interpolated
            .write()
            .unwrap_or_else(|e| e.into_inner());
        for (name, rendered) in leaves {
            interpolated.insert(name, rendered);
        }
    }

    /// Visit every tracked credential.
    pub fn iterate(&self, iter: &mut dyn TrackedVarsIterator) {
        let interpolated = self.interpolated.read().unwrap_or_else(|e| e.into_inner());
        for (name, value) in interpolated.iter() {
            iter.track(name, value);
        }
    }

    /// Mask every tracked value occurring in `text`.
    ///
    /// Longer values are replaced first so a secret that contains another
    /// secret is masked as a whole.
    pub fn redact(&self, text: &str) -> String {
        let interpolated = self.interpolated.read().unwrap_or_else(|e| e.into_inner());
        let mut values: Vec<&str> = interpolated
            .values()
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .collect();
        values.sort_by(|a, b| b.len().cmp(&a.len()));

        let mut out = text.to_string();
        for value in values {
            if out.contains(value) {
                out = out.replace(value, REDACTED);
            }
        }
        out
    }
}

fn flatten(name: String, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten(format!("{}.{}", name, quote_segment(key)), child, out);
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                flatten(format!("{}.{}", name, idx), child, out);
            }
        }
        Value::String(s) => out.push((name, s.clone())),
        Value::Null => {}
        other => out.push((name, other.to_string())),
    }
}
