//! Variable sources.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::debug;

use crate::error::VarsResult;
use crate::reference::Reference;
use crate::tracker::{CredVarsTracker, TrackedVarsIterator};

/// A source of variable values.
pub trait Variables: Send + Sync {
    /// Look up `reference`, returning `None` when the variable is not defined.
    fn get(&self, reference: &Reference) -> VarsResult<Option<Value>>;

    /// Names of all variables this source can answer for.
    fn list(&self) -> VarsResult<Vec<Reference>>;
}

/// Fixed in-memory variables, keyed by path. The source name is ignored.
#[derive(Debug, Clone, Default)]
pub struct StaticVariables(BTreeMap<String, Value>);

impl StaticVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(path.into(), value.into());
        self
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for StaticVariables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl Variables for StaticVariables {
    fn get(&self, reference: &Reference) -> VarsResult<Option<Value>> {
        match self.0.get(&reference.path) {
            Some(value) => reference.traverse(value.clone()).map(Some),
            None => Ok(None),
        }
    }

    fn list(&self) -> VarsResult<Vec<Reference>> {
        Ok(self.0.keys().map(Reference::new).collect())
    }
}

/// Variables visible to one build: credentials from a parent source layered
/// under build-local vars (source `.`).
///
/// Credentials are tracked for redaction whenever they are resolved; local
/// vars are tracked only when set with `redact`.
pub struct BuildVariables {
    parent: Arc<dyn Variables>,
    local: RwLock<BTreeMap<String, Value>>,
    tracker: CredVarsTracker,
}

impl std::fmt::Debug for BuildVariables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildVariables")
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl BuildVariables {
    pub fn new(parent: Arc<dyn Variables>, enable_redaction: bool) -> Self {
        Self {
            parent,
            local: RwLock::new(BTreeMap::new()),
            tracker: CredVarsTracker::new(enable_redaction),
        }
    }

    /// Build variables without any credential source.
    pub fn empty(enable_redaction: bool) -> Self {
        Self::new(Arc::new(StaticVariables::new()), enable_redaction)
    }

    /// Store a build-local var.
    pub fn set_local(&self, name: &str, value: Value, redact: bool) {
        if redact {
            self.tracker.track(&Reference::local(name), &value);
        }
        debug!(var = name, redact, "setting local var");
        self.local
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), value);
    }

    /// Visit every credential that has been interpolated or marked sensitive.
    pub fn iterate_interpolated_creds(&self, iter: &mut dyn TrackedVarsIterator) {
        self.tracker.iterate(iter);
    }

    /// Mask tracked credentials in `text`.
    pub fn redact(&self, text: &str) -> String {
        self.tracker.redact(text)
    }

    pub fn redaction_enabled(&self) -> bool {
        self.tracker.enabled()
    }
}

impl Variables for BuildVariables {
    fn get(&self, reference: &Reference) -> VarsResult<Option<Value>> {
        if reference.is_local() {
            let local = self.local.read().unwrap_or_else(|e| e.into_inner());
            return match local.get(&reference.path) {
                Some(value) => reference.traverse(value.clone()).map(Some),
                None => Ok(None),
            };
        }

        let value = self.parent.get(reference)?;
        if let Some(value) = &value {
            self.tracker.track(reference, value);
        }
        Ok(value)
    }

    fn list(&self) -> VarsResult<Vec<Reference>> {
        let mut refs = self.parent.list()?;
        let local = self.local.read().unwrap_or_else(|e| e.into_inner());
        refs.extend(local.keys().map(Reference::local));
        Ok(refs)
    }
}
