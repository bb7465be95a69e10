//! Artifacts produced by steps and consumed by later steps.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// A worker-resident object (volume, image, stream) a step produced.
pub trait Artifact: Send + Sync + fmt::Debug {
    /// Worker-unique handle of the underlying object.
    fn handle(&self) -> &str;

    /// Worker the artifact lives on.
    fn worker_name(&self) -> &str;
}

/// Name an artifact is registered under, e.g. the `get` step's name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactName(pub String);

impl ArtifactName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Name to artifact registry for one build.
#[derive(Debug, Default)]
pub struct ArtifactRepository {
    artifacts: RwLock<BTreeMap<ArtifactName, Arc<dyn Artifact>>>,
}

impl ArtifactRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `artifact` under `name`, replacing any earlier registration.
    pub fn register_artifact(&self, name: ArtifactName, artifact: Arc<dyn Artifact>) {
        self.artifacts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, artifact);
    }

    pub fn artifact_for(&self, name: &ArtifactName) -> Option<Arc<dyn Artifact>> {
        self.artifacts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Snapshot of every registered artifact.
    pub fn as_map(&self) -> BTreeMap<ArtifactName, Arc<dyn Artifact>> {
        self.artifacts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
