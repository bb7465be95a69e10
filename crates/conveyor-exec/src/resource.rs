//! Resource and resource-type data exchanged with fetch scripts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A resource version, e.g. `{"ref": "abc123"}`.
pub type Version = BTreeMap<String, String>;

/// Resource source configuration.
pub type Source = Map<String, Value>;

/// Resource fetch parameters.
pub type Params = Map<String, Value>;

/// Worker tags.
pub type Tags = Vec<String>;

/// One `name: value` pair of version metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataField {
    pub name: String,
    pub value: String,
}

/// What a resource script prints on stdout after fetching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionResult {
    #[serde(default)]
    pub version: Version,
    #[serde(default)]
    pub metadata: Vec<MetadataField>,
}

/// A pipeline-defined resource type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceType {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub source: Source,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Params,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Tags,
}

/// A resource type pinned to the version its image is fetched at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionedResourceType {
    #[serde(flatten)]
    pub resource_type: ResourceType,
    #[serde(default)]
    pub version: Version,
}

/// The chain of custom types a step may use. Entries refer to each other by
/// `type`; a name not in the chain is a base type provided by workers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionedResourceTypes(pub Vec<VersionedResourceType>);

impl VersionedResourceTypes {
    pub fn lookup(&self, name: &str) -> Option<&VersionedResourceType> {
        self.0.iter().find(|t| t.resource_type.name == name)
    }

    /// The chain without any entry named `name`.
    pub fn without(&self, name: &str) -> Self {
        Self(
            self.0
                .iter()
                .filter(|t| t.resource_type.name != name)
                .cloned()
                .collect(),
        )
    }

    /// Follow `type_name` down the chain to the worker-provided base type.
    ///
    /// Each visited entry is removed before descending, so a cyclic chain
    /// resolves to the name that closes the cycle.
    pub fn base(&self, type_name: &str) -> String {
        let mut remaining = self.clone();
        let mut current = type_name.to_string();
        while let Some(entry) = remaining.lookup(&current) {
            let next = entry.resource_type.type_name.clone();
            remaining = remaining.without(&current);
            current = next;
        }
        current
    }

    pub fn iter(&self) -> impl Iterator<Item = &VersionedResourceType> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<VersionedResourceType> for VersionedResourceTypes {
    fn from_iter<I: IntoIterator<Item = VersionedResourceType>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Descriptor of a custom type's image, handed to image fetching.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageResource {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub source: Source,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Tags,
}
