//! Resource caches.
//!
//! A cache identifies the contents of one fetched resource version. Its key is
//! derived from everything that determines those contents: the type, the
//! version, the source, the params and the custom types the type depends on.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::resource::{MetadataField, Params, Source, Version, VersionedResourceTypes};

/// A resource cache claimed by a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsedResourceCache {
    pub id: i64,
    /// `sha256:<hex>` over the cache inputs.
    pub key: String,
    pub resource_type: String,
    pub version: Version,
}

/// Who keeps a resource cache alive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceCacheUser {
    Build { build_id: i64 },
}

impl ResourceCacheUser {
    pub fn for_build(build_id: i64) -> Self {
        Self::Build { build_id }
    }
}

#[async_trait]
pub trait ResourceCacheFactory: Send + Sync {
    async fn find_or_create_resource_cache(
        &self,
        user: &ResourceCacheUser,
        resource_type: &str,
        version: &Version,
        source: &Source,
        params: &Params,
        types: &VersionedResourceTypes,
    ) -> anyhow::Result<UsedResourceCache>;

    /// Metadata recorded when the cache was first fetched.
    async fn resource_cache_metadata(
        &self,
        cache: &UsedResourceCache,
    ) -> anyhow::Result<Vec<MetadataField>>;

    async fn update_resource_cache_metadata(
        &self,
        cache: &UsedResourceCache,
        metadata: &[MetadataField],
    ) -> anyhow::Result<()>;
}

/// Deterministic key of a resource cache.
///
/// Only the chain entries reachable from `resource_type` contribute, each with
/// its name, type, source and version.
pub fn cache_key(
    resource_type: &str,
    version: &Version,
    source: &Source,
    params: &Params,
    types: &VersionedResourceTypes,
) -> anyhow::Result<String> {
    let mut chain = Vec::new();
    let mut remaining = types.clone();
    let mut current = resource_type.to_string();
    while let Some(entry) = remaining.lookup(&current).cloned() {
        chain.push(json!({
            "name": entry.resource_type.name,
            "type": entry.resource_type.type_name,
            "source": entry.resource_type.source,
            "version": entry.version,
        }));
        remaining = remaining.without(&current);
        current = entry.resource_type.type_name;
    }

    let inputs = json!({
        "type": resource_type,
        "version": version,
        "source": source,
        "params": params,
        "types": chain,
    });
    let bytes = serde_jcs::to_vec(&inputs)?;
    Ok(format!("sha256:{:x}", Sha256::digest(&bytes)))
}

#[derive(Debug, Default)]
struct CacheTable {
    next_id: i64,
    caches: HashMap<String, UsedResourceCache>,
    users: HashMap<i64, BTreeSet<ResourceCacheUser>>,
    metadata: HashMap<i64, Vec<MetadataField>>,
}

/// Process-local cache factory.
#[derive(Debug, Default)]
pub struct InMemoryResourceCacheFactory {
    table: Mutex<CacheTable>,
}

impl InMemoryResourceCacheFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Users currently holding `cache`.
    pub fn users(&self, cache: &UsedResourceCache) -> Vec<ResourceCacheUser> {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table
            .users
            .get(&cache.id)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ResourceCacheFactory for InMemoryResourceCacheFactory {
    async fn find_or_create_resource_cache(
        &self,
        user: &ResourceCacheUser,
        resource_type: &str,
        version: &Version,
        source: &Source,
        params: &Params,
        types: &VersionedResourceTypes,
    ) -> anyhow::Result<UsedResourceCache> {
        let key = cache_key(resource_type, version, source, params, types)?;

        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let cache = match table.caches.get(&key) {
            Some(existing) => existing.clone(),
            None => {
                table.next_id += 1;
                let cache = UsedResourceCache {
                    id: table.next_id,
                    key: key.clone(),
                    resource_type: resource_type.to_string(),
                    version: version.clone(),
                };
                debug!(cache_id = cache.id, key = %key, "created resource cache");
                table.caches.insert(key, cache.clone());
                cache
            }
        };
        table.users.entry(cache.id).or_default().insert(user.clone());
        Ok(cache)
    }

    async fn resource_cache_metadata(
        &self,
        cache: &UsedResourceCache,
    ) -> anyhow::Result<Vec<MetadataField>> {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        Ok(table.metadata.get(&cache.id).cloned().unwrap_or_default())
    }

    async fn update_resource_cache_metadata(
        &self,
        cache: &UsedResourceCache,
        metadata: &[MetadataField],
    ) -> anyhow::Result<()> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.metadata.insert(cache.id, metadata.to_vec());
        Ok(())
    }
}
