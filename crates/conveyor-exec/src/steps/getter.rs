//! Resource fetching with cache reuse.
//!
//! Fetches of the same resource cache are serialized within the process. A
//! worker that already holds an initialized volume for the cache skips the
//! fetch entirely.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::{ResourceCacheFactory, UsedResourceCache};
use crate::context::ExecContext;
use crate::error::ExecError;
use crate::metadata::{ContainerMetadata, ContainerOwner};
use crate::resource::{Params, Source, Version, VersionResult};
use crate::runtime::{ContainerSpec, ProcessIo, ProcessSpec, SharedBuffer, Volume, Worker};

/// Request written to the resource script's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInput {
    pub source: Source,
    pub params: Params,
    pub version: Version,
}

/// Everything needed to run one fetch on a selected worker.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub owner: ContainerOwner,
    pub metadata: ContainerMetadata,
    pub container_spec: ContainerSpec,
    pub process_spec: ProcessSpec,
    pub input: ResourceInput,
    /// Mount path of the fetched resource inside the container.
    pub resource_dir: String,
}

/// Outcome of a fetch.
#[derive(Debug, Clone)]
pub struct GetResult {
    pub exit_status: i32,
    pub version_result: VersionResult,
    /// Volume holding the resource; set whenever `exit_status` is 0.
    pub volume: Option<Arc<dyn Volume>>,
}

/// Runs resource fetches.
pub struct Getter {
    cache_factory: Arc<dyn ResourceCacheFactory>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Getter {
    pub fn new(cache_factory: Arc<dyn ResourceCacheFactory>) -> Self {
        Self {
            cache_factory,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Drop `lock`, forgetting the key once nobody else holds or waits on it.
    fn release(&self, key: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        drop(lock);
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
    }

    /// Fetch `cache` on `worker`, reusing an existing cache volume when present.
    ///
    /// Returns the context's error if `ctx` finishes before the fetch does.
    pub async fn get(
        &self,
        ctx: &ExecContext,
        worker: &dyn Worker,
        request: &FetchRequest,
        cache: &UsedResourceCache,
        stderr: Box<dyn Write + Send>,
    ) -> anyhow::Result<GetResult> {
        let lock = self.lock_for(&cache.key);
        let res = self.get_locked(ctx, &lock, worker, request, cache, stderr).await;
        self.release(&cache.key, lock);
        res
    }

    async fn get_locked(
        &self,
        ctx: &ExecContext,
        lock: &tokio::sync::Mutex<()>,
        worker: &dyn Worker,
        request: &FetchRequest,
        cache: &UsedResourceCache,
        stderr: Box<dyn Write + Send>,
    ) -> anyhow::Result<GetResult> {
        let _guard = ctx.run(lock.lock()).await?;

        if let Some(volume) = worker.find_resource_cache_volume(ctx, cache).await? {
            info!(cache_id = cache.id, worker = worker.name(), "found initialized resource cache");
            let metadata = self.cache_factory.resource_cache_metadata(cache).await?;
            return Ok(GetResult {
                exit_status: 0,
                version_result: VersionResult {
                    version: cache.version.clone(),
                    metadata,
                },
                volume: Some(volume),
            });
        }

        let container = worker
            .find_or_create_container(ctx, &request.owner, &request.metadata, &request.container_spec)
            .await
            .context("find or create container")?;

        let stdout = SharedBuffer::new();
        let io = ProcessIo {
            stdin: serde_json::to_vec(&request.input)?,
            stdout: Box::new(stdout.clone()),
            stderr,
        };

        debug!(container = container.handle(), path = %request.process_spec.path, "running resource script");
        let result = ctx
            .run(container.run(ctx, request.process_spec.clone(), io))
            .await?
            .context("run resource script")?;

        if result.exit_status != 0 {
            return Ok(GetResult {
                exit_status: result.exit_status,
                version_result: VersionResult::default(),
                volume: None,
            });
        }

        let version_result: VersionResult = serde_json::from_slice(&stdout.contents())
            .map_err(|e| ExecError::MalformedVersionResult {
                cause: e.to_string(),
            })?;

        let volume = container
            .volume_mounts()
            .into_iter()
            .find(|mount| mount.mount_path == request.resource_dir)
            .map(|mount| mount.volume)
            .ok_or_else(|| ExecError::NoResourceMount {
                path: request.resource_dir.clone(),
            })?;

        volume.initialize_resource_cache(ctx, cache).await?;
        self.cache_factory
            .update_resource_cache_metadata(cache, &version_result.metadata)
            .await?;

        Ok(GetResult {
            exit_status: 0,
            version_result,
            volume: Some(volume),
        })
    }
}
