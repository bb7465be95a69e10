//! Worker runtime seams: pools, workers, containers, volumes.
//!
//! Implementations live outside this crate; steps only talk to these traits.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::artifact::Artifact;
use crate::cache::UsedResourceCache;
use crate::context::ExecContext;
use crate::metadata::{ContainerMetadata, ContainerOwner, ContainerType};
use crate::resource::Tags;

/// Constraints a worker must satisfy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Base resource type the worker must provide.
    pub resource_type: String,
    pub team_id: i64,
    #[serde(default)]
    pub tags: Tags,
}

/// Where a container's root filesystem comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    /// Worker-provided base resource type image.
    #[serde(default)]
    pub resource_type: String,
    /// Handle of a volume holding a fetched image.
    #[serde(default)]
    pub image_volume: String,
    #[serde(default)]
    pub privileged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image_spec: ImageSpec,
    pub team_id: i64,
    pub container_type: ContainerType,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    pub dir: String,
    /// Bind-mount the worker's CA certificates.
    pub certs_bind_mount: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub id: String,
    pub path: String,
    pub args: Vec<String>,
}

/// Streams attached to a process.
pub struct ProcessIo {
    pub stdin: Vec<u8>,
    pub stdout: Box<dyn Write + Send>,
    pub stderr: Box<dyn Write + Send>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessResult {
    pub exit_status: i32,
}

#[derive(Debug, Clone)]
pub struct VolumeMount {
    pub volume: Arc<dyn Volume>,
    pub mount_path: String,
}

/// A worker volume.
#[async_trait]
pub trait Volume: Artifact {
    /// Mark the volume as holding the contents of `cache`.
    async fn initialize_resource_cache(
        &self,
        ctx: &ExecContext,
        cache: &UsedResourceCache,
    ) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Container: Send + Sync {
    fn handle(&self) -> &str;

    /// Run a process to completion. Implementations return promptly with the
    /// context's error once `ctx` is done.
    async fn run(
        &self,
        ctx: &ExecContext,
        spec: ProcessSpec,
        io: ProcessIo,
    ) -> anyhow::Result<ProcessResult>;

    fn volume_mounts(&self) -> Vec<VolumeMount>;
}

#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    async fn find_or_create_container(
        &self,
        ctx: &ExecContext,
        owner: &ContainerOwner,
        metadata: &ContainerMetadata,
        spec: &ContainerSpec,
    ) -> anyhow::Result<Arc<dyn Container>>;

    /// An initialized volume holding `cache`, if this worker has one.
    async fn find_resource_cache_volume(
        &self,
        ctx: &ExecContext,
        cache: &UsedResourceCache,
    ) -> anyhow::Result<Option<Arc<dyn Volume>>>;
}

#[async_trait]
pub trait Pool: Send + Sync {
    /// The worker already running `owner`'s container, or a newly selected
    /// one satisfying `worker_spec`.
    async fn find_or_select_worker(
        &self,
        ctx: &ExecContext,
        owner: &ContainerOwner,
        container_spec: &ContainerSpec,
        worker_spec: &WorkerSpec,
    ) -> anyhow::Result<Arc<dyn Worker>>;
}

#[async_trait]
pub trait ArtifactClient: Send + Sync {
    /// Open `path` inside `artifact` for reading.
    async fn stream_file_from_artifact(
        &self,
        ctx: &ExecContext,
        artifact: &dyn Artifact,
        path: &str,
    ) -> anyhow::Result<Box<dyn AsyncRead + Send + Unpin>>;
}

/// A cloneable in-memory writer.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.contents()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
