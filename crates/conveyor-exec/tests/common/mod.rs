//! Hand-written fakes of the worker runtime and delegates.
#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use conveyor_exec::trace::{self, BuildSpan};
use conveyor_exec::{
    Artifact, ArtifactClient, InMemoryResourceCacheFactory, MetadataField, Params,
    ResourceCacheFactory, ResourceCacheUser, Source, Version, BuildStepDelegate, BuildStepDelegateFactory, Container,
    ContainerMetadata, ContainerOwner, ContainerSpec, ContextError, ExecContext,
    GetDelegate, GetDelegateFactory, GetPlan, ImageResource, ImageSpec, Plan, PlanId, Pool,
    ProcessIo, ProcessResult, ProcessSpec, RunState, SharedBuffer, Step, Stepper,
    UsedResourceCache, VersionResult, VersionedResourceTypes, Volume, VolumeMount, Worker,
    WorkerSpec,
};
use conveyor_vars::StaticVariables;
use tokio::io::AsyncRead;
use tokio::time::Instant;

pub fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Stepper for states whose steps never build children.
pub struct NoopStepper;

impl Stepper for NoopStepper {
    fn step_for(&self, plan: &Plan) -> anyhow::Result<Arc<dyn Step>> {
        anyhow::bail!("no stepper for plan {}", plan.id)
    }
}

pub fn run_state(creds: StaticVariables, enable_redaction: bool) -> RunState {
    RunState::new(Arc::new(NoopStepper), Arc::new(creds), enable_redaction)
}

// ---------------------------------------------------------------------------
// Volumes and containers
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FakeVolume {
    pub handle: String,
    pub worker: String,
    pub initialized: Mutex<Vec<i64>>,
}

impl FakeVolume {
    pub fn new(handle: &str) -> Arc<Self> {
        Arc::new(Self {
            handle: handle.to_string(),
            worker: "worker".to_string(),
            initialized: Mutex::new(Vec::new()),
        })
    }

    pub fn holds(&self, cache: &UsedResourceCache) -> bool {
        lock(&self.initialized).contains(&cache.id)
    }
}

impl Artifact for FakeVolume {
    fn handle(&self) -> &str {
        &self.handle
    }

    fn worker_name(&self) -> &str {
        &self.worker
    }
}

#[async_trait]
impl Volume for FakeVolume {
    async fn initialize_resource_cache(
        &self,
        _ctx: &ExecContext,
        cache: &UsedResourceCache,
    ) -> anyhow::Result<()> {
        lock(&self.initialized).push(cache.id);
        Ok(())
    }
}

/// What a fake process does when run.
#[derive(Debug, Clone, Default)]
pub struct ProcessStub {
    /// Written to stdout as JSON.
    pub output: Option<VersionResult>,
    /// Written to stdout verbatim, after `output`.
    pub raw_stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_status: i32,
    pub err: Option<String>,
    /// Sleep this long first, giving up when the context finishes.
    pub delay: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ProcessRun {
    pub spec: ProcessSpec,
    pub stdin: Vec<u8>,
    pub traceparent_in_ctx: bool,
}

pub struct FakeContainer {
    pub handle: String,
    pub stub: Mutex<ProcessStub>,
    /// Mounted volumes and their mount paths.
    pub volumes: Vec<(Arc<FakeVolume>, String)>,
    pub runs: Mutex<Vec<ProcessRun>>,
}

impl FakeContainer {
    pub fn new(volumes: Vec<(Arc<FakeVolume>, String)>) -> Arc<Self> {
        Arc::new(Self {
            handle: "container".to_string(),
            stub: Mutex::new(ProcessStub::default()),
            volumes,
            runs: Mutex::new(Vec::new()),
        })
    }

    pub fn set_stub(&self, stub: ProcessStub) {
        *lock(&self.stub) = stub;
    }

    pub fn runs(&self) -> Vec<ProcessRun> {
        lock(&self.runs).clone()
    }
}

#[async_trait]
impl Container for FakeContainer {
    fn handle(&self) -> &str {
        &self.handle
    }

    async fn run(
        &self,
        ctx: &ExecContext,
        spec: ProcessSpec,
        mut io: ProcessIo,
    ) -> anyhow::Result<ProcessResult> {
        let stub = lock(&self.stub).clone();
        lock(&self.runs).push(ProcessRun {
            spec,
            stdin: io.stdin.clone(),
            traceparent_in_ctx: ctx.span().is_some(),
        });

        if let Some(delay) = stub.delay {
            if let Err(err) = ctx.run(tokio::time::sleep(delay)).await {
                return Err(anyhow::Error::new(err).context("wrapped"));
            }
        }
        if let Some(err) = stub.err {
            anyhow::bail!(err);
        }

        if let Some(output) = &stub.output {
            io.stdout.write_all(&serde_json::to_vec(output)?)?;
        }
        if let Some(raw) = &stub.raw_stdout {
            io.stdout.write_all(raw.as_bytes())?;
        }
        if let Some(stderr) = &stub.stderr {
            io.stderr.write_all(stderr.as_bytes())?;
        }
        io.stderr.flush()?;

        Ok(ProcessResult {
            exit_status: stub.exit_status,
        })
    }

    fn volume_mounts(&self) -> Vec<VolumeMount> {
        self.volumes
            .iter()
            .map(|(volume, path)| VolumeMount {
                volume: volume.clone(),
                mount_path: path.clone(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Resource caches
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CacheCall {
    pub user: ResourceCacheUser,
    pub resource_type: String,
    pub version: Version,
    pub source: Source,
    pub params: Params,
    pub types: VersionedResourceTypes,
}

/// In-memory cache factory that records what it was asked for.
#[derive(Default)]
pub struct RecordingCacheFactory {
    pub inner: InMemoryResourceCacheFactory,
    pub calls: Mutex<Vec<CacheCall>>,
    pub err: Mutex<Option<String>>,
}

impl RecordingCacheFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<CacheCall> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ResourceCacheFactory for RecordingCacheFactory {
    async fn find_or_create_resource_cache(
        &self,
        user: &ResourceCacheUser,
        resource_type: &str,
        version: &Version,
        source: &Source,
        params: &Params,
        types: &VersionedResourceTypes,
    ) -> anyhow::Result<UsedResourceCache> {
        lock(&self.calls).push(CacheCall {
            user: user.clone(),
            resource_type: resource_type.to_string(),
            version: version.clone(),
            source: source.clone(),
            params: params.clone(),
            types: types.clone(),
        });
        if let Some(err) = lock(&self.err).clone() {
            anyhow::bail!(err);
        }
        self.inner
            .find_or_create_resource_cache(user, resource_type, version, source, params, types)
            .await
    }

    async fn resource_cache_metadata(
        &self,
        cache: &UsedResourceCache,
    ) -> anyhow::Result<Vec<MetadataField>> {
        self.inner.resource_cache_metadata(cache).await
    }

    async fn update_resource_cache_metadata(
        &self,
        cache: &UsedResourceCache,
        metadata: &[MetadataField],
    ) -> anyhow::Result<()> {
        self.inner.update_resource_cache_metadata(cache, metadata).await
    }
}

// ---------------------------------------------------------------------------
// Workers and pools
// ---------------------------------------------------------------------------

pub struct FakeWorker {
    pub name: String,
    pub container: Arc<FakeContainer>,
    pub created: Mutex<Vec<(ContainerOwner, ContainerMetadata, ContainerSpec)>>,
}

impl FakeWorker {
    pub fn new(container: Arc<FakeContainer>) -> Arc<Self> {
        Arc::new(Self {
            name: "worker".to_string(),
            container,
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn created(&self) -> Vec<(ContainerOwner, ContainerMetadata, ContainerSpec)> {
        lock(&self.created).clone()
    }

    pub fn container_spec(&self) -> Option<ContainerSpec> {
        self.created().last().map(|(_, _, spec)| spec.clone())
    }
}

#[async_trait]
impl Worker for FakeWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_or_create_container(
        &self,
        _ctx: &ExecContext,
        owner: &ContainerOwner,
        metadata: &ContainerMetadata,
        spec: &ContainerSpec,
    ) -> anyhow::Result<Arc<dyn Container>> {
        lock(&self.created).push((owner.clone(), metadata.clone(), spec.clone()));
        Ok(self.container.clone())
    }

    async fn find_resource_cache_volume(
        &self,
        _ctx: &ExecContext,
        cache: &UsedResourceCache,
    ) -> anyhow::Result<Option<Arc<dyn Volume>>> {
        Ok(self
            .container
            .volumes
            .iter()
            .find(|(volume, _)| volume.holds(cache))
            .map(|(volume, _)| volume.clone() as Arc<dyn Volume>))
    }
}

#[derive(Debug, Clone)]
pub struct PoolCall {
    pub deadline: Option<Instant>,
    pub owner: ContainerOwner,
    pub container_spec: ContainerSpec,
    pub worker_spec: WorkerSpec,
}

pub struct FakePool {
    pub worker: Arc<FakeWorker>,
    pub err: Mutex<Option<String>>,
    pub calls: Mutex<Vec<PoolCall>>,
}

impl FakePool {
    pub fn new(worker: Arc<FakeWorker>) -> Arc<Self> {
        Arc::new(Self {
            worker,
            err: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_with(&self, message: &str) {
        *lock(&self.err) = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<PoolCall> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl Pool for FakePool {
    async fn find_or_select_worker(
        &self,
        ctx: &ExecContext,
        owner: &ContainerOwner,
        container_spec: &ContainerSpec,
        worker_spec: &WorkerSpec,
    ) -> anyhow::Result<Arc<dyn Worker>> {
        lock(&self.calls).push(PoolCall {
            deadline: ctx.deadline(),
            owner: owner.clone(),
            container_spec: container_spec.clone(),
            worker_spec: worker_spec.clone(),
        });
        if let Some(err) = lock(&self.err).clone() {
            anyhow::bail!(err);
        }
        Ok(self.worker.clone())
    }
}

// ---------------------------------------------------------------------------
// Delegates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FetchImageCall {
    pub image: ImageResource,
    pub types: VersionedResourceTypes,
    pub privileged: bool,
}

#[derive(Default)]
pub struct FakeGetDelegate {
    pub stdout: SharedBuffer,
    pub stderr: SharedBuffer,
    pub initializing: AtomicUsize,
    pub starting: AtomicUsize,
    pub selected_workers: Mutex<Vec<String>>,
    pub errored: Mutex<Vec<String>>,
    pub finished: Mutex<Vec<(i32, VersionResult)>>,
    pub updated_versions: Mutex<Vec<(GetPlan, VersionResult)>>,
    pub fetch_image_calls: Mutex<Vec<FetchImageCall>>,
    pub fetched_image: Mutex<ImageSpec>,
}

impl FakeGetDelegate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn errored(&self) -> Vec<String> {
        lock(&self.errored).clone()
    }

    pub fn finished(&self) -> Vec<(i32, VersionResult)> {
        lock(&self.finished).clone()
    }

    pub fn updated_versions(&self) -> Vec<(GetPlan, VersionResult)> {
        lock(&self.updated_versions).clone()
    }

    pub fn fetch_image_calls(&self) -> Vec<FetchImageCall> {
        lock(&self.fetch_image_calls).clone()
    }

    pub fn selected_workers(&self) -> Vec<String> {
        lock(&self.selected_workers).clone()
    }
}

#[async_trait]
impl GetDelegate for FakeGetDelegate {
    fn stdout(&self) -> Box<dyn Write + Send> {
        Box::new(self.stdout.clone())
    }

    fn stderr(&self) -> Box<dyn Write + Send> {
        Box::new(self.stderr.clone())
    }

    fn start_span(
        &self,
        ctx: &ExecContext,
        component: &str,
        attrs: &[(&str, &str)],
    ) -> (ExecContext, BuildSpan) {
        trace::start_span(ctx, component, attrs)
    }

    fn initializing(&self) {
        self.initializing.fetch_add(1, Ordering::SeqCst);
    }

    fn starting(&self) {
        self.starting.fetch_add(1, Ordering::SeqCst);
    }

    fn finished(&self, exit_status: i32, result: &VersionResult) {
        lock(&self.finished).push((exit_status, result.clone()));
    }

    fn selected_worker(&self, worker_name: &str) {
        lock(&self.selected_workers).push(worker_name.to_string());
    }

    fn errored(&self, message: &str) {
        lock(&self.errored).push(message.to_string());
    }

    async fn fetch_image(
        &self,
        _ctx: &ExecContext,
        image: ImageResource,
        types: VersionedResourceTypes,
        privileged: bool,
    ) -> anyhow::Result<ImageSpec> {
        lock(&self.fetch_image_calls).push(FetchImageCall {
            image,
            types,
            privileged,
        });
        Ok(lock(&self.fetched_image).clone())
    }

    fn update_version(&self, plan: &GetPlan, result: &VersionResult) {
        lock(&self.updated_versions).push((plan.clone(), result.clone()));
    }
}

pub struct FakeGetDelegateFactory(pub Arc<FakeGetDelegate>);

impl GetDelegateFactory for FakeGetDelegateFactory {
    fn get_delegate(&self, _state: &RunState, _plan_id: &PlanId) -> Arc<dyn GetDelegate> {
        self.0.clone()
    }
}

#[derive(Default)]
pub struct FakeBuildStepDelegate {
    pub stdout: SharedBuffer,
    pub stderr: SharedBuffer,
    pub initializing: AtomicUsize,
    pub starting: AtomicUsize,
    pub finished: Mutex<Vec<bool>>,
    pub errored: Mutex<Vec<String>>,
}

impl FakeBuildStepDelegate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn finished(&self) -> Vec<bool> {
        lock(&self.finished).clone()
    }
}

#[async_trait]
impl BuildStepDelegate for FakeBuildStepDelegate {
    fn stdout(&self) -> Box<dyn Write + Send> {
        Box::new(self.stdout.clone())
    }

    fn stderr(&self) -> Box<dyn Write + Send> {
        Box::new(self.stderr.clone())
    }

    fn start_span(
        &self,
        ctx: &ExecContext,
        component: &str,
        attrs: &[(&str, &str)],
    ) -> (ExecContext, BuildSpan) {
        trace::start_span(ctx, component, attrs)
    }

    fn initializing(&self) {
        self.initializing.fetch_add(1, Ordering::SeqCst);
    }

    fn starting(&self) {
        self.starting.fetch_add(1, Ordering::SeqCst);
    }

    fn finished(&self, succeeded: bool) {
        lock(&self.finished).push(succeeded);
    }

    fn selected_worker(&self, _worker_name: &str) {}

    fn errored(&self, message: &str) {
        lock(&self.errored).push(message.to_string());
    }

    async fn fetch_image(
        &self,
        _ctx: &ExecContext,
        image: ImageResource,
        _types: VersionedResourceTypes,
        _privileged: bool,
    ) -> anyhow::Result<ImageSpec> {
        anyhow::bail!("unexpected image fetch for {}", image.name)
    }
}

pub struct FakeBuildStepDelegateFactory(pub Arc<FakeBuildStepDelegate>);

impl BuildStepDelegateFactory for FakeBuildStepDelegateFactory {
    fn build_step_delegate(&self, _state: &RunState, _plan_id: &PlanId) -> Arc<dyn BuildStepDelegate> {
        self.0.clone()
    }
}

// ---------------------------------------------------------------------------
// Artifact streaming
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeArtifactClient {
    pub contents: Mutex<Vec<u8>>,
    pub err: Mutex<Option<String>>,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl FakeArtifactClient {
    pub fn returning(contents: &str) -> Arc<Self> {
        Arc::new(Self {
            contents: Mutex::new(contents.as_bytes().to_vec()),
            ..Default::default()
        })
    }

    pub fn fail_with(&self, message: &str) {
        *lock(&self.err) = Some(message.to_string());
    }

    /// `(artifact handle, path)` of every stream request.
    pub fn calls(&self) -> Vec<(String, String)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ArtifactClient for FakeArtifactClient {
    async fn stream_file_from_artifact(
        &self,
        _ctx: &ExecContext,
        artifact: &dyn Artifact,
        path: &str,
    ) -> anyhow::Result<Box<dyn AsyncRead + Send + Unpin>> {
        lock(&self.calls).push((artifact.handle().to_string(), path.to_string()));
        if let Some(err) = lock(&self.err).clone() {
            anyhow::bail!(err);
        }
        Ok(Box::new(Cursor::new(lock(&self.contents).clone())))
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// What a [`FakeStep`] does when run.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail,
    Error(&'static str),
    /// Return the abort error without waiting.
    Abort,
    /// Wait until the context finishes and return its error.
    WaitForContext,
    /// Sleep, then succeed; gives up when the context finishes.
    Sleep(Duration),
}

pub struct FakeStep {
    pub behavior: Behavior,
    pub runs: AtomicUsize,
    pub deadlines: Mutex<Vec<Option<Instant>>>,
    pub saw_abort: Mutex<Vec<bool>>,
}

impl FakeStep {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            runs: AtomicUsize::new(0),
            deadlines: Mutex::new(Vec::new()),
            saw_abort: Mutex::new(Vec::new()),
        })
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Step for FakeStep {
    async fn run(&self, ctx: &ExecContext, _state: &RunState) -> anyhow::Result<bool> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        lock(&self.deadlines).push(ctx.deadline());
        lock(&self.saw_abort).push(ctx.err() == Some(ContextError::Canceled));

        match &self.behavior {
            Behavior::Succeed => Ok(true),
            Behavior::Fail => Ok(false),
            Behavior::Error(message) => Err(anyhow::anyhow!(*message)),
            Behavior::Abort => Err(ContextError::Canceled.into()),
            Behavior::WaitForContext => Err(ctx.done().await.into()),
            Behavior::Sleep(d) => {
                ctx.run(tokio::time::sleep(*d)).await?;
                Ok(true)
            }
        }
    }
}
