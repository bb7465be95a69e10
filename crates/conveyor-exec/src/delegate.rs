//! Step delegates: where steps report progress and output.
//!
//! Steps never talk to event storage directly. They obtain a delegate from a
//! factory keyed by their plan id and report through it. [`EventDelegate`] is
//! the stock implementation that turns calls into [`BuildEvent`]s, masking
//! tracked credentials in step output.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::ExecContext;
use crate::plan::{GetPlan, PlanId};
use crate::resource::{ImageResource, MetadataField, Version, VersionResult, VersionedResourceTypes};
use crate::run_state::RunState;
use crate::runtime::ImageSpec;
use crate::trace::{self, BuildSpan};

/// Delegate of `load_var` and other generic steps.
#[async_trait]
pub trait BuildStepDelegate: Send + Sync {
    fn stdout(&self) -> Box<dyn Write + Send>;
    fn stderr(&self) -> Box<dyn Write + Send>;

    fn start_span(
        &self,
        ctx: &ExecContext,
        component: &str,
        attrs: &[(&str, &str)],
    ) -> (ExecContext, BuildSpan);

    fn initializing(&self);
    fn starting(&self);
    fn finished(&self, succeeded: bool);
    fn selected_worker(&self, worker_name: &str);
    fn errored(&self, message: &str);

    /// Resolve a custom resource type's image.
    async fn fetch_image(
        &self,
        ctx: &ExecContext,
        image: ImageResource,
        types: VersionedResourceTypes,
        privileged: bool,
    ) -> anyhow::Result<ImageSpec>;
}

/// Delegate of `get` steps.
#[async_trait]
pub trait GetDelegate: Send + Sync {
    fn stdout(&self) -> Box<dyn Write + Send>;
    fn stderr(&self) -> Box<dyn Write + Send>;

    fn start_span(
        &self,
        ctx: &ExecContext,
        component: &str,
        attrs: &[(&str, &str)],
    ) -> (ExecContext, BuildSpan);

    fn initializing(&self);
    fn starting(&self);
    fn finished(&self, exit_status: i32, result: &VersionResult);
    fn selected_worker(&self, worker_name: &str);
    fn errored(&self, message: &str);

    async fn fetch_image(
        &self,
        ctx: &ExecContext,
        image: ImageResource,
        types: VersionedResourceTypes,
        privileged: bool,
    ) -> anyhow::Result<ImageSpec>;

    /// Record a fetched version of a pipeline resource.
    fn update_version(&self, plan: &GetPlan, result: &VersionResult);
}

pub trait BuildStepDelegateFactory: Send + Sync {
    fn build_step_delegate(&self, state: &RunState, plan_id: &PlanId) -> Arc<dyn BuildStepDelegate>;
}

pub trait GetDelegateFactory: Send + Sync {
    fn get_delegate(&self, state: &RunState, plan_id: &PlanId) -> Arc<dyn GetDelegate>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOrigin {
    Stdout,
    Stderr,
}

/// Something that happened during a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum BuildEvent {
    Initialize {
        plan_id: PlanId,
    },
    Start {
        plan_id: PlanId,
    },
    Log {
        plan_id: PlanId,
        origin: LogOrigin,
        payload: String,
    },
    SelectedWorker {
        plan_id: PlanId,
        worker: String,
    },
    ImageFetched {
        plan_id: PlanId,
        image: String,
    },
    Finish {
        plan_id: PlanId,
        succeeded: bool,
    },
    FinishGet {
        plan_id: PlanId,
        exit_status: i32,
        version: Version,
        metadata: Vec<MetadataField>,
    },
    VersionUpdated {
        plan_id: PlanId,
        resource: String,
        version: Version,
    },
    Error {
        plan_id: PlanId,
        message: String,
    },
}

/// Destination of build events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: BuildEvent);
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<BuildEvent>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BuildEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Concatenated log payloads of `plan_id` from `origin`.
    pub fn logs(&self, plan_id: &PlanId, origin: LogOrigin) -> String {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                BuildEvent::Log {
                    plan_id: id,
                    origin: o,
                    payload,
                } if &id == plan_id && o == origin => Some(payload),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn emit(&self, event: BuildEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

/// Fetches custom resource type images.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch_image(
        &self,
        ctx: &ExecContext,
        image: ImageResource,
        types: VersionedResourceTypes,
        privileged: bool,
    ) -> anyhow::Result<ImageSpec>;
}

/// Line-buffered writer emitting redacted log events.
struct RedactingWriter {
    plan_id: PlanId,
    origin: LogOrigin,
    state: RunState,
    sink: Arc<dyn EventSink>,
    pending: Vec<u8>,
}

impl RedactingWriter {
    fn emit(&mut self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&bytes);
        self.sink.emit(BuildEvent::Log {
            plan_id: self.plan_id.clone(),
            origin: self.origin,
            payload: self.state.variables().redact(&text),
        });
    }
}

impl Write for RedactingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        if let Some(end) = self.pending.iter().rposition(|b| *b == b'\n') {
            let rest = self.pending.split_off(end + 1);
            let lines = std::mem::replace(&mut self.pending, rest);
            self.emit(lines);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let pending = std::mem::take(&mut self.pending);
        self.emit(pending);
        Ok(())
    }
}

impl Drop for RedactingWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Delegate emitting [`BuildEvent`]s for one plan node.
pub struct EventDelegate {
    plan_id: PlanId,
    state: RunState,
    sink: Arc<dyn EventSink>,
    images: Option<Arc<dyn ImageFetcher>>,
}

impl EventDelegate {
    pub fn new(
        plan_id: PlanId,
        state: RunState,
        sink: Arc<dyn EventSink>,
        images: Option<Arc<dyn ImageFetcher>>,
    ) -> Self {
        Self {
            plan_id,
            state,
            sink,
            images,
        }
    }

    fn writer(&self, origin: LogOrigin) -> Box<dyn Write + Send> {
        Box::new(RedactingWriter {
            plan_id: self.plan_id.clone(),
            origin,
            state: self.state.clone(),
            sink: self.sink.clone(),
            pending: Vec::new(),
        })
    }

    fn emit(&self, event: BuildEvent) {
        self.sink.emit(event);
    }

    fn initializing(&self) {
        debug!(plan_id = %self.plan_id, "initializing");
        self.emit(BuildEvent::Initialize {
            plan_id: self.plan_id.clone(),
        });
    }

    fn starting(&self) {
        debug!(plan_id = %self.plan_id, "starting");
        self.emit(BuildEvent::Start {
            plan_id: self.plan_id.clone(),
        });
    }

    fn selected_worker(&self, worker_name: &str) {
        info!(plan_id = %self.plan_id, worker = worker_name, "selected worker");
        self.emit(BuildEvent::SelectedWorker {
            plan_id: self.plan_id.clone(),
            worker: worker_name.to_string(),
        });
    }

    fn errored(&self, message: &str) {
        warn!(plan_id = %self.plan_id, message, "step errored");
        self.emit(BuildEvent::Error {
            plan_id: self.plan_id.clone(),
            message: message.to_string(),
        });
    }

    async fn fetch_image(
        &self,
        ctx: &ExecContext,
        image: ImageResource,
        types: VersionedResourceTypes,
        privileged: bool,
    ) -> anyhow::Result<ImageSpec> {
        let images = self
            .images
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no image fetcher for resource type {}", image.name))?;

        let name = image.name.clone();
        let spec = images.fetch_image(ctx, image, types, privileged).await?;
        self.emit(BuildEvent::ImageFetched {
            plan_id: self.plan_id.clone(),
            image: name,
        });
        Ok(spec)
    }
}

#[async_trait]
impl BuildStepDelegate for EventDelegate {
    fn stdout(&self) -> Box<dyn Write + Send> {
        self.writer(LogOrigin::Stdout)
    }

    fn stderr(&self) -> Box<dyn Write + Send> {
        self.writer(LogOrigin::Stderr)
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
        EventDelegate::initializing(self);
    }

    fn starting(&self) {
        EventDelegate::starting(self);
    }

    fn finished(&self, succeeded: bool) {
        info!(plan_id = %self.plan_id, succeeded, "finished");
        self.emit(BuildEvent::Finish {
            plan_id: self.plan_id.clone(),
            succeeded,
        });
    }

    fn selected_worker(&self, worker_name: &str) {
        EventDelegate::selected_worker(self, worker_name);
    }

    fn errored(&self, message: &str) {
        EventDelegate::errored(self, message);
    }

    async fn fetch_image(
        &self,
        ctx: &ExecContext,
        image: ImageResource,
        types: VersionedResourceTypes,
        privileged: bool,
    ) -> anyhow::Result<ImageSpec> {
        EventDelegate::fetch_image(self, ctx, image, types, privileged).await
    }
}

#[async_trait]
impl GetDelegate for EventDelegate {
    fn stdout(&self) -> Box<dyn Write + Send> {
        self.writer(LogOrigin::Stdout)
    }

    fn stderr(&self) -> Box<dyn Write + Send> {
        self.writer(LogOrigin::Stderr)
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
        EventDelegate::initializing(self);
    }

    fn starting(&self) {
        EventDelegate::starting(self);
    }

    fn finished(&self, exit_status: i32, result: &VersionResult) {
        info!(plan_id = %self.plan_id, exit_status, "finished get");
        self.emit(BuildEvent::FinishGet {
            plan_id: self.plan_id.clone(),
            exit_status,
            version: result.version.clone(),
            metadata: result.metadata.clone(),
        });
    }

    fn selected_worker(&self, worker_name: &str) {
        EventDelegate::selected_worker(self, worker_name);
    }

    fn errored(&self, message: &str) {
        EventDelegate::errored(self, message);
    }

    async fn fetch_image(
        &self,
        ctx: &ExecContext,
        image: ImageResource,
        types: VersionedResourceTypes,
        privileged: bool,
    ) -> anyhow::Result<ImageSpec> {
        EventDelegate::fetch_image(self, ctx, image, types, privileged).await
    }

    fn update_version(&self, plan: &GetPlan, result: &VersionResult) {
        info!(plan_id = %self.plan_id, resource = %plan.resource, "saving version");
        self.emit(BuildEvent::VersionUpdated {
            plan_id: self.plan_id.clone(),
            resource: plan.resource.clone(),
            version: result.version.clone(),
        });
    }
}

/// Hands out [`EventDelegate`]s writing to one sink.
#[derive(Clone)]
pub struct EventDelegateFactory {
    sink: Arc<dyn EventSink>,
    images: Option<Arc<dyn ImageFetcher>>,
}

impl EventDelegateFactory {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink, images: None }
    }

    pub fn with_image_fetcher(mut self, images: Arc<dyn ImageFetcher>) -> Self {
        self.images = Some(images);
        self
    }

    fn delegate(&self, state: &RunState, plan_id: &PlanId) -> Arc<EventDelegate> {
        Arc::new(EventDelegate::new(
            plan_id.clone(),
            state.clone(),
            self.sink.clone(),
            self.images.clone(),
        ))
    }
}

impl BuildStepDelegateFactory for EventDelegateFactory {
    fn build_step_delegate(&self, state: &RunState, plan_id: &PlanId) -> Arc<dyn BuildStepDelegate> {
        self.delegate(state, plan_id)
    }
}

impl GetDelegateFactory for EventDelegateFactory {
    fn get_delegate(&self, state: &RunState, plan_id: &PlanId) -> Arc<dyn GetDelegate> {
        self.delegate(state, plan_id)
    }
}
