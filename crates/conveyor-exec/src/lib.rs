//! Step execution engine for Conveyor build plans.
//!
//! A compiled [`Plan`] tree is turned into a tree of [`Step`]s by a
//! [`StepFactory`] and run against a per-build [`RunState`]:
//!
//! - [`GetStep`] fetches a resource version on a worker and registers it as an
//!   artifact
//! - [`LoadVarStep`] reads a file from an artifact into a build-local var
//! - [`DoStep`], [`InParallelStep`], [`TryStep`], [`TimeoutStep`] and
//!   [`HookStep`] compose other steps
//!
//! Workers, containers, caches and event delivery are reached through the
//! traits in [`runtime`], [`cache`] and [`delegate`].
//!
//! Every step returns `anyhow::Result<bool>`: `Ok(false)` is a failed outcome,
//! `Err` an error. Build aborts surface as [`ContextError::Canceled`] and are
//! never swallowed; step timeouts become failed outcomes.

pub mod artifact;
pub mod cache;
pub mod config;
pub mod context;
pub mod delegate;
pub mod error;
pub mod factory;
pub mod metadata;
pub mod plan;
pub mod resource;
pub mod run_state;
pub mod runtime;
pub mod steps;
pub mod trace;

pub use artifact::{Artifact, ArtifactName, ArtifactRepository};
pub use cache::{cache_key, InMemoryResourceCacheFactory, ResourceCacheFactory, ResourceCacheUser, UsedResourceCache};
pub use config::ExecConfig;
pub use context::{AbortHandle, ContextError, ExecContext};
pub use delegate::{
    BuildEvent, BuildStepDelegate, BuildStepDelegateFactory, EventDelegate, EventDelegateFactory,
    EventSink, GetDelegate, GetDelegateFactory, ImageFetcher, InMemoryEventSink, LogOrigin,
};
pub use error::{is_aborted, is_deadline_exceeded, ExecError, ExecResult};
pub use factory::{build_step, DefaultStepFactory, StepFactory};
pub use metadata::{ContainerMetadata, ContainerOwner, ContainerType, StepMetadata};
pub use plan::{
    GetPlan, HookPlan, InParallelPlan, LoadVarPlan, Plan, PlanId, PlanKind, TimeoutPlan, TryPlan,
};
pub use resource::{
    ImageResource, MetadataField, Params, ResourceType, Source, Tags, Version, VersionResult,
    VersionedResourceType, VersionedResourceTypes,
};
pub use run_state::{RunState, Stepper};
pub use runtime::{
    ArtifactClient, Container, ContainerSpec, ImageSpec, Pool, ProcessIo, ProcessResult,
    ProcessSpec, SharedBuffer, Volume, VolumeMount, Worker, WorkerSpec,
};
pub use steps::{
    DoStep, GetStep, Getter, Hook, HookStep, InParallelStep, LoadVarStep, Step, TimeoutStep,
    TryStep, VarFormat, TIMEOUT_LOG_MESSAGE,
};
