//! The `get` step: fetch one version of a resource into an artifact.

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use conveyor_vars::interpolate_map;
use tracing::{debug, info, Instrument};

use crate::artifact::ArtifactName;
use crate::cache::{ResourceCacheFactory, ResourceCacheUser, UsedResourceCache};
use crate::config::ExecConfig;
use crate::context::ExecContext;
use crate::delegate::{GetDelegate, GetDelegateFactory};
use crate::error::{is_deadline_exceeded, ExecError};
use crate::metadata::{ContainerMetadata, ContainerOwner, ContainerType, StepMetadata};
use crate::plan::{GetPlan, PlanId};
use crate::resource::{
    ImageResource, Version, VersionResult, VersionedResourceType, VersionedResourceTypes,
};
use crate::run_state::RunState;
use crate::runtime::{ContainerSpec, ImageSpec, Pool, ProcessSpec, WorkerSpec};
use crate::steps::getter::{FetchRequest, Getter, ResourceInput};
use crate::steps::{parse_timeout, Step, TIMEOUT_LOG_MESSAGE};
use crate::trace::{self, TRACEPARENT_ENV};

/// Fetches a resource version on a worker and registers the result as an
/// artifact named after the step.
pub struct GetStep {
    plan_id: PlanId,
    plan: GetPlan,
    metadata: StepMetadata,
    container_metadata: ContainerMetadata,
    getter: Arc<Getter>,
    cache_factory: Arc<dyn ResourceCacheFactory>,
    delegate_factory: Arc<dyn GetDelegateFactory>,
    pool: Arc<dyn Pool>,
    config: Arc<ExecConfig>,
}

impl GetStep {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plan_id: PlanId,
        plan: GetPlan,
        metadata: StepMetadata,
        container_metadata: ContainerMetadata,
        getter: Arc<Getter>,
        cache_factory: Arc<dyn ResourceCacheFactory>,
        delegate_factory: Arc<dyn GetDelegateFactory>,
        pool: Arc<dyn Pool>,
        config: Arc<ExecConfig>,
    ) -> Self {
        Self {
            plan_id,
            plan,
            metadata,
            container_metadata,
            getter,
            cache_factory,
            delegate_factory,
            pool,
            config,
        }
    }

    async fn run_with_delegate(
        &self,
        ctx: &ExecContext,
        state: &RunState,
        delegate: &dyn GetDelegate,
    ) -> anyhow::Result<bool> {
        let timeout = parse_timeout(self.plan.timeout.as_deref().unwrap_or_default())?;

        let vars = state.variables();
        let source = interpolate_map(&self.plan.source, vars)?;
        let params = interpolate_map(&self.plan.params, vars)?;
        let version = self.resolve_version(state)?;
        let types = self.interpolated_types(state)?;

        let cache = self
            .cache_factory
            .find_or_create_resource_cache(
                &ResourceCacheUser::for_build(self.metadata.build_id),
                &self.plan.type_name,
                &version,
                &source,
                &params,
                &types,
            )
            .await?;

        let custom_type = self.plan.resource_types.lookup(&self.plan.type_name);
        let tags = match custom_type {
            Some(t) if !t.resource_type.tags.is_empty() => t.resource_type.tags.clone(),
            _ => self.plan.tags.clone(),
        };
        let worker_spec = WorkerSpec {
            resource_type: self.plan.resource_types.base(&self.plan.type_name),
            team_id: self.metadata.team_id,
            tags: tags.clone(),
        };

        let image_spec = match custom_type {
            Some(custom) => self.fetch_type_image(ctx, delegate, custom, tags).await?,
            None => ImageSpec {
                resource_type: self.plan.type_name.clone(),
                ..Default::default()
            },
        };

        let resource_dir = self.config.get_resource_dir().to_string_lossy().into_owned();
        let mut env = self.metadata.env();
        if let Some(traceparent) = trace::traceparent_env(ctx) {
            env.push(format!("{TRACEPARENT_ENV}={traceparent}"));
        }
        let container_spec = ContainerSpec {
            image_spec,
            team_id: self.metadata.team_id,
            container_type: ContainerType::Get,
            env,
            dir: resource_dir.clone(),
            certs_bind_mount: true,
        };
        let owner = ContainerOwner::build_step(
            self.metadata.build_id,
            self.plan_id.clone(),
            self.metadata.team_id,
        );

        let worker = self
            .pool
            .find_or_select_worker(ctx, &owner, &container_spec, &worker_spec)
            .await
            .context("select worker")?;
        delegate.selected_worker(worker.name());

        let process_ctx = match timeout {
            Some(duration) => ctx.with_timeout(duration),
            None => ctx.clone(),
        };

        let request = FetchRequest {
            owner,
            metadata: self.container_metadata(),
            container_spec,
            process_spec: ProcessSpec {
                id: "resource".to_string(),
                path: self.config.in_script().to_string_lossy().into_owned(),
                args: vec![resource_dir.clone()],
            },
            input: ResourceInput {
                source,
                params,
                version,
            },
            resource_dir,
        };

        delegate.starting();
        let fetched = self
            .getter
            .get(&process_ctx, worker.as_ref(), &request, &cache, delegate.stderr())
            .await;

        let result = match fetched {
            Ok(result) => result,
            Err(err) => {
                if is_deadline_exceeded(&err) {
                    info!(plan_id = %self.plan_id, "get step timed out");
                    delegate.errored(TIMEOUT_LOG_MESSAGE);
                    return Ok(false);
                }
                return Err(err);
            }
        };

        if result.exit_status != 0 {
            delegate.finished(result.exit_status, &VersionResult::default());
            return Ok(false);
        }

        let volume = result.volume.ok_or_else(|| ExecError::NoResourceMount {
            path: request.resource_dir.clone(),
        })?;
        state
            .artifact_repository()
            .register_artifact(ArtifactName::new(&self.plan.name), volume);
        state.store_result::<UsedResourceCache>(&self.plan_id, cache);

        if !self.plan.resource.is_empty() {
            delegate.update_version(&self.plan, &result.version_result);
        }

        delegate.finished(0, &result.version_result);
        Ok(true)
    }

    fn resolve_version(&self, state: &RunState) -> anyhow::Result<Version> {
        if let Some(version) = &self.plan.version {
            return Ok(version.clone());
        }
        if let Some(from) = &self.plan.version_from {
            let version = state
                .result::<Version>(from)
                .or_else(|| state.result::<VersionResult>(from).map(|r| r.version))
                .or_else(|| state.result::<UsedResourceCache>(from).map(|c| c.version));
            if let Some(version) = version {
                debug!(plan_id = %self.plan_id, version_from = %from, "resolved version from earlier step");
                return Ok(version);
            }
        }
        Err(ExecError::MissingVersion {
            plan: self.plan_id.to_string(),
        }
        .into())
    }

    /// The resource type chain with each link's source interpolated. Params
    /// stay as declared; they only matter when that link's image is fetched.
    fn interpolated_types(&self, state: &RunState) -> anyhow::Result<VersionedResourceTypes> {
        self.plan
            .resource_types
            .iter()
            .map(|t| {
                let mut t = t.clone();
                t.resource_type.source = interpolate_map(&t.resource_type.source, state.variables())?;
                Ok::<_, anyhow::Error>(t)
            })
            .collect()
    }

    async fn fetch_type_image(
        &self,
        ctx: &ExecContext,
        delegate: &dyn GetDelegate,
        custom: &VersionedResourceType,
        tags: Vec<String>,
    ) -> anyhow::Result<ImageSpec> {
        let image = ImageResource {
            name: custom.resource_type.name.clone(),
            type_name: custom.resource_type.type_name.clone(),
            source: custom.resource_type.source.clone(),
            params: custom.resource_type.params.clone(),
            version: Some(custom.version.clone()),
            tags,
        };
        let remaining = self.plan.resource_types.without(&custom.resource_type.name);
        delegate
            .fetch_image(ctx, image, remaining, custom.resource_type.privileged)
            .await
    }

    fn container_metadata(&self) -> ContainerMetadata {
        ContainerMetadata {
            container_type: Some(ContainerType::Get),
            step_name: self.plan.name.clone(),
            ..self.container_metadata.clone()
        }
    }
}

#[async_trait]
impl Step for GetStep {
    async fn run(&self, ctx: &ExecContext, state: &RunState) -> anyhow::Result<bool> {
        let delegate = self.delegate_factory.get_delegate(state, &self.plan_id);
        delegate.initializing();

        let (ctx, span) = delegate.start_span(
            ctx,
            "get",
            &[
                ("name", self.plan.name.as_str()),
                ("resource", self.plan.resource.as_str()),
            ],
        );

        let res = self
            .run_with_delegate(&ctx, state, delegate.as_ref())
            .instrument(span.span().clone())
            .await;
        if let Err(err) = &res {
            span.record_error(err);
        }
        res
    }
}
