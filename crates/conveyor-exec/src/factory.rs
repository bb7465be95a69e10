//! Turning plans into steps.

use std::sync::Arc;

use tracing::debug;

use crate::cache::ResourceCacheFactory;
use crate::config::ExecConfig;
use crate::delegate::{BuildStepDelegateFactory, GetDelegateFactory};
use crate::metadata::{ContainerMetadata, StepMetadata};
use crate::plan::{GetPlan, LoadVarPlan, Plan, PlanId, PlanKind};
use crate::run_state::Stepper;
use crate::runtime::{ArtifactClient, Pool};
use crate::steps::{
    DoStep, GetStep, Getter, Hook, HookStep, InParallelStep, LoadVarStep, Step, TimeoutStep,
    TryStep,
};
use crate::trace;

/// Constructs leaf steps. Combinators are assembled by [`build_step`].
pub trait StepFactory: Send + Sync {
    fn get_step(&self, plan_id: &PlanId, plan: &GetPlan) -> Arc<dyn Step>;
    fn load_var_step(&self, plan_id: &PlanId, plan: &LoadVarPlan) -> Arc<dyn Step>;
}

/// Build the step tree for `plan`.
pub fn build_step(factory: &dyn StepFactory, plan: &Plan) -> anyhow::Result<Arc<dyn Step>> {
    debug!(plan_id = %plan.id, kind = plan.kind_name(), "building step");
    let step: Arc<dyn Step> = match &plan.kind {
        PlanKind::Get(get) => factory.get_step(&plan.id, get),
        PlanKind::LoadVar(load_var) => factory.load_var_step(&plan.id, load_var),
        PlanKind::Do(steps) => Arc::new(DoStep::new(build_all(factory, steps)?)),
        PlanKind::InParallel(parallel) => Arc::new(InParallelStep::new(
            build_all(factory, &parallel.steps)?,
            parallel.limit,
            parallel.fail_fast,
        )),
        PlanKind::Try(t) => Arc::new(TryStep::new(build_step(factory, &t.step)?)),
        PlanKind::Timeout(t) => Arc::new(TimeoutStep::new(
            build_step(factory, &t.step)?,
            t.duration.clone(),
        )),
        PlanKind::OnSuccess(h) => hook(factory, Hook::OnSuccess, &h.step, &h.next)?,
        PlanKind::OnFailure(h) => hook(factory, Hook::OnFailure, &h.step, &h.next)?,
        PlanKind::OnError(h) => hook(factory, Hook::OnError, &h.step, &h.next)?,
        PlanKind::OnAbort(h) => hook(factory, Hook::OnAbort, &h.step, &h.next)?,
        PlanKind::Ensure(h) => hook(factory, Hook::Ensure, &h.step, &h.next)?,
    };
    Ok(step)
}

fn build_all(factory: &dyn StepFactory, plans: &[Plan]) -> anyhow::Result<Vec<Arc<dyn Step>>> {
    plans.iter().map(|p| build_step(factory, p)).collect()
}

fn hook(
    factory: &dyn StepFactory,
    hook: Hook,
    step: &Plan,
    next: &Plan,
) -> anyhow::Result<Arc<dyn Step>> {
    Ok(Arc::new(HookStep::new(
        hook,
        build_step(factory, step)?,
        build_step(factory, next)?,
    )))
}

/// Step factory wired to a worker pool and delegates for one build.
///
/// A config with `tracing` set turns on trace propagation process-wide.
#[derive(Clone)]
pub struct DefaultStepFactory {
    metadata: StepMetadata,
    container_metadata: ContainerMetadata,
    pool: Arc<dyn Pool>,
    artifact_client: Arc<dyn ArtifactClient>,
    cache_factory: Arc<dyn ResourceCacheFactory>,
    getter: Arc<Getter>,
    get_delegates: Arc<dyn GetDelegateFactory>,
    build_step_delegates: Arc<dyn BuildStepDelegateFactory>,
    config: Arc<ExecConfig>,
}

impl DefaultStepFactory {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        metadata: StepMetadata,
        container_metadata: ContainerMetadata,
        pool: Arc<dyn Pool>,
        artifact_client: Arc<dyn ArtifactClient>,
        cache_factory: Arc<dyn ResourceCacheFactory>,
        get_delegates: Arc<dyn GetDelegateFactory>,
        build_step_delegates: Arc<dyn BuildStepDelegateFactory>,
        config: ExecConfig,
    ) -> Self {
        if config.tracing {
            trace::configure();
        }
        Self {
            metadata,
            container_metadata,
            pool,
            artifact_client,
            getter: Arc::new(Getter::new(cache_factory.clone())),
            cache_factory,
            get_delegates,
            build_step_delegates,
            config: Arc::new(config),
        }
    }
}

impl StepFactory for DefaultStepFactory {
    fn get_step(&self, plan_id: &PlanId, plan: &GetPlan) -> Arc<dyn Step> {
        Arc::new(GetStep::new(
            plan_id.clone(),
            plan.clone(),
            self.metadata.clone(),
            self.container_metadata.clone(),
            self.getter.clone(),
            self.cache_factory.clone(),
            self.get_delegates.clone(),
            self.pool.clone(),
            self.config.clone(),
        ))
    }

    fn load_var_step(&self, plan_id: &PlanId, plan: &LoadVarPlan) -> Arc<dyn Step> {
        Arc::new(LoadVarStep::new(
            plan_id.clone(),
            plan.clone(),
            self.build_step_delegates.clone(),
            self.artifact_client.clone(),
            self.config.clone(),
        ))
    }
}

impl Stepper for DefaultStepFactory {
    fn step_for(&self, plan: &Plan) -> anyhow::Result<Arc<dyn Step>> {
        build_step(self, plan)
    }
}
