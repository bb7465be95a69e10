//! Per-build execution state shared by every step.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use conveyor_vars::{BuildVariables, TrackedVarsIterator, Variables};
use serde_json::Value;

use crate::artifact::ArtifactRepository;
use crate::config::ExecConfig;
use crate::context::ExecContext;
use crate::plan::{Plan, PlanId};
use crate::steps::Step;

/// Builds the step for a plan node.
pub trait Stepper: Send + Sync {
    fn step_for(&self, plan: &Plan) -> anyhow::Result<Arc<dyn Step>>;
}

type ResultSlot = Arc<dyn Any + Send + Sync>;

struct Inner {
    artifacts: ArtifactRepository,
    vars: BuildVariables,
    results: RwLock<HashMap<PlanId, ResultSlot>>,
    stepper: Arc<dyn Stepper>,
}

/// Mutable context of one build attempt. Clones share the same state.
#[derive(Clone)]
pub struct RunState {
    inner: Arc<Inner>,
}

impl fmt::Debug for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunState")
            .field("artifacts", &self.inner.artifacts)
            .field("vars", &self.inner.vars)
            .finish_non_exhaustive()
    }
}

impl RunState {
    pub fn new(stepper: Arc<dyn Stepper>, creds: Arc<dyn Variables>, enable_redaction: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                artifacts: ArtifactRepository::new(),
                vars: BuildVariables::new(creds, enable_redaction),
                results: RwLock::new(HashMap::new()),
                stepper,
            }),
        }
    }

    /// State for a build run with `config`'s redaction setting.
    pub fn from_config(
        stepper: Arc<dyn Stepper>,
        creds: Arc<dyn Variables>,
        config: &ExecConfig,
    ) -> Self {
        Self::new(stepper, creds, config.enable_redaction)
    }

    pub fn artifact_repository(&self) -> &ArtifactRepository {
        &self.inner.artifacts
    }

    pub fn variables(&self) -> &BuildVariables {
        &self.inner.vars
    }

    /// The result stored for `plan_id`, if one of type `T` was stored.
    pub fn result<T: Any + Clone>(&self, plan_id: &PlanId) -> Option<T> {
        let results = self.inner.results.read().unwrap_or_else(|e| e.into_inner());
        results
            .get(plan_id)
            .and_then(|slot| slot.downcast_ref::<T>())
            .cloned()
    }

    pub fn store_result<T: Any + Send + Sync>(&self, plan_id: &PlanId, value: T) {
        self.inner
            .results
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(plan_id.clone(), Arc::new(value));
    }

    /// Set a build-local var, tracking it for redaction when `redact` is set.
    pub fn add_local_var(&self, name: &str, value: Value, redact: bool) {
        self.inner.vars.set_local(name, value, redact);
    }

    pub fn iterate_interpolated_creds(&self, iter: &mut dyn TrackedVarsIterator) {
        self.inner.vars.iterate_interpolated_creds(iter);
    }

    /// Build and run the step for `plan` against this state.
    pub async fn run(&self, ctx: &ExecContext, plan: &Plan) -> anyhow::Result<bool> {
        let step = self.inner.stepper.step_for(plan)?;
        step.run(ctx, self).await
    }
}
