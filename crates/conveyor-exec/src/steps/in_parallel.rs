use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::context::ExecContext;
use crate::error::is_aborted;
use crate::run_state::RunState;
use crate::steps::Step;

/// Runs steps concurrently, each on its own task.
///
/// The first error aborts the remaining steps and is returned once every task
/// has finished. With `fail_fast`, a failed step aborts the rest as well.
pub struct InParallelStep {
    steps: Vec<Arc<dyn Step>>,
    limit: Option<usize>,
    fail_fast: bool,
}

impl InParallelStep {
    pub fn new(steps: Vec<Arc<dyn Step>>, limit: Option<usize>, fail_fast: bool) -> Self {
        Self {
            steps,
            limit,
            fail_fast,
        }
    }
}

#[async_trait]
impl Step for InParallelStep {
    async fn run(&self, ctx: &ExecContext, state: &RunState) -> anyhow::Result<bool> {
        let (branch_ctx, abort) = ctx.with_abort();

        let parallel = self
            .limit
            .filter(|limit| *limit > 0)
            .unwrap_or(self.steps.len())
            .max(1);
        debug!(steps = self.steps.len(), parallel, fail_fast = self.fail_fast, "running in parallel");

        let sem = Arc::new(Semaphore::new(parallel));
        let mut join_set = JoinSet::new();
        for step in &self.steps {
            let step = step.clone();
            let ctx = branch_ctx.clone();
            let state = state.clone();
            let sem = sem.clone();
            join_set.spawn(async move {
                let _permit = ctx.run(sem.acquire_owned()).await??;
                step.run(&ctx, &state).await
            });
        }

        let mut ok = true;
        let mut first_err: Option<anyhow::Error> = None;
        while let Some(res) = join_set.join_next().await {
            match res.map_err(anyhow::Error::from).and_then(|r| r) {
                Ok(true) => {}
                Ok(false) => {
                    ok = false;
                    if self.fail_fast {
                        abort.abort();
                    }
                }
                Err(err) => {
                    ok = false;
                    // siblings we aborted ourselves report cancellation, not the cause
                    let self_inflicted = is_aborted(&err) && abort.is_aborted() && ctx.err().is_none();
                    if first_err.is_none() && !self_inflicted {
                        first_err = Some(err);
                    }
                    abort.abort();
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(ok),
        }
    }
}
