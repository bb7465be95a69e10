use std::sync::Arc;

use async_trait::async_trait;

use crate::context::ExecContext;
use crate::run_state::RunState;
use crate::steps::Step;

/// Runs steps in order, stopping at the first one that fails or errors.
pub struct DoStep {
    steps: Vec<Arc<dyn Step>>,
}

impl DoStep {
    pub fn new(steps: Vec<Arc<dyn Step>>) -> Self {
        Self { steps }
    }
}

#[async_trait]
impl Step for DoStep {
    async fn run(&self, ctx: &ExecContext, state: &RunState) -> anyhow::Result<bool> {
        for step in &self.steps {
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }
            if !step.run(ctx, state).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
