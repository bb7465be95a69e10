use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::context::ExecContext;
use crate::error::is_aborted;
use crate::run_state::RunState;
use crate::steps::Step;

/// Runs a step and succeeds regardless of its outcome, unless the build was
/// aborted.
pub struct TryStep {
    step: Arc<dyn Step>,
}

impl TryStep {
    pub fn new(step: Arc<dyn Step>) -> Self {
        Self { step }
    }
}

#[async_trait]
impl Step for TryStep {
    async fn run(&self, ctx: &ExecContext, state: &RunState) -> anyhow::Result<bool> {
        match self.step.run(ctx, state).await {
            Err(err) if is_aborted(&err) => Err(err),
            Err(err) => {
                debug!(error = %err, "try: ignoring error");
                Ok(true)
            }
            Ok(_) => Ok(true),
        }
    }
}
