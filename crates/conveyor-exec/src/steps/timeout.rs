use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::context::ExecContext;
use crate::error::is_deadline_exceeded;
use crate::run_state::RunState;
use crate::steps::{parse_timeout, Step};

/// Bounds a step by a duration. Running out of time is a failed outcome, not
/// an error.
pub struct TimeoutStep {
    step: Arc<dyn Step>,
    duration: String,
}

impl TimeoutStep {
    pub fn new(step: Arc<dyn Step>, duration: impl Into<String>) -> Self {
        Self {
            step,
            duration: duration.into(),
        }
    }
}

#[async_trait]
impl Step for TimeoutStep {
    async fn run(&self, ctx: &ExecContext, state: &RunState) -> anyhow::Result<bool> {
        let Some(duration) = parse_timeout(&self.duration)? else {
            return self.step.run(ctx, state).await;
        };

        let timeout_ctx = ctx.with_timeout(duration);
        match self.step.run(&timeout_ctx, state).await {
            Err(err) if is_deadline_exceeded(&err) => {
                info!(duration = %self.duration, "step timed out");
                Ok(false)
            }
            other => other,
        }
    }
}
