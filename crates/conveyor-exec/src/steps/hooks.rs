use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::context::ExecContext;
use crate::error::is_aborted;
use crate::run_state::RunState;
use crate::steps::Step;

/// When a hook's `next` step runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    /// After the step succeeds; the outcome is the hook's.
    OnSuccess,
    /// After the step fails without error; the outcome stays failed.
    OnFailure,
    /// After the step errors for any reason but abort; the error is kept.
    OnError,
    /// After the build is aborted during the step; the abort is kept.
    OnAbort,
    /// Always; succeeds only if both do.
    Ensure,
}

/// A step followed by a conditional hook.
pub struct HookStep {
    hook: Hook,
    step: Arc<dyn Step>,
    next: Arc<dyn Step>,
}

impl HookStep {
    pub fn new(hook: Hook, step: Arc<dyn Step>, next: Arc<dyn Step>) -> Self {
        Self { hook, step, next }
    }

    async fn run_hook_after_error(&self, ctx: &ExecContext, state: &RunState) {
        if let Err(err) = self.next.run(ctx, state).await {
            warn!(hook = ?self.hook, error = %err, "hook errored");
        }
    }
}

#[async_trait]
impl Step for HookStep {
    async fn run(&self, ctx: &ExecContext, state: &RunState) -> anyhow::Result<bool> {
        let res = self.step.run(ctx, state).await;

        match self.hook {
            Hook::OnSuccess => match res {
                Ok(true) => self.next.run(ctx, state).await,
                other => other,
            },
            Hook::OnFailure => match res {
                Ok(false) => {
                    self.next.run(ctx, state).await?;
                    Ok(false)
                }
                other => other,
            },
            Hook::OnError => match res {
                Err(err) if !is_aborted(&err) => {
                    self.run_hook_after_error(ctx, state).await;
                    Err(err)
                }
                other => other,
            },
            Hook::OnAbort => match res {
                Err(err) if is_aborted(&err) => {
                    self.run_hook_after_error(&ctx.detached(), state).await;
                    Err(err)
                }
                other => other,
            },
            Hook::Ensure => {
                let hook_ctx = if ctx.err().is_some() {
                    ctx.detached()
                } else {
                    ctx.clone()
                };
                let hook_res = self.next.run(&hook_ctx, state).await;
                match (res, hook_res) {
                    (Err(err), _) | (Ok(_), Err(err)) => Err(err),
                    (Ok(step_ok), Ok(hook_ok)) => Ok(step_ok && hook_ok),
                }
            }
        }
    }
}
