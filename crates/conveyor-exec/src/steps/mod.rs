//! Step implementations.
//!
//! Every plan node becomes one [`Step`]. Leaf steps talk to workers and
//! delegates; combinators only run nested steps.

use std::time::Duration;

use async_trait::async_trait;

use crate::context::ExecContext;
use crate::error::{ExecError, ExecResult};
use crate::run_state::RunState;

pub mod do_step;
pub mod get;
pub mod getter;
pub mod hooks;
pub mod in_parallel;
pub mod load_var;
pub mod timeout;
pub mod try_step;

pub use do_step::DoStep;
pub use get::GetStep;
pub use getter::{FetchRequest, GetResult, Getter, ResourceInput};
pub use hooks::{Hook, HookStep};
pub use in_parallel::InParallelStep;
pub use load_var::{LoadVarStep, VarFormat};
pub use timeout::TimeoutStep;
pub use try_step::TryStep;

/// Message reported through the delegate when a step's timeout elapses.
pub const TIMEOUT_LOG_MESSAGE: &str = "Timeout exceeded";

/// A runnable plan node.
///
/// `Ok(false)` is a failed outcome (non-zero exit, elapsed timeout);
/// `Err` is an error (misconfiguration, infrastructure failure, abort).
#[async_trait]
pub trait Step: Send + Sync {
    async fn run(&self, ctx: &ExecContext, state: &RunState) -> anyhow::Result<bool>;
}

/// Parse a step timeout such as `"1h30m"`. Empty means no timeout.
pub fn parse_timeout(raw: &str) -> ExecResult<Option<Duration>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    humantime::parse_duration(raw.trim())
        .map(Some)
        .map_err(|e| ExecError::ParseTimeout {
            cause: e.to_string(),
        })
}
