//! Cancellation and deadline propagation.
//!
//! An [`ExecContext`] is handed to every step and every collaborator call. It
//! carries two independent ways of being cut short:
//!
//! - an abort signal (build aborted, or a sibling failed inside `in_parallel`)
//! - an optional deadline (step-local `timeout`)
//!
//! Both are inherited by derived contexts, so aborting a build also stops every
//! timeout-bounded child. The two causes stay distinguishable through
//! [`ContextError`].

use std::future::Future;
use std::time::Duration;

use futures::future::{pending, select_all, FutureExt};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::trace::SpanContext;

/// Why a context stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// The build (or an enclosing scope) was aborted.
    #[error("context canceled")]
    Canceled,

    /// A deadline on this context or one of its parents passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancels every context derived from the one it was created with.
///
/// Dropping the handle does not cancel.
#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Execution context threaded through the step tree.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    signals: Vec<watch::Receiver<bool>>,
    deadline: Option<Instant>,
    span: Option<SpanContext>,
}

impl ExecContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context that can additionally be aborted through the returned handle.
    pub fn with_abort(&self) -> (Self, AbortHandle) {
        let (tx, rx) = watch::channel(false);
        let mut child = self.clone();
        child.signals.push(rx);
        (child, AbortHandle { tx })
    }

    /// Derive a context whose deadline is at most `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let mut child = self.clone();
        child.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        child
    }

    /// A context with the same span that is neither abortable nor bounded by a
    /// deadline. Cleanup hooks run on it after the build is aborted.
    pub fn detached(&self) -> Self {
        Self {
            signals: Vec::new(),
            deadline: None,
            span: self.span,
        }
    }

    /// Attach the active trace span.
    pub fn with_span(mut self, span: SpanContext) -> Self {
        self.span = Some(span);
        self
    }

    pub fn span(&self) -> Option<&SpanContext> {
        self.span.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The reason this context is done, if it is. Cancellation wins over an
    /// expired deadline.
    pub fn err(&self) -> Option<ContextError> {
        if self.signals.iter().any(|rx| *rx.borrow()) {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is aborted or its deadline passes.
    pub async fn done(&self) -> ContextError {
        let canceled = async {
            if self.signals.is_empty() {
                pending::<()>().await;
            }
            let waits = self.signals.iter().map(|rx| {
                let mut rx = rx.clone();
                async move {
                    // a dropped handle can never abort
                    if rx.wait_for(|aborted| *aborted).await.is_err() {
                        pending::<()>().await;
                    }
                }
                .boxed()
            });
            select_all(waits).await;
        };

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = canceled => ContextError::Canceled,
            _ = expired => ContextError::DeadlineExceeded,
        }
    }

    /// Drive `fut` to completion unless the context finishes first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            out = fut => Ok(out),
        }
    }
}
