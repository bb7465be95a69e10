//! Build tracing.
//!
//! Spans are ordinary `tracing` spans. When propagation is switched on with
//! [`configure`], each span also gets a W3C trace context that is carried in
//! the [`ExecContext`] and handed to fetch processes as `TRACEPARENT`.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{field, info_span, Span};

use crate::context::ExecContext;

/// Environment variable carrying the W3C trace context into processes.
pub const TRACEPARENT_ENV: &str = "TRACEPARENT";

static CONFIGURED: AtomicBool = AtomicBool::new(false);

/// Turn on trace context propagation for the process.
pub fn configure() {
    CONFIGURED.store(true, Ordering::SeqCst);
}

/// Turn off trace context propagation.
pub fn disable() {
    CONFIGURED.store(false, Ordering::SeqCst);
}

pub fn is_configured() -> bool {
    CONFIGURED.load(Ordering::SeqCst)
}

/// W3C trace context of one span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: [u8; 16],
    pub span_id: [u8; 8],
    pub sampled: bool,
}

impl SpanContext {
    /// A new sampled root span with random ids.
    pub fn new_root() -> Self {
        Self {
            trace_id: non_zero(rand::random),
            span_id: non_zero(rand::random),
            sampled: true,
        }
    }

    /// A child span in the same trace.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: non_zero(rand::random),
            sampled: self.sampled,
        }
    }

    /// `00-<trace-id>-<span-id>-<flags>`
    pub fn traceparent(&self) -> String {
        format!(
            "00-{}-{}-{:02x}",
            hex::encode(self.trace_id),
            hex::encode(self.span_id),
            u8::from(self.sampled)
        )
    }

    /// Parse a version `00` traceparent header.
    pub fn from_traceparent(header: &str) -> Option<Self> {
        let mut parts = header.trim().split('-');
        let (version, trace, span, flags) =
            (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        if version != "00" || parts.next().is_some() {
            return None;
        }

        let mut trace_id = [0u8; 16];
        let mut span_id = [0u8; 8];
        hex::decode_to_slice(trace, &mut trace_id).ok()?;
        hex::decode_to_slice(span, &mut span_id).ok()?;
        let flags = u8::from_str_radix(flags, 16).ok()?;

        if trace_id == [0u8; 16] || span_id == [0u8; 8] {
            return None;
        }
        Some(Self {
            trace_id,
            span_id,
            sampled: flags & 1 == 1,
        })
    }
}

fn non_zero<const N: usize>(gen: impl Fn() -> [u8; N]) -> [u8; N] {
    loop {
        let id = gen();
        if id.iter().any(|b| *b != 0) {
            return id;
        }
    }
}

/// A started build span.
#[derive(Debug, Clone)]
pub struct BuildSpan {
    span: Span,
    context: Option<SpanContext>,
}

impl BuildSpan {
    /// A span that records nothing.
    pub fn noop() -> Self {
        Self {
            span: Span::none(),
            context: None,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn context(&self) -> Option<&SpanContext> {
        self.context.as_ref()
    }

    /// Mark the span as failed.
    pub fn record_error(&self, err: &dyn std::fmt::Display) {
        self.span.record("error", field::display(err));
    }
}

/// Start a span named after `component` as a child of the span in `ctx`.
///
/// Returns `ctx` unchanged and a no-op span when propagation is not configured.
pub fn start_span(
    ctx: &ExecContext,
    component: &str,
    attrs: &[(&str, &str)],
) -> (ExecContext, BuildSpan) {
    if !is_configured() {
        return (ctx.clone(), BuildSpan::noop());
    }

    let context = match ctx.span() {
        Some(parent) => parent.child(),
        None => SpanContext::new_root(),
    };
    let rendered = attrs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");
    let span = info_span!(
        "build_step",
        component,
        attrs = %rendered,
        trace_id = %hex::encode(context.trace_id),
        error = field::Empty,
    );

    (
        ctx.clone().with_span(context),
        BuildSpan {
            span,
            context: Some(context),
        },
    )
}

/// `TRACEPARENT` value for processes started under `ctx`, when propagation is on.
pub fn traceparent_env(ctx: &ExecContext) -> Option<String> {
    if !is_configured() {
        return None;
    }
    ctx.span().map(SpanContext::traceparent)
}
