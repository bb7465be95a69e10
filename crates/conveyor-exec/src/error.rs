//! Error types for step execution.

use crate::context::ContextError;

/// Step configuration and decode errors.
///
/// These surface verbatim from `Step::run`; infrastructure failures (worker,
/// container, streaming) travel as `anyhow` errors with context instead.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// `load_var` format outside `trim`, `raw`, `json`, `yaml`, `yml`.
    #[error("invalid format {0}")]
    InvalidFormat(String),

    /// A step timeout that is not a duration.
    #[error("parse timeout: {cause}")]
    ParseTimeout { cause: String },

    /// A `load_var` file path without an artifact prefix.
    #[error("path '{path}' does not specify where the file lives")]
    UnspecifiedArtifactSource { path: String },

    /// A `load_var` file path naming an artifact nobody registered.
    #[error("unknown artifact source: {name} in file path {path}")]
    UnknownArtifactSource { name: String, path: String },

    /// `get` has neither a version nor a usable `version_from`.
    #[error("no version available for get step {plan}")]
    MissingVersion { plan: String },

    /// A `load_var` file that does not decode in its format.
    #[error("failed to parse {file} in format {format}: {cause}")]
    ParseVarFile {
        file: String,
        format: String,
        cause: String,
    },

    /// A `load_var` file larger than the configured limit.
    #[error("file {file} exceeds {limit} bytes")]
    VarFileTooLarge { file: String, limit: u64 },

    /// The resource script exited 0 but its output was not a version result.
    #[error("malformed version result: {cause}")]
    MalformedVersionResult { cause: String },

    /// The fetch container has no volume mounted at the resource directory.
    #[error("no volume mounted at {path}")]
    NoResourceMount { path: String },
}

/// Result type for fallible helpers that only produce [`ExecError`].
pub type ExecResult<T> = std::result::Result<T, ExecError>;

/// Whether `err` was caused by the build being aborted.
pub fn is_aborted(err: &anyhow::Error) -> bool {
    context_error(err) == Some(ContextError::Canceled)
}

/// Whether `err` was caused by a deadline passing.
pub fn is_deadline_exceeded(err: &anyhow::Error) -> bool {
    context_error(err) == Some(ContextError::DeadlineExceeded)
}

/// The first [`ContextError`] in the chain of `err`, if any.
pub fn context_error(err: &anyhow::Error) -> Option<ContextError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ContextError>())
        .copied()
}
