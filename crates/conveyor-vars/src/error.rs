//! Error types for variable resolution.

/// Variable resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VarsError {
    /// The textual reference could not be parsed.
    #[error("invalid var reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    /// The variable exists but a requested field does not.
    #[error("missing field '{field}' in var: {reference}")]
    MissingField { reference: String, field: String },

    /// One or more referenced variables are not defined anywhere.
    #[error("undefined vars: {}", names.join(", "))]
    Undefined { names: Vec<String> },
}

/// Result type for variable operations.
pub type VarsResult<T> = Result<T, VarsError>;
