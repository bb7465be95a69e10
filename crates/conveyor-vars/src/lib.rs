//! Variables for Conveyor build plans.
//!
//! This crate provides:
//!
//! - [`Reference`] parsing for `[source:]path[.field...]`
//! - [`Variables`] sources ([`StaticVariables`], [`BuildVariables`])
//! - `((var))` interpolation over JSON values ([`interpolate`])
//! - Redaction tracking of sensitive values ([`CredVarsTracker`])
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use conveyor_vars::{interpolate, BuildVariables, StaticVariables};
//! use serde_json::json;
//!
//! let creds = StaticVariables::new().with("token", "s3cr3t");
//! let vars = BuildVariables::new(Arc::new(creds), true);
//!
//! let source = interpolate(&json!({"auth": "((token))"}), &vars).unwrap();
//! assert_eq!(source, json!({"auth": "s3cr3t"}));
//! assert_eq!(vars.redact("auth=s3cr3t"), "auth=((redacted))");
//! ```

pub mod error;
pub mod reference;
pub mod template;
pub mod tracker;
pub mod variables;

pub use error::{VarsError, VarsResult};
pub use reference::{Reference, LOCAL_SOURCE};
pub use template::{interpolate, interpolate_map};
pub use tracker::{CredVarsTracker, TrackedVarsIterator, TrackedVarsMap, REDACTED};
pub use variables::{BuildVariables, StaticVariables, Variables};
