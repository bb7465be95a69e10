//! Engine configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Settings shared by every step of a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Directory under which fetch containers place their resources.
    #[serde(default = "default_resources_root")]
    pub resources_root: PathBuf,

    /// Directory holding a resource type's `in`/`out`/`check` scripts.
    #[serde(default = "default_resource_script_dir")]
    pub resource_script_dir: PathBuf,

    /// Propagate W3C trace context into fetch processes.
    #[serde(default)]
    pub tracing: bool,

    /// Largest file `load_var` will read.
    #[serde(default = "default_max_var_file_bytes")]
    pub max_var_file_bytes: u64,

    /// Track credentials for redaction in step output.
    #[serde(default = "default_enable_redaction")]
    pub enable_redaction: bool,
}

fn default_resources_root() -> PathBuf {
    PathBuf::from("/tmp/build")
}

fn default_resource_script_dir() -> PathBuf {
    PathBuf::from("/opt/resource")
}

fn default_max_var_file_bytes() -> u64 {
    1024 * 1024
}

fn default_enable_redaction() -> bool {
    true
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            resources_root: default_resources_root(),
            resource_script_dir: default_resource_script_dir(),
            tracing: false,
            max_var_file_bytes: default_max_var_file_bytes(),
            enable_redaction: default_enable_redaction(),
        }
    }
}

impl ExecConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `CONVEYOR_RESOURCES_ROOT` | Root of fetched resources in containers |
    /// | `CONVEYOR_RESOURCE_SCRIPT_DIR` | Location of resource scripts |
    /// | `CONVEYOR_TRACING` | Propagate trace context (`1`/`true`) |
    /// | `CONVEYOR_MAX_VAR_FILE_BYTES` | Size limit for `load_var` |
    /// | `CONVEYOR_ENABLE_REDACTION` | Redact credentials (`0`/`false` to disable) |
    pub fn from_env() -> Self {
        Self {
            resources_root: std::env::var("CONVEYOR_RESOURCES_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_resources_root()),
            resource_script_dir: std::env::var("CONVEYOR_RESOURCE_SCRIPT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_resource_script_dir()),
            tracing: std::env::var("CONVEYOR_TRACING")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            max_var_file_bytes: std::env::var("CONVEYOR_MAX_VAR_FILE_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_max_var_file_bytes),
            enable_redaction: std::env::var("CONVEYOR_ENABLE_REDACTION")
                .map(|v| !(v == "0" || v.eq_ignore_ascii_case("false")))
                .unwrap_or_else(|_| default_enable_redaction()),
        }
    }

    /// Set the resources root.
    pub fn with_resources_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.resources_root = root.into();
        self
    }

    /// Set the resource script directory.
    pub fn with_resource_script_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resource_script_dir = dir.into();
        self
    }

    /// Enable trace propagation.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.tracing = enabled;
        self
    }

    /// Set the `load_var` size limit.
    pub fn with_max_var_file_bytes(mut self, limit: u64) -> Self {
        self.max_var_file_bytes = limit;
        self
    }

    /// Enable or disable credential redaction.
    pub fn with_enable_redaction(mut self, enabled: bool) -> Self {
        self.enable_redaction = enabled;
        self
    }

    /// Directory a `get` step fetches into, e.g. `/tmp/build/get`.
    pub fn get_resource_dir(&self) -> PathBuf {
        self.resources_root.join("get")
    }

    /// Path of the resource `in` script.
    pub fn in_script(&self) -> PathBuf {
        self.resource_script_dir.join("in")
    }
}
