//! Compiled build plans.
//!
//! A plan is produced once per build by pipeline compilation and never
//! mutated afterwards. Each node carries a [`PlanId`] that keys step results
//! and container identity.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resource::{Params, Source, Tags, Version, VersionedResourceTypes};

/// Identity of one plan node within a build.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(pub String);

impl PlanId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlanId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// One node of a build plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    #[serde(flatten)]
    pub kind: PlanKind,
}

impl Plan {
    pub fn new(id: impl Into<String>, kind: PlanKind) -> Self {
        Self {
            id: PlanId::new(id),
            kind,
        }
    }

    /// Short name of the step kind, used in logs.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            PlanKind::Get(_) => "get",
            PlanKind::LoadVar(_) => "load_var",
            PlanKind::Do(_) => "do",
            PlanKind::InParallel(_) => "in_parallel",
            PlanKind::Try(_) => "try",
            PlanKind::Timeout(_) => "timeout",
            PlanKind::OnSuccess(_) => "on_success",
            PlanKind::OnFailure(_) => "on_failure",
            PlanKind::OnError(_) => "on_error",
            PlanKind::OnAbort(_) => "on_abort",
            PlanKind::Ensure(_) => "ensure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    Get(GetPlan),
    LoadVar(LoadVarPlan),
    Do(Vec<Plan>),
    InParallel(InParallelPlan),
    Try(TryPlan),
    Timeout(TimeoutPlan),
    OnSuccess(HookPlan),
    OnFailure(HookPlan),
    OnError(HookPlan),
    OnAbort(HookPlan),
    Ensure(HookPlan),
}

/// Fetch one version of a resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetPlan {
    /// Artifact name the fetched resource is registered under.
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    /// Pipeline resource name; empty for anonymous fetches.
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub params: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    /// Take the version from the result of an earlier plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_from: Option<PlanId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Tags,
    /// Duration string such as `"30s"` or `"1h30m"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default)]
    pub resource_types: VersionedResourceTypes,
}

/// Read a file from an artifact into a build-local var.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadVarPlan {
    pub name: String,
    /// `<artifact>/<path>`
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Keep the value out of redaction.
    #[serde(default)]
    pub reveal: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InParallelPlan {
    pub steps: Vec<Plan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub fail_fast: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TryPlan {
    pub step: Box<Plan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutPlan {
    pub duration: String,
    pub step: Box<Plan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookPlan {
    pub step: Box<Plan>,
    pub next: Box<Plan>,
}
