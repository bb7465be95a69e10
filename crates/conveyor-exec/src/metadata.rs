//! Build metadata handed to containers and processes.

use serde::{Deserialize, Serialize};

use crate::plan::PlanId;

/// Identity of the build a step belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMetadata {
    pub build_id: i64,
    pub build_name: String,
    pub team_id: i64,
    pub team_name: String,
    #[serde(default)]
    pub pipeline_id: i64,
    #[serde(default)]
    pub pipeline_name: String,
    /// JSON-encoded instance vars of the pipeline, if any.
    #[serde(default)]
    pub pipeline_instance_vars: String,
    #[serde(default)]
    pub job_id: i64,
    #[serde(default)]
    pub job_name: String,
    #[serde(default)]
    pub external_url: String,
    #[serde(default)]
    pub created_by: String,
}

impl StepMetadata {
    /// `KEY=value` pairs exposed to resource scripts. Unset fields are omitted.
    pub fn env(&self) -> Vec<String> {
        let mut env = Vec::new();

        if self.build_id != 0 {
            env.push(format!("BUILD_ID={}", self.build_id));
        }
        if !self.build_name.is_empty() {
            env.push(format!("BUILD_NAME={}", self.build_name));
        }
        if self.team_id != 0 {
            env.push(format!("BUILD_TEAM_ID={}", self.team_id));
        }
        if !self.team_name.is_empty() {
            env.push(format!("BUILD_TEAM_NAME={}", self.team_name));
        }
        if self.pipeline_id != 0 {
            env.push(format!("BUILD_PIPELINE_ID={}", self.pipeline_id));
        }
        if !self.pipeline_name.is_empty() {
            env.push(format!("BUILD_PIPELINE_NAME={}", self.pipeline_name));
        }
        if !self.pipeline_instance_vars.is_empty() {
            env.push(format!(
                "BUILD_PIPELINE_INSTANCE_VARS={}",
                self.pipeline_instance_vars
            ));
        }
        if self.job_id != 0 {
            env.push(format!("BUILD_JOB_ID={}", self.job_id));
        }
        if !self.job_name.is_empty() {
            env.push(format!("BUILD_JOB_NAME={}", self.job_name));
        }
        if !self.external_url.is_empty() {
            env.push(format!("ATC_EXTERNAL_URL={}", self.external_url));
        }
        if !self.created_by.is_empty() {
            env.push(format!("BUILD_CREATED_BY={}", self.created_by));
        }

        env
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    Check,
    Get,
    Put,
    Task,
}

/// Labels recorded on a container for operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_type: Option<ContainerType>,
    #[serde(default)]
    pub step_name: String,
    #[serde(default)]
    pub pipeline_name: String,
    #[serde(default)]
    pub job_name: String,
    #[serde(default)]
    pub build_name: String,
    #[serde(default)]
    pub working_directory: String,
}

/// Who a container belongs to. The same owner always maps to the same
/// container, so re-running a plan within a build reuses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerOwner {
    BuildStep {
        build_id: i64,
        plan_id: PlanId,
        team_id: i64,
    },
}

impl ContainerOwner {
    pub fn build_step(build_id: i64, plan_id: PlanId, team_id: i64) -> Self {
        Self::BuildStep {
            build_id,
            plan_id,
            team_id,
        }
    }
}
