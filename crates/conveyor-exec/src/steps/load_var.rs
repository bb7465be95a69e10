//! The `load_var` step: read a file from an artifact into a build-local var.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tracing::{debug, Instrument};

use crate::artifact::ArtifactName;
use crate::config::ExecConfig;
use crate::context::ExecContext;
use crate::delegate::BuildStepDelegateFactory;
use crate::error::{ExecError, ExecResult};
use crate::plan::{LoadVarPlan, PlanId};
use crate::run_state::RunState;
use crate::runtime::ArtifactClient;
use crate::steps::Step;

/// How a var file is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarFormat {
    /// Text with surrounding whitespace removed.
    Trim,
    /// Text as-is.
    Raw,
    Json,
    Yaml,
}

impl VarFormat {
    /// Parse an explicit `format:` value. `yml` is accepted for YAML.
    pub fn parse(format: &str) -> ExecResult<Self> {
        match format {
            "trim" => Ok(Self::Trim),
            "raw" => Ok(Self::Raw),
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(ExecError::InvalidFormat(other.to_string())),
        }
    }

    /// Infer the format from a file extension; unknown extensions are `trim`.
    pub fn from_path(path: &str) -> Self {
        Self::infer(path).0
    }

    /// Inferred format together with the name it is reported under, which is
    /// the extension itself when it names a format.
    fn infer(path: &str) -> (Self, &str) {
        let ext = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
        match ext {
            "json" => (Self::Json, ext),
            "yml" | "yaml" => (Self::Yaml, ext),
            _ => (Self::Trim, "trim"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trim => "trim",
            Self::Raw => "raw",
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }

    /// Decode file contents into a value.
    pub fn decode(&self, bytes: &[u8]) -> Result<Value, String> {
        match self {
            Self::Trim => Ok(Value::String(String::from_utf8_lossy(bytes).trim().to_string())),
            Self::Raw => Ok(Value::String(String::from_utf8_lossy(bytes).into_owned())),
            Self::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
            Self::Yaml => serde_yaml::from_slice(bytes).map_err(|e| e.to_string()),
        }
    }
}

impl fmt::Display for VarFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loads a var from a file produced by an earlier step.
pub struct LoadVarStep {
    plan_id: PlanId,
    plan: LoadVarPlan,
    delegate_factory: Arc<dyn BuildStepDelegateFactory>,
    client: Arc<dyn ArtifactClient>,
    config: Arc<ExecConfig>,
}

impl LoadVarStep {
    pub fn new(
        plan_id: PlanId,
        plan: LoadVarPlan,
        delegate_factory: Arc<dyn BuildStepDelegateFactory>,
        client: Arc<dyn ArtifactClient>,
        config: Arc<ExecConfig>,
    ) -> Self {
        Self {
            plan_id,
            plan,
            delegate_factory,
            client,
            config,
        }
    }

    /// Explicit format and the name reported in decode errors.
    fn format(&self) -> ExecResult<(VarFormat, String)> {
        match self.plan.format.as_deref() {
            Some(explicit) if !explicit.is_empty() => {
                Ok((VarFormat::parse(explicit)?, explicit.to_string()))
            }
            _ => {
                let (format, name) = VarFormat::infer(&self.plan.file);
                Ok((format, name.to_string()))
            }
        }
    }

    async fn fetch_value(&self, ctx: &ExecContext, state: &RunState) -> anyhow::Result<Value> {
        let (format, format_name) = self.format()?;

        let (artifact_name, path) =
            self.plan
                .file
                .split_once('/')
                .ok_or_else(|| ExecError::UnspecifiedArtifactSource {
                    path: self.plan.file.clone(),
                })?;

        let artifact = state
            .artifact_repository()
            .artifact_for(&ArtifactName::new(artifact_name))
            .ok_or_else(|| ExecError::UnknownArtifactSource {
                name: artifact_name.to_string(),
                path: self.plan.file.clone(),
            })?;

        debug!(plan_id = %self.plan_id, artifact = artifact_name, path, %format, "loading var file");
        let limit = self.config.max_var_file_bytes;
        let bytes = ctx
            .run(async {
                let reader = self
                    .client
                    .stream_file_from_artifact(ctx, artifact.as_ref(), path)
                    .await
                    .with_context(|| format!("stream {path} from artifact {artifact_name}"))?;
                let mut bytes = Vec::new();
                reader
                    .take(limit.saturating_add(1))
                    .read_to_end(&mut bytes)
                    .await
                    .with_context(|| format!("read {path} from artifact {artifact_name}"))?;
                Ok::<_, anyhow::Error>(bytes)
            })
            .await??;

        if bytes.len() as u64 > limit {
            return Err(ExecError::VarFileTooLarge {
                file: self.plan.file.clone(),
                limit,
            }
            .into());
        }

        format.decode(&bytes).map_err(|cause| {
            ExecError::ParseVarFile {
                file: self.plan.file.clone(),
                format: format_name,
                cause,
            }
            .into()
        })
    }
}

#[async_trait]
impl Step for LoadVarStep {
    async fn run(&self, ctx: &ExecContext, state: &RunState) -> anyhow::Result<bool> {
        let delegate = self.delegate_factory.build_step_delegate(state, &self.plan_id);
        delegate.initializing();

        let (ctx, span) =
            delegate.start_span(ctx, "load_var", &[("name", self.plan.name.as_str())]);

        let res = async {
            delegate.starting();
            let value = self.fetch_value(&ctx, state).await?;
            state.add_local_var(&self.plan.name, value, !self.plan.reveal);

            let mut stdout = delegate.stdout();
            writeln!(stdout, "var {} fetched.", self.plan.name)?;
            stdout.flush()?;

            delegate.finished(true);
            Ok::<_, anyhow::Error>(true)
        }
        .instrument(span.span().clone())
        .await;

        if let Err(err) = &res {
            span.record_error(err);
        }
        res
    }
}
