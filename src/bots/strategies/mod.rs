//! Transformation strategies, one per job type.
//!
//! | Strategy            | Reads                              | Writes                         |
//! |---------------------|------------------------------------|--------------------------------|
//! | `dependency_update` | package.json / Cargo.toml / reqs   | version strings in the manifest|
//! | `security_scan`     | source files by extension          | report + optional fixes        |
//! | `module_update`     | one directory or glob              | generator edits                |
//! | `custom`            | optional globs                     | generator edits                |
//!
//! Every strategy follows the same shape: collect input, send one bounded
//! prompt, parse a JSON reply, apply edits, return a [`StrategyOutput`].

pub mod custom;
pub mod dependency_update;
pub mod edits;
pub mod files;
pub mod module_update;
pub mod security_scan;

use std::path::Path;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::generator::{GenerationRequest, PromptLimits, TextGenerator};
use super::models::JobType;
use crate::errors::PipelineError;
use crate::util::extract_json_object;

pub use custom::CustomStrategy;
pub use dependency_update::DependencyUpdateStrategy;
pub use edits::{ChangeSet, FileEdit};
pub use module_update::ModuleUpdateStrategy;
pub use security_scan::SecurityScanStrategy;

/// What a strategy hands back to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyOutput {
    pub summary: String,
    /// Name-status listing of the files the strategy changed.
    pub diff: String,
    pub analysis: String,
}

/// Inputs shared by every strategy execution.
pub struct StrategyContext<'a> {
    pub workspace: &'a Path,
    pub generator: &'a dyn TextGenerator,
    pub limits: PromptLimits,
}

#[derive(Debug, Clone)]
pub enum Strategy {
    DependencyUpdate(DependencyUpdateStrategy),
    SecurityScan(SecurityScanStrategy),
    ModuleUpdate(ModuleUpdateStrategy),
    Custom(CustomStrategy),
}

impl Strategy {
    /// Build the strategy for a job. Fails when the job's configuration does
    /// not fit its type.
    pub fn from_job(job_type: JobType, configuration: &serde_json::Value) -> Result<Self, String> {
        let strategy = match job_type {
            JobType::DependencyUpdate => {
                Self::DependencyUpdate(DependencyUpdateStrategy::from_config(parse_config(configuration)?)?)
            }
            JobType::SecurityScan => {
                Self::SecurityScan(SecurityScanStrategy::from_config(parse_config(configuration)?)?)
            }
            JobType::ModuleUpdate => {
                Self::ModuleUpdate(ModuleUpdateStrategy::from_config(parse_config(configuration)?)?)
            }
            JobType::Custom => Self::Custom(CustomStrategy::from_config(parse_config(configuration)?)?),
        };
        Ok(strategy)
    }

    pub fn job_type(&self) -> JobType {
        match self {
            Self::DependencyUpdate(_) => JobType::DependencyUpdate,
            Self::SecurityScan(_) => JobType::SecurityScan,
            Self::ModuleUpdate(_) => JobType::ModuleUpdate,
            Self::Custom(_) => JobType::Custom,
        }
    }

    pub async fn execute(&self, ctx: &StrategyContext<'_>) -> Result<StrategyOutput, PipelineError> {
        match self {
            Self::DependencyUpdate(s) => s.execute(ctx).await,
            Self::SecurityScan(s) => s.execute(ctx).await,
            Self::ModuleUpdate(s) => s.execute(ctx).await,
            Self::Custom(s) => s.execute(ctx).await,
        }
    }
}

fn parse_config<T: DeserializeOwned>(configuration: &serde_json::Value) -> Result<T, String> {
    let value = if configuration.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        configuration.clone()
    };
    serde_json::from_value(value).map_err(|e| format!("invalid configuration: {}", e))
}

/// The reply shape shared by the edit-producing strategies.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct GeneratedChanges {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub edits: Vec<FileEdit>,
}

/// Send one bounded prompt and parse the first JSON object in the reply.
pub(crate) async fn ask<T: DeserializeOwned>(
    ctx: &StrategyContext<'_>,
    system: &str,
    prompt: String,
) -> Result<T, PipelineError> {
    let request = GenerationRequest {
        system: system.to_string(),
        prompt: ctx.limits.bound_prompt(prompt),
        max_tokens: ctx.limits.max_tokens,
    };
    let reply = ctx
        .generator
        .generate(&request)
        .await
        .map_err(|e| PipelineError::Transformation(format!("generator failed: {:#}", e)))?;

    let json = extract_json_object(&reply).ok_or_else(|| {
        PipelineError::Transformation("generator reply contained no JSON object".to_string())
    })?;
    serde_json::from_str(&json)
        .map_err(|e| PipelineError::Transformation(format!("unexpected generator reply: {}", e)))
}

/// Apply edits on the blocking pool.
pub(crate) async fn apply_edits(workspace: &Path, edits: Vec<FileEdit>) -> Result<ChangeSet, PipelineError> {
    let root = workspace.to_path_buf();
    tokio::task::spawn_blocking(move || edits::apply_edits(&root, &edits))
        .await
        .map_err(|e| PipelineError::Internal(format!("edit task panicked: {}", e)))?
}

/// Fail when the workspace vanished under a running strategy.
pub(crate) fn require_workspace(workspace: &Path) -> Result<(), PipelineError> {
    if workspace.is_dir() {
        Ok(())
    } else {
        Err(PipelineError::Workspace(format!(
            "workspace {} no longer exists",
            workspace.display()
        )))
    }
}

/// Build the output for strategies whose reply is a [`GeneratedChanges`].
pub(crate) fn output_from_changes(
    reply: GeneratedChanges,
    changes: &ChangeSet,
    fallback_summary: String,
) -> StrategyOutput {
    let summary = if reply.summary.trim().is_empty() {
        fallback_summary
    } else {
        reply.summary.trim().to_string()
    };
    StrategyOutput {
        summary,
        diff: changes.render(),
        analysis: reply.analysis.trim().to_string(),
    }
}
