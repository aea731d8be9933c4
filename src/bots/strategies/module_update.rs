//! `module_update`: rework one module (a directory, a file or a glob).

use std::path::PathBuf;

use serde::Deserialize;

use super::files::{compile_patterns, glob_files, list_files, render_excerpts};
use super::{
    GeneratedChanges, StrategyContext, StrategyOutput, apply_edits, ask, output_from_changes,
    require_workspace,
};
use super::edits::resolve_path;
use crate::errors::PipelineError;

const SYSTEM_PROMPT: &str = "You are a code maintenance bot updating a single module. \
Keep changes focused on the module and preserve public behaviour unless told otherwise. \
Respond with a single JSON object: {\"summary\": string, \"analysis\": string, \
\"edits\": [{\"action\": \"write\", \"path\": string, \"content\": string} | \
{\"action\": \"replace\", \"path\": string, \"find\": string, \"replace\": string} | \
{\"action\": \"delete\", \"path\": string}]}. Paths are relative to the repository root.";

#[derive(Debug, Clone, Deserialize)]
pub struct ModuleUpdateConfig {
    /// Directory, file or glob relative to the repository root
    pub module: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub target_version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModuleUpdateStrategy {
    config: ModuleUpdateConfig,
}

impl ModuleUpdateStrategy {
    pub fn from_config(config: ModuleUpdateConfig) -> Result<Self, String> {
        if config.module.trim().is_empty() {
            return Err("module must not be empty".to_string());
        }
        compile_patterns(std::slice::from_ref(&config.module))?;
        Ok(Self { config })
    }

    fn module_files(&self, root: &std::path::Path) -> Result<Vec<PathBuf>, PipelineError> {
        let module = self.config.module.trim_end_matches('/');
        if let Ok(target) = resolve_path(root, module) {
            if target.is_file() {
                return Ok(vec![PathBuf::from(module)]);
            }
            if target.is_dir() {
                return Ok(list_files(&target)
                    .into_iter()
                    .map(|rel| PathBuf::from(module).join(rel))
                    .collect());
            }
        }
        let patterns = compile_patterns(&[module.to_string()]).map_err(PipelineError::Transformation)?;
        Ok(glob_files(root, &patterns))
    }

    pub async fn execute(&self, ctx: &StrategyContext<'_>) -> Result<StrategyOutput, PipelineError> {
        require_workspace(ctx.workspace)?;
        let files = self.module_files(ctx.workspace)?;
        if files.is_empty() {
            return Err(PipelineError::Transformation(format!(
                "module '{}' matched no files",
                self.config.module
            )));
        }

        let mut prompt = format!("Module: `{}`\n", self.config.module);
        if let Some(version) = &self.config.target_version {
            prompt.push_str(&format!("Target version: {}\n", version));
        }
        match &self.config.instructions {
            Some(instructions) => prompt.push_str(&format!("Instructions: {}\n", instructions)),
            None => prompt.push_str(
                "Instructions: modernize the module, remove deprecated APIs and fix obvious defects.\n",
            ),
        }
        let budget = ctx.limits.max_prompt_chars.saturating_sub(prompt.len() + SYSTEM_PROMPT.len());
        prompt.push_str("\nFiles:\n\n");
        prompt.push_str(&render_excerpts(ctx.workspace, &files, &ctx.limits, budget));

        let mut reply: GeneratedChanges = ask(ctx, SYSTEM_PROMPT, prompt).await?;
        let edits = std::mem::take(&mut reply.edits);
        let edit_count = edits.len();
        let changes = apply_edits(ctx.workspace, edits).await?;
        Ok(output_from_changes(
            reply,
            &changes,
            format!("Updated module {} ({} edits)", self.config.module, edit_count),
        ))
    }
}
