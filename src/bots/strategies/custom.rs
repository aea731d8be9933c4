//! `custom`: free-form instructions supplied with the job.

use serde::Deserialize;

use super::files::{compile_patterns, glob_files, list_files, render_excerpts, render_listing};
use super::{
    GeneratedChanges, StrategyContext, StrategyOutput, apply_edits, ask, output_from_changes,
    require_workspace,
};
use crate::errors::PipelineError;

const SYSTEM_PROMPT: &str = "You are a code modification bot working in a git repository. \
Carry out the user's instructions with minimal, focused changes. Respond with a single \
JSON object: {\"summary\": string, \"analysis\": string, \"edits\": [{\"action\": \
\"write\", \"path\": string, \"content\": string} | {\"action\": \"replace\", \"path\": \
string, \"find\": string, \"replace\": string} | {\"action\": \"delete\", \"path\": \
string}]}. Paths are relative to the repository root.";

/// Share of the prompt budget given to the file listing when no globs are set.
const LISTING_BUDGET_DIVISOR: usize = 4;

#[derive(Debug, Clone, Deserialize)]
pub struct CustomConfig {
    pub prompt: String,
    /// Globs selecting files whose contents are sent along
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CustomStrategy {
    prompt: String,
    patterns: Vec<glob::Pattern>,
}

impl CustomStrategy {
    pub fn from_config(config: CustomConfig) -> Result<Self, String> {
        if config.prompt.trim().is_empty() {
            return Err("prompt must not be empty".to_string());
        }
        let patterns = compile_patterns(&config.files)?;
        Ok(Self {
            prompt: config.prompt,
            patterns,
        })
    }

    pub async fn execute(&self, ctx: &StrategyContext<'_>) -> Result<StrategyOutput, PipelineError> {
        require_workspace(ctx.workspace)?;
        let mut prompt = format!("Instructions:\n{}\n\n", self.prompt.trim());
        let budget = ctx
            .limits
            .max_prompt_chars
            .saturating_sub(prompt.len() + SYSTEM_PROMPT.len());

        if self.patterns.is_empty() {
            let files = list_files(ctx.workspace);
            prompt.push_str("Repository files:\n");
            prompt.push_str(&render_listing(&files, budget / LISTING_BUDGET_DIVISOR));
        } else {
            let files = glob_files(ctx.workspace, &self.patterns);
            prompt.push_str("Relevant files:\n\n");
            prompt.push_str(&render_excerpts(ctx.workspace, &files, &ctx.limits, budget));
        }

        let mut reply: GeneratedChanges = ask(ctx, SYSTEM_PROMPT, prompt).await?;
        let edits = std::mem::take(&mut reply.edits);
        let edit_count = edits.len();
        let changes = apply_edits(ctx.workspace, edits).await?;
        Ok(output_from_changes(
            reply,
            &changes,
            format!("Applied {} edits", edit_count),
        ))
    }
}
