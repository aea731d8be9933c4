//! `security_scan`: review source files and write a findings report.

use serde::Deserialize;

use super::edits::{ChangeKind, FileEdit, check_relative};
use super::files::{files_with_extensions, render_excerpts};
use super::{StrategyContext, StrategyOutput, apply_edits, ask, require_workspace};
use crate::errors::PipelineError;

const SYSTEM_PROMPT: &str = "You are an application security reviewer. Inspect the \
provided source files for vulnerabilities (injection, hard-coded secrets, unsafe \
deserialization, missing authorization, weak cryptography). Respond with a single JSON \
object: {\"summary\": string, \"analysis\": string, \"findings\": [{\"file\": string, \
\"line\": number|null, \"severity\": \"critical\"|\"high\"|\"medium\"|\"low\", \
\"title\": string, \"recommendation\": string}], \"edits\": [{\"action\": \
\"write\"|\"replace\"|\"delete\", \"path\": string, ...}]}. Only include edits for \
fixes that are safe to apply mechanically.";

fn default_extensions() -> Vec<String> {
    [
        "rs", "go", "py", "js", "jsx", "ts", "tsx", "java", "kt", "rb", "php", "cs", "c", "cpp",
        "h", "swift", "scala", "sh", "sql", "yml", "yaml", "toml", "json",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_files() -> usize {
    40
}

fn default_report_path() -> String {
    "SECURITY_REPORT.md".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityScanConfig {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// Apply the generator's proposed fixes in addition to the report
    #[serde(default)]
    pub apply_fixes: bool,
    #[serde(default = "default_report_path")]
    pub report_path: String,
}

impl Default for SecurityScanConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            max_files: default_max_files(),
            apply_fixes: false,
            report_path: default_report_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Finding {
    pub file: String,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default = "default_severity")]
    pub severity: String,
    pub title: String,
    #[serde(default)]
    pub recommendation: String,
}

fn default_severity() -> String {
    "medium".to_string()
}

#[derive(Debug, Deserialize)]
struct ScanReply {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    analysis: String,
    #[serde(default)]
    findings: Vec<Finding>,
    #[serde(default)]
    edits: Vec<FileEdit>,
}

#[derive(Debug, Clone)]
pub struct SecurityScanStrategy {
    config: SecurityScanConfig,
}

impl SecurityScanStrategy {
    pub fn from_config(config: SecurityScanConfig) -> Result<Self, String> {
        if config.max_files == 0 {
            return Err("max_files must be at least 1".to_string());
        }
        if config.extensions.is_empty() {
            return Err("extensions must not be empty".to_string());
        }
        check_relative(&config.report_path)
            .map_err(|_| format!("invalid report_path '{}'", config.report_path))?;
        Ok(Self { config })
    }

    pub async fn execute(&self, ctx: &StrategyContext<'_>) -> Result<StrategyOutput, PipelineError> {
        require_workspace(ctx.workspace)?;
        let root = ctx.workspace.to_path_buf();
        let extensions = self.config.extensions.clone();
        let mut files = tokio::task::spawn_blocking(move || files_with_extensions(&root, &extensions))
            .await
            .map_err(|e| PipelineError::Internal(format!("file scan panicked: {}", e)))?;
        if files.is_empty() {
            return Err(PipelineError::Transformation(
                "no source files matched the configured extensions".to_string(),
            ));
        }
        let scanned = files.len().min(self.config.max_files);
        files.truncate(scanned);

        let budget = ctx.limits.max_prompt_chars.saturating_sub(SYSTEM_PROMPT.len() + 200);
        let prompt = format!(
            "Review these {} files for security issues:\n\n{}",
            scanned,
            render_excerpts(ctx.workspace, &files, &ctx.limits, budget)
        );
        let reply: ScanReply = ask(ctx, SYSTEM_PROMPT, prompt).await?;

        let mut edits = vec![FileEdit::Write {
            path: self.config.report_path.clone(),
            content: render_report(&reply.findings, scanned),
        }];
        let proposed_fixes = reply.edits.len();
        if self.config.apply_fixes {
            edits.extend(
                reply
                    .edits
                    .into_iter()
                    .filter(|e| e.path() != self.config.report_path),
            );
        }
        let changes = apply_edits(ctx.workspace, edits).await?;

        let high = reply
            .findings
            .iter()
            .filter(|f| matches!(f.severity.to_lowercase().as_str(), "critical" | "high"))
            .count();
        let fixed = changes.len()
            - usize::from(changes.get(&self.config.report_path).is_some_and(|k| k != ChangeKind::Deleted));
        let summary = if reply.summary.trim().is_empty() {
            format!(
                "Security scan of {} files: {} findings ({} high or critical)",
                scanned,
                reply.findings.len(),
                high
            )
        } else {
            reply.summary.trim().to_string()
        };

        let mut analysis = reply.analysis.trim().to_string();
        if self.config.apply_fixes {
            analysis.push_str(&format!("\nApplied fixes to {} files.", fixed));
        } else if proposed_fixes > 0 {
            analysis.push_str(&format!(
                "\n{} proposed fixes not applied (apply_fixes is off).",
                proposed_fixes
            ));
        }

        Ok(StrategyOutput {
            summary,
            diff: changes.render(),
            analysis: analysis.trim().to_string(),
        })
    }
}

fn render_report(findings: &[Finding], scanned: usize) -> String {
    let mut report = format!(
        "# Security Report\n\nScanned {} files. {} findings.\n",
        scanned,
        findings.len()
    );
    if findings.is_empty() {
        report.push_str("\nNo issues found.\n");
        return report;
    }
    report.push_str("\n| Severity | Location | Issue |\n|---|---|---|\n");
    for f in findings {
        let location = match f.line {
            Some(line) => format!("{}:{}", f.file, line),
            None => f.file.clone(),
        };
        report.push_str(&format!(
            "| {} | `{}` | {} |\n",
            f.severity.to_lowercase(),
            location,
            f.title.replace('|', "\\|")
        ));
    }
    report.push_str("\n## Recommendations\n");
    for f in findings.iter().filter(|f| !f.recommendation.is_empty()) {
        report.push_str(&format!("\n- **{}**: {}\n", f.title, f.recommendation));
    }
    report
}
