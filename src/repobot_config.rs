//! Configuration for repobot.
//!
//! Settings are read from `.repobot/repobot.toml` and layered
//! file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [orchestrator]
//! max_concurrent_runs = 4
//! branch_namespace = "repobot"
//! workspace_root = ".repobot/workspaces"
//!
//! [timeouts]
//! clone_secs = 300
//! branch_secs = 30
//! transform_secs = 900
//! push_secs = 300
//!
//! [generator]
//! backend = "cli"          # or "anthropic"
//! command = "claude"
//! model = "claude-sonnet-4-5"
//! max_prompt_chars = 60000
//!
//! [git]
//! author_name = "repobot"
//! author_email = "repobot@localhost"
//!
//! [commit]
//! analysis_excerpt_chars = 400
//! log_excerpt_chars = 200
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bots::generator::PromptLimits;
use crate::bots::git::GitAuthor;
use crate::bots::orchestrator::OrchestratorConfig;
use crate::bots::pipeline::StageTimeouts;

/// Name of the per-project state directory.
pub const REPOBOT_DIR: &str = ".repobot";

/// Bounds accepted for the analysis excerpt embedded in commit messages.
const EXCERPT_RANGE: std::ops::RangeInclusive<usize> = 200..=500;

/// Admission and workspace settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSection {
    /// Maximum number of runs executing at once
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    /// Prefix for generated branch names
    #[serde(default = "default_branch_namespace")]
    pub branch_namespace: String,
    /// Scratch directory root (relative paths resolve against the project dir)
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    /// How long `serve` waits for in-flight runs on shutdown
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_max_concurrent_runs() -> usize {
    4
}

fn default_branch_namespace() -> String {
    "repobot".to_string()
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent_runs(),
            branch_namespace: default_branch_namespace(),
            workspace_root: None,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// Per-stage timeouts in seconds. Zero disables the timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsSection {
    #[serde(default = "default_clone_secs")]
    pub clone_secs: u64,
    #[serde(default = "default_branch_secs")]
    pub branch_secs: u64,
    #[serde(default = "default_transform_secs")]
    pub transform_secs: u64,
    #[serde(default = "default_push_secs")]
    pub push_secs: u64,
}

fn default_clone_secs() -> u64 {
    300
}

fn default_branch_secs() -> u64 {
    30
}

fn default_transform_secs() -> u64 {
    900
}

fn default_push_secs() -> u64 {
    300
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            clone_secs: default_clone_secs(),
            branch_secs: default_branch_secs(),
            transform_secs: default_transform_secs(),
            push_secs: default_push_secs(),
        }
    }
}

impl TimeoutsSection {
    fn to_stage_timeouts(&self) -> StageTimeouts {
        fn secs(value: u64) -> Option<Duration> {
            (value > 0).then(|| Duration::from_secs(value))
        }
        StageTimeouts {
            clone: secs(self.clone_secs),
            branch: secs(self.branch_secs),
            transform: secs(self.transform_secs),
            push: secs(self.push_secs),
        }
    }
}

/// Which text-generation backend the strategies talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorBackend {
    /// Local `claude` CLI subprocess
    #[default]
    Cli,
    /// Anthropic Messages API over HTTP
    Anthropic,
}

impl std::fmt::Display for GeneratorBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeneratorBackend::Cli => write!(f, "cli"),
            GeneratorBackend::Anthropic => write!(f, "anthropic"),
        }
    }
}

impl std::str::FromStr for GeneratorBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cli" => Ok(GeneratorBackend::Cli),
            "anthropic" => Ok(GeneratorBackend::Anthropic),
            _ => anyhow::bail!(
                "Invalid generator backend '{}'. Valid values: cli, anthropic",
                s
            ),
        }
    }
}

/// Text generator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorSection {
    #[serde(default)]
    pub backend: GeneratorBackend,
    /// CLI command for the `cli` backend (default: "claude")
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Upper bound on the size of any prompt sent to the generator
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    /// Upper bound on each file excerpt embedded in a prompt
    #[serde(default = "default_max_file_chars")]
    pub max_file_chars: usize,
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_max_prompt_chars() -> usize {
    60_000
}

fn default_max_file_chars() -> usize {
    8_000
}

impl Default for GeneratorSection {
    fn default() -> Self {
        Self {
            backend: GeneratorBackend::default(),
            command: None,
            model: default_model(),
            base_url: default_base_url(),
            max_tokens: default_max_tokens(),
            max_prompt_chars: default_max_prompt_chars(),
            max_file_chars: default_max_file_chars(),
        }
    }
}

/// Commit identity and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSection {
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
    /// HTTPS access token (falls back to GITHUB_TOKEN)
    #[serde(default)]
    pub token: Option<String>,
}

fn default_author_name() -> String {
    "repobot".to_string()
}

fn default_author_email() -> String {
    "repobot@localhost".to_string()
}

impl Default for GitSection {
    fn default() -> Self {
        Self {
            author_name: default_author_name(),
            author_email: default_author_email(),
            token: None,
        }
    }
}

/// Excerpt sizes for commit messages and log lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitSection {
    #[serde(default = "default_analysis_excerpt_chars")]
    pub analysis_excerpt_chars: usize,
    #[serde(default = "default_log_excerpt_chars")]
    pub log_excerpt_chars: usize,
}

fn default_analysis_excerpt_chars() -> usize {
    400
}

fn default_log_excerpt_chars() -> usize {
    200
}

impl Default for CommitSection {
    fn default() -> Self {
        Self {
            analysis_excerpt_chars: default_analysis_excerpt_chars(),
            log_excerpt_chars: default_log_excerpt_chars(),
        }
    }
}

/// The complete repobot.toml configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RepobotToml {
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
    #[serde(default)]
    pub generator: GeneratorSection,
    #[serde(default)]
    pub git: GitSection,
    #[serde(default)]
    pub commit: CommitSection,
}

impl RepobotToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse repobot.toml")
    }

    /// Load `repobot.toml` from the state directory, or defaults if absent.
    pub fn load_or_default(repobot_dir: &Path) -> Result<Self> {
        let config_path = repobot_dir.join("repobot.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize repobot.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Generator CLI command (file → CLAUDE_CMD → "claude").
    pub fn generator_cmd(&self) -> String {
        self.generator
            .command
            .clone()
            .or_else(|| std::env::var("CLAUDE_CMD").ok())
            .unwrap_or_else(|| "claude".to_string())
    }

    /// Concurrency ceiling (REPOBOT_MAX_CONCURRENT overrides the file).
    pub fn max_concurrent_runs(&self) -> usize {
        std::env::var("REPOBOT_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(self.orchestrator.max_concurrent_runs)
    }

    /// Git access token (file → GITHUB_TOKEN).
    pub fn git_token(&self) -> Option<String> {
        self.git
            .token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
            .filter(|t| !t.is_empty())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.orchestrator.max_concurrent_runs == 0 {
            warnings.push(
                "max_concurrent_runs is 0: every spawn will be rejected with CapacityExceeded"
                    .to_string(),
            );
        }

        if self.orchestrator.branch_namespace.trim().is_empty()
            || self.orchestrator.branch_namespace.contains(' ')
        {
            warnings.push(format!(
                "Invalid branch_namespace '{}': must be non-empty and contain no spaces",
                self.orchestrator.branch_namespace
            ));
        }

        if !EXCERPT_RANGE.contains(&self.commit.analysis_excerpt_chars) {
            warnings.push(format!(
                "analysis_excerpt_chars {} is outside {}..={}; it will be clamped",
                self.commit.analysis_excerpt_chars,
                EXCERPT_RANGE.start(),
                EXCERPT_RANGE.end()
            ));
        }

        if self.generator.max_file_chars > self.generator.max_prompt_chars {
            warnings.push(format!(
                "max_file_chars ({}) exceeds max_prompt_chars ({})",
                self.generator.max_file_chars, self.generator.max_prompt_chars
            ));
        }

        if self.generator.backend == GeneratorBackend::Anthropic
            && std::env::var("ANTHROPIC_API_KEY").is_err()
        {
            warnings.push(
                "generator backend is 'anthropic' but ANTHROPIC_API_KEY is not set".to_string(),
            );
        }

        warnings
    }
}

/// Unified configuration combining repobot.toml with runtime settings.
///
/// Settings are merged from:
/// 1. repobot.toml file
/// 2. Environment variables
/// 3. CLI arguments
#[derive(Debug, Clone)]
pub struct RepobotConfig {
    pub project_dir: PathBuf,
    pub repobot_dir: PathBuf,
    pub toml: RepobotToml,
    pub verbose: bool,
    /// CLI override for the concurrency ceiling
    pub cli_max_concurrent: Option<usize>,
}

impl RepobotConfig {
    /// Create a RepobotConfig from a project directory.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let repobot_dir = project_dir.join(REPOBOT_DIR);
        let toml = RepobotToml::load_or_default(&repobot_dir)?;

        Ok(Self {
            project_dir,
            repobot_dir,
            toml,
            verbose: false,
            cli_max_concurrent: None,
        })
    }

    /// Create a RepobotConfig with CLI overrides.
    pub fn with_cli_args(
        project_dir: PathBuf,
        verbose: bool,
        max_concurrent: Option<usize>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.cli_max_concurrent = max_concurrent;
        Ok(config)
    }

    /// Path to the SQLite run store.
    pub fn db_path(&self) -> PathBuf {
        self.repobot_dir.join("repobot.db")
    }

    /// Path to repobot.toml.
    pub fn config_file(&self) -> PathBuf {
        self.repobot_dir.join("repobot.toml")
    }

    /// Root under which per-run workspaces are created.
    pub fn workspace_root(&self) -> PathBuf {
        match &self.toml.orchestrator.workspace_root {
            Some(root) if root.is_absolute() => root.clone(),
            Some(root) => self.project_dir.join(root),
            None => self.repobot_dir.join("workspaces"),
        }
    }

    /// Concurrency ceiling (CLI → env → file → default).
    pub fn max_concurrent_runs(&self) -> usize {
        self.cli_max_concurrent
            .unwrap_or_else(|| self.toml.max_concurrent_runs())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.toml.orchestrator.shutdown_grace_secs)
    }

    /// Build the orchestrator settings from the merged configuration.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let commit = &self.toml.commit;
        OrchestratorConfig {
            max_concurrent_runs: self.max_concurrent_runs(),
            branch_namespace: self.toml.orchestrator.branch_namespace.clone(),
            workspace_root: self.workspace_root(),
            timeouts: self.toml.timeouts.to_stage_timeouts(),
            analysis_excerpt_chars: commit
                .analysis_excerpt_chars
                .clamp(*EXCERPT_RANGE.start(), *EXCERPT_RANGE.end()),
            log_excerpt_chars: commit.log_excerpt_chars,
            author: GitAuthor {
                name: self.toml.git.author_name.clone(),
                email: self.toml.git.author_email.clone(),
            },
            prompt_limits: PromptLimits {
                max_prompt_chars: self.toml.generator.max_prompt_chars,
                max_file_chars: self.toml.generator.max_file_chars,
                max_tokens: self.toml.generator.max_tokens,
            },
        }
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
