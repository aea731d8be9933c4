//! Text generation backends used by the transformation strategies.
//!
//! Two implementations of [`TextGenerator`]:
//! - [`ClaudeCli`] shells out to the `claude` CLI (or `CLAUDE_CMD`)
//! - [`AnthropicApi`] calls the Messages API over HTTP

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::repobot_config::{GeneratorBackend, RepobotToml};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Marker appended to any prompt or excerpt cut short by a limit.
pub const TRUNCATION_MARKER: &str = "\n[... truncated ...]";

/// Size limits applied to everything sent to a generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptLimits {
    pub max_prompt_chars: usize,
    pub max_file_chars: usize,
    pub max_tokens: u32,
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self {
            max_prompt_chars: 60_000,
            max_file_chars: 8_000,
            max_tokens: 8192,
        }
    }
}

impl PromptLimits {
    /// Clamp a full prompt to `max_prompt_chars`.
    pub fn bound_prompt(&self, prompt: String) -> String {
        truncate_with_marker(prompt, self.max_prompt_chars)
    }

    /// Clamp a single file excerpt to `max_file_chars`.
    pub fn bound_file(&self, content: &str) -> String {
        truncate_with_marker(content.to_string(), self.max_file_chars)
    }
}

fn truncate_with_marker(text: String, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text;
    }
    let keep = max_chars.saturating_sub(TRUNCATION_MARKER.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Produce a completion for `request`. The reply is raw text; callers
    /// extract whatever structure they asked for.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    fn name(&self) -> &str;
}

// ── CLI backend ──────────────────────────────────────────────────────

/// Runs `<command> --print --output-format text -p <prompt> --system <system>`.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    command: String,
    working_dir: Option<PathBuf>,
}

impl ClaudeCli {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl TextGenerator for ClaudeCli {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let mut cmd = Command::new(&self.command);
        cmd.args([
            "--print",
            "--output-format",
            "text",
            "-p",
            &request.prompt,
            "--system",
            &request.system,
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to run generator command '{}'", self.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Generator command failed: {}", stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn name(&self) -> &str {
        "cli"
    }
}

// ── HTTP backend ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<MessageParam<'a>>,
}

#[derive(Serialize)]
struct MessageParam<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

pub struct AnthropicApi {
    http: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicApi {
    pub fn new(config: AnthropicConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl TextGenerator for AnthropicApi {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens: request.max_tokens,
            system: &request.system,
            messages: vec![MessageParam {
                role: "user",
                content: &request.prompt,
            }],
        };

        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .context("Messages API request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Messages API error {}: {}", status, body);
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .context("Failed to parse Messages API response")?;

        let text = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");

        if text.is_empty() {
            anyhow::bail!("Messages API returned no text content");
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

// ── Abortable wrapper ────────────────────────────────────────────────

/// Ends an in-flight call with an error once `abort` fires. Dropping the
/// inner future kills a CLI subprocess (`kill_on_drop`) or closes the HTTP
/// request.
pub struct Abortable<'a> {
    inner: &'a dyn TextGenerator,
    abort: &'a CancellationToken,
}

impl<'a> Abortable<'a> {
    pub fn new(inner: &'a dyn TextGenerator, abort: &'a CancellationToken) -> Self {
        Self { inner, abort }
    }
}

#[async_trait]
impl<'a> TextGenerator for Abortable<'a> {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        tokio::select! {
            reply = self.inner.generate(request) => reply,
            _ = self.abort.cancelled() => anyhow::bail!("{} call aborted", self.inner.name()),
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Build the configured generator backend.
pub fn from_config(toml: &RepobotToml, project_dir: &std::path::Path) -> Result<Arc<dyn TextGenerator>> {
    match toml.generator.backend {
        GeneratorBackend::Cli => Ok(Arc::new(
            ClaudeCli::new(toml.generator_cmd()).with_working_dir(project_dir),
        )),
        GeneratorBackend::Anthropic => {
            let api_key = std::env::var("ANTHROPIC_API_KEY")
                .context("ANTHROPIC_API_KEY is required for the anthropic generator backend")?;
            Ok(Arc::new(AnthropicApi::new(AnthropicConfig {
                api_key,
                base_url: toml.generator.base_url.clone(),
                model: toml.generator.model.clone(),
            })))
        }
    }
}
