//! `dependency_update`: bump dependency versions in a manifest.
//!
//! The generator sees the manifest's current dependencies and answers with
//! `{summary, analysis, updates: [{name, current, latest}]}`. Versions are
//! rewritten in place so the file keeps its formatting, and a `^`/`~`
//! range prefix survives the bump.

use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use super::edits::{ChangeKind, ChangeSet, resolve_path};
use super::{StrategyContext, StrategyOutput, ask, require_workspace};
use crate::errors::PipelineError;

const SYSTEM_PROMPT: &str = "You are a dependency maintenance bot. Given a manifest, \
decide which dependencies should be upgraded to their latest compatible versions. \
Respond with a single JSON object: {\"summary\": string, \"analysis\": string, \
\"updates\": [{\"name\": string, \"current\": string, \"latest\": string}]}. \
Versions must be bare version numbers without range operators.";

/// Manifests tried, in order, when none is configured.
const KNOWN_MANIFESTS: &[&str] = &["package.json", "Cargo.toml", "requirements.txt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Npm,
    Cargo,
    Pip,
}

impl ManifestKind {
    pub fn detect(path: &str) -> Option<Self> {
        let name = Path::new(path).file_name()?.to_str()?;
        match name {
            "package.json" => Some(Self::Npm),
            "Cargo.toml" => Some(Self::Cargo),
            n if n.starts_with("requirements") && n.ends_with(".txt") => Some(Self::Pip),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DependencyUpdateConfig {
    /// Manifest path relative to the repository root
    #[serde(default)]
    pub manifest: Option<String>,
    /// Restrict updates to these packages (empty = all)
    #[serde(default)]
    pub packages: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DependencyUpdateStrategy {
    config: DependencyUpdateConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DependencyBump {
    pub name: String,
    #[serde(default)]
    pub current: String,
    pub latest: String,
}

#[derive(Debug, Deserialize)]
struct UpdatePlan {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    analysis: String,
    #[serde(default)]
    updates: Vec<DependencyBump>,
}

impl DependencyUpdateStrategy {
    pub fn from_config(config: DependencyUpdateConfig) -> Result<Self, String> {
        if let Some(manifest) = &config.manifest
            && ManifestKind::detect(manifest).is_none()
        {
            return Err(format!(
                "unsupported manifest '{}': expected package.json, Cargo.toml or requirements*.txt",
                manifest
            ));
        }
        Ok(Self { config })
    }

    fn locate_manifest(&self, root: &Path) -> Result<(String, ManifestKind), PipelineError> {
        let candidates: Vec<&str> = match &self.config.manifest {
            Some(m) => vec![m.as_str()],
            None => KNOWN_MANIFESTS.to_vec(),
        };
        for candidate in candidates {
            if resolve_path(root, candidate)?.is_file()
                && let Some(kind) = ManifestKind::detect(candidate)
            {
                return Ok((candidate.to_string(), kind));
            }
        }
        Err(PipelineError::Transformation(
            "no supported dependency manifest found".to_string(),
        ))
    }

    fn wants(&self, name: &str) -> bool {
        self.config.packages.is_empty() || self.config.packages.iter().any(|p| p == name)
    }

    pub async fn execute(&self, ctx: &StrategyContext<'_>) -> Result<StrategyOutput, PipelineError> {
        require_workspace(ctx.workspace)?;
        let (manifest, kind) = self.locate_manifest(ctx.workspace)?;
        let path = resolve_path(ctx.workspace, &manifest)?;
        let original = tokio::fs::read_to_string(&path).await.map_err(|e| {
            PipelineError::Transformation(format!("failed to read {}: {}", manifest, e))
        })?;

        let mut prompt = format!(
            "Manifest `{}`:\n```\n{}\n```\n",
            manifest,
            ctx.limits.bound_file(&original)
        );
        if !self.config.packages.is_empty() {
            prompt.push_str(&format!(
                "\nOnly consider these packages: {}\n",
                self.config.packages.join(", ")
            ));
        }
        let plan: UpdatePlan = ask(ctx, SYSTEM_PROMPT, prompt).await?;

        let mut updated = original.clone();
        let mut applied = Vec::new();
        let mut current = Vec::new();
        let mut skipped = Vec::new();
        for bump in plan.updates.iter().filter(|b| self.wants(&b.name)) {
            match rewrite_version(&updated, kind, &bump.name, &bump.latest) {
                Some(next) if next != updated => {
                    updated = next;
                    applied.push(bump);
                }
                Some(_) => current.push(bump.name.as_str()),
                None => skipped.push(bump.name.as_str()),
            }
        }

        let mut changes = ChangeSet::default();
        if updated != original {
            require_workspace(ctx.workspace)?;
            tokio::fs::write(&path, &updated).await.map_err(|e| {
                PipelineError::Transformation(format!("failed to write {}: {}", manifest, e))
            })?;
            changes.record(&manifest, ChangeKind::Modified);
        }

        let mut analysis = plan.analysis.trim().to_string();
        for bump in &applied {
            let current = if bump.current.is_empty() { "?" } else { bump.current.as_str() };
            analysis.push_str(&format!("\n- {}: {} -> {}", bump.name, current, bump.latest));
        }
        if !current.is_empty() {
            analysis.push_str(&format!("\nAlready at the requested version: {}", current.join(", ")));
        }
        if !skipped.is_empty() {
            analysis.push_str(&format!("\nNot found in {}: {}", manifest, skipped.join(", ")));
        }

        let summary = if applied.is_empty() {
            "All dependencies are up to date".to_string()
        } else if plan.summary.trim().is_empty() {
            format!("Updated {} dependencies in {}", applied.len(), manifest)
        } else {
            plan.summary.trim().to_string()
        };

        Ok(StrategyOutput {
            summary,
            diff: changes.render(),
            analysis: analysis.trim().to_string(),
        })
    }
}

/// Rewrite the version of `name` in `manifest`, keeping any `^`, `~` or `=`
/// prefix. Returns `None` when the dependency is not declared.
pub fn rewrite_version(manifest: &str, kind: ManifestKind, name: &str, latest: &str) -> Option<String> {
    let name = regex::escape(name);
    let patterns: Vec<String> = match kind {
        ManifestKind::Npm => vec![format!(r#"("{}"\s*:\s*")([\^~]?)([^"]*)(")"#, name)],
        ManifestKind::Cargo => vec![
            format!(r#"(?m)^(\s*{}\s*=\s*")([\^~=]?)([^"]*)(")"#, name),
            format!(r#"(?m)^(\s*{}\s*=\s*\{{[^}}\n]*?version\s*=\s*")([\^~=]?)([^"]*)(")"#, name),
        ],
        ManifestKind::Pip => vec![format!(r"(?mi)^({}\s*(?:==|>=|~=)\s*)()([^\s;#]+)()", name)],
    };

    for pattern in patterns {
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        if re.is_match(manifest) {
            let replaced = re.replace_all(manifest, |caps: &regex::Captures| {
                format!("{}{}{}{}", &caps[1], &caps[2], latest, &caps[4])
            });
            return Some(replaced.into_owned());
        }
    }
    None
}
