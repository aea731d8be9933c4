//! `repobot init`: create the per-project state directory.
//!
//! ```text
//! .repobot/
//! ├── repobot.toml     # Configuration (defaults written on first init)
//! ├── repobot.db       # Projects, jobs, runs and run logs
//! ├── workspaces/      # Per-run clones, removed when each run ends
//! └── .gitignore
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::bots::db::BotDb;
use crate::repobot_config::{REPOBOT_DIR, RepobotToml};

const GITIGNORE: &str = "repobot.db*\nworkspaces/\n";

/// Result of initializing a project.
#[derive(Debug)]
pub struct InitResult {
    /// Path to the .repobot directory
    pub repobot_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
}

/// Create `.repobot/` under `project_dir`, filling in anything missing.
/// Existing configuration and data are never overwritten.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let repobot_dir = get_repobot_dir(project_dir);
    let created = !repobot_dir.exists();

    let workspaces = repobot_dir.join("workspaces");
    std::fs::create_dir_all(&workspaces)
        .with_context(|| format!("Failed to create directory: {}", workspaces.display()))?;

    let config_file = repobot_dir.join("repobot.toml");
    if !config_file.exists() {
        RepobotToml::default().save(&config_file)?;
    }

    let gitignore = repobot_dir.join(".gitignore");
    if !gitignore.exists() {
        std::fs::write(&gitignore, GITIGNORE)
            .with_context(|| format!("Failed to create {}", gitignore.display()))?;
    }

    BotDb::new(&repobot_dir.join("repobot.db")).context("Failed to initialize database")?;

    Ok(InitResult {
        repobot_dir,
        created,
    })
}

/// Check if a project has been initialized.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(REPOBOT_DIR).exists()
}

/// Get the path to the state directory for a project.
pub fn get_repobot_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(REPOBOT_DIR)
}
