//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled              |
//! |-----------|-------------------------------|
//! | `project` | `Init`, `Project`, `Job`      |
//! | `serve`   | `Serve`                       |
//! | `run`     | `Run`                         |
//! | `status`  | `Status`, `Logs`              |
//! | `config`  | `Config`                      |

pub mod config;
pub mod project;
pub mod run;
pub mod serve;
pub mod status;

pub use config::cmd_config;
pub use project::{cmd_init, cmd_job, cmd_project};
pub use run::cmd_run;
pub use serve::cmd_serve;
pub use status::{cmd_logs, cmd_status};

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use repobot::bots::db::{BotDb, DbHandle};
use repobot::bots::events::EventBus;
use repobot::bots::generator;
use repobot::bots::git::GitClient;
use repobot::bots::orchestrator::Orchestrator;
use repobot::bots::records::RunRecorder;
use repobot::repobot_config::RepobotConfig;

use super::Cli;

/// Load the merged configuration, warning about anything suspicious.
pub fn load_config(cli: &Cli, project_dir: &Path) -> Result<RepobotConfig> {
    let config =
        RepobotConfig::with_cli_args(project_dir.to_path_buf(), cli.verbose, cli.max_concurrent)?;
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }
    Ok(config)
}

/// Open the run store. The project must have been initialized.
pub fn open_db(config: &RepobotConfig) -> Result<DbHandle> {
    if !config.repobot_dir.exists() {
        anyhow::bail!(
            "Project not initialized at {}. Run 'repobot init' first.",
            config.project_dir.display()
        );
    }
    let db = BotDb::new(&config.db_path())
        .with_context(|| format!("Failed to open {}", config.db_path().display()))?;
    Ok(DbHandle::new(db))
}

/// Wire the orchestrator from configuration: store, event bus, git client
/// and the configured generator backend.
pub fn build_orchestrator(config: &RepobotConfig, db: DbHandle) -> Result<Orchestrator> {
    let generator = generator::from_config(&config.toml, &config.project_dir)?;
    tracing::debug!(backend = generator.name(), "Text generator ready");
    let repo = Arc::new(GitClient::new(config.toml.git_token()));
    Ok(Orchestrator::new(
        RunRecorder::new(db, EventBus::new()),
        repo,
        generator,
        config.orchestrator_config(),
    ))
}
