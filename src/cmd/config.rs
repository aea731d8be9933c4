//! Configuration view and validation commands: `repobot config`.

use anyhow::Result;
use std::path::Path;

use repobot::repobot_config::{RepobotConfig, RepobotToml};

use super::super::{Cli, ConfigCommands};

pub fn cmd_config(cli: &Cli, project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config =
        RepobotConfig::with_cli_args(project_dir.to_path_buf(), cli.verbose, cli.max_concurrent)?;
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("repobot Configuration");
            println!("=====================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No repobot.toml found at {}", config_path.display());
                println!("Using default configuration. Run 'repobot init' to create one.");
            }
            println!();
            print!("{}", toml::to_string_pretty(&config.toml)?);
            println!();

            let orch = config.orchestrator_config();
            println!("Effective values (with env/CLI overrides):");
            println!("  max_concurrent_runs = {}", orch.max_concurrent_runs);
            println!("  workspace_root = \"{}\"", orch.workspace_root.display());
            println!("  generator backend = \"{}\"", config.toml.generator.backend);
            println!("  generator command = \"{}\"", config.toml.generator_cmd());
            println!(
                "  git token = {}",
                if config.toml.git_token().is_some() {
                    "set"
                } else {
                    "not set"
                }
            );
            println!("  analysis_excerpt_chars = {}", orch.analysis_excerpt_chars);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No repobot.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = RepobotToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }

    Ok(())
}
