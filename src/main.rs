use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use repobot::logging::{LogFormat, init_logging};

mod cmd;

#[derive(Parser)]
#[command(name = "repobot")]
#[command(version, about = "Run orchestrator for repository maintenance bots")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format: text or json
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Concurrency ceiling. Overrides repobot.toml and REPOBOT_MAX_CONCURRENT.
    #[arg(long, global = true)]
    pub max_concurrent: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .repobot/ with a default config and database
    Init,
    /// Manage projects (repositories bots work on)
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Manage jobs
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Serve the HTTP control surface and event stream
    Serve {
        #[arg(long, default_value = "3142")]
        port: u16,
        /// Bind on all interfaces and allow any CORS origin
        #[arg(long)]
        dev: bool,
    },
    /// Run jobs in this process and stream their logs until they finish
    Run {
        #[arg(required = true)]
        job_ids: Vec<i64>,
    },
    /// Show a job's status and its latest run
    Status { job_id: i64 },
    /// Print a run's log
    Logs { run_id: i64 },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ProjectCommands {
    Add {
        #[arg(long)]
        name: String,
        /// Clone URL or local path of the repository
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "main")]
        branch: String,
    },
    List,
}

#[derive(Subcommand, Clone)]
pub enum JobCommands {
    Add {
        #[arg(long)]
        project: i64,
        #[arg(long)]
        name: String,
        /// dependency_update, security_scan, module_update or custom
        #[arg(long = "type")]
        job_type: String,
        /// Strategy configuration as a JSON object
        #[arg(long, conflicts_with = "config_file")]
        config: Option<String>,
        #[arg(long)]
        config_file: Option<PathBuf>,
    },
    List,
}

#[derive(Subcommand, Clone, Copy)]
pub enum ConfigCommands {
    Show,
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Project { command } => cmd::cmd_project(&cli, &project_dir, command.clone()).await?,
        Commands::Job { command } => cmd::cmd_job(&cli, &project_dir, command.clone()).await?,
        Commands::Serve { port, dev } => cmd::cmd_serve(&cli, &project_dir, *port, *dev).await?,
        Commands::Run { job_ids } => cmd::cmd_run(&cli, &project_dir, job_ids).await?,
        Commands::Status { job_id } => cmd::cmd_status(&cli, &project_dir, *job_id).await?,
        Commands::Logs { run_id } => cmd::cmd_logs(&cli, &project_dir, *run_id).await?,
        Commands::Config { command } => cmd::cmd_config(&cli, &project_dir, *command)?,
    }

    Ok(())
}
