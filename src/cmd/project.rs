//! Project setup commands: `repobot init`, `repobot project`, `repobot job`.

use anyhow::{Context, Result};
use std::path::Path;

use repobot::bots::models::JobType;
use repobot::bots::strategies::Strategy;

use super::super::{Cli, JobCommands, ProjectCommands};
use super::{load_config, open_db};

pub fn cmd_init(project_dir: &Path) -> Result<()> {
    use repobot::init::init_project;

    let result = init_project(project_dir)?;
    if result.created {
        println!(
            "Initialized repobot project at {}",
            result.repobot_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .repobot/");
        println!("  ├── repobot.toml  # Configuration");
        println!("  ├── repobot.db    # Projects, jobs and run history");
        println!("  └── workspaces/   # Per-run clones");
        println!();
        println!("Next steps:");
        println!("  1. Run `repobot project add --name <name> --url <repo>`");
        println!("  2. Run `repobot job add --project <id> --name <name> --type <type>`");
        println!("  3. Run `repobot run <job-id>` or `repobot serve`");
    } else {
        println!(
            "repobot project already initialized at {}",
            result.repobot_dir.display()
        );
        println!("Directory structure verified.");
    }
    Ok(())
}

pub async fn cmd_project(cli: &Cli, project_dir: &Path, command: ProjectCommands) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let db = open_db(&config)?;

    match command {
        ProjectCommands::Add { name, url, branch } => {
            let project = db
                .call(move |db| db.create_project(&name, &url, &branch))
                .await?;
            println!("Created project {} ({})", project.id, project.name);
        }
        ProjectCommands::List => {
            let projects = db.call(|db| db.list_projects()).await?;
            if projects.is_empty() {
                println!("No projects. Add one with `repobot project add`.");
            }
            for project in projects {
                println!(
                    "{:>4}  {:<20}  {}  ({})",
                    project.id, project.name, project.repository_url, project.default_branch
                );
            }
        }
    }
    Ok(())
}

pub async fn cmd_job(cli: &Cli, project_dir: &Path, command: JobCommands) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let db = open_db(&config)?;

    match command {
        JobCommands::Add {
            project,
            name,
            job_type,
            config: inline,
            config_file,
        } => {
            let job_type: JobType = job_type.parse().map_err(anyhow::Error::msg)?;
            let raw = match (inline, config_file) {
                (Some(raw), _) => raw,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => "{}".to_string(),
            };
            let configuration: serde_json::Value =
                serde_json::from_str(&raw).context("Job configuration is not valid JSON")?;
            Strategy::from_job(job_type, &configuration)
                .map_err(|e| anyhow::anyhow!("Invalid {} configuration: {}", job_type, e))?;

            let job = db
                .call(move |db| {
                    if db.get_project(project)?.is_none() {
                        anyhow::bail!("Project {} not found", project);
                    }
                    db.create_job(project, &name, job_type, &configuration)
                })
                .await?;
            println!("Created job {} ({}, {})", job.id, job.name, job.job_type);
        }
        JobCommands::List => {
            let jobs = db.call(|db| db.list_jobs()).await?;
            if jobs.is_empty() {
                println!("No jobs. Add one with `repobot job add`.");
            }
            for job in jobs {
                println!(
                    "{:>4}  {:<20}  {:<18}  project {:<4}  {}",
                    job.id, job.name, job.job_type, job.project_id, job.status
                );
            }
        }
    }
    Ok(())
}
