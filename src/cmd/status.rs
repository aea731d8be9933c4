//! Read-only inspection: `repobot status <job-id>` and `repobot logs <run-id>`.

use anyhow::Result;
use std::path::Path;

use repobot::bots::models::JobStatus;

use super::super::Cli;
use super::{load_config, open_db};

pub async fn cmd_status(cli: &Cli, project_dir: &Path, job_id: i64) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let db = open_db(&config)?;

    let (job, latest) = db
        .call(move |db| Ok((db.get_job(job_id)?, db.latest_run_for_job(job_id)?)))
        .await?;
    let Some(job) = job else {
        anyhow::bail!("Job {} not found", job_id);
    };
    let status = latest
        .as_ref()
        .map_or(JobStatus::Idle, |run| JobStatus::from(run.status));

    println!("Job {} ({}, {}): {}", job.id, job.name, job.job_type, status);
    if let Some(run) = latest {
        println!("  latest run: {} ({})", run.id, run.status);
        println!("  started:    {}", run.started_at);
        if let Some(completed) = &run.completed_at {
            println!("  completed:  {}", completed);
        }
        if let Some(result) = &run.result {
            println!("  branch:     {}", result.branch);
            println!("  summary:    {}", result.summary);
        }
        if let Some(error) = &run.error {
            println!("  error:      {}", error);
        }
    }
    Ok(())
}

pub async fn cmd_logs(cli: &Cli, project_dir: &Path, run_id: i64) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let db = open_db(&config)?;

    let Some(run) = db.call(move |db| db.get_run_with_logs(run_id)).await? else {
        anyhow::bail!("Run {} not found", run_id);
    };
    for entry in &run.logs {
        println!("{:>4}  {}  {}", entry.seq, entry.timestamp, entry.message);
    }
    println!();
    println!("status: {}", run.run.status);
    if let Some(error) = &run.run.error {
        println!("error:  {}", error);
    }
    if let Some(result) = &run.run.result {
        println!("branch: {}", result.branch);
        if !result.analysis.is_empty() {
            println!();
            println!("{}", result.analysis);
        }
    }
    Ok(())
}
