//! Local execution: `repobot run <job-id>...`.
//!
//! Spawns each job on an in-process orchestrator, prints log lines and
//! status changes as they arrive, and exits non-zero if any run did not
//! complete.

use anyhow::Result;
use std::collections::BTreeSet;
use std::path::Path;

use repobot::bots::events::RunEvent;
use repobot::bots::models::{Run, RunStatus};

use super::super::Cli;
use super::{build_orchestrator, load_config, open_db};

pub async fn cmd_run(cli: &Cli, project_dir: &Path, job_ids: &[i64]) -> Result<()> {
    let config = load_config(cli, project_dir)?;
    let db = open_db(&config)?;
    let orchestrator = build_orchestrator(&config, db)?;
    orchestrator.recover().await?;

    let mut subscription = orchestrator
        .events()
        .subscribe(["run.*.log", "run.*.status"]);

    let mut spawned = BTreeSet::new();
    let mut rejected = 0;
    for &job_id in job_ids {
        match orchestrator.spawn(job_id).await {
            Ok(run_id) => {
                println!("[job {}] started run {}", job_id, run_id);
                spawned.insert(run_id);
            }
            Err(e) => {
                eprintln!("[job {}] {}", job_id, e);
                rejected += 1;
            }
        }
    }

    let mut interrupted = false;
    {
        let idle = orchestrator.wait_idle();
        tokio::pin!(idle);
        loop {
            tokio::select! {
                _ = &mut idle => break,
                event = subscription.recv() => match event {
                    Some(event) => print_event(&event, &spawned),
                    None => break,
                },
                _ = tokio::signal::ctrl_c(), if !interrupted => {
                    interrupted = true;
                    eprintln!("Interrupted; cancelling active runs...");
                    orchestrator.shutdown(config.shutdown_grace()).await;
                }
            }
        }
    }
    while let Some(event) = subscription.try_recv() {
        print_event(&event, &spawned);
    }

    let mut failed = rejected;
    println!();
    for &run_id in &spawned {
        let run = orchestrator.get_run_with_logs(run_id).await?.run;
        println!("{}", describe(&run));
        if run.status != RunStatus::Completed {
            failed += 1;
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} jobs did not complete", failed, job_ids.len());
    }
    Ok(())
}

fn print_event(event: &RunEvent, spawned: &BTreeSet<i64>) {
    if !spawned.contains(&event.run_id()) {
        return;
    }
    match event {
        RunEvent::RunLog { run_id, entry } => {
            for line in entry.message.lines() {
                println!("[run {}] {}", run_id, line);
            }
        }
        RunEvent::RunStatus {
            run_id,
            status,
            error,
            ..
        } => match error {
            Some(error) => println!("[run {}] {}: {}", run_id, status, error),
            None => println!("[run {}] {}", run_id, status),
        },
    }
}

fn describe(run: &Run) -> String {
    let mut line = format!("run {} (job {}): {}", run.id, run.job_id, run.status);
    if let Some(result) = &run.result {
        line.push_str(&format!("\n  branch:  {}\n  summary: {}", result.branch, result.summary));
    }
    if let Some(error) = &run.error {
        line.push_str(&format!("\n  error:   {}", error));
    }
    line
}
