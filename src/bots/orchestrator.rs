//! Admission control and run lifecycle.
//!
//! The [`Orchestrator`] owns the active-run registry: a map from job id to
//! the execution context of that job's single in-flight run. Every
//! admit/stop/remove goes through one async lock, so the registry is the
//! only place the concurrency ceiling and the one-run-per-job rule are
//! enforced. Pipelines run as supervised tasks; the supervisor observes
//! every completion (panics included), releases the workspace and performs
//! the terminal write.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::db::{DbHandle, now_timestamp};
use super::events::EventBus;
use super::generator::{PromptLimits, TextGenerator};
use super::git::{GitAuthor, RepositoryClient};
use super::models::{ActiveRun, ErrorKind, JobStatus, JobType, Run, RunOutcome, RunWithLogs};
use super::pipeline::{self, PipelineDeps, PipelineOutcome, PipelineRun, StageTimeouts};
use super::records::RunRecorder;
use super::strategies::Strategy;
use super::workspace::{Workspace, WorkspaceManager};
use crate::errors::{OrchestratorError, PipelineError};

/// Runtime settings for the orchestrator and its pipelines.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent_runs: usize,
    pub branch_namespace: String,
    pub workspace_root: PathBuf,
    pub timeouts: StageTimeouts,
    /// Characters of strategy analysis embedded in commit messages
    pub analysis_excerpt_chars: usize,
    /// Characters of strategy output echoed into run logs
    pub log_excerpt_chars: usize,
    pub author: GitAuthor,
    pub prompt_limits: PromptLimits,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 4,
            branch_namespace: "repobot".to_string(),
            workspace_root: PathBuf::from(".repobot/workspaces"),
            timeouts: StageTimeouts::default(),
            analysis_excerpt_chars: 400,
            log_excerpt_chars: 200,
            author: GitAuthor::default(),
            prompt_limits: PromptLimits::default(),
        }
    }
}

/// Registry entry for one in-flight run.
struct ExecutionContext {
    run_id: i64,
    job_type: JobType,
    started_at: String,
    started: Instant,
    cancel: CancellationToken,
    workspace: Arc<Workspace>,
}

struct Inner {
    deps: PipelineDeps,
    workspaces: WorkspaceManager,
    registry: Mutex<HashMap<i64, ExecutionContext>>,
    tracker: TaskTracker,
    shutting_down: AtomicBool,
}

/// Cheaply cloneable handle to the run orchestrator.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        recorder: RunRecorder,
        repo: Arc<dyn RepositoryClient>,
        generator: Arc<dyn TextGenerator>,
        config: OrchestratorConfig,
    ) -> Self {
        let workspaces = WorkspaceManager::new(config.workspace_root.clone());
        Self {
            inner: Arc::new(Inner {
                deps: PipelineDeps {
                    recorder,
                    repo,
                    generator,
                    config: Arc::new(config),
                },
                workspaces,
                registry: Mutex::new(HashMap::new()),
                tracker: TaskTracker::new(),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn recorder(&self) -> &RunRecorder {
        &self.inner.deps.recorder
    }

    pub fn db(&self) -> &DbHandle {
        self.inner.deps.recorder.db()
    }

    pub fn events(&self) -> &EventBus {
        self.inner.deps.recorder.events()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.deps.config
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.inner.workspaces
    }

    // ── Admission ─────────────────────────────────────────────────────

    /// Admit a run for `job_id` and launch its pipeline. Returns the new run
    /// id without waiting for any stage.
    pub async fn spawn(&self, job_id: i64) -> Result<i64, OrchestratorError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(OrchestratorError::ShuttingDown);
        }

        let (job, project) = self
            .db()
            .call(move |db| {
                let job = db.get_job(job_id)?;
                let project = match &job {
                    Some(job) => db.get_project(job.project_id)?,
                    None => None,
                };
                Ok((job, project))
            })
            .await?;
        let job = job.ok_or(OrchestratorError::JobNotFound { id: job_id })?;
        let project = project.ok_or(OrchestratorError::ProjectNotFound {
            id: job.project_id,
        })?;
        let strategy = Strategy::from_job(job.job_type, &job.configuration)
            .map_err(|e| OrchestratorError::InvalidJob(format!("job {}: {}", job_id, e)))?;

        let mut registry = self.inner.registry.lock().await;
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(OrchestratorError::ShuttingDown);
        }
        if registry.contains_key(&job_id) {
            return Err(OrchestratorError::AlreadyRunning { job_id });
        }
        let limit = self.config().max_concurrent_runs;
        if registry.len() >= limit {
            tracing::info!(job_id, limit, "Rejecting run: at capacity");
            return Err(OrchestratorError::CapacityExceeded { limit });
        }

        let started_at = now_timestamp();
        let run = self
            .recorder()
            .create_run(job_id, started_at.clone())
            .await?;
        let marked_at = started_at.clone();
        self.db()
            .call(move |db| db.mark_job_started(job_id, &marked_at))
            .await?;

        let workspace = self.inner.workspaces.reserve(run.id);
        let cancel = CancellationToken::new();
        registry.insert(
            job_id,
            ExecutionContext {
                run_id: run.id,
                job_type: job.job_type,
                started_at,
                started: Instant::now(),
                cancel: cancel.clone(),
                workspace: workspace.clone(),
            },
        );
        drop(registry);

        tracing::info!(
            job_id,
            run_id = run.id,
            job_type = %job.job_type,
            repository = %project.repository_url,
            "Run admitted"
        );

        let pipeline_run = PipelineRun {
            run_id: run.id,
            job_id,
            job_type: job.job_type,
            project,
            strategy,
            workspace,
            cancel,
        };
        self.supervise(pipeline_run);
        Ok(run.id)
    }

    /// Run the pipeline in its own task and finalize whatever it returns.
    fn supervise(&self, run: PipelineRun) {
        let this = self.clone();
        let deps = self.inner.deps.clone();
        let job_id = run.job_id;
        let run_id = run.run_id;
        let workspace = run.workspace.clone();

        self.inner.tracker.spawn(async move {
            let handle = tokio::spawn(pipeline::execute(run, deps));
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(job_id, run_id, error = %e, "Pipeline task aborted");
                    PipelineOutcome::Failed(PipelineError::Internal(format!(
                        "pipeline task aborted: {}",
                        e
                    )))
                }
            };
            this.finalize(job_id, run_id, &workspace, outcome).await;
        });
    }

    async fn finalize(
        &self,
        job_id: i64,
        run_id: i64,
        workspace: &Workspace,
        outcome: PipelineOutcome,
    ) {
        if let Err(e) = workspace.release().await {
            tracing::warn!(run_id, error = %e, "Failed to release workspace");
        }

        let recorder = self.recorder();
        let outcome = match outcome {
            PipelineOutcome::Completed(result) => {
                recorder.log(run_id, "completed").await;
                RunOutcome::Completed(result)
            }
            PipelineOutcome::Failed(err) => {
                recorder.log(run_id, format!("error: {}", err)).await;
                RunOutcome::Failed {
                    kind: err.kind(),
                    error: err.to_string(),
                }
            }
            PipelineOutcome::Cancelled => {
                recorder.log(run_id, "cancelled").await;
                RunOutcome::Cancelled
            }
        };

        let mut registry = self.inner.registry.lock().await;
        match recorder.finish(run_id, outcome).await {
            Ok(Some(run)) => {
                tracing::info!(job_id, run_id, status = %run.status, "Run finished");
                self.set_job_status(job_id, JobStatus::from(run.status)).await;
            }
            Ok(None) => {
                tracing::debug!(job_id, run_id, "Run already finalized");
            }
            Err(e) => {
                tracing::error!(job_id, run_id, error = %e, "Failed to finalize run");
            }
        }
        if registry.get(&job_id).is_some_and(|ctx| ctx.run_id == run_id) {
            registry.remove(&job_id);
        }
    }

    async fn set_job_status(&self, job_id: i64, status: JobStatus) {
        if let Err(e) = self
            .db()
            .call(move |db| db.set_job_status(job_id, status))
            .await
        {
            tracing::warn!(job_id, error = %e, "Failed to update job status");
        }
    }

    // ── Control ───────────────────────────────────────────────────────

    /// Cancel the job's active run and finalize it as cancelled.
    pub async fn stop(&self, job_id: i64) -> Result<Run, OrchestratorError> {
        let mut registry = self.inner.registry.lock().await;
        let ctx = registry
            .remove(&job_id)
            .ok_or(OrchestratorError::NotRunning { job_id })?;
        let run_id = ctx.run_id;
        ctx.cancel.cancel();
        tracing::info!(job_id, run_id, "Stopping run");

        if let Err(e) = ctx.workspace.release().await {
            tracing::warn!(run_id, error = %e, "Failed to release workspace");
        }
        self.recorder().log(run_id, "cancelled").await;
        let run = match self.recorder().finish(run_id, RunOutcome::Cancelled).await? {
            Some(run) => {
                self.set_job_status(job_id, JobStatus::Stopped).await;
                run
            }
            None => self
                .db()
                .call(move |db| db.get_run(run_id))
                .await?
                .ok_or(OrchestratorError::RunNotFound { id: run_id })?,
        };
        drop(registry);
        Ok(run)
    }

    // ── Queries ───────────────────────────────────────────────────────

    /// `running` while a context exists, otherwise the latest run's status.
    pub async fn get_status(&self, job_id: i64) -> Result<JobStatus, OrchestratorError> {
        if self.inner.registry.lock().await.contains_key(&job_id) {
            return Ok(JobStatus::Running);
        }
        let (job, latest) = self
            .db()
            .call(move |db| Ok((db.get_job(job_id)?, db.latest_run_for_job(job_id)?)))
            .await?;
        if job.is_none() {
            return Err(OrchestratorError::JobNotFound { id: job_id });
        }
        Ok(latest.map_or(JobStatus::Idle, |run| JobStatus::from(run.status)))
    }

    pub async fn list_active(&self) -> Vec<ActiveRun> {
        let registry = self.inner.registry.lock().await;
        let mut active: Vec<ActiveRun> = registry
            .iter()
            .map(|(job_id, ctx)| ActiveRun {
                job_id: *job_id,
                run_id: ctx.run_id,
                job_type: ctx.job_type,
                started_at: ctx.started_at.clone(),
                elapsed_ms: ctx.started.elapsed().as_millis() as u64,
            })
            .collect();
        active.sort_by_key(|a| a.run_id);
        active
    }

    pub async fn active_count(&self) -> usize {
        self.inner.registry.lock().await.len()
    }

    pub async fn get_run_with_logs(&self, run_id: i64) -> Result<RunWithLogs, OrchestratorError> {
        self.db()
            .call(move |db| db.get_run_with_logs(run_id))
            .await?
            .ok_or(OrchestratorError::RunNotFound { id: run_id })
    }

    // ── Process lifecycle ─────────────────────────────────────────────

    /// Fail runs a previous process left `running` and sweep their
    /// workspaces. Returns the number of runs recovered.
    pub async fn recover(&self) -> Result<usize> {
        let active: Vec<i64> = self
            .inner
            .registry
            .lock()
            .await
            .values()
            .map(|ctx| ctx.run_id)
            .collect();

        let orphans: Vec<Run> = self
            .db()
            .call(|db| db.list_running_runs())
            .await?
            .into_iter()
            .filter(|run| !active.contains(&run.id))
            .collect();

        let mut recovered = 0;
        for run in orphans {
            self.recorder()
                .log(run.id, "interrupted: process exited while the run was active")
                .await;
            let outcome = RunOutcome::Failed {
                kind: ErrorKind::Interrupted,
                error: "Interrupted: process exited while the run was active".to_string(),
            };
            if self.recorder().finish(run.id, outcome).await?.is_some() {
                self.set_job_status(run.job_id, JobStatus::Failed).await;
                recovered += 1;
            }
        }

        let swept = self.inner.workspaces.sweep_stale(&active).await?;
        if recovered > 0 || swept > 0 {
            tracing::info!(recovered, swept, "Recovered interrupted runs");
        }
        Ok(recovered)
    }

    /// Wait until every supervised task has finished.
    pub async fn wait_idle(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    /// Stop admitting, cancel every active run and wait up to `grace` for
    /// the supervisors to finalize. Returns `false` if the grace period ran
    /// out first.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        {
            let registry = self.inner.registry.lock().await;
            for (job_id, ctx) in registry.iter() {
                tracing::info!(job_id, run_id = ctx.run_id, "Cancelling run for shutdown");
                ctx.cancel.cancel();
            }
        }
        self.inner.tracker.close();
        match tokio::time::timeout(grace, self.inner.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    remaining = self.inner.tracker.len(),
                    "Shutdown grace period elapsed with runs still active"
                );
                false
            }
        }
    }
}
