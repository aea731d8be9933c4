//! The per-run stage machine.
//!
//! `Initializing → Cloning → Branching → Transforming → Committing →
//! Finalizing`. Cancellation is checked before every stage; a stage that
//! fails ends the run. The pipeline never writes the run's terminal status
//! itself: it returns a [`PipelineOutcome`] and the orchestrator's
//! supervisor performs the single terminal write and releases the
//! workspace.
//!
//! A stage that overruns its timeout is aborted, not abandoned: its abort
//! token fires and the pipeline waits for the stage's work to wind down
//! before reporting `StageTimeout`. Nothing a stage started is still
//! touching the workspace once the pipeline returns.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::generator::{Abortable, TextGenerator};
use super::git::{PushOutcome, RepositoryClient};
use super::models::{JobType, Project, RunResult, Stage};
use super::orchestrator::OrchestratorConfig;
use super::records::RunRecorder;
use super::strategies::{Strategy, StrategyContext, StrategyOutput};
use super::workspace::Workspace;
use crate::errors::PipelineError;
use crate::util::excerpt;

/// Per-stage timeouts. `None` waits indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub clone: Option<Duration>,
    pub branch: Option<Duration>,
    pub transform: Option<Duration>,
    pub push: Option<Duration>,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            clone: Some(Duration::from_secs(300)),
            branch: Some(Duration::from_secs(30)),
            transform: Some(Duration::from_secs(900)),
            push: Some(Duration::from_secs(300)),
        }
    }
}

/// Everything one execution needs, owned by the spawned task.
pub struct PipelineRun {
    pub run_id: i64,
    pub job_id: i64,
    pub job_type: JobType,
    pub project: Project,
    pub strategy: Strategy,
    pub workspace: Arc<Workspace>,
    pub cancel: CancellationToken,
}

/// Collaborators shared by every run.
#[derive(Clone)]
pub struct PipelineDeps {
    pub recorder: RunRecorder,
    pub repo: Arc<dyn RepositoryClient>,
    pub generator: Arc<dyn TextGenerator>,
    pub config: Arc<OrchestratorConfig>,
}

#[derive(Debug)]
pub enum PipelineOutcome {
    Completed(RunResult),
    Failed(PipelineError),
    Cancelled,
}

enum Halt {
    Cancelled,
    Failed(PipelineError),
}

impl From<PipelineError> for Halt {
    fn from(e: PipelineError) -> Self {
        Halt::Failed(e)
    }
}

/// Drive one run through every stage.
pub async fn execute(run: PipelineRun, deps: PipelineDeps) -> PipelineOutcome {
    let outcome = match run_stages(&run, &deps).await {
        Ok(result) => PipelineOutcome::Completed(result),
        Err(Halt::Cancelled) => PipelineOutcome::Cancelled,
        // A stop can pull the workspace out from under a stage; that failure
        // is a consequence of the cancellation, not a cause.
        Err(Halt::Failed(_)) if run.cancel.is_cancelled() => PipelineOutcome::Cancelled,
        Err(Halt::Failed(e)) => PipelineOutcome::Failed(e),
    };
    tracing::debug!(run_id = run.run_id, outcome = ?outcome, "Pipeline finished");
    outcome
}

async fn run_stages(run: &PipelineRun, deps: &PipelineDeps) -> Result<RunResult, Halt> {
    let config = &deps.config;
    let recorder = &deps.recorder;
    let workspace = run.workspace.path();

    // ── Initializing ──────────────────────────────────────────────────
    enter(run, deps, Stage::Initializing).await?;
    run.workspace.allocate().await?;
    recorder.log(run.run_id, "started").await;

    // ── Cloning ───────────────────────────────────────────────────────
    enter(run, deps, Stage::Cloning).await?;
    recorder
        .log(
            run.run_id,
            format!(
                "cloning {} ({})",
                run.project.repository_url, run.project.default_branch
            ),
        )
        .await;
    let abort = CancellationToken::new();
    with_timeout(
        Stage::Cloning,
        config.timeouts.clone,
        &abort,
        deps.repo.clone_repo(
            &run.project.repository_url,
            workspace,
            &run.project.default_branch,
            &abort,
        ),
    )
    .await?;

    // ── Branching ─────────────────────────────────────────────────────
    enter(run, deps, Stage::Branching).await?;
    let branch = branch_name(
        &config.branch_namespace,
        run.job_type,
        chrono::Utc::now().timestamp(),
    );
    with_timeout(
        Stage::Branching,
        config.timeouts.branch,
        &CancellationToken::new(),
        deps.repo.create_branch(workspace, &branch),
    )
    .await?;
    recorder
        .log(run.run_id, format!("created branch {}", branch))
        .await;

    // ── Transforming ──────────────────────────────────────────────────
    enter(run, deps, Stage::Transforming).await?;
    let abort = CancellationToken::new();
    let generator = Abortable::new(deps.generator.as_ref(), &abort);
    let ctx = StrategyContext {
        workspace,
        generator: &generator,
        limits: config.prompt_limits,
    };
    let output = with_timeout(
        Stage::Transforming,
        config.timeouts.transform,
        &abort,
        run.strategy.execute(&ctx),
    )
    .await?;
    recorder
        .log(
            run.run_id,
            format!(
                "transformation complete: {}",
                excerpt(&output.summary, config.log_excerpt_chars)
            ),
        )
        .await;
    if !output.diff.is_empty() {
        recorder
            .log(
                run.run_id,
                format!(
                    "changed files:\n{}",
                    excerpt(&output.diff, config.log_excerpt_chars)
                ),
            )
            .await;
    }

    // ── Committing ────────────────────────────────────────────────────
    enter(run, deps, Stage::Committing).await?;
    let message = commit_message(run.job_type, &output, config.analysis_excerpt_chars);
    let abort = CancellationToken::new();
    let pushed = with_timeout(
        Stage::Committing,
        config.timeouts.push,
        &abort,
        deps.repo
            .commit_and_push(workspace, &branch, &message, &config.author, &abort),
    )
    .await?;
    let summary = match &pushed {
        PushOutcome::Pushed { commit } => {
            recorder
                .log(
                    run.run_id,
                    format!("pushed {} ({})", branch, &commit[..commit.len().min(12)]),
                )
                .await;
            output.summary.clone()
        }
        PushOutcome::NoChanges => {
            recorder
                .log(run.run_id, "no changes to commit; branch not pushed")
                .await;
            format!("{} (no changes needed)", output.summary)
        }
    };

    // ── Finalizing ────────────────────────────────────────────────────
    enter(run, deps, Stage::Finalizing).await?;
    Ok(RunResult {
        branch,
        summary,
        analysis: output.analysis,
    })
}

/// Cancellation checkpoint plus stage bookkeeping.
async fn enter(run: &PipelineRun, deps: &PipelineDeps, stage: Stage) -> Result<(), Halt> {
    if run.cancel.is_cancelled() {
        tracing::info!(run_id = run.run_id, stage = %stage, "Run cancelled before stage");
        return Err(Halt::Cancelled);
    }
    tracing::info!(run_id = run.run_id, job_id = run.job_id, stage = %stage, "Entering stage");
    if stage != Stage::Initializing {
        deps.recorder
            .log(run.run_id, format!("stage: {}", stage))
            .await;
    }
    Ok(())
}

/// Run `fut` under `limit`. On expiry `abort` fires and `fut` is driven to
/// completion before the timeout is reported, so blocking work it started
/// has ended by the time the caller sees the error.
async fn with_timeout<T, F>(
    stage: Stage,
    limit: Option<Duration>,
    abort: &CancellationToken,
    fut: F,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    let Some(limit) = limit else {
        return fut.await;
    };
    tokio::pin!(fut);
    tokio::select! {
        result = &mut fut => result,
        _ = tokio::time::sleep(limit) => {
            tracing::warn!(stage = %stage, limit_secs = limit.as_secs(), "Stage timed out, aborting");
            abort.cancel();
            let _ = fut.await;
            Err(PipelineError::StageTimeout {
                stage,
                secs: limit.as_secs(),
            })
        }
    }
}

/// `<namespace>/<job-type>-<unix seconds>`.
pub fn branch_name(namespace: &str, job_type: JobType, unix_secs: i64) -> String {
    format!(
        "{}/{}-{}",
        namespace.trim_matches('/'),
        job_type.as_str(),
        unix_secs
    )
}

/// Subject line from the summary, body from a bounded analysis excerpt.
pub fn commit_message(job_type: JobType, output: &StrategyOutput, excerpt_chars: usize) -> String {
    let subject = output.summary.lines().next().unwrap_or("").trim();
    let subject = if subject.is_empty() {
        "automated update"
    } else {
        subject
    };
    let mut message = format!("{}: {}", job_type.as_str(), excerpt(subject, 72));
    let body = excerpt(&output.analysis, excerpt_chars);
    if !body.is_empty() {
        message.push_str("\n\n");
        message.push_str(&body);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bots::db::{BotDb, DbHandle, now_timestamp};
    use crate::bots::events::EventBus;
    use crate::bots::git::GitClient;
    use crate::bots::models::RunStatus;
    use crate::bots::test_support::{GatedGenerator, StaticGenerator, seed_remote};
    use crate::bots::workspace::WorkspaceManager;
    use serde_json::json;
    use tempfile::tempdir;

    const CHANGELOG_REPLY: &str = r##"{"summary": "Add changelog", "analysis": "Created CHANGELOG.md.",
        "edits": [{"action": "write", "path": "CHANGELOG.md", "content": "# Changelog\n"}]}"##;

    struct Harness {
        deps: PipelineDeps,
        workspaces: WorkspaceManager,
        run_id: i64,
        job_id: i64,
        _root: tempfile::TempDir,
    }

    async fn harness(generator: Arc<dyn TextGenerator>, config: OrchestratorConfig) -> Harness {
        let root = tempdir().unwrap();
        let db = DbHandle::new(BotDb::new_in_memory().unwrap());
        let (job_id, run_id) = db
            .call(|db| {
                let project = db.create_project("demo", "/unused", "main")?;
                let job = db.create_job(project.id, "custom", JobType::Custom, &json!({"prompt": "x"}))?;
                let run = db.create_run(job.id, &now_timestamp())?;
                Ok((job.id, run.id))
            })
            .await
            .unwrap();
        let config = OrchestratorConfig {
            workspace_root: root.path().to_path_buf(),
            ..config
        };
        Harness {
            deps: PipelineDeps {
                recorder: RunRecorder::new(db, EventBus::new()),
                repo: Arc::new(GitClient::default()),
                generator,
                config: Arc::new(config),
            },
            workspaces: WorkspaceManager::new(root.path()),
            run_id,
            job_id,
            _root: root,
        }
    }

    fn pipeline_run(h: &Harness, url: &str) -> PipelineRun {
        PipelineRun {
            run_id: h.run_id,
            job_id: h.job_id,
            job_type: JobType::Custom,
            project: Project {
                id: 1,
                name: "demo".to_string(),
                repository_url: url.to_string(),
                default_branch: "main".to_string(),
                created_at: now_timestamp(),
            },
            strategy: Strategy::from_job(JobType::Custom, &json!({"prompt": "Add a changelog"}))
                .unwrap(),
            workspace: h.workspaces.reserve(h.run_id),
            cancel: CancellationToken::new(),
        }
    }

    async fn log_messages(h: &Harness) -> Vec<String> {
        let run_id = h.run_id;
        h.deps
            .recorder
            .db()
            .call(move |db| db.get_logs(run_id))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect()
    }

    #[test]
    fn test_branch_name_format() {
        assert_eq!(
            branch_name("repobot", JobType::DependencyUpdate, 1700000000),
            "repobot/dependency_update-1700000000"
        );
        assert_eq!(
            branch_name("bots/", JobType::SecurityScan, 5),
            "bots/security_scan-5"
        );
    }

    #[test]
    fn test_commit_message_bounds_analysis() {
        let output = StrategyOutput {
            summary: "Bump lodash\nsecond line".to_string(),
            diff: String::new(),
            analysis: "x".repeat(2000),
        };
        let message = commit_message(JobType::DependencyUpdate, &output, 400);
        let (subject, body) = message.split_once("\n\n").unwrap();
        assert_eq!(subject, "dependency_update: Bump lodash");
        assert_eq!(body.chars().count(), 400);
    }

    #[test]
    fn test_commit_message_without_analysis() {
        let output = StrategyOutput {
            summary: String::new(),
            diff: String::new(),
            analysis: String::new(),
        };
        assert_eq!(
            commit_message(JobType::Custom, &output, 400),
            "custom: automated update"
        );
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let abort = CancellationToken::new();
        let err = with_timeout(Stage::Transforming, Some(Duration::from_millis(10)), &abort, async {
            abort.cancelled().await;
            Ok::<(), PipelineError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StageTimeout {
                stage: Stage::Transforming,
                ..
            }
        ));
        assert!(abort.is_cancelled());
    }

    #[tokio::test]
    async fn test_with_timeout_waits_for_blocking_work() {
        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = finished.clone();
        let err = with_timeout(
            Stage::Cloning,
            Some(Duration::from_millis(10)),
            &CancellationToken::new(),
            async move {
                tokio::task::spawn_blocking(move || {
                    std::thread::sleep(Duration::from_millis(150));
                    flag.store(true, std::sync::atomic::Ordering::SeqCst);
                })
                .await
                .map_err(|e| PipelineError::Internal(e.to_string()))
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::StageTimeout { stage: Stage::Cloning, .. }));
        assert!(finished.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_execute_completes_and_pushes() {
        let remote = seed_remote(&[("README.md", "# demo\n")]);
        let h = harness(
            Arc::new(StaticGenerator::new(CHANGELOG_REPLY)),
            OrchestratorConfig::default(),
        )
        .await;
        let run = pipeline_run(&h, remote.url());

        let outcome = execute(run, h.deps.clone()).await;
        let result = match outcome {
            PipelineOutcome::Completed(result) => result,
            other => panic!("expected completion, got {:?}", other),
        };
        assert!(result.branch.starts_with("repobot/custom-"));
        assert_eq!(result.summary, "Add changelog");
        assert!(remote.branches().contains(&result.branch));

        let logs = log_messages(&h).await;
        assert_eq!(logs[0], "started");
        assert!(logs.iter().any(|m| m == "stage: transforming"));
        assert!(logs.iter().any(|m| m.starts_with("pushed repobot/custom-")));
    }

    #[tokio::test]
    async fn test_execute_unreachable_repository() {
        let h = harness(
            Arc::new(StaticGenerator::new(CHANGELOG_REPLY)),
            OrchestratorConfig::default(),
        )
        .await;
        let run = pipeline_run(&h, "/nonexistent/repo.git");
        match execute(run, h.deps.clone()).await {
            PipelineOutcome::Failed(PipelineError::RepositoryUnavailable(_)) => {}
            other => panic!("expected RepositoryUnavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_no_changes_completes_without_push() {
        let remote = seed_remote(&[("README.md", "# demo\n")]);
        let h = harness(
            Arc::new(StaticGenerator::new(r#"{"summary": "Nothing to change", "edits": []}"#)),
            OrchestratorConfig::default(),
        )
        .await;
        let run = pipeline_run(&h, remote.url());
        match execute(run, h.deps.clone()).await {
            PipelineOutcome::Completed(result) => {
                assert_eq!(result.summary, "Nothing to change (no changes needed)");
                assert!(!remote.branches().contains(&result.branch));
            }
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let h = harness(
            Arc::new(StaticGenerator::new(CHANGELOG_REPLY)),
            OrchestratorConfig::default(),
        )
        .await;
        let run = pipeline_run(&h, "/unused");
        run.cancel.cancel();
        let workspace = run.workspace.clone();
        assert!(matches!(
            execute(run, h.deps.clone()).await,
            PipelineOutcome::Cancelled
        ));
        assert!(!workspace.path().exists());
        assert!(log_messages(&h).await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_transform_stops_before_commit() {
        let remote = seed_remote(&[("README.md", "# demo\n")]);
        let generator = Arc::new(GatedGenerator::new(CHANGELOG_REPLY));
        let h = harness(generator.clone(), OrchestratorConfig::default()).await;
        let run = pipeline_run(&h, remote.url());
        let cancel = run.cancel.clone();

        let task = tokio::spawn(execute(run, h.deps.clone()));
        generator.entered().await;
        cancel.cancel();
        generator.release();

        assert!(matches!(task.await.unwrap(), PipelineOutcome::Cancelled));
        assert_eq!(remote.branches(), vec!["main".to_string()]);
        let logs = log_messages(&h).await;
        assert!(!logs.iter().any(|m| m == "stage: committing"));
    }

    #[tokio::test]
    async fn test_transform_timeout() {
        let remote = seed_remote(&[("README.md", "# demo\n")]);
        let generator = Arc::new(GatedGenerator::new(CHANGELOG_REPLY));
        let config = OrchestratorConfig {
            timeouts: StageTimeouts {
                transform: Some(Duration::from_millis(50)),
                ..StageTimeouts::default()
            },
            ..OrchestratorConfig::default()
        };
        let h = harness(generator, config).await;
        let run = pipeline_run(&h, remote.url());
        match execute(run, h.deps.clone()).await {
            PipelineOutcome::Failed(PipelineError::StageTimeout { stage, .. }) => {
                assert_eq!(stage, Stage::Transforming)
            }
            other => panic!("expected StageTimeout, got {:?}", other),
        }
        let run_id = h.run_id;
        let run = h
            .deps
            .recorder
            .db()
            .call(move |db| db.get_run(run_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(run.status, RunStatus::Running);
    }
}
