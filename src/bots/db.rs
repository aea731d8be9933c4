use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::models::*;

/// Current time as RFC 3339 with microsecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Async-safe handle to the run store.
///
/// Wraps `BotDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, keeping synchronous SQLite
/// I/O off the async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BotDb>>,
}

impl DbHandle {
    pub fn new(db: BotDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BotDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For startup, CLI commands
    /// and tests only; never from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, BotDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct BotDb {
    conn: Connection,
}

impl BotDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .context("Failed to configure SQLite connection")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS projects (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    repository_url TEXT NOT NULL,
                    default_branch TEXT NOT NULL DEFAULT 'main',
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS jobs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    job_type TEXT NOT NULL,
                    configuration TEXT NOT NULL DEFAULT '{}',
                    status TEXT NOT NULL DEFAULT 'idle',
                    last_run_at TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS runs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                    status TEXT NOT NULL DEFAULT 'running',
                    started_at TEXT NOT NULL,
                    completed_at TEXT,
                    branch TEXT,
                    summary TEXT,
                    analysis TEXT,
                    error TEXT,
                    error_kind TEXT
                );

                CREATE TABLE IF NOT EXISTS run_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                    seq INTEGER NOT NULL,
                    timestamp TEXT NOT NULL,
                    message TEXT NOT NULL,
                    UNIQUE(run_id, seq)
                );

                CREATE INDEX IF NOT EXISTS idx_jobs_project ON jobs(project_id);
                CREATE INDEX IF NOT EXISTS idx_runs_job ON runs(job_id);
                CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
                CREATE INDEX IF NOT EXISTS idx_run_logs_run ON run_logs(run_id, seq);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Projects ──────────────────────────────────────────────────────

    pub fn create_project(
        &self,
        name: &str,
        repository_url: &str,
        default_branch: &str,
    ) -> Result<Project> {
        self.conn
            .execute(
                "INSERT INTO projects (name, repository_url, default_branch, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, repository_url, default_branch, now_timestamp()],
            )
            .context("Failed to insert project")?;
        let id = self.conn.last_insert_rowid();
        self.get_project(id)?
            .context("Project not found after insert")
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        self.conn
            .query_row(
                "SELECT id, name, repository_url, default_branch, created_at
                 FROM projects WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Project {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        repository_url: row.get(2)?,
                        default_branch: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("Failed to get project")
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, repository_url, default_branch, created_at
             FROM projects ORDER BY id",
        )?;
        let projects = stmt
            .query_map([], |row| {
                Ok(Project {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    repository_url: row.get(2)?,
                    default_branch: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list projects")?;
        Ok(projects)
    }

    // ── Jobs ──────────────────────────────────────────────────────────

    pub fn create_job(
        &self,
        project_id: i64,
        name: &str,
        job_type: JobType,
        configuration: &serde_json::Value,
    ) -> Result<Job> {
        if !configuration.is_object() {
            anyhow::bail!("Job configuration must be a JSON object");
        }
        let config_json =
            serde_json::to_string(configuration).context("Failed to serialize configuration")?;
        self.conn
            .execute(
                "INSERT INTO jobs (project_id, name, job_type, configuration, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    project_id,
                    name,
                    job_type.as_str(),
                    config_json,
                    now_timestamp()
                ],
            )
            .context("Failed to insert job")?;
        let id = self.conn.last_insert_rowid();
        self.get_job(id)?.context("Job not found after insert")
    }

    pub fn get_job(&self, id: i64) -> Result<Option<Job>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, project_id, name, job_type, configuration, status, last_run_at, created_at
                 FROM jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()
            .context("Failed to get job")?;
        row.map(JobRow::into_job).transpose()
    }

    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, name, job_type, configuration, status, last_run_at, created_at
             FROM jobs ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list jobs")?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    pub fn set_job_status(&self, job_id: i64, status: JobStatus) -> Result<()> {
        self.conn
            .execute(
                "UPDATE jobs SET status = ?1 WHERE id = ?2",
                params![status.as_str(), job_id],
            )
            .context("Failed to update job status")?;
        Ok(())
    }

    /// Mark a job as running and stamp `last_run_at`.
    pub fn mark_job_started(&self, job_id: i64, at: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE jobs SET status = 'running', last_run_at = ?1 WHERE id = ?2",
                params![at, job_id],
            )
            .context("Failed to mark job started")?;
        Ok(())
    }

    // ── Runs ──────────────────────────────────────────────────────────

    pub fn create_run(&self, job_id: i64, started_at: &str) -> Result<Run> {
        self.conn
            .execute(
                "INSERT INTO runs (job_id, status, started_at) VALUES (?1, 'running', ?2)",
                params![job_id, started_at],
            )
            .context("Failed to insert run")?;
        let id = self.conn.last_insert_rowid();
        self.get_run(id)?.context("Run not found after insert")
    }

    pub fn get_run(&self, id: i64) -> Result<Option<Run>> {
        let row = self
            .conn
            .query_row(
                &format!("{} WHERE id = ?1", RUN_SELECT),
                params![id],
                RunRow::from_row,
            )
            .optional()
            .context("Failed to get run")?;
        row.map(RunRow::into_run).transpose()
    }

    pub fn latest_run_for_job(&self, job_id: i64) -> Result<Option<Run>> {
        let row = self
            .conn
            .query_row(
                &format!("{} WHERE job_id = ?1 ORDER BY id DESC LIMIT 1", RUN_SELECT),
                params![job_id],
                RunRow::from_row,
            )
            .optional()
            .context("Failed to get latest run")?;
        row.map(RunRow::into_run).transpose()
    }

    pub fn list_runs_for_job(&self, job_id: i64) -> Result<Vec<Run>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} WHERE job_id = ?1 ORDER BY id", RUN_SELECT))?;
        let rows = stmt
            .query_map(params![job_id], RunRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list runs")?;
        rows.into_iter().map(RunRow::into_run).collect()
    }

    pub fn list_running_runs(&self) -> Result<Vec<Run>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} WHERE status = 'running' ORDER BY id", RUN_SELECT))?;
        let rows = stmt
            .query_map([], RunRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list running runs")?;
        rows.into_iter().map(RunRow::into_run).collect()
    }

    pub fn count_runs(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))
            .context("Failed to count runs")
    }

    /// Apply a terminal outcome to a run that is still `running`.
    ///
    /// Returns `None` when the run is missing or already terminal, in which
    /// case nothing is written.
    pub fn finish_run(&self, run_id: i64, outcome: &RunOutcome) -> Result<Option<Run>> {
        let (branch, summary, analysis, error, error_kind) = match outcome {
            RunOutcome::Completed(result) => (
                Some(result.branch.as_str()),
                Some(result.summary.as_str()),
                Some(result.analysis.as_str()),
                None,
                None,
            ),
            RunOutcome::Failed { kind, error } => {
                (None, None, None, Some(error.as_str()), Some(kind.as_str()))
            }
            RunOutcome::Cancelled => (None, None, None, None, None),
        };

        let changed = self
            .conn
            .execute(
                "UPDATE runs SET status = ?1, completed_at = ?2, branch = ?3, summary = ?4,
                        analysis = ?5, error = ?6, error_kind = ?7
                 WHERE id = ?8 AND status = 'running'",
                params![
                    outcome.status().as_str(),
                    now_timestamp(),
                    branch,
                    summary,
                    analysis,
                    error,
                    error_kind,
                    run_id
                ],
            )
            .context("Failed to finish run")?;

        if changed == 0 {
            return Ok(None);
        }
        self.get_run(run_id)
    }

    // ── Run logs ──────────────────────────────────────────────────────

    /// Append a log line to a running run.
    ///
    /// `seq` and `timestamp` are strictly increasing per run. Appends against
    /// a terminal (or missing) run are ignored and return `None`.
    pub fn append_log(&self, run_id: i64, message: &str) -> Result<Option<LogEntry>> {
        let status: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read run status")?;
        match status.as_deref() {
            Some("running") => {}
            _ => return Ok(None),
        }

        let last: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT seq, timestamp FROM run_logs WHERE run_id = ?1 ORDER BY seq DESC LIMIT 1",
                params![run_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to read last log entry")?;

        let now = Utc::now();
        let (seq, timestamp) = match last {
            Some((last_seq, last_ts)) => {
                let last_ts = DateTime::parse_from_rfc3339(&last_ts)
                    .context("Invalid stored log timestamp")?
                    .with_timezone(&Utc);
                let ts = if now > last_ts {
                    now
                } else {
                    last_ts + chrono::Duration::microseconds(1)
                };
                (last_seq + 1, ts)
            }
            None => (1, now),
        };
        let timestamp = timestamp.to_rfc3339_opts(SecondsFormat::Micros, true);

        self.conn
            .execute(
                "INSERT INTO run_logs (run_id, seq, timestamp, message) VALUES (?1, ?2, ?3, ?4)",
                params![run_id, seq, timestamp, message],
            )
            .context("Failed to insert log entry")?;

        Ok(Some(LogEntry {
            seq,
            timestamp,
            message: message.to_string(),
        }))
    }

    pub fn get_logs(&self, run_id: i64) -> Result<Vec<LogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, timestamp, message FROM run_logs WHERE run_id = ?1 ORDER BY seq",
        )?;
        let logs = stmt
            .query_map(params![run_id], |row| {
                Ok(LogEntry {
                    seq: row.get(0)?,
                    timestamp: row.get(1)?,
                    message: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to get logs")?;
        Ok(logs)
    }

    pub fn get_run_with_logs(&self, run_id: i64) -> Result<Option<RunWithLogs>> {
        let Some(run) = self.get_run(run_id)? else {
            return Ok(None);
        };
        let logs = self.get_logs(run_id)?;
        Ok(Some(RunWithLogs { run, logs }))
    }
}

// ── Row helpers ───────────────────────────────────────────────────────

const RUN_SELECT: &str = "SELECT id, job_id, status, started_at, completed_at, branch, summary, analysis, error, error_kind FROM runs";

struct JobRow {
    id: i64,
    project_id: i64,
    name: String,
    job_type: String,
    configuration: String,
    status: String,
    last_run_at: Option<String>,
    created_at: String,
}

impl JobRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            name: row.get(2)?,
            job_type: row.get(3)?,
            configuration: row.get(4)?,
            status: row.get(5)?,
            last_run_at: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_job(self) -> Result<Job> {
        Ok(Job {
            id: self.id,
            project_id: self.project_id,
            name: self.name,
            job_type: JobType::from_str(&self.job_type)
                .map_err(|e| anyhow!(e))
                .context("Invalid job type in database")?,
            configuration: serde_json::from_str(&self.configuration)
                .context("Invalid job configuration in database")?,
            status: JobStatus::from_str(&self.status)
                .map_err(|e| anyhow!(e))
                .context("Invalid job status in database")?,
            last_run_at: self.last_run_at,
            created_at: self.created_at,
        })
    }
}

struct RunRow {
    id: i64,
    job_id: i64,
    status: String,
    started_at: String,
    completed_at: Option<String>,
    branch: Option<String>,
    summary: Option<String>,
    analysis: Option<String>,
    error: Option<String>,
    error_kind: Option<String>,
}

impl RunRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            job_id: row.get(1)?,
            status: row.get(2)?,
            started_at: row.get(3)?,
            completed_at: row.get(4)?,
            branch: row.get(5)?,
            summary: row.get(6)?,
            analysis: row.get(7)?,
            error: row.get(8)?,
            error_kind: row.get(9)?,
        })
    }

    fn into_run(self) -> Result<Run> {
        let result = match (self.branch, self.summary) {
            (Some(branch), Some(summary)) => Some(RunResult {
                branch,
                summary,
                analysis: self.analysis.unwrap_or_default(),
            }),
            _ => None,
        };
        let error_kind = self
            .error_kind
            .map(|k| ErrorKind::from_str(&k).map_err(|e| anyhow!(e)))
            .transpose()
            .context("Invalid error kind in database")?;
        Ok(Run {
            id: self.id,
            job_id: self.job_id,
            status: RunStatus::from_str(&self.status)
                .map_err(|e| anyhow!(e))
                .context("Invalid run status in database")?,
            started_at: self.started_at,
            completed_at: self.completed_at,
            result,
            error: self.error,
            error_kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> Result<(BotDb, Job)> {
        let db = BotDb::new_in_memory()?;
        let project = db.create_project("demo", "https://example.com/demo.git", "main")?;
        let job = db.create_job(
            project.id,
            "deps",
            JobType::DependencyUpdate,
            &json!({"manifest": "package.json"}),
        )?;
        Ok((db, job))
    }

    #[test]
    fn test_create_and_get_project() -> Result<()> {
        let db = BotDb::new_in_memory()?;
        let project = db.create_project("demo", "/tmp/repo.git", "trunk")?;
        assert_eq!(project.name, "demo");
        assert_eq!(project.default_branch, "trunk");
        assert_eq!(db.get_project(project.id)?.unwrap().repository_url, "/tmp/repo.git");
        assert!(db.get_project(999)?.is_none());
        assert_eq!(db.list_projects()?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_create_job_defaults() -> Result<()> {
        let (db, job) = seeded()?;
        assert_eq!(job.status, JobStatus::Idle);
        assert_eq!(job.job_type, JobType::DependencyUpdate);
        assert_eq!(job.configuration["manifest"], "package.json");
        assert!(job.last_run_at.is_none());
        assert_eq!(db.list_jobs()?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_create_job_rejects_non_object_configuration() -> Result<()> {
        let db = BotDb::new_in_memory()?;
        let project = db.create_project("demo", "/tmp/repo.git", "main")?;
        let result = db.create_job(project.id, "bad", JobType::Custom, &json!([1, 2]));
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_job_requires_existing_project() -> Result<()> {
        let db = BotDb::new_in_memory()?;
        let result = db.create_job(42, "orphan", JobType::Custom, &json!({}));
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_mark_job_started_sets_last_run() -> Result<()> {
        let (db, job) = seeded()?;
        db.mark_job_started(job.id, "2024-05-01T00:00:00.000000Z")?;
        let job = db.get_job(job.id)?.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.last_run_at.as_deref(), Some("2024-05-01T00:00:00.000000Z"));
        db.set_job_status(job.id, JobStatus::Stopped)?;
        assert_eq!(db.get_job(job.id)?.unwrap().status, JobStatus::Stopped);
        Ok(())
    }

    #[test]
    fn test_finish_run_completed_persists_result() -> Result<()> {
        let (db, job) = seeded()?;
        let run = db.create_run(job.id, &now_timestamp())?;
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.result.is_none());

        let result = RunResult {
            branch: "repobot/dependency_update-1".to_string(),
            summary: "Bumped 2 packages".to_string(),
            analysis: "lodash 4.17.20 -> 4.17.21".to_string(),
        };
        let finished = db
            .finish_run(run.id, &RunOutcome::Completed(result.clone()))?
            .unwrap();
        assert_eq!(finished.status, RunStatus::Completed);
        assert_eq!(finished.result, Some(result));
        assert!(finished.completed_at.is_some());
        Ok(())
    }

    #[test]
    fn test_finish_run_is_conditional_on_running() -> Result<()> {
        let (db, job) = seeded()?;
        let run = db.create_run(job.id, &now_timestamp())?;
        db.finish_run(run.id, &RunOutcome::Cancelled)?.unwrap();

        let second = db.finish_run(
            run.id,
            &RunOutcome::Failed {
                kind: ErrorKind::PushError,
                error: "PushError: rejected".to_string(),
            },
        )?;
        assert!(second.is_none());
        let run = db.get_run(run.id)?.unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.error.is_none());
        Ok(())
    }

    #[test]
    fn test_finish_run_failed_records_kind() -> Result<()> {
        let (db, job) = seeded()?;
        let run = db.create_run(job.id, &now_timestamp())?;
        let failed = db
            .finish_run(
                run.id,
                &RunOutcome::Failed {
                    kind: ErrorKind::RepositoryUnavailable,
                    error: "RepositoryUnavailable: not found".to_string(),
                },
            )?
            .unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.error_kind, Some(ErrorKind::RepositoryUnavailable));
        assert!(failed.result.is_none());
        Ok(())
    }

    #[test]
    fn test_append_log_strictly_ordered() -> Result<()> {
        let (db, job) = seeded()?;
        let run = db.create_run(job.id, &now_timestamp())?;
        for i in 0..50 {
            db.append_log(run.id, &format!("line {}", i))?.unwrap();
        }
        let logs = db.get_logs(run.id)?;
        assert_eq!(logs.len(), 50);
        for pair in logs.windows(2) {
            assert_eq!(pair[1].seq, pair[0].seq + 1);
            let a = DateTime::parse_from_rfc3339(&pair[0].timestamp)?;
            let b = DateTime::parse_from_rfc3339(&pair[1].timestamp)?;
            assert!(b > a, "{} should be after {}", b, a);
        }
        Ok(())
    }

    #[test]
    fn test_append_log_ignored_after_terminal() -> Result<()> {
        let (db, job) = seeded()?;
        let run = db.create_run(job.id, &now_timestamp())?;
        db.append_log(run.id, "started")?.unwrap();
        db.finish_run(run.id, &RunOutcome::Cancelled)?;
        assert!(db.append_log(run.id, "late")?.is_none());
        assert!(db.append_log(12345, "missing")?.is_none());
        assert_eq!(db.get_logs(run.id)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_latest_run_and_running_listing() -> Result<()> {
        let (db, job) = seeded()?;
        assert!(db.latest_run_for_job(job.id)?.is_none());
        let first = db.create_run(job.id, &now_timestamp())?;
        db.finish_run(first.id, &RunOutcome::Cancelled)?;
        let second = db.create_run(job.id, &now_timestamp())?;

        assert_eq!(db.latest_run_for_job(job.id)?.unwrap().id, second.id);
        let running = db.list_running_runs()?;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, second.id);
        assert_eq!(db.count_runs()?, 2);
        assert_eq!(db.list_runs_for_job(job.id)?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_get_run_with_logs() -> Result<()> {
        let (db, job) = seeded()?;
        let run = db.create_run(job.id, &now_timestamp())?;
        db.append_log(run.id, "started")?;
        let with_logs = db.get_run_with_logs(run.id)?.unwrap();
        assert_eq!(with_logs.run.id, run.id);
        assert_eq!(with_logs.logs[0].message, "started");
        assert!(db.get_run_with_logs(999)?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_db_handle_call() -> Result<()> {
        let handle = DbHandle::new(BotDb::new_in_memory()?);
        let project = handle
            .call(|db| db.create_project("p", "/tmp/p.git", "main"))
            .await?;
        let fetched = handle.call(move |db| db.get_project(project.id)).await?;
        assert_eq!(fetched.unwrap().name, "p");
        Ok(())
    }
}
