//! Run record store: the durable run table plus its event mirror.
//!
//! Every write goes to SQLite first and is then published on the
//! [`EventBus`]. The database is authoritative; events are a best-effort
//! mirror for live subscribers.

use anyhow::Result;

use super::db::DbHandle;
use super::events::{EventBus, RunEvent};
use super::models::{LogEntry, Run, RunOutcome};

#[derive(Clone)]
pub struct RunRecorder {
    db: DbHandle,
    events: EventBus,
}

impl RunRecorder {
    pub fn new(db: DbHandle, events: EventBus) -> Self {
        Self { db, events }
    }

    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Create a run in `running` state and announce it.
    pub async fn create_run(&self, job_id: i64, started_at: String) -> Result<Run> {
        let run = self
            .db
            .call(move |db| db.create_run(job_id, &started_at))
            .await?;
        self.publish_status(&run);
        Ok(run)
    }

    /// Append a log line. Returns `None` (and publishes nothing) when the run
    /// is already terminal.
    pub async fn append_log(&self, run_id: i64, message: impl Into<String>) -> Result<Option<LogEntry>> {
        let message = message.into();
        let entry = self
            .db
            .call(move |db| db.append_log(run_id, &message))
            .await?;
        if let Some(entry) = &entry {
            tracing::debug!(run_id, seq = entry.seq, "{}", entry.message);
            self.events.publish(RunEvent::RunLog {
                run_id,
                entry: entry.clone(),
            });
        }
        Ok(entry)
    }

    /// Append a log line, reporting store failures through tracing only.
    pub async fn log(&self, run_id: i64, message: impl Into<String>) {
        if let Err(e) = self.append_log(run_id, message).await {
            tracing::warn!(run_id, error = %e, "Failed to append run log");
        }
    }

    /// The single authoritative terminal write. Returns `None` when the run
    /// had already left `running`, in which case nothing is published.
    pub async fn finish(&self, run_id: i64, outcome: RunOutcome) -> Result<Option<Run>> {
        let run = self
            .db
            .call(move |db| db.finish_run(run_id, &outcome))
            .await?;
        if let Some(run) = &run {
            self.publish_status(run);
        }
        Ok(run)
    }

    fn publish_status(&self, run: &Run) {
        self.events.publish(RunEvent::RunStatus {
            run_id: run.id,
            job_id: run.job_id,
            status: run.status,
            error: run.error.clone(),
            result: run.result.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bots::db::{BotDb, now_timestamp};
    use crate::bots::models::{ErrorKind, JobType, RunStatus};
    use serde_json::json;

    async fn recorder_with_job() -> Result<(RunRecorder, i64)> {
        let db = DbHandle::new(BotDb::new_in_memory()?);
        let job_id = db
            .call(|db| {
                let project = db.create_project("demo", "/tmp/demo.git", "main")?;
                let job = db.create_job(project.id, "scan", JobType::SecurityScan, &json!({}))?;
                Ok(job.id)
            })
            .await?;
        Ok((RunRecorder::new(db, EventBus::new()), job_id))
    }

    #[tokio::test]
    async fn test_create_run_publishes_running_status() -> Result<()> {
        let (recorder, job_id) = recorder_with_job().await?;
        let mut sub = recorder.events().subscribe(["run.*.status"]);
        let run = recorder.create_run(job_id, now_timestamp()).await?;

        match sub.recv().await.unwrap() {
            RunEvent::RunStatus { run_id, status, .. } => {
                assert_eq!(run_id, run.id);
                assert_eq!(status, RunStatus::Running);
            }
            other => panic!("unexpected event {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_append_log_mirrors_to_log_topic() -> Result<()> {
        let (recorder, job_id) = recorder_with_job().await?;
        let run = recorder.create_run(job_id, now_timestamp()).await?;
        let mut sub = recorder.events().subscribe([format!("run.{}.log", run.id)]);

        recorder.log(run.id, "started").await;
        match sub.recv().await.unwrap() {
            RunEvent::RunLog { entry, .. } => {
                assert_eq!(entry.seq, 1);
                assert_eq!(entry.message, "started");
            }
            other => panic!("unexpected event {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_finish_twice_publishes_once() -> Result<()> {
        let (recorder, job_id) = recorder_with_job().await?;
        let run = recorder.create_run(job_id, now_timestamp()).await?;
        let mut sub = recorder.events().subscribe([format!("run.{}.status", run.id)]);

        let first = recorder.finish(run.id, RunOutcome::Cancelled).await?;
        assert_eq!(first.unwrap().status, RunStatus::Cancelled);
        let second = recorder
            .finish(
                run.id,
                RunOutcome::Failed {
                    kind: ErrorKind::Internal,
                    error: "Internal: late".to_string(),
                },
            )
            .await?;
        assert!(second.is_none());

        match sub.recv().await.unwrap() {
            RunEvent::RunStatus { status, .. } => assert_eq!(status, RunStatus::Cancelled),
            other => panic!("unexpected event {:?}", other),
        }
        let pending = tokio::time::timeout(std::time::Duration::from_millis(50), sub.recv()).await;
        assert!(pending.is_err(), "no second status event expected");
        Ok(())
    }

    #[tokio::test]
    async fn test_log_after_terminal_is_dropped() -> Result<()> {
        let (recorder, job_id) = recorder_with_job().await?;
        let run = recorder.create_run(job_id, now_timestamp()).await?;
        recorder.finish(run.id, RunOutcome::Cancelled).await?;
        assert!(recorder.append_log(run.id, "ghost").await?.is_none());
        Ok(())
    }
}
