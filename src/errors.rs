//! Typed error hierarchy for repobot.
//!
//! Two top-level enums cover the two failure surfaces:
//! - `OrchestratorError`: synchronous admission/control failures returned
//!   to callers of `spawn`/`stop`
//! - `PipelineError`: stage failures captured inside a run record

use thiserror::Error;

use crate::bots::models::{ErrorKind, Stage};

/// Errors returned synchronously by orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Job {job_id} already has an active run")]
    AlreadyRunning { job_id: i64 },

    #[error("Capacity exceeded: {limit} runs already active")]
    CapacityExceeded { limit: usize },

    #[error("Job {job_id} has no active run")]
    NotRunning { job_id: i64 },

    #[error("Job {id} not found")]
    JobNotFound { id: i64 },

    #[error("Project {id} not found")]
    ProjectNotFound { id: i64 },

    #[error("Run {id} not found")]
    RunNotFound { id: i64 },

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Orchestrator is shutting down")]
    ShuttingDown,

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// A stage failure. The display text is what gets persisted as the run's
/// `error`, prefixed with the kind name.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("RepositoryUnavailable: {0}")]
    RepositoryUnavailable(String),

    #[error("BranchError: {0}")]
    Branch(String),

    #[error("TransformationError: {0}")]
    Transformation(String),

    #[error("PushError: {0}")]
    Push(String),

    #[error("WorkspaceError: {0}")]
    Workspace(String),

    #[error("StageTimeout: {stage} exceeded {secs}s")]
    StageTimeout { stage: Stage, secs: u64 },

    #[error("Internal: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RepositoryUnavailable(_) => ErrorKind::RepositoryUnavailable,
            Self::Branch(_) => ErrorKind::BranchError,
            Self::Transformation(_) => ErrorKind::TransformationError,
            Self::Push(_) => ErrorKind::PushError,
            Self::Workspace(_) => ErrorKind::WorkspaceError,
            Self::StageTimeout { .. } => ErrorKind::StageTimeout,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Build a transformation error from an `anyhow` chain, keeping the causes.
    pub fn transformation(err: anyhow::Error) -> Self {
        Self::Transformation(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_error_display() {
        let err = OrchestratorError::AlreadyRunning { job_id: 7 };
        assert_eq!(err.to_string(), "Job 7 already has an active run");

        let err = OrchestratorError::CapacityExceeded { limit: 2 };
        assert!(err.to_string().contains("2 runs"));
    }

    #[test]
    fn test_orchestrator_error_is_matchable() {
        let err = OrchestratorError::NotRunning { job_id: 1 };
        assert!(matches!(err, OrchestratorError::NotRunning { job_id: 1 }));
    }

    #[test]
    fn test_store_error_from_anyhow() {
        let err: OrchestratorError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, OrchestratorError::Store(_)));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_pipeline_error_kind_and_prefix() {
        let cases = [
            (
                PipelineError::RepositoryUnavailable("no route".into()),
                ErrorKind::RepositoryUnavailable,
            ),
            (PipelineError::Branch("exists".into()), ErrorKind::BranchError),
            (
                PipelineError::Transformation("bad json".into()),
                ErrorKind::TransformationError,
            ),
            (PipelineError::Push("rejected".into()), ErrorKind::PushError),
            (PipelineError::Workspace("gone".into()), ErrorKind::WorkspaceError),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind);
            assert!(err.to_string().starts_with(kind.as_str()));
        }
    }

    #[test]
    fn test_stage_timeout_message() {
        let err = PipelineError::StageTimeout {
            stage: Stage::Cloning,
            secs: 30,
        };
        assert_eq!(err.kind(), ErrorKind::StageTimeout);
        assert_eq!(err.to_string(), "StageTimeout: cloning exceeded 30s");
    }

    #[test]
    fn test_transformation_keeps_context_chain() {
        let err = anyhow::anyhow!("unexpected token").context("Failed to parse response");
        let err = PipelineError::transformation(err);
        let text = err.to_string();
        assert!(text.contains("Failed to parse response"));
        assert!(text.contains("unexpected token"));
    }
}
