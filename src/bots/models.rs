use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub repository_url: String,
    pub default_branch: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    DependencyUpdate,
    SecurityScan,
    ModuleUpdate,
    Custom,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DependencyUpdate => "dependency_update",
            Self::SecurityScan => "security_scan",
            Self::ModuleUpdate => "module_update",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dependency_update" => Ok(Self::DependencyUpdate),
            "security_scan" => Ok(Self::SecurityScan),
            "module_update" => Ok(Self::ModuleUpdate),
            "custom" => Ok(Self::Custom),
            _ => Err(format!("Invalid job type: {}", s)),
        }
    }
}

/// Job status as seen by callers. Only the orchestrator writes it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

impl From<RunStatus> for JobStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Running => Self::Running,
            RunStatus::Completed => Self::Completed,
            RunStatus::Failed => Self::Failed,
            RunStatus::Cancelled => Self::Stopped,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub job_type: JobType,
    /// Type-specific settings, interpreted by the job's strategy.
    pub configuration: serde_json::Value,
    pub status: JobStatus,
    pub last_run_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Runs only ever move out of `running`, and only into a terminal state.
    pub fn can_transition_to(&self, to: RunStatus) -> bool {
        matches!(self, Self::Running) && to.is_terminal()
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

/// Classification of a failed run, persisted next to the error text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorKind {
    RepositoryUnavailable,
    BranchError,
    TransformationError,
    PushError,
    WorkspaceError,
    StageTimeout,
    Interrupted,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RepositoryUnavailable => "RepositoryUnavailable",
            Self::BranchError => "BranchError",
            Self::TransformationError => "TransformationError",
            Self::PushError => "PushError",
            Self::WorkspaceError => "WorkspaceError",
            Self::StageTimeout => "StageTimeout",
            Self::Interrupted => "Interrupted",
            Self::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RepositoryUnavailable" => Ok(Self::RepositoryUnavailable),
            "BranchError" => Ok(Self::BranchError),
            "TransformationError" => Ok(Self::TransformationError),
            "PushError" => Ok(Self::PushError),
            "WorkspaceError" => Ok(Self::WorkspaceError),
            "StageTimeout" => Ok(Self::StageTimeout),
            "Interrupted" => Ok(Self::Interrupted),
            "Internal" => Ok(Self::Internal),
            _ => Err(format!("Invalid error kind: {}", s)),
        }
    }
}

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initializing,
    Cloning,
    Branching,
    Transforming,
    Committing,
    Finalizing,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Cloning => "cloning",
            Self::Branching => "branching",
            Self::Transforming => "transforming",
            Self::Committing => "committing",
            Self::Finalizing => "finalizing",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub branch: String,
    pub summary: String,
    pub analysis: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub job_id: i64,
    pub status: RunStatus,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub result: Option<RunResult>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub seq: i64,
    pub timestamp: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunWithLogs {
    #[serde(flatten)]
    pub run: Run,
    pub logs: Vec<LogEntry>,
}

/// Snapshot of one in-flight execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveRun {
    pub job_id: i64,
    pub run_id: i64,
    pub job_type: JobType,
    pub started_at: String,
    pub elapsed_ms: u64,
}

/// Terminal write applied to a run by the orchestrator.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(RunResult),
    Failed { kind: ErrorKind, error: String },
    Cancelled,
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Completed(_) => RunStatus::Completed,
            Self::Failed { .. } => RunStatus::Failed,
            Self::Cancelled => RunStatus::Cancelled,
        }
    }
}
