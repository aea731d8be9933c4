//! Per-run scratch directories.
//!
//! Each run owns `<root>/run-<run_id>`. A workspace is reserved at
//! admission, allocated when the pipeline starts, and released on every exit
//! path. Once released it can never be allocated again, so a pipeline task
//! that outlives a `stop` cannot resurrect its directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;

use crate::errors::PipelineError;

const RUN_DIR_PREFIX: &str = "run-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceState {
    Reserved,
    Allocated,
    Released,
}

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, run_id: i64) -> PathBuf {
        self.root.join(format!("{}{}", RUN_DIR_PREFIX, run_id))
    }

    /// Reserve the workspace for a run. Nothing touches the disk yet.
    pub fn reserve(&self, run_id: i64) -> Arc<Workspace> {
        Arc::new(Workspace {
            run_id,
            path: self.path_for(run_id),
            state: Mutex::new(WorkspaceState::Reserved),
        })
    }

    /// Remove `run-*` directories left behind by a previous process.
    /// Directories for runs in `keep` are left alone.
    pub async fn sweep_stale(&self, keep: &[i64]) -> Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .with_context(|| format!("Failed to read {}", self.root.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(id) = name
                .to_str()
                .and_then(|n| n.strip_prefix(RUN_DIR_PREFIX))
                .and_then(|n| n.parse::<i64>().ok())
            else {
                continue;
            };
            if keep.contains(&id) || !entry.file_type().await?.is_dir() {
                continue;
            }
            tokio::fs::remove_dir_all(entry.path())
                .await
                .with_context(|| format!("Failed to remove {}", entry.path().display()))?;
            removed += 1;
        }
        Ok(removed)
    }
}

#[derive(Debug)]
pub struct Workspace {
    run_id: i64,
    path: PathBuf,
    state: Mutex<WorkspaceState>,
}

impl Workspace {
    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn state(&self) -> WorkspaceState {
        *self.state.lock().await
    }

    /// Create a fresh, empty directory for the run. Any stale directory at
    /// the same path is removed first. Idempotent while allocated.
    pub async fn allocate(&self) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        match *state {
            WorkspaceState::Allocated => return Ok(()),
            WorkspaceState::Released => {
                return Err(PipelineError::Workspace(format!(
                    "workspace for run {} was already released",
                    self.run_id
                )));
            }
            WorkspaceState::Reserved => {}
        }

        if self.path.exists() {
            tokio::fs::remove_dir_all(&self.path).await.map_err(|e| {
                PipelineError::Workspace(format!(
                    "failed to remove stale {}: {}",
                    self.path.display(),
                    e
                ))
            })?;
        }
        tokio::fs::create_dir_all(&self.path).await.map_err(|e| {
            PipelineError::Workspace(format!("failed to create {}: {}", self.path.display(), e))
        })?;

        *state = WorkspaceState::Allocated;
        Ok(())
    }

    /// Destroy the directory. Safe to call any number of times, from any
    /// exit path; the directory is removed whenever it exists.
    pub async fn release(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = WorkspaceState::Released;
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&self.path)
                .await
                .with_context(|| format!("Failed to remove workspace {}", self.path.display()))?;
        }
        Ok(())
    }

    /// Fail unless the workspace is allocated and its directory still exists.
    pub async fn ensure_live(&self) -> Result<(), PipelineError> {
        let state = self.state.lock().await;
        if *state != WorkspaceState::Allocated || !self.path.is_dir() {
            return Err(PipelineError::Workspace(format!(
                "workspace for run {} is no longer available",
                self.run_id
            )));
        }
        Ok(())
    }
}
