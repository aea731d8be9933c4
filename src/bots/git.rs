//! Repository client: clone, branch, commit and push via libgit2.
//!
//! All libgit2 calls are blocking, so each operation runs on tokio's
//! blocking pool. Network operations take an abort token: once it fires the
//! transfer callbacks stop libgit2 at its next progress report, so the
//! blocking task ends instead of running on unobserved.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use git2::build::RepoBuilder;
use git2::{
    BranchType, Cred, CredentialType, FetchOptions, IndexAddOption, PushOptions, RemoteCallbacks,
    Repository, Signature,
};
use tokio_util::sync::CancellationToken;

use crate::errors::PipelineError;

/// libgit2 re-invokes the credentials callback after a rejected credential;
/// this bounds the number of attempts.
const MAX_CREDENTIAL_ATTEMPTS: u32 = 1;

/// Commit identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitAuthor {
    pub name: String,
    pub email: String,
}

impl Default for GitAuthor {
    fn default() -> Self {
        Self {
            name: "repobot".to_string(),
            email: "repobot@localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed { commit: String },
    /// The working tree matched HEAD; nothing was committed or pushed.
    NoChanges,
}

#[async_trait]
pub trait RepositoryClient: Send + Sync {
    /// Clone `url` at `branch` into `dest`. The transfer stops early once
    /// `abort` fires.
    async fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        branch: &str,
        abort: &CancellationToken,
    ) -> Result<(), PipelineError>;

    /// Create `name` from HEAD and check it out. Fails if the name exists
    /// locally or on the remote.
    async fn create_branch(&self, workspace: &Path, name: &str) -> Result<(), PipelineError>;

    /// Stage every change (deletions included), commit and push `branch` to
    /// `origin` once. The push is not started, or is stopped during
    /// negotiation, once `abort` fires.
    async fn commit_and_push(
        &self,
        workspace: &Path,
        branch: &str,
        message: &str,
        author: &GitAuthor,
        abort: &CancellationToken,
    ) -> Result<PushOutcome, PipelineError>;
}

/// libgit2-backed [`RepositoryClient`].
#[derive(Debug, Clone, Default)]
pub struct GitClient {
    token: Option<String>,
}

impl GitClient {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

fn join_error(e: tokio::task::JoinError) -> PipelineError {
    PipelineError::Internal(format!("git task panicked: {}", e))
}

#[async_trait]
impl RepositoryClient for GitClient {
    async fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        branch: &str,
        abort: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let url = url.to_string();
        let dest = dest.to_path_buf();
        let branch = branch.to_string();
        let token = self.token.clone();
        let abort = abort.clone();
        tokio::task::spawn_blocking(move || {
            clone_blocking(&url, &dest, &branch, token.as_deref(), &abort)
        })
        .await
        .map_err(join_error)?
    }

    async fn create_branch(&self, workspace: &Path, name: &str) -> Result<(), PipelineError> {
        let workspace = workspace.to_path_buf();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || create_branch_blocking(&workspace, &name))
            .await
            .map_err(join_error)?
    }

    async fn commit_and_push(
        &self,
        workspace: &Path,
        branch: &str,
        message: &str,
        author: &GitAuthor,
        abort: &CancellationToken,
    ) -> Result<PushOutcome, PipelineError> {
        let workspace: PathBuf = workspace.to_path_buf();
        let branch = branch.to_string();
        let message = message.to_string();
        let author = author.clone();
        let token = self.token.clone();
        let abort = abort.clone();
        tokio::task::spawn_blocking(move || {
            commit_and_push_blocking(&workspace, &branch, &message, &author, token.as_deref(), &abort)
        })
        .await
        .map_err(join_error)?
    }
}

fn credential_callbacks(token: Option<&str>) -> RemoteCallbacks<'_> {
    let mut attempts = 0u32;
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, username, allowed| {
        attempts += 1;
        if attempts > MAX_CREDENTIAL_ATTEMPTS {
            return Err(git2::Error::from_str("authentication failed"));
        }
        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT)
            && let Some(token) = token
        {
            return Cred::userpass_plaintext("x-access-token", token);
        }
        if allowed.contains(CredentialType::SSH_KEY) {
            return Cred::ssh_key_from_agent(username.unwrap_or("git"));
        }
        if allowed.contains(CredentialType::DEFAULT) {
            return Cred::default();
        }
        Err(git2::Error::from_str("no usable credentials"))
    });
    callbacks
}

fn clone_blocking(
    url: &str,
    dest: &Path,
    branch: &str,
    token: Option<&str>,
    abort: &CancellationToken,
) -> Result<(), PipelineError> {
    if abort.is_cancelled() {
        return Err(PipelineError::RepositoryUnavailable(format!(
            "clone of {} aborted",
            url
        )));
    }
    let mut callbacks = credential_callbacks(token);
    let on_transfer = abort.clone();
    callbacks.transfer_progress(move |_| !on_transfer.is_cancelled());
    let on_sideband = abort.clone();
    callbacks.sideband_progress(move |_| !on_sideband.is_cancelled());
    let mut fetch = FetchOptions::new();
    fetch.remote_callbacks(callbacks);

    RepoBuilder::new()
        .branch(branch)
        .fetch_options(fetch)
        .clone(url, dest)
        .map_err(|e| {
            PipelineError::RepositoryUnavailable(format!("clone of {} failed: {}", url, e.message()))
        })?;
    Ok(())
}

fn create_branch_blocking(workspace: &Path, name: &str) -> Result<(), PipelineError> {
    let branch_err = |e: git2::Error| PipelineError::Branch(e.message().to_string());

    let repo = Repository::open(workspace).map_err(branch_err)?;
    if repo.find_branch(name, BranchType::Local).is_ok() {
        return Err(PipelineError::Branch(format!("branch '{}' already exists", name)));
    }
    if repo
        .find_branch(&format!("origin/{}", name), BranchType::Remote)
        .is_ok()
    {
        return Err(PipelineError::Branch(format!(
            "branch '{}' already exists on origin",
            name
        )));
    }

    let head = repo
        .head()
        .and_then(|h| h.peel_to_commit())
        .map_err(branch_err)?;
    repo.branch(name, &head, false).map_err(branch_err)?;
    repo.set_head(&format!("refs/heads/{}", name))
        .map_err(branch_err)?;
    Ok(())
}

fn commit_and_push_blocking(
    workspace: &Path,
    branch: &str,
    message: &str,
    author: &GitAuthor,
    token: Option<&str>,
    abort: &CancellationToken,
) -> Result<PushOutcome, PipelineError> {
    let push_err = |e: git2::Error| PipelineError::Push(e.message().to_string());

    let repo = Repository::open(workspace).map_err(push_err)?;
    let mut index = repo.index().map_err(push_err)?;
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .map_err(push_err)?;
    index.update_all(["*"].iter(), None).map_err(push_err)?;
    index.write().map_err(push_err)?;
    let tree_id = index.write_tree().map_err(push_err)?;

    let parent = repo
        .head()
        .and_then(|h| h.peel_to_commit())
        .map_err(push_err)?;
    if parent.tree_id() == tree_id {
        return Ok(PushOutcome::NoChanges);
    }

    let tree = repo.find_tree(tree_id).map_err(push_err)?;
    let sig = Signature::now(&author.name, &author.email).map_err(push_err)?;
    let commit_id = repo
        .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
        .map_err(push_err)?;

    if abort.is_cancelled() {
        return Err(PipelineError::Push(format!("push of {} aborted", branch)));
    }
    let mut remote = repo.find_remote("origin").map_err(push_err)?;
    let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch);
    let mut rejected: Option<String> = None;
    {
        let mut callbacks = credential_callbacks(token);
        let on_negotiation = abort.clone();
        callbacks.push_negotiation(move |_| {
            if on_negotiation.is_cancelled() {
                Err(git2::Error::from_str("push aborted"))
            } else {
                Ok(())
            }
        });
        let on_sideband = abort.clone();
        callbacks.sideband_progress(move |_| !on_sideband.is_cancelled());
        callbacks.push_update_reference(|refname, status| {
            if let Some(msg) = status {
                rejected = Some(format!("{} rejected: {}", refname, msg));
            }
            Ok(())
        });
        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);
        remote
            .push(&[refspec.as_str()], Some(&mut options))
            .map_err(push_err)?;
    }
    if let Some(reason) = rejected {
        return Err(PipelineError::Push(reason));
    }

    Ok(PushOutcome::Pushed {
        commit: commit_id.to_string(),
    })
}
