//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use git2::build::RepoBuilder;
use git2::{IndexAddOption, Repository, RepositoryInitOptions, Signature};
use tempfile::TempDir;
use tokio::sync::Notify;
use tracing_subscriber::{EnvFilter, fmt};

use repobot::bots::generator::{GenerationRequest, TextGenerator};

static INIT: Once = Once::new();

/// Initialise tracing for tests. Output is captured per test and only shown
/// for failures. Enable levels with `REPOBOT_LOG=debug`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("REPOBOT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).with_test_writer().init();
    });
}

// ── Git remotes ──────────────────────────────────────────────────────

/// A bare repository with one commit on `main`.
pub struct Remote {
    _dir: TempDir,
    bare: PathBuf,
}

impl Remote {
    pub fn url(&self) -> String {
        self.bare.to_string_lossy().to_string()
    }

    pub fn path(&self) -> &Path {
        &self.bare
    }

    pub fn branches(&self) -> Vec<String> {
        let repo = Repository::open_bare(&self.bare).unwrap();
        repo.branches(Some(git2::BranchType::Local))
            .unwrap()
            .filter_map(|b| b.ok())
            .filter_map(|(b, _)| b.name().ok().flatten().map(String::from))
            .collect()
    }

    /// Contents of `path` at the tip of `branch`.
    pub fn read_file(&self, branch: &str, path: &str) -> Option<String> {
        let repo = Repository::open_bare(&self.bare).unwrap();
        let reference = repo.find_branch(branch, git2::BranchType::Local).ok()?;
        let tree = reference.get().peel_to_tree().ok()?;
        let entry = tree.get_path(Path::new(path)).ok()?;
        let blob = repo.find_blob(entry.id()).ok()?;
        Some(String::from_utf8_lossy(blob.content()).to_string())
    }
}

pub fn seed_remote(files: &[(&str, &str)]) -> Remote {
    let dir = tempfile::tempdir().unwrap();
    let seed = dir.path().join("seed");
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = Repository::init_opts(&seed, &opts).unwrap();

    for (path, content) in files {
        let full = seed.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("test", "test@test.com").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
        .unwrap();

    let bare = dir.path().join("remote.git");
    RepoBuilder::new()
        .bare(true)
        .clone(seed.to_str().unwrap(), &bare)
        .unwrap();
    Remote { _dir: dir, bare }
}

// ── Text generators ──────────────────────────────────────────────────

/// Answers every call with the same reply.
pub struct FixedGenerator {
    reply: String,
    calls: AtomicUsize,
}

impl FixedGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for FixedGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// Holds every call until released. `entered` fires once per call.
pub struct HoldingGenerator {
    reply: String,
    entered: Arc<Notify>,
    gate: Arc<Notify>,
    held: AtomicUsize,
    open: std::sync::atomic::AtomicBool,
}

impl HoldingGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            entered: Arc::new(Notify::new()),
            gate: Arc::new(Notify::new()),
            held: AtomicUsize::new(0),
            open: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Wait until one more call is being held.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    /// Let every held call and all future calls through.
    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.gate.notify_waiters();
    }
}

#[async_trait]
impl TextGenerator for HoldingGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        if !self.open.load(Ordering::SeqCst) {
            let released = self.gate.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if !self.open.load(Ordering::SeqCst) {
                self.held.fetch_add(1, Ordering::SeqCst);
                self.entered.notify_one();
                released.await;
                self.held.fetch_sub(1, Ordering::SeqCst);
            }
        }
        Ok(self.reply.clone())
    }

    fn name(&self) -> &str {
        "holding"
    }
}

/// Write an executable script that prints `reply` whatever its arguments,
/// for use as the CLI generator command.
#[cfg(unix)]
pub fn write_generator_script(dir: &Path, reply: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-claude.sh");
    let script = format!("#!/bin/sh\ncat <<'REPLY'\n{}\nREPLY\n", reply);
    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}
