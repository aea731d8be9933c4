//! Fixtures shared by the unit tests: a seeded bare remote and scripted
//! text generators.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use git2::build::RepoBuilder;
use git2::{IndexAddOption, Repository, RepositoryInitOptions, Signature};
use tempfile::TempDir;
use tokio::sync::Notify;

use super::generator::{GenerationRequest, TextGenerator};

/// A bare repository on disk with one commit on `main`.
pub struct RemoteFixture {
    _dir: TempDir,
    bare: PathBuf,
    url: String,
}

impl RemoteFixture {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn bare_path(&self) -> &Path {
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
}

pub fn seed_remote(files: &[(&str, &str)]) -> RemoteFixture {
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
    let url = bare.to_string_lossy().to_string();
    RemoteFixture {
        _dir: dir,
        bare,
        url,
    }
}

/// Always answers with the same text and remembers the last prompt.
pub struct StaticGenerator {
    response: String,
    last_prompt: Mutex<String>,
    calls: AtomicUsize,
}

impl StaticGenerator {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            last_prompt: Mutex::new(String::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn last_prompt(&self) -> String {
        self.last_prompt.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for StaticGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = request.prompt.clone();
        Ok(self.response.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

pub struct FailingGenerator;

#[async_trait]
impl TextGenerator for FailingGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        anyhow::bail!("service unavailable")
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Blocks its first call until released, signalling when it is entered.
pub struct GatedGenerator {
    response: String,
    entered: Arc<Notify>,
    release: Arc<Notify>,
    calls: AtomicUsize,
}

impl GatedGenerator {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Wait until the first call is in flight.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl TextGenerator for GatedGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(self.response.clone())
    }

    fn name(&self) -> &str {
        "gated"
    }
}
