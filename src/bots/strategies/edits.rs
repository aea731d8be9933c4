//! File edits proposed by the generator, and the change listing they produce.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FileEdit {
    /// Create or overwrite a file.
    Write { path: String, content: String },
    /// Replace the first occurrence of `find`.
    Replace {
        path: String,
        find: String,
        replace: String,
    },
    Delete { path: String },
}

impl FileEdit {
    pub fn path(&self) -> &str {
        match self {
            Self::Write { path, .. } | Self::Replace { path, .. } | Self::Delete { path } => path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl ChangeKind {
    fn letter(&self) -> char {
        match self {
            Self::Added => 'A',
            Self::Modified => 'M',
            Self::Deleted => 'D',
        }
    }
}

/// Net effect of a strategy on the working tree, keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    changes: BTreeMap<String, ChangeKind>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn get(&self, path: &str) -> Option<ChangeKind> {
        self.changes.get(path).copied()
    }

    /// Fold one more change into the set, collapsing repeated edits of the
    /// same path into their net effect.
    pub fn record(&mut self, path: &str, kind: ChangeKind) {
        use ChangeKind::*;
        let merged = match (self.changes.get(path).copied(), kind) {
            (None, k) => Some(k),
            (Some(Added), Modified) => Some(Added),
            (Some(Added), Deleted) => None,
            (Some(Deleted), Added | Modified) => Some(Modified),
            (Some(_), k) => Some(k),
        };
        match merged {
            Some(k) => {
                self.changes.insert(path.to_string(), k);
            }
            None => {
                self.changes.remove(path);
            }
        }
    }

    /// `git diff --name-status` style listing.
    pub fn render(&self) -> String {
        self.changes
            .iter()
            .map(|(path, kind)| format!("{}\t{}", kind.letter(), path))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Check that `rel` is a plain relative path a strategy may edit: not
/// absolute, no `..` components, nothing under `.git`.
pub fn check_relative(rel: &str) -> Result<&Path, PipelineError> {
    let candidate = Path::new(rel);
    let invalid = || PipelineError::Transformation(format!("refusing to edit path '{}'", rel));

    if rel.trim().is_empty() || candidate.is_absolute() {
        return Err(invalid());
    }
    let mut normal = candidate.components().filter(|c| !matches!(c, Component::CurDir));
    match normal.next() {
        Some(Component::Normal(first)) if first != ".git" => {}
        _ => return Err(invalid()),
    }
    if candidate
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(invalid());
    }
    Ok(candidate)
}

/// Resolve a generator-supplied relative path inside `root`.
///
/// On top of [`check_relative`], any path that passes through a symlink in
/// the working tree is rejected: the clone is untrusted and a link may point
/// anywhere.
pub fn resolve_path(root: &Path, rel: &str) -> Result<PathBuf, PipelineError> {
    let candidate = check_relative(rel)?;

    let mut current = root.to_path_buf();
    // Once a component is missing nothing below it exists either.
    let mut on_disk = true;
    for component in candidate.components() {
        let Component::Normal(part) = component else {
            continue;
        };
        current.push(part);
        if !on_disk {
            continue;
        }
        match std::fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(PipelineError::Transformation(format!(
                    "refusing to edit path '{}': it passes through a symlink",
                    rel
                )));
            }
            Ok(_) => {}
            Err(_) => on_disk = false,
        }
    }
    Ok(current)
}

/// Apply `edits` in order under `root`.
///
/// Fails with a workspace error when `root` is gone (the run was stopped and
/// its workspace released), and with a transformation error for any edit
/// that cannot be applied.
pub fn apply_edits(root: &Path, edits: &[FileEdit]) -> Result<ChangeSet, PipelineError> {
    if !root.is_dir() {
        return Err(PipelineError::Workspace(format!(
            "workspace {} no longer exists",
            root.display()
        )));
    }

    let mut changes = ChangeSet::default();
    for edit in edits {
        let target = resolve_path(root, edit.path())?;
        let io_err = |e: std::io::Error| {
            PipelineError::Transformation(format!("failed to edit '{}': {}", edit.path(), e))
        };

        match edit {
            FileEdit::Write { path, content } => {
                let existed = target.exists();
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).map_err(io_err)?;
                }
                std::fs::write(&target, content).map_err(io_err)?;
                let kind = if existed {
                    ChangeKind::Modified
                } else {
                    ChangeKind::Added
                };
                changes.record(path, kind);
            }
            FileEdit::Replace {
                path,
                find,
                replace,
            } => {
                let original = std::fs::read_to_string(&target).map_err(io_err)?;
                if find.is_empty() || !original.contains(find.as_str()) {
                    return Err(PipelineError::Transformation(format!(
                        "text to replace not found in '{}'",
                        path
                    )));
                }
                let updated = original.replacen(find.as_str(), replace, 1);
                if updated != original {
                    std::fs::write(&target, updated).map_err(io_err)?;
                    changes.record(path, ChangeKind::Modified);
                }
            }
            FileEdit::Delete { path } => {
                if !target.is_file() {
                    return Err(PipelineError::Transformation(format!(
                        "cannot delete missing file '{}'",
                        path
                    )));
                }
                std::fs::remove_file(&target).map_err(io_err)?;
                changes.record(path, ChangeKind::Deleted);
            }
        }
    }
    Ok(changes)
}
