//! Source-tree collection and prompt excerpts.

use std::path::{Path, PathBuf};

use glob::Pattern;
use walkdir::WalkDir;

use crate::bots::generator::PromptLimits;

/// Directories never sent to the generator.
const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "vendor",
    "dist",
    "build",
    "__pycache__",
    ".venv",
];

/// Every regular file under `root`, as sorted paths relative to `root`.
pub fn list_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !(entry.file_type().is_dir()
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| SKIP_DIRS.contains(&name)))
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();
    files.sort();
    files
}

/// Files under `root` whose relative path matches any of `patterns`.
pub fn glob_files(root: &Path, patterns: &[Pattern]) -> Vec<PathBuf> {
    list_files(root)
        .into_iter()
        .filter(|rel| patterns.iter().any(|p| p.matches_path(rel)))
        .collect()
}

/// Files with one of the given extensions (without the dot).
pub fn files_with_extensions(root: &Path, extensions: &[String]) -> Vec<PathBuf> {
    list_files(root)
        .into_iter()
        .filter(|rel| {
            rel.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| extensions.iter().any(|wanted| wanted == ext))
        })
        .collect()
}

/// Parse glob patterns, naming the offending one on failure.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>, String> {
    patterns
        .iter()
        .map(|p| Pattern::new(p).map_err(|e| format!("invalid file pattern '{}': {}", p, e)))
        .collect()
}

/// Render files as fenced sections, each bounded by `max_file_chars`, until
/// `budget` characters are used. Non-UTF-8 files are skipped.
pub fn render_excerpts(root: &Path, files: &[PathBuf], limits: &PromptLimits, budget: usize) -> String {
    let mut out = String::new();
    let mut omitted = 0usize;
    for rel in files {
        let Ok(content) = std::fs::read_to_string(root.join(rel)) else {
            continue;
        };
        let section = format!(
            "### {}\n```\n{}\n```\n\n",
            rel.display(),
            limits.bound_file(&content)
        );
        if out.len() + section.len() > budget {
            omitted += 1;
            continue;
        }
        out.push_str(&section);
    }
    if omitted > 0 {
        out.push_str(&format!("({} more files omitted)\n", omitted));
    }
    out
}

/// Newline-separated relative paths, bounded to `budget` characters.
pub fn render_listing(files: &[PathBuf], budget: usize) -> String {
    let mut out = String::new();
    for rel in files {
        let line = format!("{}\n", rel.display());
        if out.len() + line.len() > budget {
            out.push_str("...\n");
            break;
        }
        out.push_str(&line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn tree() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        for (path, content) in [
            ("src/main.rs", "fn main() {}"),
            ("src/auth/login.rs", "pub fn login() {}"),
            ("README.md", "# demo"),
            ("node_modules/pkg/index.js", "module.exports = 1"),
            ("target/debug/out", "bin"),
        ] {
            let full = dir.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, content).unwrap();
        }
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        dir
    }

    #[test]
    fn test_list_files_skips_vendor_dirs() {
        let dir = tree();
        let files = list_files(dir.path());
        assert_eq!(
            files,
            vec![
                PathBuf::from("README.md"),
                PathBuf::from("src/auth/login.rs"),
                PathBuf::from("src/main.rs"),
            ]
        );
    }

    #[test]
    fn test_glob_files() {
        let dir = tree();
        let patterns = compile_patterns(&["src/auth/**".to_string()]).unwrap();
        assert_eq!(
            glob_files(dir.path(), &patterns),
            vec![PathBuf::from("src/auth/login.rs")]
        );
    }

    #[test]
    fn test_compile_patterns_reports_bad_glob() {
        let err = compile_patterns(&["src/[".to_string()]).unwrap_err();
        assert!(err.contains("src/["));
    }

    #[test]
    fn test_files_with_extensions() {
        let dir = tree();
        let files = files_with_extensions(dir.path(), &["rs".to_string()]);
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_render_excerpts_respects_budget() {
        let dir = tree();
        let files = list_files(dir.path());
        let limits = PromptLimits::default();
        let full = render_excerpts(dir.path(), &files, &limits, 10_000);
        assert!(full.contains("### src/main.rs"));
        assert!(full.contains("fn main() {}"));

        let tight = render_excerpts(dir.path(), &files, &limits, 40);
        assert!(tight.contains("more files omitted"));
    }

    #[test]
    fn test_render_listing_truncates() {
        let files: Vec<PathBuf> = (0..100).map(|i| PathBuf::from(format!("f{}.txt", i))).collect();
        let listing = render_listing(&files, 30);
        assert!(listing.ends_with("...\n"));
        assert!(listing.len() <= 34);
    }
}
