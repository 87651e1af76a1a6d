//! # Source Scanner Module
//!
//! Walks a local source tree into the path list and content map the
//! detectors consume
//!
//! ## Key Components
//! - [`collect_files`] - Discover relevant files and read them in parallel
//! - Extension/directory filters matching what repository fetchers ship

use anyhow::{Context, Result};
use log::debug;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::detector::FileSet;

const RELEVANT_EXTENSIONS: &[&str] = &[
    ".py", ".js", ".ts", ".jsx", ".tsx", ".md", ".yml", ".yaml", ".json", ".env", ".txt",
];

const SKIP_DIRECTORIES: &[&str] = &[
    ".git",
    "__pycache__",
    "node_modules",
    ".venv",
    "venv",
    ".pytest_cache",
    ".mypy_cache",
    "dist",
    "build",
    ".next",
    ".nuxt",
    "coverage",
    ".coverage",
];

/// Included regardless of extension; these often decide detection.
const IMPORTANT_FILES: &[&str] = &[
    "requirements.txt",
    "package.json",
    "pyproject.toml",
    "setup.py",
    "Dockerfile",
    "docker-compose.yml",
    "config.yaml",
    "config.yml",
    "OAI_CONFIG_LIST",
];

fn should_descend(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    !SKIP_DIRECTORIES.contains(&name.as_ref())
}

fn is_relevant(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    IMPORTANT_FILES.contains(&name)
        || RELEVANT_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Collect analyzable files under `root`. Unreadable or non-UTF-8 files
/// stay in the path list (they still count for name-based matching) but
/// get no content entry.
pub fn collect_files(root: &Path, max_file_size: u64) -> Result<FileSet> {
    if !root.exists() {
        anyhow::bail!("Path {} does not exist", root.display());
    }

    // Phase 1: discover matching files
    let mut discovered: Vec<(String, PathBuf)> = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(should_descend)
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!("skipping unreadable entry: {}", err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if !is_relevant(&relative) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size > max_file_size {
            debug!("skipping oversized file {} ({} bytes)", relative, size);
            continue;
        }

        discovered.push((relative, entry.into_path()));
    }

    debug!("discovered {} relevant files", discovered.len());

    // Phase 2: read contents in parallel
    let read: Vec<(String, Option<String>)> = discovered
        .par_iter()
        .map(|(relative, path)| (relative.clone(), fs::read_to_string(path).ok()))
        .collect();

    let mut paths = Vec::with_capacity(read.len());
    let mut contents = BTreeMap::new();
    for (relative, content) in read {
        paths.push(relative.clone());
        match content {
            Some(content) => {
                contents.insert(relative, content);
            }
            None => debug!("skipping non-text file {}", relative),
        }
    }

    Ok(FileSet::new(paths, contents))
}

/// Convenience wrapper resolving and validating the root first.
pub fn scan_tree(root: &Path, max_file_size: u64) -> Result<FileSet> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", root.display()))?;
    collect_files(&root, max_file_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_tree(name: &str, files: &[(&str, &str)]) -> PathBuf {
        let root = std::env::temp_dir().join(format!("flowcost_test_{}_{}", name, std::process::id()));
        for (path, content) in files {
            let full = root.join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(full, content).unwrap();
        }
        root
    }

    #[test]
    fn test_collects_relevant_files_only() {
        let root = temp_tree(
            "relevant",
            &[
                ("src/agents.py", "import autogen\n"),
                ("src/app.bin", "binary-ish\n"),
                ("OAI_CONFIG_LIST", "[]\n"),
                ("node_modules/pkg/index.js", "ignored\n"),
            ],
        );

        let files = collect_files(&root, 512 * 1024).unwrap();

        assert!(files.contents.contains_key("src/agents.py"));
        assert!(files.contents.contains_key("OAI_CONFIG_LIST"));
        assert!(!files.contents.contains_key("src/app.bin"));
        assert!(!files.paths.iter().any(|p| p.contains("node_modules")));

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_oversized_files_skipped() {
        let big = "x = 1\n".repeat(100);
        let root = temp_tree("oversize", &[("big.py", big.as_str()), ("small.py", "y = 2\n")]);

        let files = collect_files(&root, 64).unwrap();
        assert!(!files.contents.contains_key("big.py"));
        assert!(files.contents.contains_key("small.py"));

        fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_missing_root_errors() {
        let missing = std::env::temp_dir().join("flowcost_test_definitely_missing");
        assert!(collect_files(&missing, 1024).is_err());
    }
}
