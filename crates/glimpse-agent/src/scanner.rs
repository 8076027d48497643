//! One-shot source tree scan.
//!
//! The agent walks the working directory once at startup and records a
//! content fingerprint and line count for every file of interest. Breakpoint
//! paths supplied by the controller are resolved against this snapshot:
//! exact (possibly rebased) lookups first, then fuzzy suffix matching.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::AgentConfig;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to canonicalize scan root {path}: {source}")]
    Root {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to walk source tree: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileStats {
    /// SHA-256 of the file contents, lowercase hex.
    pub hash: String,
    pub line_count: usize,
}

/// Immutable result of the startup scan.
#[derive(Clone, Debug)]
pub struct ScanResults {
    base_dir: String,
    stats: BTreeMap<String, FileStats>,
}

/// Walk `base_dir` and record stats for every file whose normalized path
/// matches `matcher`.
pub fn scan(base_dir: &Path, matcher: &Regex) -> Result<ScanResults, ScanError> {
    let root = base_dir.canonicalize().map_err(|source| ScanError::Root {
        path: base_dir.to_path_buf(),
        source,
    })?;

    let mut stats = BTreeMap::new();
    for entry in WalkDir::new(&root).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = normalize_separators(&entry.path().to_string_lossy());
        if !matcher.is_match(&path) {
            continue;
        }
        let bytes = std::fs::read(entry.path()).map_err(|source| ScanError::Read {
            path: entry.path().to_path_buf(),
            source,
        })?;
        stats.insert(
            path,
            FileStats {
                hash: hex::encode(Sha256::digest(&bytes)),
                line_count: count_lines(&bytes),
            },
        );
    }

    Ok(ScanResults {
        base_dir: normalize_separators(&root.to_string_lossy()),
        stats,
    })
}

impl ScanResults {
    pub fn base_dir(&self) -> &str {
        &self.base_dir
    }

    pub fn stats(&self, path: &str) -> Option<&FileStats> {
        self.stats.get(&normalize_separators(path))
    }

    pub fn line_count(&self, path: &str) -> Option<usize> {
        self.stats(path).map(|s| s.line_count)
    }

    /// All recorded stats whose path matches `re`.
    pub fn select_stats(&self, re: &Regex) -> BTreeMap<&str, &FileStats> {
        self.stats
            .iter()
            .filter(|(path, _)| re.is_match(path))
            .map(|(path, stats)| (path.as_str(), stats))
            .collect()
    }

    /// Paths matching `re`, relativized against `base` where possible.
    pub fn select_files(&self, re: &Regex, base: &Path) -> Vec<PathBuf> {
        let base = normalize_separators(&base.to_string_lossy());
        self.stats
            .keys()
            .filter(|path| re.is_match(path))
            .map(|path| {
                let relative = path
                    .strip_prefix(&base)
                    .map(|rest| rest.trim_start_matches('/'));
                PathBuf::from(relative.unwrap_or(path))
            })
            .collect()
    }

    /// Resolve a controller-supplied path hint to scanned files.
    ///
    /// When the hint is rooted under `app_path_relative_to_repository` it is
    /// rebased into the working directory and an exact lookup is tried
    /// before falling back to fuzzy matching.
    pub fn find_scripts(&self, path_hint: &str, config: &AgentConfig) -> Vec<String> {
        let hint = normalize_separators(path_hint);
        if let Some(repo_path) = config.app_path_relative_to_repository.as_deref() {
            let prefix = normalize_separators(&repo_path.to_string_lossy());
            if let Some(rest) = strip_segment_prefix(&hint, &prefix) {
                let rebased = format!("{}/{}", self.base_dir, rest);
                if self.stats.contains_key(&rebased) {
                    return vec![rebased];
                }
            }
        }
        let files: Vec<&str> = self.stats.keys().map(String::as_str).collect();
        find_scripts_fuzzy(&hint, &files)
    }

    /// Digest over every scanned file's fingerprint; changes whenever any
    /// deployed source changes, so redeploys register as a new debuggee.
    pub fn tree_digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, stats) in &self.stats {
            hasher.update(path.as_bytes());
            hasher.update(b"\0");
            hasher.update(stats.hash.as_bytes());
            hasher.update(b"\0");
        }
        hex::encode(hasher.finalize())
    }
}

/// Treat `path_hint` as a path suffix: every file ending with it wins. If
/// none do, fall back to basename equality, but only when that basename is
/// unique across the file set. Comparisons are plain string comparisons:
/// `.` is never a metacharacter.
pub fn find_scripts_fuzzy(path_hint: &str, files: &[&str]) -> Vec<String> {
    let hint = normalize_separators(path_hint);
    if hint.is_empty() {
        return Vec::new();
    }

    let suffix_matches: Vec<String> = files
        .iter()
        .filter(|file| has_path_suffix(file, &hint))
        .map(|file| file.to_string())
        .collect();
    if !suffix_matches.is_empty() {
        return suffix_matches;
    }

    let base = basename(&hint);
    let base_matches: Vec<String> = files
        .iter()
        .filter(|file| basename(file) == base)
        .map(|file| file.to_string())
        .collect();
    if base_matches.len() == 1 {
        base_matches
    } else {
        Vec::new()
    }
}

fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Suffix match aligned to a path-segment boundary.
fn has_path_suffix(path: &str, suffix: &str) -> bool {
    if !path.ends_with(suffix) {
        return false;
    }
    let boundary = path.len() - suffix.len();
    boundary == 0 || path.as_bytes()[boundary - 1] == b'/' || suffix.starts_with('/')
}

/// Strip `prefix` from `path` at a segment boundary, returning the rest
/// without a leading slash.
fn strip_segment_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        return None;
    }
    if prefix.ends_with('/') {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

fn count_lines(bytes: &[u8]) -> usize {
    if bytes.is_empty() {
        return 0;
    }
    let newlines = bytes.iter().filter(|b| **b == b'\n').count();
    if bytes.ends_with(b"\n") {
        newlines
    } else {
        newlines + 1
    }
}
