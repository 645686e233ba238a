use crate::config::QUARANTINE_DIR;
use glob::Pattern;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::error;
use walkdir::WalkDir;

/// A regular file found under a root.
#[derive(Debug, Clone)]
pub struct WalkedFile {
    pub path: PathBuf,
    pub size: u64,
    /// Milliseconds since the Unix epoch.
    pub mtime: i64,
}

/// Compile glob ignore patterns, dropping (and logging) invalid ones.
pub fn compile_ignore_patterns(globs: &[String]) -> Vec<Pattern> {
    globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect()
}

/// Quarantine folders are never walked, whatever the configured patterns say.
pub fn is_ignored(path: &Path, ignore_patterns: &[Pattern]) -> bool {
    if path.file_name().map_or(false, |name| name == QUARANTINE_DIR) {
        return true;
    }
    ignore_patterns
        .iter()
        .any(|pattern| pattern.matches_path(path))
}

/// Walk `root` depth-first in file-name order, yielding regular files.
///
/// Ignored directories are pruned rather than filtered entry by entry. Symlinks are
/// not followed. Unreadable entries are yielded as errors so the caller can count
/// and skip them.
pub fn walk_root<'a>(
    root: &Path,
    ignore_patterns: &'a [Pattern],
) -> impl Iterator<Item = io::Result<WalkedFile>> + 'a {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry| entry.depth() == 0 || !is_ignored(entry.path(), ignore_patterns))
        .filter_map(|entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => return Some(Err(io::Error::from(err))),
            };
            if !entry.file_type().is_file() {
                return None;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    return Some(Err(io::Error::new(
                        io::ErrorKind::Other,
                        format!("Error getting metadata for {}: {}", entry.path().display(), err),
                    )))
                }
            };
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            Some(Ok(WalkedFile {
                path: entry.into_path(),
                size: metadata.len(),
                mtime,
            }))
        })
}
