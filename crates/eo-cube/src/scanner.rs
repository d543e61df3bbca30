//! Enumeration of materialized product files.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Lists the regular files under a path.
pub trait FilesystemScanner: Send + Sync {
    /// Files under `root` in a deterministic order; `root` itself when it
    /// is a file.
    fn scan(&self, root: &Path) -> Vec<PathBuf>;
}

/// Recursive walk sorted by file name.
#[derive(Debug, Default, Clone, Copy)]
pub struct WalkdirScanner;

impl FilesystemScanner for WalkdirScanner {
    fn scan(&self, root: &Path) -> Vec<PathBuf> {
        WalkDir::new(root)
            .sort_by_file_name()
            .follow_links(true)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect()
    }
}
