//! Path utilities for locating test data files.
//!
//! Synthetic fixtures cover every decoder; real-world samples are optional
//! and looked up here so that tests can skip when they are absent.

use std::path::PathBuf;

/// Returns the workspace root directory.
pub fn workspace_root() -> PathBuf {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    PathBuf::from(manifest_dir)
        .parent() // crates/
        .and_then(|p| p.parent()) // workspace root
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from(manifest_dir))
}

/// Returns `crates/{crate_name}/testdata/`.
pub fn crate_testdata_dir(crate_name: &str) -> PathBuf {
    workspace_root()
        .join("crates")
        .join(crate_name)
        .join("testdata")
}

/// Searches for a sample file.
///
/// Checks `TEST_DATA_DIR` first, then the testdata directories of the
/// decoder and pipeline crates.
pub fn find_test_file(name: &str) -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(test_data_dir) = std::env::var("TEST_DATA_DIR") {
        candidates.push(PathBuf::from(test_data_dir).join(name));
    }
    candidates.extend([
        crate_testdata_dir("raster-formats").join(name),
        crate_testdata_dir("eo-cube").join(name),
    ]);

    candidates.into_iter().find(|p| p.exists())
}
