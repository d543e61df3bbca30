//! Shared test utilities for the eo-cube workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Synthetic file generators for every supported format
//! - Product fixtures and Sentinel-2 SAFE trees
//! - Mock authenticator and downloader
//! - Test data path helpers and skip macros
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```

pub mod fixtures;
pub mod generators;
pub mod mocks;
pub mod paths;

pub use fixtures::*;
pub use generators::*;
pub use mocks::*;
pub use paths::*;

/// Macro to skip a test if the required sample file is not found.
///
/// ```ignore
/// use test_utils::require_test_file;
///
/// #[test]
/// fn test_real_granule() {
///     let path = require_test_file!("T31TDH_20180101T105441_B01.jp2");
/// }
/// ```
#[macro_export]
macro_rules! require_test_file {
    ($name:expr) => {{
        match $crate::find_test_file($name) {
            Some(path) => path,
            None => {
                eprintln!(
                    "SKIPPED: Test file '{}' not found. Download test data or set TEST_DATA_DIR.",
                    $name
                );
                return;
            }
        }
    }};
}

/// Assert that a result is an error matching a pattern.
///
/// ```ignore
/// use test_utils::assert_err_matches;
///
/// assert_err_matches!(resolver.resolve(&product, "B99"), AccessError::AddressNotFound { .. });
/// ```
#[macro_export]
macro_rules! assert_err_matches {
    ($result:expr, $pattern:pat) => {{
        match $result {
            Err($pattern) => {}
            Err(other) => panic!(
                "assertion failed: expected error `{}`, got `{:?}`",
                stringify!($pattern),
                other
            ),
            Ok(_) => panic!(
                "assertion failed: expected error `{}`, got Ok",
                stringify!($pattern)
            ),
        }
    }};
}
