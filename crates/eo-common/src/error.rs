//! Error types for product resolution and dataset opening.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using AccessError.
pub type AccessResult<T> = Result<T, AccessError>;

/// Primary error type for product data access.
#[derive(Debug, Error)]
pub enum AccessError {
    // === Address Resolution Errors ===
    #[error("No dataset address found for '{key}' in product {product}")]
    AddressNotFound { product: String, key: String },

    #[error(
        "Product {product} is accessible through a location scheme that is not supported: {scheme}"
    )]
    UnsupportedAddressScheme { product: String, scheme: String },

    #[error(
        "Asset '{key}' is missing or ambiguous in product {product}: \
         {exact_matches} exact match(es), {pattern_matches} pattern match(es)"
    )]
    AmbiguousOrMissingAsset {
        product: String,
        key: String,
        exact_matches: usize,
        pattern_matches: usize,
    },

    // === Decode Errors ===
    #[error("None of the engines [{}] could open the dataset at {address}", .tried.join(", "))]
    DecodeEngineExhausted { address: String, tried: Vec<String> },

    #[error("Cannot open local dataset {path}: {reason}")]
    LocalOpenFailed { path: String, reason: String },

    #[error("Could not create dataset for {product}: {reason}")]
    DatasetCreation {
        product: String,
        reason: String,
        #[source]
        source: Option<Box<AccessError>>,
    },

    // === Collaborator Errors ===
    #[error("Download failed: {0}")]
    Download(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    // === Infrastructure Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Retrieval deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("Retrieval cancelled")]
    Cancelled,
}

impl AccessError {
    /// Build a terminal dataset creation error without an underlying cause.
    pub fn dataset_creation(product: impl Into<String>, reason: impl Into<String>) -> Self {
        AccessError::DatasetCreation {
            product: product.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Wrap another error into a terminal dataset creation error.
    pub fn dataset_creation_from(
        product: impl Into<String>,
        reason: impl Into<String>,
        cause: AccessError,
    ) -> Self {
        AccessError::DatasetCreation {
            product: product.into(),
            reason: reason.into(),
            source: Some(Box::new(cause)),
        }
    }

    /// Whether a failed direct access should be retried on a local copy.
    ///
    /// Address scheme, I/O, storage and decode failures advance to the
    /// download tier. Configuration, cancellation and deadline errors do not.
    pub fn triggers_download_fallback(&self) -> bool {
        matches!(
            self,
            AccessError::UnsupportedAddressScheme { .. }
                | AccessError::Io(_)
                | AccessError::Storage(_)
                | AccessError::LocalOpenFailed { .. }
                | AccessError::DecodeEngineExhausted { .. }
        )
    }
}

impl From<serde_json::Error> for AccessError {
    fn from(err: serde_json::Error) -> Self {
        AccessError::Storage(format!("JSON error: {}", err))
    }
}
