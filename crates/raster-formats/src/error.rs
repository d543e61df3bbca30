//! Error types for format decoding.

use thiserror::Error;

/// Result type for decoder operations.
pub type FormatResult<T> = Result<T, FormatError>;

/// Errors raised while decoding a dataset.
#[derive(Error, Debug)]
pub enum FormatError {
    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Input is not in the expected format
    #[error("Invalid {format} data: {reason}")]
    InvalidFormat { format: &'static str, reason: String },

    /// Input ends before a structure is complete
    #[error("Truncated {format} data at offset {offset}")]
    Truncated { format: &'static str, offset: usize },

    /// Valid container using a variant we do not decode
    #[error("Unsupported {format} variant: {reason}")]
    Unsupported { format: &'static str, reason: String },

    /// Engine only reads from the local filesystem
    #[error("Engine '{engine}' requires a local file")]
    RequiresLocalFile { engine: &'static str },

    /// Metadata document error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FormatError {
    pub(crate) fn invalid(format: &'static str, reason: impl Into<String>) -> Self {
        FormatError::InvalidFormat {
            format,
            reason: reason.into(),
        }
    }

    pub(crate) fn unsupported(format: &'static str, reason: impl Into<String>) -> Self {
        FormatError::Unsupported {
            format,
            reason: reason.into(),
        }
    }
}
