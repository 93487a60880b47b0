//! Error types for Symgrab core

use thiserror::Error;

/// Errors that can occur in Symgrab core
#[derive(Debug, Error)]
pub enum SymgrabError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Decompression failed: {0}")]
    Decompression(String),
}

impl SymgrabError {
    /// Invalid-state errors are API misuse, not transient failures; the
    /// caller must not retry them.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, SymgrabError::InvalidState(_))
    }
}

impl From<SymgrabError> for String {
    fn from(error: SymgrabError) -> Self {
        error.to_string()
    }
}
