//! Error Handling Module
//!
//! Defines the error type shared by the dataset, model and training layers.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for contrastive training runs
#[derive(Error, Debug)]
pub enum SslError {
    /// Error with dataset preparation or loading
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error raised while fitting a model
    #[error("Training error: {0}")]
    Training(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl From<serde_json::Error> for SslError {
    fn from(err: serde_json::Error) -> Self {
        SslError::Serialization(err.to_string())
    }
}

impl From<serde_pickle::Error> for SslError {
    fn from(err: serde_pickle::Error) -> Self {
        SslError::Serialization(err.to_string())
    }
}

/// Convenience Result type for contrastive training operations
pub type Result<T> = std::result::Result<T, SslError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| SslError::InvalidInput(format!("{}: {}", f(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SslError::Dataset("empty split".to_string());
        assert_eq!(format!("{}", err), "Dataset error: empty split");
    }

    #[test]
    fn test_path_not_found_display() {
        let err = SslError::PathNotFound(PathBuf::from("/data/stl10_binary/train_X.bin"));
        assert!(format!("{}", err).contains("train_X.bin"));
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<i32, std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));

        let with_context = result.with_context(|| "Failed to read train_y.bin".to_string());
        assert!(matches!(with_context, Err(SslError::InvalidInput(msg)) if msg.contains("train_y.bin")));
    }
}
