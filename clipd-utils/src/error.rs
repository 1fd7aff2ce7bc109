//! Error types for clipd
//!
//! Provides a unified error type used across all clipd crates.

use std::path::PathBuf;

/// Main error type for clipd operations
#[derive(Debug, thiserror::Error)]
pub enum ClipdError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === History Errors ===

    #[error("History error: {0}")]
    History(String),

    #[error("Compression failed: {0}")]
    Compression(String),

    // === Transport Errors ===

    #[error("Transport error: {0}")]
    Transport(String),

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    // === Registry Errors ===

    #[error("Unknown selection: {0}")]
    UnknownSelection(String),

    #[error("Unknown selection target: {0}")]
    UnknownTarget(String),

    // === Instance Errors ===

    #[error("Another clipd daemon is already running")]
    AlreadyRunning,

    #[error("No clipd daemon is running")]
    NotRunning,

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClipdError {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a history error
    pub fn history(msg: impl Into<String>) -> Self {
        Self::History(msg.into())
    }

    /// Create a compression error
    pub fn compression(msg: impl Into<String>) -> Self {
        Self::Compression(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using ClipdError
pub type Result<T> = std::result::Result<T, ClipdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClipdError::UnknownSelection("PRIMARY2".into());
        assert_eq!(err.to_string(), "Unknown selection: PRIMARY2");
    }

    #[test]
    fn test_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ClipdError::Io(io_err);
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_error_display_file_write() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = ClipdError::FileWrite {
            path: PathBuf::from("/var/lib/clipd/CLIPBOARD.hist"),
            source: io_err,
        };
        let msg = err.to_string();
        assert!(msg.contains("Failed to write file"));
        assert!(msg.contains("CLIPBOARD.hist"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err: ClipdError = io_err.into();
        assert!(matches!(err, ClipdError::Io(_)));
    }

    #[test]
    fn test_helpers() {
        assert!(matches!(
            ClipdError::transport("lost"),
            ClipdError::Transport(_)
        ));
        assert!(matches!(ClipdError::config("bad"), ClipdError::Config(_)));
        assert!(matches!(
            ClipdError::compression("codec"),
            ClipdError::Compression(_)
        ));
        assert!(matches!(
            ClipdError::internal("oops"),
            ClipdError::Internal(_)
        ));
    }
}
