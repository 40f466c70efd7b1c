//! Error types for Dockhand

use thiserror::Error;

/// Result type for Dockhand operations
pub type Result<T> = std::result::Result<T, DockhandError>;

/// Dockhand error types
#[derive(Error, Debug)]
pub enum DockhandError {
    #[error("Cannot reach container runtime: {0}")]
    Connection(String),

    #[error("Failed to pull image {image}: {message}")]
    Pull { image: String, message: String },

    #[error("Failed to create container {name}: {message}")]
    Create { name: String, message: String },

    #[error("Failed to start container {container}: {message}")]
    Start { container: String, message: String },

    #[error("Exec failed in container {container}: {message}")]
    Exec { container: String, message: String },

    #[error("Failed to stop container {container}: {message}")]
    Stop { container: String, message: String },

    #[error("Log stream error: {0}")]
    LogStream(String),

    #[error("Invalid lifecycle transition: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DockhandError {
    /// Whether this error aborts the run.
    ///
    /// Exec and stop failures are reported but leave the process to carry on
    /// (or, during shutdown, to exit normally).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DockhandError::Exec { .. } | DockhandError::Stop { .. })
    }
}
