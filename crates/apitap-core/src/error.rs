//! Application-wide error types
//!
//! Centralized error type using `thiserror`. Commands answered over the
//! inspector bridge must never surface a raw panic or a dropped connection,
//! so every variant converts cleanly into a `String` payload.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::TransportError;

/// Application-wide error type
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum AppError {
    /// No debuggable tab could be resolved for the command
    #[error("No debuggable tab available")]
    NoActiveTab,

    /// Attaching the debugger to a tab failed
    #[error("Failed to attach debugger: {0}")]
    AttachFailed(String),

    /// Host transport failure (connection, command round trip)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Settings load/persist error
    #[error("Settings error: {0}")]
    SettingsError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

impl From<AppError> for String {
    fn from(error: AppError) -> String {
        error.to_string()
    }
}

impl From<TransportError> for AppError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}
