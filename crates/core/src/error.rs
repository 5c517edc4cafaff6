//! Error types for the package verifier.

use thiserror::Error;

/// Result type alias using the verifier's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the package verifier.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Process Errors
    // =========================================================================
    #[error("Launch failure: {0}")]
    LaunchFailure(String),

    // =========================================================================
    // Sandbox Lifecycle Errors
    // =========================================================================
    #[error("Sandbox is not running")]
    NotRunning,

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Command channel closed: {0}")]
    ChannelClosed(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a launch failure error.
    pub fn launch_failure(msg: impl Into<String>) -> Self {
        Self::LaunchFailure(msg.into())
    }

    /// Create an invalid command error.
    pub fn invalid_command(msg: impl Into<String>) -> Self {
        Self::InvalidCommand(msg.into())
    }

    /// Create a channel closed error.
    pub fn channel_closed(msg: impl Into<String>) -> Self {
        Self::ChannelClosed(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
