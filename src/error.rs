//! Error taxonomy for the restarter.

use thiserror::Error;

/// Restarter result type
pub type Result<T> = std::result::Result<T, RestarterError>;

/// Errors that terminate the process. None of these are recovered: the
/// watchdog logs the error with context and exits non-zero.
#[derive(Error, Debug)]
pub enum RestarterError {
    /// Missing or invalid configuration, including an unreadable env file
    #[error("Configuration error: {0}")]
    Config(String),

    /// A Compute Engine API call failed
    #[error("[{api}] Compute API error: {message}")]
    Provider { api: &'static str, message: String },

    /// A zone operation completed with an error status
    #[error("Operation {name} failed: {message}")]
    OperationFailed { name: String, message: String },

    /// SMTP submission failed
    #[error("Notification error: {0}")]
    Notification(String),
}

impl RestarterError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a provider error for the named API call
    pub fn provider(api: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Provider {
            api,
            message: err.to_string(),
        }
    }

    /// Create a notification error
    pub fn notification(err: impl std::fmt::Display) -> Self {
        Self::Notification(err.to_string())
    }
}
