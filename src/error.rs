//! Error types for Turnstile.

use thiserror::Error;

/// Main error type for Turnstile operations.
///
/// Denied admissions are not errors; they are reported as `false` by the
/// limiters. Errors only arise while building limiters from configuration.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A single setting was out of range
    #[error("Invalid setting `{field}`: {reason}")]
    InvalidSetting {
        field: &'static str,
        reason: String,
    },

    /// Layered configuration loading errors
    #[error("Settings error: {0}")]
    Settings(#[from] ::config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TurnstileError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        TurnstileError::InvalidSetting {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
