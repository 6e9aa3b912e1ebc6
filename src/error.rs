//! Error types for keygate.

use thiserror::Error;

/// Main error type for keygate operations.
///
/// Admission decisions themselves never fail; only building a limiter or
/// loading its configuration can.
#[derive(Error, Debug)]
pub enum KeygateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for keygate operations.
pub type Result<T> = std::result::Result<T, KeygateError>;
