//! Result and error types for Mirar.

use thiserror::Error;

/// Result type for Mirar operations
pub type MirarResult<T> = Result<T, MirarError>;

/// Errors that can occur in Mirar
#[derive(Debug, Error)]
pub enum MirarError {
    /// Image bytes could not be decoded
    #[error("Failed to decode image: {message}")]
    Decode {
        /// Error message
        message: String,
    },

    /// Image payload exceeds the per-image size ceiling
    #[error("Image payload of {bytes} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge {
        /// Actual payload size in bytes
        bytes: usize,
        /// Configured ceiling in bytes
        limit: usize,
    },

    /// Screenshot capture failed
    #[error("Capture failed: {message}")]
    Capture {
        /// Error message
        message: String,
    },

    /// Browser executable not found
    #[error("Browser not found. Install Chromium or set CHROMIUM_PATH")]
    BrowserNotFound,

    /// Navigation error
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// Operation timed out
    #[error("Operation timed out after {ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// A single vision provider call failed
    #[error("Provider {provider} failed: {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// Every provider in the fallback chain failed
    #[error("All {attempted} vision providers failed")]
    ProviderUnavailable {
        /// Number of providers attempted
        attempted: usize,
    },

    /// Operation called in the wrong run state
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Error message
        message: String,
    },

    /// A spawned task panicked or was cancelled
    #[error("Task failed: {message}")]
    Task {
        /// Error message
        message: String,
    },

    /// Referenced record does not exist
    #[error("Not found: {resource}")]
    NotFound {
        /// Description of the missing record
        resource: String,
    },

    /// Persistence operation failed
    #[error("Store error: {message}")]
    Store {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
