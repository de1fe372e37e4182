//! Error types for the Mirador CLI

use thiserror::Error;

/// CLI error type
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// HTTP service error
    #[error("Server error: {message}")]
    Server {
        /// Error message
        message: String,
    },

    /// Invalid command-line argument
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message
        message: String,
    },

    /// A comparison crossed its mismatch threshold
    #[error("Visual regression: {mismatch:.3}% of pixels differ")]
    Regression {
        /// Observed mismatch percentage
        mismatch: f64,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Mirar library error
    #[error("Mirar error: {0}")]
    Mirar(#[from] mirar::MirarError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

impl CliError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a server error
    #[must_use]
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = CliError::config("missing API key");
        assert_eq!(err.to_string(), "Configuration error: missing API key");
    }

    #[test]
    fn test_server_error_display() {
        let err = CliError::server("port 3000 already in use");
        assert_eq!(err.to_string(), "Server error: port 3000 already in use");
    }

    #[test]
    fn test_invalid_argument_display() {
        let err = CliError::invalid_argument("bad viewport");
        assert_eq!(err.to_string(), "Invalid argument: bad viewport");
    }

    #[test]
    fn test_regression_display_includes_percentage() {
        let err = CliError::Regression { mismatch: 12.5 };
        assert_eq!(err.to_string(), "Visual regression: 12.500% of pixels differ");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: CliError = io.into();
        assert!(matches!(err, CliError::Io(_)));
        assert!(err.to_string().contains("no such file"));
    }

    #[test]
    fn test_mirar_error_conversion() {
        let lib = mirar::MirarError::NotFound {
            resource: "project abc".to_string(),
        };
        let err: CliError = lib.into();
        assert!(matches!(err, CliError::Mirar(_)));
        assert!(err.to_string().contains("project abc"));
    }
}
