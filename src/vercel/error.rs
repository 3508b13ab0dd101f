//! Error types for the Vercel Sandbox backend.

use crate::backend::BackendError;
use crate::config::ConfigError;
use thiserror::Error;

/// Errors raised by the Vercel Sandbox backend.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VercelBackendError {
    /// Raised when the high-level configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when a request is missing a required field.
    #[error("invalid environment request: {0}")]
    Validation(String),
    /// Raised when the API cannot be reached or the connection drops.
    #[error("{action} request failed: {message}")]
    Transport {
        /// Operation being performed.
        action: &'static str,
        /// Message returned by the HTTP client.
        message: String,
    },
    /// Raised when the API answers with a non-success status.
    #[error("{action} rejected with HTTP {status}: {message}")]
    Api {
        /// Operation being performed.
        action: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body, if any.
        message: String,
    },
    /// Raised when a success response cannot be decoded.
    #[error("{action} returned an unexpected body: {message}")]
    Decode {
        /// Operation being performed.
        action: &'static str,
        /// Decoder error message.
        message: String,
    },
}

impl From<BackendError> for VercelBackendError {
    fn from(value: BackendError) -> Self {
        match value {
            BackendError::Validation(field) => Self::Validation(field),
        }
    }
}

impl From<ConfigError> for VercelBackendError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
