//! Backend abstraction for leased sandbox environments.
//!
//! A backend materialises an isolated environment either from a blank base
//! or from a previously captured image, runs shell commands inside it, and
//! captures its state into a new restorable image. Environments are owned by
//! a single keepalive cycle and never shared.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

/// Where a new environment starts from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EnvironmentSource {
    /// A fresh environment with nothing installed.
    Blank,
    /// An environment restored from a captured image.
    Image(String),
}

impl EnvironmentSource {
    /// Returns the image identifier when resuming from an image.
    #[must_use]
    pub fn image_id(&self) -> Option<&str> {
        match self {
            Self::Blank => None,
            Self::Image(id) => Some(id.as_str()),
        }
    }
}

impl fmt::Display for EnvironmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blank => f.write_str("blank"),
            Self::Image(id) => f.write_str(id),
        }
    }
}

/// Parameters required to create a new environment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnvironmentRequest {
    /// Start point for the environment.
    pub source: EnvironmentSource,
    /// Hard wall-clock lease after which the provider destroys the
    /// environment.
    pub lease: Duration,
}

impl EnvironmentRequest {
    /// Builds a request, trimming the image identifier and validating it.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] when the image identifier is
    /// blank or the lease is zero.
    pub fn new(source: EnvironmentSource, lease: Duration) -> Result<Self, BackendError> {
        let trimmed_source = match source {
            EnvironmentSource::Blank => EnvironmentSource::Blank,
            EnvironmentSource::Image(id) => EnvironmentSource::Image(id.trim().to_owned()),
        };
        let request = Self {
            source: trimmed_source,
            lease,
        };
        request.validate()?;
        Ok(request)
    }

    /// Validates the request, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] when the image identifier is
    /// blank or the lease is zero.
    pub fn validate(&self) -> Result<(), BackendError> {
        if let EnvironmentSource::Image(id) = &self.source
            && id.trim().is_empty()
        {
            return Err(BackendError::Validation("image_id".to_owned()));
        }
        if self.lease.is_zero() {
            return Err(BackendError::Validation("lease".to_owned()));
        }
        Ok(())
    }
}

/// Handle returned by a backend once an environment has been created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnvironmentHandle {
    /// Provider specific identifier for the environment.
    pub id: String,
}

/// Identifier of a captured restorable image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageHandle {
    /// Provider specific identifier for the image.
    pub id: String,
}

/// Retention requested when capturing an image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImageExpiration {
    /// The image is retained until explicitly deleted.
    Never,
    /// The provider may garbage-collect the image after this long.
    After(Duration),
}

/// Output captured from a command executed inside an environment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteCommandOutput {
    /// Exit code reported by the remote shell, if available.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl RemoteCommandOutput {
    /// Returns `true` when the remote exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Errors raised by backend-independent request validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum BackendError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal interface implemented by sandbox providers.
pub trait Backend {
    /// Provider specific error type returned by the backend.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Creates a new environment and returns a handle used for subsequent
    /// calls.
    fn create<'a>(
        &'a self,
        request: &'a EnvironmentRequest,
    ) -> BackendFuture<'a, EnvironmentHandle, Self::Error>;

    /// Runs `command` under `bash -c` inside the environment and waits for
    /// it to finish.
    fn run<'a>(
        &'a self,
        handle: &'a EnvironmentHandle,
        command: &'a str,
    ) -> BackendFuture<'a, RemoteCommandOutput, Self::Error>;

    /// Captures the environment's current state into a new image.
    fn snapshot<'a>(
        &'a self,
        handle: &'a EnvironmentHandle,
        expiration: ImageExpiration,
    ) -> BackendFuture<'a, ImageHandle, Self::Error>;

    /// Stops the environment ahead of its lease expiry.
    fn destroy(&self, handle: EnvironmentHandle) -> BackendFuture<'_, (), Self::Error>;
}
