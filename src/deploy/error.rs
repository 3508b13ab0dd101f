//! Errors raised during first-run deployment.

use thiserror::Error;

use crate::backend::BackendError;
use crate::handoff::HandoffStoreError;

/// Failures that stop a deployment.
#[derive(Debug, Error)]
pub enum DeployError<BackendErr>
where
    BackendErr: std::error::Error + 'static,
{
    /// Raised when the bootstrap lease is unusable.
    #[error("invalid environment request: {0}")]
    Request(#[source] BackendError),
    /// Raised when the bootstrap environment cannot be created.
    #[error("failed to create environment: {0}")]
    Create(#[source] BackendErr),
    /// Raised when a setup command cannot be issued.
    #[error("{step} could not run: {message}")]
    Substrate {
        /// Setup step being performed.
        step: &'static str,
        /// Human-readable description, including any teardown failure.
        message: String,
        /// Provider-specific error.
        #[source]
        source: BackendErr,
    },
    /// Raised when a setup command exits non-zero.
    #[error("{step} failed with exit code {exit_code:?}: {message}")]
    Step {
        /// Setup step being performed.
        step: &'static str,
        /// Exit code reported by the remote shell.
        exit_code: Option<i32>,
        /// Captured stderr, including any teardown failure.
        message: String,
    },
    /// Raised when the configured environment cannot be captured.
    #[error("failed to capture image of {environment_id}: {message}")]
    Capture {
        /// Environment that was configured.
        environment_id: String,
        /// Human-readable description, including any teardown failure.
        message: String,
        /// Provider-specific error.
        #[source]
        source: BackendErr,
    },
    /// Raised when the image was captured but the record could not be
    /// written.
    #[error("captured {image_id} but could not record it (set BATON_SNAPSHOT_ID={image_id} to resume from it): {source}")]
    Record {
        /// Captured image.
        image_id: String,
        /// Store error.
        #[source]
        source: HandoffStoreError,
    },
}
