//! Fatal errors raised by the lease cycle controller.

use std::fmt::Display;

use thiserror::Error;

use crate::backend::{BackendError, EnvironmentSource};
use crate::handoff::HandoffStoreError;

/// Conditions that abort a cycle before anything is persisted.
///
/// Failures after the payload is running never surface here; they degrade
/// the cycle instead and are reported through
/// [`CycleOutcome`](super::CycleOutcome).
#[derive(Debug, Error)]
pub enum CycleError<BackendErr>
where
    BackendErr: std::error::Error + 'static,
{
    /// Raised when the handoff record cannot be read and no start image
    /// override is configured.
    #[error("failed to read handoff record: {0}")]
    ResolveStart(#[source] HandoffStoreError),
    /// Raised when the resolved start point is unusable.
    #[error("invalid environment request: {0}")]
    Request(#[source] BackendError),
    /// Raised when the environment cannot be created.
    #[error("failed to create environment from {start}: {source}")]
    Materialize {
        /// Start point that was requested.
        start: EnvironmentSource,
        /// Provider-specific error.
        #[source]
        source: BackendErr,
    },
    /// Raised when the payload launch command cannot be issued.
    #[error("failed to launch payload in environment {environment_id}: {message}")]
    Launch {
        /// Start point of the environment.
        start: EnvironmentSource,
        /// Environment the launch was attempted in.
        environment_id: String,
        /// Human-readable description, including any teardown failure.
        message: String,
        /// Provider-specific error.
        #[source]
        source: BackendErr,
    },
}

impl<BackendErr> CycleError<BackendErr>
where
    BackendErr: std::error::Error + 'static,
{
    /// Image in play when the cycle failed, if one had been resolved.
    #[must_use]
    pub fn image_id(&self) -> Option<&str> {
        match self {
            Self::ResolveStart(_) | Self::Request(_) => None,
            Self::Materialize { start, .. } | Self::Launch { start, .. } => start.image_id(),
        }
    }
}

pub(crate) fn append_teardown_note<E: Display>(message: String, teardown_error: Option<&E>) -> String {
    if let Some(teardown) = teardown_error {
        format!("{message} (teardown also failed: {teardown})")
    } else {
        message
    }
}
