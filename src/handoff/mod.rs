//! Durable handoff record threading keepalive cycles together.
//!
//! The record names the image the next cycle resumes from. It is read once
//! at the start of a cycle and replaced once near the end; a write is the
//! commit point of a cycle, so stores must never expose a half-written
//! record.

mod file;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::EnvironmentSource;

pub use file::FileHandoffStore;

/// Identity of the deployed agent, recorded once at deploy time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AgentIdentity {
    /// Short machine name of the agent.
    pub name: String,
    /// Human-facing display name.
    pub display_name: String,
}

/// The single piece of durable state shared between cycles.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HandoffRecord {
    /// Image the next cycle resumes from.
    pub snapshot_id: String,
    /// Image the committing cycle resumed from; empty after a blank start.
    #[serde(default)]
    pub previous_snapshot_id: String,
    /// Most recently created environment, for diagnostics.
    #[serde(default)]
    pub sandbox_id: String,
    /// When the record was last replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Agent name from the deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    /// Agent display name from the deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_display_name: Option<String>,
    /// When the agent was first deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl HandoffRecord {
    /// Builds the first record written by a deployment.
    #[must_use]
    pub fn deployed(
        snapshot_id: impl Into<String>,
        sandbox_id: impl Into<String>,
        agent: &AgentIdentity,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            snapshot_id: snapshot_id.into(),
            previous_snapshot_id: String::new(),
            sandbox_id: sandbox_id.into(),
            updated_at: Some(now),
            agent_name: Some(agent.name.clone()),
            agent_display_name: Some(agent.display_name.clone()),
            created_at: Some(now),
        }
    }

    /// Builds the record committed at the end of a cycle.
    ///
    /// Deployment metadata is carried over from `prior` unchanged.
    #[must_use]
    pub fn after_cycle(
        prior: Option<&Self>,
        snapshot_id: impl Into<String>,
        resumed_from: &EnvironmentSource,
        sandbox_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            snapshot_id: snapshot_id.into(),
            previous_snapshot_id: resumed_from.image_id().unwrap_or_default().to_owned(),
            sandbox_id: sandbox_id.into(),
            updated_at: Some(now),
            agent_name: prior.and_then(|record| record.agent_name.clone()),
            agent_display_name: prior.and_then(|record| record.agent_display_name.clone()),
            created_at: prior.and_then(|record| record.created_at),
        }
    }

    /// Returns the previous image, if the committing cycle resumed from one.
    #[must_use]
    pub fn previous(&self) -> Option<&str> {
        Some(self.previous_snapshot_id.as_str()).filter(|id| !id.is_empty())
    }
}

/// Errors raised while reading or writing the handoff record.
#[derive(Debug, Error)]
pub enum HandoffStoreError {
    /// Raised when the backing medium cannot be accessed.
    #[error("failed to access {location}: {message}")]
    Io {
        /// Location that could not be accessed.
        location: String,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the stored record cannot be parsed.
    #[error("failed to parse handoff record at {location}: {message}")]
    Parse {
        /// Location holding the unreadable record.
        location: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when a record is structurally valid but unusable.
    #[error("invalid handoff record at {location}: {message}")]
    Invalid {
        /// Location holding the record.
        location: String,
        /// Description of the problem.
        message: String,
    },
}

/// Durable single-record store.
///
/// Implementations assume a single writer at a time; the last successful
/// write wins.
pub trait HandoffStore {
    /// Reads the current record, returning `None` before the first deploy.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffStoreError`] when the medium is unavailable or the
    /// record cannot be parsed.
    fn read(&self) -> Result<Option<HandoffRecord>, HandoffStoreError>;

    /// Atomically replaces the record.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffStoreError`] when the record cannot be persisted.
    /// The previous record remains intact in that case.
    fn write(&self, record: &HandoffRecord) -> Result<(), HandoffStoreError>;
}

/// Validates a record read back from storage.
///
/// # Errors
///
/// Returns [`HandoffStoreError::Invalid`] when the record has no image id.
pub fn validate_record(location: &str, record: &HandoffRecord) -> Result<(), HandoffStoreError> {
    if record.snapshot_id.trim().is_empty() {
        return Err(HandoffStoreError::Invalid {
            location: location.to_owned(),
            message: String::from("snapshotId must not be empty"),
        });
    }
    Ok(())
}
