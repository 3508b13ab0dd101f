//! Structured results of a completed or degraded cycle.

use std::time::Duration;

use serde::Serialize;

use crate::backend::EnvironmentSource;
use crate::probe::ProbeOutcome;

/// Why a cycle finished without replacing the handoff record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Degradation {
    /// Every capture attempt failed.
    CaptureFailed {
        /// Attempts made before giving up.
        attempts: u32,
        /// Last provider error.
        message: String,
    },
    /// The image was captured but the record could not be written.
    CommitFailed {
        /// Image that was captured and is not referenced by the record.
        image_id: String,
        /// Store error.
        message: String,
    },
}

impl Degradation {
    /// Human-readable description.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::CaptureFailed { attempts, message } => {
                format!("capture failed after {attempts} attempt(s): {message}")
            }
            Self::CommitFailed { image_id, message } => {
                format!("captured {image_id} but could not record it: {message}")
            }
        }
    }
}

/// Terminal state of a cycle that reached Capture.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CycleStatus {
    /// A new image was captured and committed.
    Completed,
    /// The record still names the image this cycle started from.
    Degraded(Degradation),
}

/// Result of one pass through the cycle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CycleOutcome {
    /// Terminal state.
    pub status: CycleStatus,
    /// Environment created by the cycle.
    pub environment_id: String,
    /// Start point of the environment.
    pub started_from: EnvironmentSource,
    /// Image committed by the cycle, when it completed.
    pub image_id: Option<String>,
    /// Readiness probe result.
    pub probe: ProbeOutcome,
    /// Wall-clock time from cycle start to Done.
    pub elapsed: Duration,
}

impl CycleOutcome {
    /// Returns `true` when the record was replaced.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self.status, CycleStatus::Completed)
    }

    /// Image the next cycle will resume from.
    #[must_use]
    pub fn resume_image(&self) -> Option<&str> {
        match self.status {
            CycleStatus::Completed => self.image_id.as_deref(),
            CycleStatus::Degraded(_) => self.started_from.image_id(),
        }
    }

    /// Builds the machine-readable summary shared by the CLI and the trigger
    /// endpoint.
    #[must_use]
    pub fn report(&self) -> CycleReport {
        let (status, message) = match &self.status {
            CycleStatus::Completed => (
                "ok",
                format!(
                    "Keepalive complete. {}; next cycle resumes from {}.",
                    self.probe.summary(),
                    self.resume_image().unwrap_or("blank")
                ),
            ),
            CycleStatus::Degraded(reason) => ("degraded", reason.describe()),
        };
        CycleReport {
            status,
            sandbox_id: self.environment_id.clone(),
            snapshot_id: self.resume_image().map(str::to_owned),
            previous_snapshot_id: self.started_from.image_id().unwrap_or_default().to_owned(),
            gateway_indicators: self.probe.indicators(),
            ready: self.probe.is_ready(),
            elapsed_secs: self.elapsed.as_secs(),
            message,
        }
    }
}

/// JSON summary of a cycle.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    /// `ok` or `degraded`.
    pub status: &'static str,
    /// Environment created by the cycle.
    pub sandbox_id: String,
    /// Image the next cycle resumes from.
    pub snapshot_id: Option<String>,
    /// Image this cycle resumed from; empty after a blank start.
    pub previous_snapshot_id: String,
    /// Number of readiness indicators seen in the payload log.
    pub gateway_indicators: u64,
    /// Whether the readiness probe succeeded.
    pub ready: bool,
    /// Wall-clock duration of the cycle.
    pub elapsed_secs: u64,
    /// Human-readable summary.
    pub message: String,
}
