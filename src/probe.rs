//! Bounded readiness polling for a freshly launched payload.
//!
//! The prober repeatedly greps the payload log inside an environment until a
//! readiness pattern appears or the timeout elapses. It only ever runs
//! read-only commands and never fails: substrate errors during a poll count
//! as "not yet", and a timeout is reported as [`ProbeOutcome::NotReady`] with
//! a short log tail for diagnostics.

use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{Backend, EnvironmentHandle};
use crate::config::ReadinessSettings;
use crate::payload::{DIAGNOSTIC_TAIL_LINES, parse_match_count, probe_command, tail_command};

/// Result of a readiness probe.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProbeOutcome {
    /// The readiness pattern was found in the payload log.
    Ready {
        /// Number of matching log lines on the successful poll.
        matches: u64,
        /// Polls issued, including the successful one.
        attempts: u32,
    },
    /// The pattern was not found before the timeout or cancellation.
    NotReady {
        /// Last lines of the payload log, when they could be read.
        tail: Option<String>,
        /// Polls issued before giving up.
        attempts: u32,
    },
}

impl ProbeOutcome {
    /// Returns `true` when the payload signalled readiness.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// Number of readiness indicators observed; zero when not ready.
    #[must_use]
    pub const fn indicators(&self) -> u64 {
        match self {
            Self::Ready { matches, .. } => *matches,
            Self::NotReady { .. } => 0,
        }
    }

    /// Short human summary used in results and logs.
    #[must_use]
    pub const fn summary(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "gateway is up",
            Self::NotReady { .. } => "gateway may still be starting",
        }
    }
}

/// Polls an environment until the payload reports readiness.
#[derive(Debug)]
pub struct ReadinessProber<'a, B> {
    backend: &'a B,
    log_path: &'a str,
    settings: &'a ReadinessSettings,
}

impl<'a, B> ReadinessProber<'a, B>
where
    B: Backend,
{
    /// Creates a prober reading `log_path` with the given bounds.
    #[must_use]
    pub const fn new(backend: &'a B, log_path: &'a str, settings: &'a ReadinessSettings) -> Self {
        Self {
            backend,
            log_path,
            settings,
        }
    }

    /// Polls immediately, then every poll interval until the pattern appears,
    /// the timeout elapses, or `cancel` fires.
    pub async fn probe(
        &self,
        handle: &EnvironmentHandle,
        cancel: &CancellationToken,
    ) -> ProbeOutcome {
        let command = probe_command(self.log_path, &self.settings.pattern);
        let deadline = Instant::now() + self.settings.timeout;
        let mut attempts = 0_u32;

        loop {
            attempts = attempts.saturating_add(1);
            match self.backend.run(handle, &command).await {
                Ok(output) => {
                    let matches = parse_match_count(&output.stdout);
                    if matches > 0 {
                        return ProbeOutcome::Ready { matches, attempts };
                    }
                    debug!(environment_id = %handle.id, attempts, "readiness signal not yet present");
                }
                Err(err) => {
                    warn!(environment_id = %handle.id, attempts, error = %err, "readiness poll failed");
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let wait = self.settings.poll_interval.min(remaining);
            if wait_or_cancel(wait, cancel).await {
                break;
            }
        }

        ProbeOutcome::NotReady {
            tail: self.tail(handle).await,
            attempts,
        }
    }

    async fn tail(&self, handle: &EnvironmentHandle) -> Option<String> {
        let command = tail_command(self.log_path, DIAGNOSTIC_TAIL_LINES);
        match self.backend.run(handle, &command).await {
            Ok(output) => Some(output.stdout.trim_end().to_owned()),
            Err(err) => {
                warn!(environment_id = %handle.id, error = %err, "could not read payload log tail");
                None
            }
        }
    }
}

/// Sleeps for `wait`, returning `true` when `cancel` fired first.
pub(crate) async fn wait_or_cancel(wait: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => true,
        () = sleep(wait) => false,
    }
}
