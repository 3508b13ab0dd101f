//! Lease cycle controller.
//!
//! One cycle resolves its start point, materialises an environment, refreshes
//! and launches the payload, probes readiness, holds until shortly before the
//! lease expires, captures a non-expiring image, and commits it to the
//! handoff store. Steps run strictly in sequence. The record is read once at
//! the start and written once at the end, and the environment is only
//! released after that write succeeds.

mod error;
mod outcome;

use std::fmt::Display;

use chrono::Utc;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::{
    Backend, EnvironmentHandle, EnvironmentRequest, EnvironmentSource, ImageExpiration,
    ImageHandle,
};
use crate::config::CycleConfig;
use crate::handoff::{HandoffRecord, HandoffStore};
use crate::payload::{launch_command, refresh_command};
use crate::probe::{ProbeOutcome, ReadinessProber, wait_or_cancel};

pub use error::CycleError;
pub(crate) use error::append_teardown_note;
pub use outcome::{CycleOutcome, CycleReport, CycleStatus, Degradation};

/// Drives environments through the lease cycle.
#[derive(Debug)]
pub struct LeaseCycle<B, S> {
    backend: B,
    store: S,
}

impl<B, S> LeaseCycle<B, S>
where
    B: Backend,
    S: HandoffStore,
{
    /// Creates a controller over a backend and a handoff store.
    #[must_use]
    pub const fn new(backend: B, store: S) -> Self {
        Self { backend, store }
    }

    /// Runs one cycle from ResolveStart to Done.
    ///
    /// Cancelling `cancel` cuts readiness polling and Hold short so the
    /// cycle proceeds straight to Capture and CommitHandoff.
    ///
    /// # Errors
    ///
    /// Returns [`CycleError`] when the start point cannot be resolved, the
    /// environment cannot be created, or the payload launch cannot be
    /// issued. Nothing is persisted in those cases. Capture and commit
    /// failures are reported as [`CycleStatus::Degraded`] instead.
    pub async fn run(
        &self,
        config: &CycleConfig,
        cancel: &CancellationToken,
    ) -> Result<CycleOutcome, CycleError<B::Error>> {
        let cycle_started = Instant::now();
        let (start, prior) = self.resolve_start(config)?;
        let request = EnvironmentRequest::new(start, config.lease).map_err(CycleError::Request)?;
        info!(image_id = %request.source, "resolved start point");

        let materialize_started = Instant::now();
        let handle = self.backend.create(&request).await.map_err(|source| {
            CycleError::Materialize {
                start: request.source.clone(),
                source,
            }
        })?;
        info!(
            environment_id = %handle.id,
            image_id = %request.source,
            elapsed_secs = cycle_started.elapsed().as_secs(),
            "environment materialised"
        );

        self.refresh_payload(&handle, config).await;
        self.launch_or_destroy(&handle, &request.source, config).await?;

        let probe = ReadinessProber::new(
            &self.backend,
            &config.payload.log_path,
            &config.readiness,
        )
        .probe(&handle, cancel)
        .await;
        log_probe(&handle, &probe);

        hold(config, materialize_started, cancel, &handle).await;

        let lease_deadline = materialize_started + config.lease;
        let committed = match self.capture(&handle, config, lease_deadline).await {
            Ok(image) => {
                self.commit(&handle, &request.source, prior.as_ref(), image)
                    .await
            }
            Err(degradation) => Err(degradation),
        };
        let (status, image_id) = match committed {
            Ok(image_id) => (CycleStatus::Completed, Some(image_id)),
            Err(degradation) => (CycleStatus::Degraded(degradation), None),
        };
        let outcome = CycleOutcome {
            status,
            environment_id: handle.id,
            started_from: request.source,
            image_id,
            probe,
            elapsed: cycle_started.elapsed(),
        };
        info!(
            environment_id = %outcome.environment_id,
            image_id = outcome.resume_image().unwrap_or("blank"),
            elapsed_secs = outcome.elapsed.as_secs(),
            completed = outcome.is_completed(),
            "cycle done"
        );
        Ok(outcome)
    }

    fn resolve_start(
        &self,
        config: &CycleConfig,
    ) -> Result<(EnvironmentSource, Option<HandoffRecord>), CycleError<B::Error>> {
        if let Some(image) = &config.start_override {
            let prior = self.store.read().unwrap_or_else(|err| {
                warn!(error = %err, "handoff record unreadable; using start override");
                None
            });
            return Ok((EnvironmentSource::Image(image.clone()), prior));
        }

        let prior = self.store.read().map_err(CycleError::ResolveStart)?;
        let start = prior.as_ref().map_or(EnvironmentSource::Blank, |record| {
            EnvironmentSource::Image(record.snapshot_id.clone())
        });
        Ok((start, prior))
    }

    async fn refresh_payload(&self, handle: &EnvironmentHandle, config: &CycleConfig) {
        let command = refresh_command(&config.payload);
        match self.backend.run(handle, &command).await {
            Ok(output) if output.is_success() => {
                info!(environment_id = %handle.id, "payload refreshed");
            }
            Ok(output) => warn!(
                environment_id = %handle.id,
                exit_code = ?output.exit_code,
                stderr = %output.stderr.trim(),
                "payload refresh failed; launching existing code"
            ),
            Err(err) => warn!(
                environment_id = %handle.id,
                error = %err,
                "payload refresh could not run; launching existing code"
            ),
        }
    }

    async fn launch_or_destroy(
        &self,
        handle: &EnvironmentHandle,
        start: &EnvironmentSource,
        config: &CycleConfig,
    ) -> Result<(), CycleError<B::Error>> {
        let command = launch_command(&config.payload);
        match self.backend.run(handle, &command).await {
            Ok(output) => {
                if output.is_success() {
                    info!(environment_id = %handle.id, "payload launched");
                } else {
                    warn!(
                        environment_id = %handle.id,
                        exit_code = ?output.exit_code,
                        stderr = %output.stderr.trim(),
                        "payload launch exited non-zero"
                    );
                }
                Ok(())
            }
            Err(err) => {
                let message = self.destroy_with_note(handle, &err).await;
                Err(CycleError::Launch {
                    start: start.clone(),
                    environment_id: handle.id.clone(),
                    message,
                    source: err,
                })
            }
        }
    }

    async fn capture(
        &self,
        handle: &EnvironmentHandle,
        config: &CycleConfig,
        lease_deadline: Instant,
    ) -> Result<ImageHandle, Degradation> {
        let mut backoff = config.capture.backoff;
        let mut attempts = 0;
        let mut last_error = String::new();

        while attempts < config.capture.attempts {
            attempts += 1;
            match self.backend.snapshot(handle, ImageExpiration::Never).await {
                Ok(image) => {
                    info!(environment_id = %handle.id, image_id = %image.id, attempts, "image captured");
                    return Ok(image);
                }
                Err(err) => {
                    warn!(environment_id = %handle.id, attempts, error = %err, "capture failed");
                    last_error = err.to_string();
                }
            }
            if attempts >= config.capture.attempts {
                break;
            }
            if Instant::now() + backoff >= lease_deadline {
                warn!(environment_id = %handle.id, "lease expiring; abandoning capture");
                break;
            }
            sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
        }

        Err(Degradation::CaptureFailed {
            attempts,
            message: last_error,
        })
    }

    async fn commit(
        &self,
        handle: &EnvironmentHandle,
        start: &EnvironmentSource,
        prior: Option<&HandoffRecord>,
        image: ImageHandle,
    ) -> Result<String, Degradation> {
        let record = HandoffRecord::after_cycle(prior, image.id, start, &handle.id, Utc::now());
        if let Err(err) = self.store.write(&record) {
            warn!(
                environment_id = %handle.id,
                image_id = %record.snapshot_id,
                error = %err,
                "handoff commit failed; previous record retained"
            );
            return Err(Degradation::CommitFailed {
                image_id: record.snapshot_id,
                message: err.to_string(),
            });
        }
        info!(
            environment_id = %handle.id,
            image_id = %record.snapshot_id,
            "handoff committed"
        );

        if let Err(err) = self.backend.destroy(handle.clone()).await {
            warn!(environment_id = %handle.id, error = %err, "could not release environment; it will expire with its lease");
        }
        Ok(record.snapshot_id)
    }

    async fn destroy_with_note<E: Display>(&self, handle: &EnvironmentHandle, err: &E) -> String {
        let teardown_error = self.backend.destroy(handle.clone()).await.err();
        append_teardown_note(err.to_string(), teardown_error.as_ref())
    }
}

fn log_probe(handle: &EnvironmentHandle, probe: &ProbeOutcome) {
    match probe {
        ProbeOutcome::Ready { matches, attempts } => info!(
            environment_id = %handle.id,
            matches,
            attempts,
            "payload ready"
        ),
        ProbeOutcome::NotReady { tail, attempts } => warn!(
            environment_id = %handle.id,
            attempts,
            tail = tail.as_deref().unwrap_or(""),
            "payload readiness not confirmed; continuing"
        ),
    }
}

async fn hold(
    config: &CycleConfig,
    materialize_started: Instant,
    cancel: &CancellationToken,
    handle: &EnvironmentHandle,
) {
    let lease_target = materialize_started + config.hold_offset();
    let deadline = config
        .hold_budget
        .map_or(lease_target, |budget| lease_target.min(Instant::now() + budget));
    let wait = deadline.saturating_duration_since(Instant::now());
    if wait.is_zero() {
        return;
    }

    info!(environment_id = %handle.id, hold_secs = wait.as_secs(), "holding until capture");
    if wait_or_cancel(wait, cancel).await {
        info!(environment_id = %handle.id, "hold interrupted; capturing now");
    }
}
