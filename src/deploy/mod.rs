//! First-run deployment for `baton deploy`.
//!
//! Bootstraps the agent on a blank environment, captures a non-expiring
//! image, and writes a fresh handoff record naming it. Subsequent cycles
//! resume from that image.

mod config;
mod error;

use std::fmt::Display;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::{
    Backend, EnvironmentHandle, EnvironmentRequest, EnvironmentSource, ImageExpiration,
};
use crate::cycle::append_teardown_note;
use crate::handoff::{HandoffRecord, HandoffStore};
use crate::payload::{
    clone_command, link_skill_command, remote_path, with_environment, write_secret_command,
};
use crate::probe::{ProbeOutcome, ReadinessProber};

pub use config::{DEFAULT_INSTALL_COMMAND, DEFAULT_REPO_URL, DeployConfig, DeployPlan, KeyFile};
pub use error::DeployError;

/// Result of a successful deployment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeployOutcome {
    /// Environment the agent was bootstrapped in. It is left to expire with
    /// its lease.
    pub environment_id: String,
    /// Image recorded for the next cycle.
    pub image_id: String,
    /// Gateway readiness observed before capture.
    pub probe: ProbeOutcome,
    /// Record written to the handoff store.
    pub record: HandoffRecord,
    /// Whether an existing record was replaced.
    pub replaced: bool,
}

impl DeployOutcome {
    /// Builds the summary printed by `baton deploy`.
    #[must_use]
    pub fn report(&self) -> DeployReport {
        DeployReport {
            record: self.record.clone(),
            replaced: self.replaced,
        }
    }
}

/// JSON summary of a deployment: the new record plus whether it replaced an
/// earlier one.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployReport {
    /// Record written to the handoff store.
    #[serde(flatten)]
    pub record: HandoffRecord,
    /// Whether an existing record was replaced.
    pub replaced: bool,
}

/// Runs the bootstrap steps against a backend and records the result.
#[derive(Debug)]
pub struct DeployOrchestrator<B, S> {
    backend: B,
    store: S,
}

impl<B, S> DeployOrchestrator<B, S>
where
    B: Backend,
    S: HandoffStore,
{
    /// Creates a new orchestrator.
    #[must_use]
    pub const fn new(backend: B, store: S) -> Self {
        Self { backend, store }
    }

    /// Deploys the agent described by `plan`.
    ///
    /// Setup commands run in order and stop at the first failure, which
    /// destroys the environment. Readiness is checked but never blocks the
    /// capture.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError`] when the environment cannot be created, a
    /// setup step fails, the image cannot be captured, or the record cannot
    /// be written.
    pub async fn deploy(
        &self,
        plan: &DeployPlan,
        cancel: &CancellationToken,
    ) -> Result<DeployOutcome, DeployError<B::Error>> {
        let request = EnvironmentRequest::new(EnvironmentSource::Blank, plan.lease)
            .map_err(DeployError::Request)?;
        let handle = self
            .backend
            .create(&request)
            .await
            .map_err(DeployError::Create)?;
        info!(environment_id = %handle.id, "bootstrap environment created");

        for (step, command) in setup_steps(plan) {
            self.run_step(&handle, step, &command).await?;
        }

        let probe = ReadinessProber::new(
            &self.backend,
            &plan.cycle.payload.log_path,
            &plan.cycle.readiness,
        )
        .probe(&handle, cancel)
        .await;
        match &probe {
            ProbeOutcome::Ready { matches, .. } => {
                info!(environment_id = %handle.id, matches, "gateway is up");
            }
            ProbeOutcome::NotReady { tail, .. } => warn!(
                environment_id = %handle.id,
                tail = tail.as_deref().unwrap_or(""),
                "gateway may still be starting; capturing anyway"
            ),
        }

        let image = match self.backend.snapshot(&handle, ImageExpiration::Never).await {
            Ok(image) => image,
            Err(err) => {
                let message = self.destroy_with_note(&handle, &err).await;
                return Err(DeployError::Capture {
                    environment_id: handle.id,
                    message,
                    source: err,
                });
            }
        };
        info!(environment_id = %handle.id, image_id = %image.id, "image captured");

        let replaced = match self.store.read() {
            Ok(existing) => existing.is_some(),
            Err(err) => {
                warn!(error = %err, "existing handoff record unreadable; replacing it");
                true
            }
        };
        if replaced {
            warn!("replacing existing handoff record; earlier cycle history is discarded");
        }

        let record = HandoffRecord::deployed(&image.id, &handle.id, &plan.agent, Utc::now());
        self.store
            .write(&record)
            .map_err(|source| DeployError::Record {
                image_id: image.id.clone(),
                source,
            })?;
        info!(image_id = %image.id, agent = %plan.agent.name, "handoff record written");

        Ok(DeployOutcome {
            environment_id: handle.id,
            image_id: image.id,
            probe,
            record,
            replaced,
        })
    }

    async fn run_step(
        &self,
        handle: &EnvironmentHandle,
        step: &'static str,
        command: &str,
    ) -> Result<(), DeployError<B::Error>> {
        info!(environment_id = %handle.id, step, "running setup step");
        match self.backend.run(handle, command).await {
            Ok(output) if output.is_success() => Ok(()),
            Ok(output) => {
                let message = self
                    .destroy_with_note(handle, &output.stderr.trim())
                    .await;
                Err(DeployError::Step {
                    step,
                    exit_code: output.exit_code,
                    message,
                })
            }
            Err(err) => {
                let message = self.destroy_with_note(handle, &err).await;
                Err(DeployError::Substrate {
                    step,
                    message,
                    source: err,
                })
            }
        }
    }

    async fn destroy_with_note<E: Display>(&self, handle: &EnvironmentHandle, err: &E) -> String {
        let teardown_error = self.backend.destroy(handle.clone()).await.err();
        append_teardown_note(err.to_string(), teardown_error.as_ref())
    }
}

/// Commands issued before readiness is checked, labelled for logs and
/// errors.
fn setup_steps(plan: &DeployPlan) -> Vec<(&'static str, String)> {
    let payload = &plan.cycle.payload;
    let mut steps = vec![
        ("install runtime", plan.install_command.clone()),
        ("clone payload", clone_command(&plan.repo_url, &payload.dir)),
        (
            "link skill",
            link_skill_command(&payload.dir, &plan.skill_name),
        ),
    ];
    if let Some(key) = &plan.key_file {
        steps.push(("write key file", write_secret_command(&key.path, &key.contents)));
    }
    let configure = plan.key_file.as_ref().map_or_else(
        || plan.configure_command.clone(),
        |key| {
            format!(
                "export {}={}; {}",
                key.path_env,
                remote_path(&key.path),
                plan.configure_command
            )
        },
    );
    steps.push((
        "configure agent",
        with_environment(&payload.extra_path, &plan.env, &configure),
    ));
    steps
}
