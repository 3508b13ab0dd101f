//! Vercel Sandbox backend implementation of the environment lifecycle.
//!
//! Every operation is a direct REST call through a shared `reqwest` client.
//! Commands run under `bash -c`; the backend waits for them to finish and
//! then collects their output from the NDJSON log stream.

mod error;
mod lifecycle;
mod types;

use crate::backend::{
    Backend, BackendFuture, EnvironmentHandle, EnvironmentRequest, ImageExpiration, ImageHandle,
    RemoteCommandOutput,
};
use crate::config::VercelConfig;
use lifecycle::{millis, split_logs};
use reqwest::Method;
use types::{
    CommandEnvelope, CreateSandboxRequest, Resources, RunCommandRequest, SandboxEnvelope,
    SandboxSource, SnapshotEnvelope, SnapshotRequest,
};

pub use error::VercelBackendError;

/// Backend that leases sandboxes through the Vercel Sandbox API.
#[derive(Clone, Debug)]
pub struct VercelBackend {
    config: VercelConfig,
}

impl VercelBackend {
    /// Constructs a new backend from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`VercelBackendError::Config`] when the provided configuration
    /// fails validation.
    pub fn new(config: VercelConfig) -> Result<Self, VercelBackendError> {
        config.validate()?;
        Ok(Self { config })
    }

    fn create_body(&self, request: &EnvironmentRequest) -> CreateSandboxRequest {
        CreateSandboxRequest {
            project_id: self.config.project_id.clone(),
            source: request.source.image_id().map(|id| SandboxSource {
                kind: "snapshot",
                snapshot_id: id.to_owned(),
            }),
            timeout: millis(request.lease),
            resources: Resources {
                vcpus: self.config.vcpus,
            },
            runtime: self.config.runtime.clone(),
        }
    }
}

fn expiration_millis(expiration: ImageExpiration) -> u64 {
    match expiration {
        ImageExpiration::Never => 0,
        ImageExpiration::After(after) => millis(after),
    }
}

impl Backend for VercelBackend {
    type Error = VercelBackendError;

    fn create<'a>(
        &'a self,
        request: &'a EnvironmentRequest,
    ) -> BackendFuture<'a, EnvironmentHandle, Self::Error> {
        Box::pin(async move {
            request.validate()?;
            let body = self.create_body(request);
            let envelope: SandboxEnvelope =
                Self::send_json("create sandbox", self.request(Method::POST, "").json(&body))
                    .await?;
            Ok(EnvironmentHandle {
                id: envelope.sandbox.id,
            })
        })
    }

    fn run<'a>(
        &'a self,
        handle: &'a EnvironmentHandle,
        command: &'a str,
    ) -> BackendFuture<'a, RemoteCommandOutput, Self::Error> {
        Box::pin(async move {
            let body = RunCommandRequest {
                command: "bash",
                args: ["-c", command],
            };
            let started: CommandEnvelope = Self::send_json(
                "run command",
                self.request(Method::POST, &format!("/{}/cmd", handle.id))
                    .json(&body),
            )
            .await?;
            let command_path = format!("/{}/cmd/{}", handle.id, started.command.id);

            let finished: CommandEnvelope = Self::send_json(
                "wait for command",
                self.request(Method::GET, &command_path)
                    .query(&[("wait", "true")])
                    .timeout(lifecycle::COMMAND_TIMEOUT),
            )
            .await?;
            let logs = Self::send_text(
                "read command logs",
                self.request(Method::GET, &format!("{command_path}/logs")),
            )
            .await?;
            let (stdout, stderr) = split_logs(&logs);

            Ok(RemoteCommandOutput {
                exit_code: finished.command.exit_code,
                stdout,
                stderr,
            })
        })
    }

    fn snapshot<'a>(
        &'a self,
        handle: &'a EnvironmentHandle,
        expiration: ImageExpiration,
    ) -> BackendFuture<'a, ImageHandle, Self::Error> {
        Box::pin(async move {
            let body = SnapshotRequest {
                expiration: expiration_millis(expiration),
            };
            let envelope: SnapshotEnvelope = Self::send_json(
                "snapshot sandbox",
                self.request(Method::POST, &format!("/{}/snapshot", handle.id))
                    .json(&body)
                    .timeout(lifecycle::SNAPSHOT_TIMEOUT),
            )
            .await?;
            Ok(ImageHandle {
                id: envelope.snapshot.id,
            })
        })
    }

    fn destroy(&self, handle: EnvironmentHandle) -> BackendFuture<'_, (), Self::Error> {
        Box::pin(async move {
            Self::send_text(
                "stop sandbox",
                self.request(Method::POST, &format!("/{}/stop", handle.id)),
            )
            .await?;
            Ok(())
        })
    }
}
