//! Core library for the Baton lease-renewal keepalive.
//!
//! Baton keeps a stateful agent running on leased sandboxes. Each lease
//! cycle resumes from the image named in a durable handoff record, refreshes
//! and launches the agent, holds until shortly before the lease expires,
//! captures a new non-expiring image, and commits it as the start point of
//! the next cycle. The [`backend::Backend`] trait abstracts the sandbox
//! provider; [`vercel::VercelBackend`] implements it over the Vercel Sandbox
//! REST API.

pub mod backend;
pub mod config;
pub mod cycle;
pub mod deploy;
pub mod handoff;
pub mod keepalive;
pub mod logging;
pub mod payload;
pub mod probe;
pub mod test_support;
pub mod trigger;
pub mod vercel;

pub use backend::{
    Backend, EnvironmentHandle, EnvironmentRequest, EnvironmentSource, ImageExpiration,
    ImageHandle, RemoteCommandOutput,
};
pub use config::{ConfigError, CycleConfig, KeepaliveConfig, VercelConfig};
pub use cycle::{CycleError, CycleOutcome, CycleReport, CycleStatus, Degradation, LeaseCycle};
pub use deploy::{
    DeployConfig, DeployError, DeployOrchestrator, DeployOutcome, DeployPlan, DeployReport,
};
pub use handoff::{FileHandoffStore, HandoffRecord, HandoffStore, HandoffStoreError};
pub use keepalive::{KeepaliveLoop, LoopSettings, LoopSummary, cancel_on_signal};
pub use probe::{ProbeOutcome, ReadinessProber};
pub use trigger::{KEEPALIVE_PATH, TriggerError, TriggerState};
pub use vercel::{VercelBackend, VercelBackendError};
