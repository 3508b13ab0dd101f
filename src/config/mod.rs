//! Configuration loading via `ortho-config`.
//!
//! Two layered structures are loaded from defaults, `baton.toml`, and the
//! environment: [`VercelConfig`] for the sandbox provider and
//! [`KeepaliveConfig`] for the lease cycle. The latter is resolved into an
//! immutable [`CycleConfig`] once per invocation.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::payload::{PayloadSpec, is_valid_env_name};

/// Default base URL of the Vercel REST API.
pub const DEFAULT_API_BASE: &str = "https://api.vercel.com";

/// Default location of the handoff record.
pub const DEFAULT_STATE_FILE: &str = ".sandbox-state.json";

/// Five-hour lease granted by the Pro tier.
pub const DEFAULT_LEASE_SECS: u64 = 5 * 60 * 60;

/// Capture begins thirty minutes before the lease expires.
pub const DEFAULT_SNAPSHOT_MARGIN_SECS: u64 = 30 * 60;

/// Default pattern signalling that the gateway accepts connections.
pub const DEFAULT_READY_PATTERN: &str = "slack.*connected|listening";

/// Default log file written by the gateway.
pub const DEFAULT_LOG_PATH: &str = "/tmp/openclaw-pe-default.log";

/// Sandbox provider credentials and defaults.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "VERCEL",
    discovery(
        app_name = "baton",
        env_var = "BATON_CONFIG_PATH",
        config_file_name = "baton.toml",
        dotfile_name = ".baton.toml",
        project_file_name = "baton.toml"
    )
)]
pub struct VercelConfig {
    /// Access token used as the bearer credential. This value is required.
    pub token: String,
    /// Team that owns the sandboxes, when the token is team scoped.
    pub team_id: Option<String>,
    /// Project the sandboxes are billed to.
    pub project_id: Option<String>,
    /// Base URL of the REST API.
    #[ortho_config(default = DEFAULT_API_BASE.to_owned())]
    pub api_base: String,
    /// Runtime image used for blank sandboxes.
    #[ortho_config(default = "node22".to_owned())]
    pub runtime: String,
    /// Virtual CPUs requested for each sandbox.
    #[ortho_config(default = 2)]
    pub vcpus: u32,
}

/// Lease cycle, readiness, and trigger settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "BATON",
    discovery(
        app_name = "baton",
        env_var = "BATON_CONFIG_PATH",
        config_file_name = "baton.toml",
        dotfile_name = ".baton.toml",
        project_file_name = "baton.toml"
    )
)]
pub struct KeepaliveConfig {
    /// File holding the handoff record.
    #[ortho_config(default = DEFAULT_STATE_FILE.to_owned())]
    pub state_file: String,
    /// Image to resume from instead of the one recorded in the state file.
    pub snapshot_id: Option<String>,
    /// Shared secret expected in the trigger endpoint's bearer token.
    pub cron_secret: Option<String>,
    /// Lease granted to each sandbox, in seconds.
    #[ortho_config(default = DEFAULT_LEASE_SECS)]
    pub lease_duration_secs: u64,
    /// How long before lease expiry capture begins, in seconds.
    #[ortho_config(default = DEFAULT_SNAPSHOT_MARGIN_SECS)]
    pub snapshot_margin_secs: u64,
    /// Upper bound on readiness polling, in seconds.
    #[ortho_config(default = 60)]
    pub readiness_timeout_secs: u64,
    /// Delay between readiness polls, in seconds.
    #[ortho_config(default = 5)]
    pub readiness_poll_secs: u64,
    /// Extended regular expression marking the payload as ready.
    #[ortho_config(default = DEFAULT_READY_PATTERN.to_owned())]
    pub ready_pattern: String,
    /// Payload log file inside the sandbox.
    #[ortho_config(default = DEFAULT_LOG_PATH.to_owned())]
    pub log_path: String,
    /// Payload repository checkout inside the sandbox.
    #[ortho_config(default = "~/.proactive-engineer".to_owned())]
    pub payload_dir: String,
    /// Branch pulled when refreshing the payload.
    #[ortho_config(default = "main".to_owned())]
    pub payload_branch: String,
    /// Command starting the payload process.
    #[ortho_config(default = "openclaw --profile pe-default gateway --port 18789".to_owned())]
    pub launch_command: String,
    /// Working directory of the launch command.
    #[ortho_config(default = "~".to_owned())]
    pub launch_workdir: String,
    /// Directories prepended to `PATH` before launch.
    #[ortho_config(
        default = "$HOME/.npm-global/bin:$HOME/.local/bin:$HOME/.proactive-engineer/scripts/bin".to_owned()
    )]
    pub extra_path: String,
    /// Comma-separated names of local variables exported to the payload.
    #[ortho_config(default = String::new())]
    pub forward_env: String,
    /// Capture attempts before a cycle is declared degraded.
    #[ortho_config(default = 3)]
    pub capture_attempts: u32,
    /// Initial delay between capture attempts, in seconds. Doubles per
    /// attempt.
    #[ortho_config(default = 10)]
    pub capture_backoff_secs: u64,
    /// Pause between cycles of the long-lived loop, in seconds.
    #[ortho_config(default = 30)]
    pub cooldown_secs: u64,
    /// Time allowed to finish an in-flight handoff after a shutdown signal,
    /// in seconds.
    #[ortho_config(default = 300)]
    pub shutdown_grace_secs: u64,
    /// Maximum hold for trigger-endpoint cycles, in seconds.
    #[ortho_config(default = 0)]
    pub trigger_hold_secs: u64,
    /// Socket address served by `baton listen`.
    #[ortho_config(default = "127.0.0.1:8080".to_owned())]
    pub listen: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in baton.toml",
            self.description, self.env_var, self.toml_key, self.section
        ))
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(metadata.missing());
    }
    Ok(())
}

pub(crate) fn program_name() -> [OsString; 1] {
    [OsString::from("baton")]
}

impl VercelConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(program_name()).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when `vcpus` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.token,
            &FieldMetadata::new("Vercel access token", "VERCEL_TOKEN", "token", "vercel"),
        )?;
        require_field(
            &self.api_base,
            &FieldMetadata::new("API base URL", "VERCEL_API_BASE", "api_base", "vercel"),
        )?;
        require_field(
            &self.runtime,
            &FieldMetadata::new("sandbox runtime", "VERCEL_RUNTIME", "runtime", "vercel"),
        )?;
        if self.vcpus == 0 {
            return Err(ConfigError::Invalid(String::from(
                "vcpus must be greater than zero (VERCEL_VCPUS)",
            )));
        }
        Ok(())
    }
}

/// Readiness probe bounds.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadinessSettings {
    /// Extended regular expression marking the payload as ready.
    pub pattern: String,
    /// Upper bound on polling.
    pub timeout: Duration,
    /// Delay between polls.
    pub poll_interval: Duration,
}

/// Capture retry policy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CaptureSettings {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the second attempt; doubled for each further attempt.
    pub backoff: Duration,
}

/// Immutable per-invocation settings consumed by the cycle controller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CycleConfig {
    /// Lease granted to each environment.
    pub lease: Duration,
    /// How long before lease expiry the capture-and-handoff sequence starts.
    pub snapshot_margin: Duration,
    /// Explicit start image, taking precedence over the handoff record.
    pub start_override: Option<String>,
    /// Readiness probe bounds.
    pub readiness: ReadinessSettings,
    /// Capture retry policy.
    pub capture: CaptureSettings,
    /// Optional cap on how long Hold may last, for callers with their own
    /// execution budget.
    pub hold_budget: Option<Duration>,
    /// Payload refresh and launch description.
    pub payload: PayloadSpec,
}

impl CycleConfig {
    /// Offset from environment creation at which Hold ends.
    #[must_use]
    pub const fn hold_offset(&self) -> Duration {
        self.lease.saturating_sub(self.snapshot_margin)
    }

    /// Returns a copy whose Hold is capped at `budget`.
    #[must_use]
    pub fn with_hold_budget(mut self, budget: Duration) -> Self {
        self.hold_budget = Some(budget);
        self
    }

    /// Validates timing relationships between fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the margin is not strictly
    /// between zero and the lease, the poll interval is zero, or no capture
    /// attempt is allowed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.snapshot_margin.is_zero() || self.snapshot_margin >= self.lease {
            return Err(ConfigError::Invalid(format!(
                "snapshot margin ({}s) must be greater than zero and shorter than the lease ({}s)",
                self.snapshot_margin.as_secs(),
                self.lease.as_secs()
            )));
        }
        if self.readiness.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(String::from(
                "readiness poll interval must be greater than zero (BATON_READINESS_POLL_SECS)",
            )));
        }
        if self.capture.attempts == 0 {
            return Err(ConfigError::Invalid(String::from(
                "capture attempts must be at least one (BATON_CAPTURE_ATTEMPTS)",
            )));
        }
        Ok(())
    }
}

impl KeepaliveConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(program_name()).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Returns the configured start image override, ignoring blank values.
    #[must_use]
    pub fn start_override(&self) -> Option<String> {
        self.snapshot_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
    }

    /// Returns the configured trigger secret, ignoring blank values.
    #[must_use]
    pub fn trigger_secret(&self) -> Option<&str> {
        self.cron_secret
            .as_deref()
            .map(str::trim)
            .filter(|secret| !secret.is_empty())
    }

    /// Parses `forward_env` into variable names.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a name is not a valid shell
    /// variable name.
    pub fn forwarded_names(&self) -> Result<Vec<String>, ConfigError> {
        parse_env_names(&self.forward_env, "BATON_FORWARD_ENV")
    }

    /// Resolves an immutable cycle configuration, reading forwarded
    /// variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required field is empty, a forwarded
    /// variable is unset, or timing values are inconsistent.
    pub fn cycle_config<F>(&self, lookup: F) -> Result<CycleConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.validate_fields()?;

        let mut env = Vec::new();
        for name in self.forwarded_names()? {
            let value = lookup(&name).ok_or_else(|| {
                ConfigError::MissingField(format!(
                    "forwarded variable {name} is not set in the local environment"
                ))
            })?;
            env.push((name, value));
        }

        let config = CycleConfig {
            lease: Duration::from_secs(self.lease_duration_secs),
            snapshot_margin: Duration::from_secs(self.snapshot_margin_secs),
            start_override: self.start_override(),
            readiness: ReadinessSettings {
                pattern: self.ready_pattern.clone(),
                timeout: Duration::from_secs(self.readiness_timeout_secs),
                poll_interval: Duration::from_secs(self.readiness_poll_secs),
            },
            capture: CaptureSettings {
                attempts: self.capture_attempts,
                backoff: Duration::from_secs(self.capture_backoff_secs),
            },
            hold_budget: None,
            payload: PayloadSpec {
                dir: self.payload_dir.clone(),
                branch: self.payload_branch.clone(),
                launch_command: self.launch_command.clone(),
                workdir: self.launch_workdir.clone(),
                log_path: self.log_path.clone(),
                extra_path: self.extra_path.clone(),
                env,
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate_fields(&self) -> Result<(), ConfigError> {
        require_field(
            &self.state_file,
            &FieldMetadata::new("state file", "BATON_STATE_FILE", "state_file", "baton"),
        )?;
        require_field(
            &self.ready_pattern,
            &FieldMetadata::new(
                "readiness pattern",
                "BATON_READY_PATTERN",
                "ready_pattern",
                "baton",
            ),
        )?;
        require_field(
            &self.log_path,
            &FieldMetadata::new("payload log path", "BATON_LOG_PATH", "log_path", "baton"),
        )?;
        require_field(
            &self.launch_command,
            &FieldMetadata::new(
                "payload launch command",
                "BATON_LAUNCH_COMMAND",
                "launch_command",
                "baton",
            ),
        )?;
        require_field(
            &self.payload_dir,
            &FieldMetadata::new("payload directory", "BATON_PAYLOAD_DIR", "payload_dir", "baton"),
        )?;
        require_field(
            &self.payload_branch,
            &FieldMetadata::new(
                "payload branch",
                "BATON_PAYLOAD_BRANCH",
                "payload_branch",
                "baton",
            ),
        )?;
        if self.extra_path.contains(['"', '`', '\n']) {
            return Err(ConfigError::Invalid(String::from(
                "extra_path must not contain quotes, backticks, or newlines (BATON_EXTRA_PATH)",
            )));
        }
        Ok(())
    }
}

/// Splits a comma-separated list of variable names, validating each.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] naming `source` when an entry is not a
/// valid shell variable name.
pub fn parse_env_names(list: &str, source: &str) -> Result<Vec<String>, ConfigError> {
    let mut names = Vec::new();
    for raw in list.split(',') {
        let name = raw.trim();
        if name.is_empty() {
            continue;
        }
        if !is_valid_env_name(name) {
            return Err(ConfigError::Invalid(format!(
                "{source} contains an invalid variable name: {name}"
            )));
        }
        names.push(name.to_owned());
    }
    Ok(names)
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates values that are present but inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests;
