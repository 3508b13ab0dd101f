//! Shared fixtures for lease cycle BDD scenarios.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use baton::DeployConfig;
use baton::config::{CaptureSettings, CycleConfig, ReadinessSettings};
use baton::payload::PayloadSpec;
use baton::test_support::{MemoryHandoffStore, ScriptedBackend};
use rstest::fixture;

#[derive(Clone, Debug)]
pub struct CycleContext {
    pub backend: ScriptedBackend,
    pub store: MemoryHandoffStore,
    pub config: CycleConfig,
    pub deploy_config: DeployConfig,
    pub outcome: Arc<Mutex<Option<CycleResult>>>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CycleResult {
    Completed,
    Degraded,
    Failed(String),
    Deployed,
}

impl CycleContext {
    pub fn record_outcome(&self, result: CycleResult) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
    }

    pub fn outcome(&self) -> Option<CycleResult> {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[fixture]
pub fn cycle_context() -> CycleContext {
    CycleContext {
        backend: ScriptedBackend::new(),
        store: MemoryHandoffStore::new(),
        config: cycle_config(),
        deploy_config: deploy_config(),
        outcome: Arc::new(Mutex::new(None)),
    }
}

pub const CAPTURE_ATTEMPTS: u32 = 2;

fn cycle_config() -> CycleConfig {
    CycleConfig {
        lease: Duration::from_millis(300),
        snapshot_margin: Duration::from_millis(280),
        start_override: None,
        readiness: ReadinessSettings {
            pattern: String::from("listening"),
            timeout: Duration::from_millis(20),
            poll_interval: Duration::from_millis(5),
        },
        capture: CaptureSettings {
            attempts: CAPTURE_ATTEMPTS,
            backoff: Duration::from_millis(1),
        },
        hold_budget: None,
        payload: PayloadSpec {
            dir: String::from("~/.agent"),
            branch: String::from("main"),
            launch_command: String::from("agent gateway"),
            workdir: String::from("~"),
            log_path: String::from("/tmp/agent.log"),
            extra_path: String::new(),
            env: Vec::new(),
        },
    }
}

fn deploy_config() -> DeployConfig {
    DeployConfig {
        agent_name: String::from("default"),
        agent_display_name: String::from("Proactive Engineer"),
        repo_url: String::from("https://example.com/agent.git"),
        install_command: String::from("install-runtime"),
        configure_command: String::from("bash ~/.agent/configure.sh"),
        skill_name: String::from("helper"),
        required_env: String::from("BOT_TOKEN"),
        optional_env: String::new(),
        key_file_env: String::new(),
    }
}
