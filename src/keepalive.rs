//! Long-lived keepalive loop.
//!
//! Runs cycles back to back with a cooldown in between until shutdown is
//! requested. A shutdown cuts the current Hold short and gives the
//! in-flight Capture and CommitHandoff a bounded grace period before the
//! loop gives up on it.

use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backend::Backend;
use crate::config::CycleConfig;
use crate::cycle::{CycleStatus, LeaseCycle};
use crate::handoff::HandoffStore;
use crate::probe::wait_or_cancel;

/// Pacing of the loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LoopSettings {
    /// Pause between cycles.
    pub cooldown: Duration,
    /// Time allowed to finish an in-flight handoff after shutdown.
    pub shutdown_grace: Duration,
}

/// Tally of cycles run by the loop.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LoopSummary {
    /// Cycles that committed a new image.
    pub completed: u32,
    /// Cycles that left the record unchanged.
    pub degraded: u32,
    /// Cycles that failed before anything was persisted.
    pub failed: u32,
    /// Cycles abandoned when the grace period ran out.
    pub abandoned: u32,
}

impl LoopSummary {
    /// Total cycles started.
    #[must_use]
    pub const fn cycles(&self) -> u32 {
        self.completed
            .saturating_add(self.degraded)
            .saturating_add(self.failed)
            .saturating_add(self.abandoned)
    }
}

/// Repeats lease cycles until cancelled.
#[derive(Debug)]
pub struct KeepaliveLoop<B, S> {
    cycle: LeaseCycle<B, S>,
    config: CycleConfig,
    settings: LoopSettings,
    max_cycles: Option<u32>,
}

impl<B, S> KeepaliveLoop<B, S>
where
    B: Backend,
    S: HandoffStore,
{
    /// Creates a loop around `cycle`.
    #[must_use]
    pub const fn new(cycle: LeaseCycle<B, S>, config: CycleConfig, settings: LoopSettings) -> Self {
        Self {
            cycle,
            config,
            settings,
            max_cycles: None,
        }
    }

    /// Stops after `count` cycles.
    ///
    /// This is primarily used by tests to keep the loop finite.
    #[must_use]
    pub const fn with_max_cycles(mut self, count: u32) -> Self {
        self.max_cycles = Some(count);
        self
    }

    /// Runs until `shutdown` is cancelled or the cycle limit is reached.
    ///
    /// Fatal cycle errors are logged and followed by the usual cooldown.
    pub async fn run(&self, shutdown: &CancellationToken) -> LoopSummary {
        let mut summary = LoopSummary::default();

        while !shutdown.is_cancelled() && self.max_cycles.is_none_or(|max| summary.cycles() < max) {
            let cycle = self.cycle.run(&self.config, shutdown);
            tokio::pin!(cycle);

            let finished = tokio::select! {
                result = &mut cycle => Some(result),
                () = shutdown.cancelled() => {
                    info!(
                        grace_secs = self.settings.shutdown_grace.as_secs(),
                        "shutdown requested; finishing in-flight handoff"
                    );
                    timeout(self.settings.shutdown_grace, &mut cycle).await.ok()
                }
            };

            match finished {
                Some(Ok(outcome)) => match outcome.status {
                    CycleStatus::Completed => summary.completed += 1,
                    CycleStatus::Degraded(reason) => {
                        warn!(reason = %reason.describe(), "cycle degraded; previous image retained");
                        summary.degraded += 1;
                    }
                },
                Some(Err(err)) => {
                    error!(error = %err, "cycle failed");
                    summary.failed += 1;
                }
                None => {
                    warn!("grace period elapsed; abandoning in-flight cycle");
                    summary.abandoned += 1;
                    break;
                }
            }

            if self.max_cycles.is_some_and(|max| summary.cycles() >= max) {
                break;
            }
            if wait_or_cancel(self.settings.cooldown, shutdown).await {
                break;
            }
        }

        info!(
            completed = summary.completed,
            degraded = summary.degraded,
            failed = summary.failed,
            abandoned = summary.abandoned,
            "keepalive loop stopped"
        );
        summary
    }
}

/// Cancels `token` on Ctrl-C or SIGTERM.
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C"),
        () = terminate => info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CaptureSettings, ReadinessSettings};
    use crate::payload::PayloadSpec;
    use crate::test_support::{MemoryHandoffStore, ScriptedBackend};
    use crate::backend::EnvironmentSource;
    use rstest::{fixture, rstest};

    #[fixture]
    fn config() -> CycleConfig {
        CycleConfig {
            lease: Duration::from_millis(200),
            snapshot_margin: Duration::from_millis(180),
            start_override: None,
            readiness: ReadinessSettings {
                pattern: String::from("listening"),
                timeout: Duration::from_millis(10),
                poll_interval: Duration::from_millis(5),
            },
            capture: CaptureSettings {
                attempts: 1,
                backoff: Duration::from_millis(1),
            },
            hold_budget: None,
            payload: PayloadSpec {
                dir: String::from("~/.payload"),
                branch: String::from("main"),
                launch_command: String::from("agent gateway"),
                workdir: String::from("~"),
                log_path: String::from("/tmp/agent.log"),
                extra_path: String::new(),
                env: Vec::new(),
            },
        }
    }

    fn settings() -> LoopSettings {
        LoopSettings {
            cooldown: Duration::from_millis(5),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    #[rstest]
    #[tokio::test]
    async fn chains_images_across_cycles(config: CycleConfig) {
        let backend = ScriptedBackend::new();
        let store = MemoryHandoffStore::new();
        let keepalive = KeepaliveLoop::new(
            LeaseCycle::new(backend.clone(), store.clone()),
            config,
            settings(),
        )
        .with_max_cycles(3);

        let summary = keepalive.run(&CancellationToken::new()).await;

        assert_eq!(summary.completed, 3);
        assert_eq!(
            backend.created_from(),
            vec![
                EnvironmentSource::Blank,
                EnvironmentSource::Image(String::from("img-1")),
                EnvironmentSource::Image(String::from("img-2")),
            ]
        );
        let record = store.record().unwrap_or_else(|| panic!("record written"));
        assert_eq!(record.snapshot_id, "img-3");
        assert_eq!(record.previous_snapshot_id, "img-2");
    }

    #[rstest]
    #[tokio::test]
    async fn fatal_cycles_are_logged_and_retried(config: CycleConfig) {
        let backend = ScriptedBackend::new();
        backend.fail_creates(1);
        let store = MemoryHandoffStore::new();
        let keepalive = KeepaliveLoop::new(
            LeaseCycle::new(backend.clone(), store.clone()),
            config,
            settings(),
        )
        .with_max_cycles(2);

        let summary = keepalive.run(&CancellationToken::new()).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(store.writes(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn shutdown_mid_hold_still_commits(mut config: CycleConfig) {
        config.lease = Duration::from_secs(3600);
        config.snapshot_margin = Duration::from_secs(60);
        let backend = ScriptedBackend::new();
        let store = MemoryHandoffStore::new();
        let keepalive = KeepaliveLoop::new(
            LeaseCycle::new(backend.clone(), store.clone()),
            config,
            settings(),
        );
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let summary = timeout(Duration::from_secs(5), keepalive.run(&shutdown))
            .await
            .unwrap_or_else(|_| panic!("loop should stop after shutdown"));

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.cycles(), 1);
        assert_eq!(store.writes(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn cancelled_before_start_runs_nothing(config: CycleConfig) {
        let backend = ScriptedBackend::new();
        let store = MemoryHandoffStore::new();
        let keepalive = KeepaliveLoop::new(
            LeaseCycle::new(backend.clone(), store.clone()),
            config,
            settings(),
        );
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let summary = keepalive.run(&shutdown).await;

        assert_eq!(summary, LoopSummary::default());
        assert!(backend.calls().is_empty());
    }
}
