//! Test support utilities shared across unit and integration tests.
//!
//! [`ScriptedBackend`] stands in for the sandbox provider and
//! [`MemoryHandoffStore`] for the durable handoff record. Both are cheap to
//! clone and share their state, so a test keeps one handle for assertions
//! while the code under test owns another.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::backend::{
    Backend, BackendFuture, EnvironmentHandle, EnvironmentRequest, EnvironmentSource,
    ImageExpiration, ImageHandle, RemoteCommandOutput,
};
use crate::handoff::{HandoffRecord, HandoffStore, HandoffStoreError};

/// A single call observed by [`ScriptedBackend`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BackendCall {
    /// An environment was requested.
    Create {
        /// Requested start point.
        source: EnvironmentSource,
        /// Requested lease.
        lease: Duration,
    },
    /// A command ran inside an environment.
    Run {
        /// Target environment.
        environment: String,
        /// Shell command text.
        command: String,
    },
    /// An image capture was requested.
    Snapshot {
        /// Captured environment.
        environment: String,
        /// Requested retention.
        expiration: ImageExpiration,
    },
    /// An environment was stopped.
    Destroy {
        /// Stopped environment.
        environment: String,
    },
}

/// Scripted reaction to commands containing a given substring.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CommandReaction {
    /// The command completes with this exit code.
    Exit(i32),
    /// The substrate fails to run the command at all.
    Error,
}

/// Errors produced by [`ScriptedBackend`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScriptedBackendError {
    /// Environment creation was scripted to fail.
    #[error("scripted create failure")]
    Create,
    /// A command was scripted to fail at the substrate level.
    #[error("scripted command failure: {0}")]
    Command(String),
    /// Image capture was scripted to fail.
    #[error("scripted snapshot failure")]
    Snapshot,
    /// Stopping the environment was scripted to fail.
    #[error("scripted destroy failure")]
    Destroy,
}

#[derive(Debug, Default)]
struct BackendState {
    calls: Vec<BackendCall>,
    create_failures: u32,
    snapshot_failures: u32,
    fail_on_destroy: bool,
    reactions: Vec<(String, CommandReaction)>,
    probe_outputs: VecDeque<Option<String>>,
    log_tail: String,
    next_environment: u32,
    next_image: u32,
}

/// Backend double that records every call and fails on request.
///
/// Readiness polls (`grep -cE`) consume queued outputs and print `0` once the
/// queue is empty. Log tails print the configured tail. Every other command
/// succeeds unless a [`CommandReaction`] matches it.
#[derive(Clone, Debug, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<BackendState>>,
}

impl ScriptedBackend {
    /// Creates a backend that succeeds at everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails the next `count` create calls.
    pub fn fail_creates(&self, count: u32) {
        self.lock().create_failures = count;
    }

    /// Fails the next `count` snapshot calls.
    pub fn fail_snapshots(&self, count: u32) {
        self.lock().snapshot_failures = count;
    }

    /// Fails every destroy call.
    pub fn fail_on_destroy(&self) {
        self.lock().fail_on_destroy = true;
    }

    /// Reacts to any command containing `needle`.
    pub fn react_to(&self, needle: impl Into<String>, reaction: CommandReaction) {
        self.lock().reactions.push((needle.into(), reaction));
    }

    /// Queues stdout for the next readiness poll.
    pub fn push_probe_output(&self, stdout: impl Into<String>) {
        self.lock().probe_outputs.push_back(Some(stdout.into()));
    }

    /// Queues a substrate failure for the next readiness poll.
    pub fn push_probe_failure(&self) {
        self.lock().probe_outputs.push_back(None);
    }

    /// Sets the text returned by log tail commands.
    pub fn set_log_tail(&self, tail: impl Into<String>) {
        self.lock().log_tail = tail.into();
    }

    /// Returns a copy of every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    /// Returns the text of every command run so far.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                BackendCall::Run { command, .. } => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns the start points of every create call.
    #[must_use]
    pub fn created_from(&self) -> Vec<EnvironmentSource> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                BackendCall::Create { source, .. } => Some(source.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of snapshot attempts, successful or not.
    #[must_use]
    pub fn snapshot_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, BackendCall::Snapshot { .. }))
            .count()
    }

    /// Number of destroy attempts.
    #[must_use]
    pub fn destroy_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, BackendCall::Destroy { .. }))
            .count()
    }

    /// Position of the first call matching `predicate`, for ordering checks.
    #[must_use]
    pub fn position<P>(&self, predicate: P) -> Option<usize>
    where
        P: Fn(&BackendCall) -> bool,
    {
        self.lock().calls.iter().position(predicate)
    }

    fn respond(state: &mut BackendState, command: &str) -> Result<RemoteCommandOutput, String> {
        let reaction = state
            .reactions
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, reaction)| reaction.clone());
        match reaction {
            Some(CommandReaction::Error) => return Err(command.to_owned()),
            Some(CommandReaction::Exit(code)) => return Ok(output(code, String::new())),
            None => {}
        }

        if command.starts_with("grep -cE ") {
            return match state.probe_outputs.pop_front() {
                Some(Some(stdout)) => Ok(output(0, stdout)),
                Some(None) => Err(command.to_owned()),
                None => Ok(output(0, String::from("0\n"))),
            };
        }
        if command.starts_with("tail -n ") {
            return Ok(output(0, state.log_tail.clone()));
        }
        Ok(output(0, String::new()))
    }
}

fn output(code: i32, stdout: String) -> RemoteCommandOutput {
    RemoteCommandOutput {
        exit_code: Some(code),
        stdout,
        stderr: String::new(),
    }
}

impl Backend for ScriptedBackend {
    type Error = ScriptedBackendError;

    fn create<'a>(
        &'a self,
        request: &'a EnvironmentRequest,
    ) -> BackendFuture<'a, EnvironmentHandle, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(BackendCall::Create {
                source: request.source.clone(),
                lease: request.lease,
            });
            if state.create_failures > 0 {
                state.create_failures -= 1;
                return Err(ScriptedBackendError::Create);
            }
            state.next_environment += 1;
            Ok(EnvironmentHandle {
                id: format!("sbx-{}", state.next_environment),
            })
        })
    }

    fn run<'a>(
        &'a self,
        handle: &'a EnvironmentHandle,
        command: &'a str,
    ) -> BackendFuture<'a, RemoteCommandOutput, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(BackendCall::Run {
                environment: handle.id.clone(),
                command: command.to_owned(),
            });
            Self::respond(&mut state, command).map_err(ScriptedBackendError::Command)
        })
    }

    fn snapshot<'a>(
        &'a self,
        handle: &'a EnvironmentHandle,
        expiration: ImageExpiration,
    ) -> BackendFuture<'a, ImageHandle, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(BackendCall::Snapshot {
                environment: handle.id.clone(),
                expiration,
            });
            if state.snapshot_failures > 0 {
                state.snapshot_failures -= 1;
                return Err(ScriptedBackendError::Snapshot);
            }
            state.next_image += 1;
            Ok(ImageHandle {
                id: format!("img-{}", state.next_image),
            })
        })
    }

    fn destroy(&self, handle: EnvironmentHandle) -> BackendFuture<'_, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.calls.push(BackendCall::Destroy {
                environment: handle.id,
            });
            if state.fail_on_destroy {
                return Err(ScriptedBackendError::Destroy);
            }
            Ok(())
        })
    }
}

#[derive(Debug, Default)]
struct StoreState {
    record: Option<HandoffRecord>,
    fail_reads: bool,
    fail_writes: bool,
    reads: u32,
    writes: u32,
}

/// In-memory handoff store with switchable failures.
#[derive(Clone, Debug, Default)]
pub struct MemoryHandoffStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryHandoffStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store already holding `record`.
    #[must_use]
    pub fn with_record(record: HandoffRecord) -> Self {
        let store = Self::new();
        store.lock().record = Some(record);
        store
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes reads fail until reset.
    pub fn set_fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Makes writes fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Returns the stored record.
    #[must_use]
    pub fn record(&self) -> Option<HandoffRecord> {
        self.lock().record.clone()
    }

    /// Number of read calls.
    #[must_use]
    pub fn reads(&self) -> u32 {
        self.lock().reads
    }

    /// Number of successful writes.
    #[must_use]
    pub fn writes(&self) -> u32 {
        self.lock().writes
    }
}

impl HandoffStore for MemoryHandoffStore {
    fn read(&self) -> Result<Option<HandoffRecord>, HandoffStoreError> {
        let mut state = self.lock();
        state.reads += 1;
        if state.fail_reads {
            return Err(HandoffStoreError::Io {
                location: String::from("memory"),
                message: String::from("scripted read failure"),
            });
        }
        Ok(state.record.clone())
    }

    fn write(&self, record: &HandoffRecord) -> Result<(), HandoffStoreError> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(HandoffStoreError::Io {
                location: String::from("memory"),
                message: String::from("scripted write failure"),
            });
        }
        state.record = Some(record.clone());
        state.writes += 1;
        Ok(())
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and removes environment variables while holding a global mutex.
    ///
    /// A `None` value removes the variable for the guard's lifetime.
    pub async fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
