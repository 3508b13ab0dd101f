//! Binary entry point for the Baton CLI.

use std::io::{self, Write};
use std::process;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use baton::config::ConfigError;
use baton::trigger::{router, serve};
use baton::{
    CycleConfig, CycleOutcome, DeployConfig, DeployOrchestrator, FileHandoffStore, HandoffStore,
    HandoffStoreError, KeepaliveConfig, KeepaliveLoop, LeaseCycle, LoopSettings, TriggerState,
    VercelBackend, VercelConfig, cancel_on_signal, logging,
};

mod cli;

use cli::{Cli, CycleCommand, KeepaliveCommand, ListenCommand};

/// Exit code for a cycle that ran but kept the previous image.
const EXIT_DEGRADED: i32 = 2;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Store(#[from] HandoffStoreError),
    #[error("no handoff record at {0}; run `baton deploy` first")]
    NoRecord(String),
    #[error("cycle failed: {0}")]
    Cycle(String),
    #[error("deploy failed: {0}")]
    Deploy(String),
    #[error("failed to serve trigger on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write output: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = logging::init() {
        writeln!(io::stderr(), "{err}").ok();
    }

    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Deploy => deploy_command().await,
        Cli::Cycle(args) => cycle_command(args).await,
        Cli::Keepalive(args) => keepalive_command(args).await,
        Cli::Listen(args) => listen_command(args).await,
        Cli::Status => status_command(),
    }
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn load_backend() -> Result<VercelBackend, CliError> {
    let config = VercelConfig::load_without_cli_args()?;
    VercelBackend::new(config).map_err(|err| CliError::Backend(err.to_string()))
}

fn load_cycle(keepalive: &KeepaliveConfig) -> Result<CycleConfig, CliError> {
    Ok(keepalive.cycle_config(env_lookup)?)
}

fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    cancel_on_signal(token.clone());
    token
}

async fn deploy_command() -> Result<i32, CliError> {
    let keepalive = KeepaliveConfig::load_without_cli_args()?;
    let plan = DeployConfig::load_without_cli_args()?.plan(load_cycle(&keepalive)?, env_lookup)?;
    let backend = load_backend()?;
    let store = FileHandoffStore::new(keepalive.state_file.as_str());

    let outcome = DeployOrchestrator::new(backend, store)
        .deploy(&plan, &shutdown_token())
        .await
        .map_err(|err| CliError::Deploy(err.to_string()))?;

    write_json(io::stdout(), &outcome.report())?;
    Ok(0)
}

async fn cycle_command(args: CycleCommand) -> Result<i32, CliError> {
    let keepalive = KeepaliveConfig::load_without_cli_args()?;
    let mut config = load_cycle(&keepalive)?;
    if let Some(image) = args.snapshot_id.filter(|id| !id.trim().is_empty()) {
        config.start_override = Some(image.trim().to_owned());
    }
    if args.no_hold {
        config = config.with_hold_budget(Duration::ZERO);
    }
    let cycle = LeaseCycle::new(
        load_backend()?,
        FileHandoffStore::new(keepalive.state_file.as_str()),
    );

    let outcome = cycle
        .run(&config, &shutdown_token())
        .await
        .map_err(|err| CliError::Cycle(err.to_string()))?;

    write_json(io::stdout(), &outcome.report())?;
    Ok(cycle_exit_code(&outcome))
}

async fn keepalive_command(args: KeepaliveCommand) -> Result<i32, CliError> {
    let keepalive = KeepaliveConfig::load_without_cli_args()?;
    let config = load_cycle(&keepalive)?;
    let cycle = LeaseCycle::new(
        load_backend()?,
        FileHandoffStore::new(keepalive.state_file.as_str()),
    );
    let settings = LoopSettings {
        cooldown: Duration::from_secs(keepalive.cooldown_secs),
        shutdown_grace: Duration::from_secs(keepalive.shutdown_grace_secs),
    };
    let mut keepalive_loop = KeepaliveLoop::new(cycle, config, settings);
    if let Some(count) = args.max_cycles {
        keepalive_loop = keepalive_loop.with_max_cycles(count);
    }

    let summary = keepalive_loop.run(&shutdown_token()).await;
    Ok(i32::from(summary.abandoned > 0))
}

async fn listen_command(args: ListenCommand) -> Result<i32, CliError> {
    let keepalive = KeepaliveConfig::load_without_cli_args()?;
    let config = load_cycle(&keepalive)?
        .with_hold_budget(Duration::from_secs(keepalive.trigger_hold_secs));
    let secret = keepalive.trigger_secret().map(str::to_owned);
    let cycle = LeaseCycle::new(
        load_backend()?,
        FileHandoffStore::new(keepalive.state_file.as_str()),
    );
    let addr = args.listen.unwrap_or(keepalive.listen);

    let listener = TcpListener::bind(addr.as_str())
        .await
        .map_err(|source| CliError::Listen {
            addr: addr.clone(),
            source,
        })?;
    serve(
        listener,
        router(TriggerState::new(cycle, config, secret)),
        shutdown_token(),
    )
    .await
    .map_err(|source| CliError::Listen { addr, source })?;
    Ok(0)
}

fn status_command() -> Result<i32, CliError> {
    let keepalive = KeepaliveConfig::load_without_cli_args()?;
    let store = FileHandoffStore::new(keepalive.state_file.as_str());
    let record = store
        .read()?
        .ok_or_else(|| CliError::NoRecord(store.path().to_string()))?;
    write_json(io::stdout(), &record)?;
    Ok(0)
}

const fn cycle_exit_code(outcome: &CycleOutcome) -> i32 {
    if outcome.is_completed() {
        0
    } else {
        EXIT_DEGRADED
    }
}

fn write_json<T: Serialize>(mut target: impl Write, value: &T) -> Result<(), CliError> {
    let rendered =
        serde_json::to_string_pretty(value).map_err(|err| CliError::Output(err.to_string()))?;
    writeln!(target, "{rendered}").map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton::backend::EnvironmentSource;
    use baton::cycle::{CycleStatus, Degradation};
    use baton::probe::ProbeOutcome;
    use baton::test_support::EnvGuard;
    use clap::CommandFactory;
    use rstest::rstest;

    fn outcome(status: CycleStatus) -> CycleOutcome {
        CycleOutcome {
            status,
            environment_id: String::from("sbx-1"),
            started_from: EnvironmentSource::Image(String::from("img-1")),
            image_id: Some(String::from("img-2")),
            probe: ProbeOutcome::Ready {
                matches: 1,
                attempts: 1,
            },
            elapsed: Duration::from_secs(3),
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[rstest]
    #[case(CycleStatus::Completed, 0)]
    #[case(
        CycleStatus::Degraded(Degradation::CaptureFailed {
            attempts: 3,
            message: String::from("quota"),
        }),
        EXIT_DEGRADED
    )]
    fn exit_code_reflects_cycle_status(#[case] status: CycleStatus, #[case] expected: i32) {
        assert_eq!(cycle_exit_code(&outcome(status)), expected);
    }

    #[test]
    fn cycle_flags_parse() {
        let cli = Cli::try_parse_from(["baton", "cycle", "--snapshot-id", "img-3", "--no-hold"])
            .unwrap_or_else(|err| panic!("parse: {err}"));

        match cli {
            Cli::Cycle(args) => {
                assert_eq!(args.snapshot_id.as_deref(), Some("img-3"));
                assert!(args.no_hold);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn write_json_renders_pretty_output() {
        let mut buffer = Vec::new();
        write_json(&mut buffer, &outcome(CycleStatus::Completed).report())
            .unwrap_or_else(|err| panic!("write: {err}"));

        let rendered = String::from_utf8(buffer).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert!(rendered.contains("\"snapshotId\": \"img-2\""));
        assert!(rendered.ends_with("}\n"));
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buffer = Vec::new();
        write_error(&mut buffer, &CliError::NoRecord(String::from("state.json")));

        assert_eq!(
            String::from_utf8_lossy(&buffer),
            "no handoff record at state.json; run `baton deploy` first\n"
        );
    }

    #[tokio::test]
    async fn status_reports_missing_record() {
        let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let state = dir.path().join("state.json");
        let state_path = state.to_string_lossy().into_owned();
        let _guard = EnvGuard::set_vars(&[("BATON_STATE_FILE", Some(state_path.as_str()))]).await;

        let err = dispatch(Cli::Status)
            .await
            .expect_err("missing record should fail");

        assert!(matches!(err, CliError::NoRecord(ref path) if path == &state_path));
    }

    #[tokio::test]
    async fn deploy_checks_credentials_before_contacting_the_provider() {
        let _guard = EnvGuard::set_vars(&[
            ("BATON_DEPLOY_REQUIRED_ENV", Some("BATON_TEST_MISSING_CREDENTIAL")),
            ("BATON_TEST_MISSING_CREDENTIAL", None),
            ("VERCEL_TOKEN", None),
        ])
        .await;

        let err = dispatch(Cli::Deploy)
            .await
            .expect_err("missing credential should fail");

        assert!(
            matches!(err, CliError::Config(ConfigError::MissingField(ref message)) if message.contains("BATON_TEST_MISSING_CREDENTIAL"))
        );
    }
}
