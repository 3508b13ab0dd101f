//! Tests for configuration validation and cycle resolution.

use super::*;
use rstest::{fixture, rstest};

#[fixture]
fn keepalive() -> KeepaliveConfig {
    KeepaliveConfig {
        state_file: String::from(DEFAULT_STATE_FILE),
        snapshot_id: None,
        cron_secret: Some(String::from("s3cret")),
        lease_duration_secs: DEFAULT_LEASE_SECS,
        snapshot_margin_secs: DEFAULT_SNAPSHOT_MARGIN_SECS,
        readiness_timeout_secs: 60,
        readiness_poll_secs: 5,
        ready_pattern: String::from(DEFAULT_READY_PATTERN),
        log_path: String::from(DEFAULT_LOG_PATH),
        payload_dir: String::from("~/.proactive-engineer"),
        payload_branch: String::from("main"),
        launch_command: String::from("openclaw gateway"),
        launch_workdir: String::from("~"),
        extra_path: String::from("$HOME/.local/bin"),
        forward_env: String::new(),
        capture_attempts: 3,
        capture_backoff_secs: 10,
        cooldown_secs: 30,
        shutdown_grace_secs: 300,
        trigger_hold_secs: 0,
        listen: String::from("127.0.0.1:8080"),
    }
}

#[fixture]
fn vercel() -> VercelConfig {
    VercelConfig {
        token: String::from("tok"),
        team_id: None,
        project_id: None,
        api_base: String::from(DEFAULT_API_BASE),
        runtime: String::from("node22"),
        vcpus: 2,
    }
}

fn no_env(_: &str) -> Option<String> {
    None
}

#[rstest]
fn cycle_config_uses_five_hour_defaults(keepalive: KeepaliveConfig) {
    let config = keepalive
        .cycle_config(no_env)
        .unwrap_or_else(|err| panic!("default config should resolve: {err}"));

    assert_eq!(config.lease, Duration::from_secs(18_000));
    assert_eq!(config.hold_offset(), Duration::from_secs(16_200));
    assert_eq!(config.start_override, None);
    assert_eq!(config.hold_budget, None);
}

#[rstest]
fn shorter_tier_is_only_configuration(mut keepalive: KeepaliveConfig) {
    keepalive.lease_duration_secs = 45 * 60;
    keepalive.snapshot_margin_secs = 5 * 60;

    let config = keepalive
        .cycle_config(no_env)
        .unwrap_or_else(|err| panic!("45 minute tier should resolve: {err}"));

    assert_eq!(config.hold_offset(), Duration::from_secs(40 * 60));
}

#[rstest]
#[case(0, 18_000)]
#[case(18_000, 18_000)]
#[case(20_000, 18_000)]
fn margin_must_fit_inside_lease(
    mut keepalive: KeepaliveConfig,
    #[case] margin: u64,
    #[case] lease: u64,
) {
    keepalive.snapshot_margin_secs = margin;
    keepalive.lease_duration_secs = lease;

    let Err(ConfigError::Invalid(message)) = keepalive.cycle_config(no_env) else {
        panic!("margin {margin} with lease {lease} should be rejected");
    };
    assert!(message.contains("snapshot margin"), "message: {message}");
}

#[rstest]
fn zero_poll_interval_is_rejected(mut keepalive: KeepaliveConfig) {
    keepalive.readiness_poll_secs = 0;

    let result = keepalive.cycle_config(no_env);

    assert!(
        matches!(result, Err(ConfigError::Invalid(ref message)) if message.contains("BATON_READINESS_POLL_SECS")),
        "unexpected result: {result:?}"
    );
}

#[rstest]
fn zero_capture_attempts_are_rejected(mut keepalive: KeepaliveConfig) {
    keepalive.capture_attempts = 0;

    assert!(matches!(
        keepalive.cycle_config(no_env),
        Err(ConfigError::Invalid(_))
    ));
}

#[rstest]
#[case::pattern("BATON_READY_PATTERN")]
#[case::launch("BATON_LAUNCH_COMMAND")]
fn blank_required_fields_name_their_variable(
    mut keepalive: KeepaliveConfig,
    #[case] env_var: &str,
) {
    if env_var == "BATON_READY_PATTERN" {
        keepalive.ready_pattern = String::from("  ");
    } else {
        keepalive.launch_command = String::new();
    }

    let Err(ConfigError::MissingField(message)) = keepalive.cycle_config(no_env) else {
        panic!("blank field should be rejected");
    };
    assert!(message.contains(env_var), "message: {message}");
    assert!(message.contains("baton.toml"), "message: {message}");
}

#[rstest]
fn forwarded_variables_are_resolved(mut keepalive: KeepaliveConfig) {
    keepalive.forward_env = String::from("SLACK_APP_TOKEN, GEMINI_API_KEY,");

    let config = keepalive
        .cycle_config(|name| Some(format!("value-of-{name}")))
        .unwrap_or_else(|err| panic!("forwarded env should resolve: {err}"));

    assert_eq!(
        config.payload.env,
        vec![
            (
                String::from("SLACK_APP_TOKEN"),
                String::from("value-of-SLACK_APP_TOKEN")
            ),
            (
                String::from("GEMINI_API_KEY"),
                String::from("value-of-GEMINI_API_KEY")
            ),
        ]
    );
}

#[rstest]
fn unset_forwarded_variable_is_reported(mut keepalive: KeepaliveConfig) {
    keepalive.forward_env = String::from("SLACK_APP_TOKEN");

    let Err(ConfigError::MissingField(message)) = keepalive.cycle_config(no_env) else {
        panic!("unset variable should be rejected");
    };
    assert!(message.contains("SLACK_APP_TOKEN"), "message: {message}");
}

#[rstest]
fn invalid_forwarded_name_is_rejected(mut keepalive: KeepaliveConfig) {
    keepalive.forward_env = String::from("GOOD,BAD-NAME");

    assert!(matches!(
        keepalive.forwarded_names(),
        Err(ConfigError::Invalid(ref message)) if message.contains("BAD-NAME")
    ));
}

#[rstest]
fn quoted_extra_path_is_rejected(mut keepalive: KeepaliveConfig) {
    keepalive.extra_path = String::from("$HOME/bin\"; rm -rf /");

    assert!(matches!(
        keepalive.cycle_config(no_env),
        Err(ConfigError::Invalid(_))
    ));
}

#[rstest]
#[case(Some("  snap-1 "), Some("snap-1"))]
#[case(Some("   "), None)]
#[case(None, None)]
fn start_override_ignores_blank_values(
    mut keepalive: KeepaliveConfig,
    #[case] raw: Option<&str>,
    #[case] expected: Option<&str>,
) {
    keepalive.snapshot_id = raw.map(str::to_owned);

    assert_eq!(keepalive.start_override().as_deref(), expected);
}

#[rstest]
fn trigger_secret_ignores_blank_values(mut keepalive: KeepaliveConfig) {
    assert_eq!(keepalive.trigger_secret(), Some("s3cret"));
    keepalive.cron_secret = Some(String::from(" "));
    assert_eq!(keepalive.trigger_secret(), None);
}

#[rstest]
fn vercel_validation_requires_token(mut vercel: VercelConfig) {
    vercel.token = String::new();

    let error = vercel.validate().expect_err("token is required");
    let message = error.to_string();
    assert!(message.contains("VERCEL_TOKEN"), "message: {message}");
    assert!(message.contains("[vercel]"), "message: {message}");
}

#[rstest]
fn vercel_validation_rejects_zero_vcpus(mut vercel: VercelConfig) {
    vercel.vcpus = 0;

    assert!(matches!(vercel.validate(), Err(ConfigError::Invalid(_))));
}

#[rstest]
fn vercel_validation_accepts_defaults(vercel: VercelConfig) {
    assert!(vercel.validate().is_ok());
}
