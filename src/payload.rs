//! Shell command construction for the agent payload.
//!
//! Every command issued inside an environment is built here so the cycle
//! controller stays focused on sequencing. Paths beginning with `~` are
//! rewritten to `"$HOME"` so tilde expansion survives shell escaping.

use shell_escape::unix::escape;

/// Number of log lines captured for diagnostics when readiness is not
/// confirmed.
pub const DIAGNOSTIC_TAIL_LINES: u32 = 5;

/// Describes how the payload is refreshed and launched inside an
/// environment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PayloadSpec {
    /// Checkout of the payload repository inside the environment.
    pub dir: String,
    /// Branch pulled during refresh.
    pub branch: String,
    /// Command that starts the long-running payload process.
    pub launch_command: String,
    /// Working directory for the launch command.
    pub workdir: String,
    /// File receiving the payload's combined output.
    pub log_path: String,
    /// Directories prepended to `PATH` before launching. May reference
    /// `$HOME`.
    pub extra_path: String,
    /// Variables exported into the payload's runtime environment.
    pub env: Vec<(String, String)>,
}

/// Renders a remote path argument, keeping a leading `~` expandable.
#[must_use]
pub fn remote_path(path: &str) -> String {
    if path == "~" {
        return String::from("\"$HOME\"");
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return format!("\"$HOME\"/{}", escape(rest.into()));
    }
    escape(path.into()).into_owned()
}

/// Returns `true` when `name` is a valid POSIX shell variable name.
#[must_use]
pub fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Renders `export KEY='value'; ` statements for the given variables.
#[must_use]
pub fn env_exports(env: &[(String, String)]) -> String {
    let mut exports = String::new();
    for (key, value) in env {
        exports.push_str("export ");
        exports.push_str(key);
        exports.push('=');
        exports.push_str(escape(value.as_str().into()).as_ref());
        exports.push_str("; ");
    }
    exports
}

/// Builds the idempotent code refresh command.
///
/// `git pull` converges on the remote branch head, so running it twice
/// leaves the checkout in the same state as running it once.
#[must_use]
pub fn refresh_command(spec: &PayloadSpec) -> String {
    format!(
        "cd {dir} && git pull --quiet origin {branch}",
        dir = remote_path(&spec.dir),
        branch = escape(spec.branch.as_str().into())
    )
}

/// Builds the detached launch command.
///
/// The payload is started with `nohup`, detached from stdin, and disowned so
/// it outlives the shell that issued it.
#[must_use]
pub fn launch_command(spec: &PayloadSpec) -> String {
    let launch = format!(
        "cd {workdir} || exit 1; nohup {launch} > {log} 2>&1 < /dev/null & disown",
        workdir = remote_path(&spec.workdir),
        launch = spec.launch_command,
        log = remote_path(&spec.log_path)
    );
    with_environment(&spec.extra_path, &spec.env, &launch)
}

/// Runs `command` with `PATH` extended and `env` exported.
#[must_use]
pub fn with_environment(extra_path: &str, env: &[(String, String)], command: &str) -> String {
    let mut rendered = String::new();
    if !extra_path.is_empty() {
        rendered.push_str("export PATH=\"");
        rendered.push_str(extra_path);
        rendered.push_str(":$PATH\"; ");
    }
    rendered.push_str(&env_exports(env));
    rendered.push_str(command);
    rendered
}

/// Builds a shallow clone of `repo` into `dir`.
#[must_use]
pub fn clone_command(repo: &str, dir: &str) -> String {
    format!(
        "git clone --depth 1 {repo} {dir}",
        repo = escape(repo.into()),
        dir = remote_path(dir)
    )
}

/// Links `skill` from the payload checkout into the runtime's skill
/// directory, replacing any previous link.
#[must_use]
pub fn link_skill_command(dir: &str, skill: &str) -> String {
    format!(
        concat!(
            "mkdir -p \"$HOME\"/.openclaw/skills && ",
            "ln -sfn {dir}/skills/{skill} \"$HOME\"/.openclaw/skills/{skill}"
        ),
        dir = remote_path(dir),
        skill = escape(skill.into())
    )
}

/// Writes `contents` to `path` readable only by the owner.
#[must_use]
pub fn write_secret_command(path: &str, contents: &str) -> String {
    let target = remote_path(path);
    format!(
        "umask 077 && printf '%s\\n' {contents} > {target} && chmod 600 {target}",
        contents = escape(contents.into())
    )
}

/// Builds the read-only readiness probe. It prints the number of log lines
/// matching `pattern` and always exits zero.
#[must_use]
pub fn probe_command(log_path: &str, pattern: &str) -> String {
    format!(
        "grep -cE {pattern} {log} 2>/dev/null || true",
        pattern = escape(pattern.into()),
        log = remote_path(log_path)
    )
}

/// Builds a read-only command printing the last `lines` lines of the log.
#[must_use]
pub fn tail_command(log_path: &str, lines: u32) -> String {
    format!(
        "tail -n {lines} {log} 2>/dev/null || echo 'No logs yet'",
        log = remote_path(log_path)
    )
}

/// Parses the match count printed by [`probe_command`]. Missing or garbled
/// output counts as zero.
#[must_use]
pub fn parse_match_count(stdout: &str) -> u64 {
    stdout
        .lines()
        .last()
        .and_then(|line| line.trim().parse().ok())
        .unwrap_or(0)
}
