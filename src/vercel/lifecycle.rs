//! HTTP plumbing for the Vercel Sandbox backend.

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::types::LogLine;
use super::{VercelBackend, VercelBackendError};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound on a single remote command, including installs.
pub(super) const COMMAND_TIMEOUT: Duration = Duration::from_secs(60 * 60);
/// Upper bound on capturing an image.
pub(super) const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(15 * 60);

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

impl VercelBackend {
    pub(super) fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/v1/sandboxes{path}",
            self.config.api_base.trim_end_matches('/')
        )
    }

    pub(super) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let team: Vec<(&str, &str)> = self
            .config
            .team_id
            .as_deref()
            .filter(|team| !team.trim().is_empty())
            .map(|team| ("teamId", team))
            .into_iter()
            .collect();
        HTTP_CLIENT
            .request(method, self.endpoint(path))
            .bearer_auth(&self.config.token)
            .query(&team)
    }

    pub(super) async fn send_text(
        action: &'static str,
        builder: RequestBuilder,
    ) -> Result<String, VercelBackendError> {
        let response = builder
            .send()
            .await
            .map_err(|err| VercelBackendError::Transport {
                action,
                message: err.to_string(),
            })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| VercelBackendError::Transport {
                action,
                message: err.to_string(),
            })?;
        if !status.is_success() {
            return Err(VercelBackendError::Api {
                action,
                status: status.as_u16(),
                message: body,
            });
        }
        debug!(action, status = status.as_u16(), "sandbox api call succeeded");
        Ok(body)
    }

    pub(super) async fn send_json<T: DeserializeOwned>(
        action: &'static str,
        builder: RequestBuilder,
    ) -> Result<T, VercelBackendError> {
        let body = Self::send_text(action, builder).await?;
        serde_json::from_str(&body).map_err(|err| VercelBackendError::Decode {
            action,
            message: err.to_string(),
        })
    }
}

/// Splits an NDJSON log stream into stdout and stderr text.
///
/// Lines that are not valid log records are skipped.
pub(super) fn split_logs(ndjson: &str) -> (String, String) {
    let mut stdout = String::new();
    let mut stderr = String::new();
    for line in ndjson.lines().filter(|line| !line.trim().is_empty()) {
        match serde_json::from_str::<LogLine>(line) {
            Ok(record) if record.stream == "stderr" => stderr.push_str(&record.data),
            Ok(record) => stdout.push_str(&record.data),
            Err(err) => debug!(error = %err, "skipping malformed log line"),
        }
    }
    (stdout, stderr)
}

/// Converts a duration to whole milliseconds, saturating at `u64::MAX`.
pub(super) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
