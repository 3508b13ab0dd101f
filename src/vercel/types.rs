//! Wire types for the Vercel Sandbox REST API.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateSandboxRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) source: Option<SandboxSource>,
    /// Lease in milliseconds.
    pub(crate) timeout: u64,
    pub(crate) resources: Resources,
    pub(crate) runtime: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SandboxSource {
    #[serde(rename = "type")]
    pub(crate) kind: &'static str,
    pub(crate) snapshot_id: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub(crate) struct Resources {
    pub(crate) vcpus: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct SandboxEnvelope {
    pub(crate) sandbox: IdOnly,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct IdOnly {
    pub(crate) id: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub(crate) struct RunCommandRequest<'a> {
    pub(crate) command: &'static str,
    pub(crate) args: [&'a str; 2],
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct CommandEnvelope {
    pub(crate) command: CommandStatus,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CommandStatus {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) exit_code: Option<i32>,
}

/// One NDJSON line of command output.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct LogLine {
    pub(crate) stream: String,
    #[serde(default)]
    pub(crate) data: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub(crate) struct SnapshotRequest {
    /// Retention in milliseconds; zero keeps the image forever.
    pub(crate) expiration: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct SnapshotEnvelope {
    pub(crate) snapshot: IdOnly,
}
