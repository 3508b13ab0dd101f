//! Configuration for first-run deployment.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::config::{ConfigError, CycleConfig, parse_env_names, program_name};
use crate::handoff::AgentIdentity;

/// Default payload repository.
pub const DEFAULT_REPO_URL: &str = "https://github.com/refreshdotdev/proactive-engineer.git";

/// Default runtime installer.
pub const DEFAULT_INSTALL_COMMAND: &str =
    "curl -fsSL https://openclaw.ai/install.sh | bash -s -- --no-onboard";

/// Deployment settings loaded from defaults, `baton.toml`, and the
/// environment.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "BATON_DEPLOY",
    discovery(
        app_name = "baton",
        env_var = "BATON_CONFIG_PATH",
        config_file_name = "baton.toml",
        dotfile_name = ".baton.toml",
        project_file_name = "baton.toml"
    )
)]
pub struct DeployConfig {
    /// Short machine name of the agent.
    #[ortho_config(default = "default".to_owned())]
    pub agent_name: String,
    /// Human-facing display name.
    #[ortho_config(default = "Proactive Engineer".to_owned())]
    pub agent_display_name: String,
    /// Payload repository cloned into the sandbox.
    #[ortho_config(default = DEFAULT_REPO_URL.to_owned())]
    pub repo_url: String,
    /// Command installing the agent runtime.
    #[ortho_config(default = DEFAULT_INSTALL_COMMAND.to_owned())]
    pub install_command: String,
    /// Command configuring the agent once credentials are exported.
    #[ortho_config(default = "bash ~/.proactive-engineer/packer/configure-agent.sh".to_owned())]
    pub configure_command: String,
    /// Skill directory under `skills/` linked into the runtime.
    #[ortho_config(default = "proactive-engineer".to_owned())]
    pub skill_name: String,
    /// Comma-separated credentials that must be set locally.
    #[ortho_config(default = "SLACK_APP_TOKEN,SLACK_BOT_TOKEN,GEMINI_API_KEY".to_owned())]
    pub required_env: String,
    /// Comma-separated credentials forwarded when set.
    #[ortho_config(default = "GITHUB_APP_ID,GITHUB_APP_INSTALLATION_ID,GITHUB_TOKEN".to_owned())]
    pub optional_env: String,
    /// Variable holding a private key that is written to a file in the
    /// sandbox instead of being exported.
    #[ortho_config(default = "GITHUB_APP_PEM".to_owned())]
    pub key_file_env: String,
}

/// A private key delivered as a file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyFile {
    /// Destination inside the sandbox.
    pub path: String,
    /// Variable exported to the configure step with the destination path.
    pub path_env: String,
    /// Key material.
    pub contents: String,
}

/// Fully resolved deployment inputs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeployPlan {
    /// Agent identity recorded in the handoff record.
    pub agent: AgentIdentity,
    /// Lease for the bootstrap sandbox.
    pub lease: Duration,
    /// Payload repository.
    pub repo_url: String,
    /// Runtime installer.
    pub install_command: String,
    /// Configure step.
    pub configure_command: String,
    /// Skill linked into the runtime.
    pub skill_name: String,
    /// Variables exported to the configure step. The key file location is
    /// exported separately so a leading `~` still expands.
    pub env: Vec<(String, String)>,
    /// Optional private key file.
    pub key_file: Option<KeyFile>,
    /// Payload location, logs, and readiness bounds shared with cycles.
    pub cycle: CycleConfig,
}

impl DeployConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(program_name()).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Resolves credentials through `lookup` and combines them with the
    /// cycle settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first required
    /// credential that is unset, and [`ConfigError::Invalid`] when a
    /// variable list contains an invalid name.
    pub fn plan<F>(&self, cycle: CycleConfig, lookup: F) -> Result<DeployPlan, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (value, key) in [
            (&self.agent_name, "BATON_DEPLOY_AGENT_NAME"),
            (&self.repo_url, "BATON_DEPLOY_REPO_URL"),
            (&self.configure_command, "BATON_DEPLOY_CONFIGURE_COMMAND"),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "{key} must not be empty"
                )));
            }
        }

        let present = |name: &str| lookup(name).filter(|value| !value.is_empty());
        let mut env = Vec::new();
        for name in parse_env_names(&self.required_env, "BATON_DEPLOY_REQUIRED_ENV")? {
            let value = present(&name).ok_or_else(|| {
                ConfigError::MissingField(format!("required credential {name} is not set"))
            })?;
            env.push((name, value));
        }
        for name in parse_env_names(&self.optional_env, "BATON_DEPLOY_OPTIONAL_ENV")? {
            if let Some(value) = present(&name) {
                env.push((name, value));
            }
        }
        env.push((String::from("AGENT_NAME"), self.agent_name.clone()));
        env.push((
            String::from("AGENT_DISPLAY_NAME"),
            self.agent_display_name.clone(),
        ));

        let key_file = self.key_file(&cycle, &present)?;

        Ok(DeployPlan {
            agent: AgentIdentity {
                name: self.agent_name.clone(),
                display_name: self.agent_display_name.clone(),
            },
            lease: cycle.lease,
            repo_url: self.repo_url.clone(),
            install_command: self.install_command.clone(),
            configure_command: self.configure_command.clone(),
            skill_name: self.skill_name.clone(),
            env,
            key_file,
            cycle,
        })
    }

    fn key_file<F>(&self, cycle: &CycleConfig, present: &F) -> Result<Option<KeyFile>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let names = parse_env_names(&self.key_file_env, "BATON_DEPLOY_KEY_FILE_ENV")?;
        let Some(name) = names.into_iter().next() else {
            return Ok(None);
        };
        Ok(present(&name).map(|contents| KeyFile {
            path: format!(
                "{}/{}.pem",
                cycle.payload.dir.trim_end_matches('/'),
                file_stem(&name)
            ),
            path_env: format!("{name}_PATH"),
            contents,
        }))
    }
}

fn file_stem(env_name: &str) -> String {
    env_name
        .trim_end_matches("_PEM")
        .to_ascii_lowercase()
        .replace('_', "-")
}
