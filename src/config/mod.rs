//! Settings for agents and the coordination hub
//!
//! Both structs deserialize from JSON with every field optional; missing
//! fields take the defaults below. Hub addresses can then be overridden from
//! the environment (`MINDSERVER_HOST`, `MINDSERVER_PORT`, `PROXYSERVER_PORT`).

use crate::error::ConfigError;
use crate::value_objects::ResponseBound;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Per-agent behaviour settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentSettings {
    /// Generation rounds per message; negative means unbounded
    pub max_commands: i64,
    /// Echo the full generated text when a command is used instead of `*used <name>*`
    pub verbose_commands: bool,
    /// When non-empty, public chat is whispered to exactly these players
    pub only_chat_with: Vec<String>,
    /// Commands treated as nonexistent
    pub blocked_actions: Vec<String>,
    /// Longest behaviour log excerpt recorded before a message
    pub behavior_log_limit: usize,
    /// Interval of the agent update tick
    pub update_interval_ms: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_commands: 20,
            verbose_commands: true,
            only_chat_with: Vec::new(),
            blocked_actions: Vec::new(),
            behavior_log_limit: 500,
            update_interval_ms: 300,
        }
    }
}

impl AgentSettings {
    /// Load settings from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        read_json(path.as_ref())
    }

    /// The configured generation bound
    pub fn response_bound(&self) -> ResponseBound {
        ResponseBound::from_setting(self.max_commands)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }
}

/// Coordination hub settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HubConfig {
    pub host: String,
    pub port: u16,
    /// Port of the companion CORS proxy, published on `ports-update`
    pub proxy_port: u16,
    /// Deadline for `api-command` round trips
    pub command_timeout_ms: u64,
    /// Deadline for `send-chat-message` acknowledgements
    pub chat_timeout_ms: u64,
    /// Delay before an `info-response` is considered missing
    pub info_timeout_ms: u64,
    /// Delay between forwarding `shutdown` and terminating the hub
    pub shutdown_grace_ms: u64,
    /// Key names published on `keys-update`
    pub published_keys: Vec<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            proxy_port: 8081,
            command_timeout_ms: 30_000,
            chat_timeout_ms: 5_000,
            info_timeout_ms: 1_000,
            shutdown_grace_ms: 2_000,
            published_keys: vec![
                "BYTEDANCE_APP_ID".to_string(),
                "BYTEDANCE_APP_TOKEN".to_string(),
                "OPENAI_API_KEY".to_string(),
            ],
        }
    }
}

impl HubConfig {
    /// Load settings from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        read_json(path.as_ref())
    }

    /// Apply overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MINDSERVER_HOST") {
            debug!(%host, "hub host overridden from environment");
            self.host = host;
        }
        if let Some(port) = lookup("MINDSERVER_PORT") {
            self.port = parse_port("MINDSERVER_PORT", &port)?;
        }
        if let Some(port) = lookup("PROXYSERVER_PORT") {
            self.proxy_port = parse_port("PROXYSERVER_PORT", &port)?;
        }
        Ok(self)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn chat_timeout(&self) -> Duration {
        Duration::from_millis(self.chat_timeout_ms)
    }

    pub fn info_timeout(&self) -> Duration {
        Duration::from_millis(self.info_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn parse_port(var: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason: format!("expected a port number, got {value:?}"),
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: display.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: display,
        source,
    })
}
