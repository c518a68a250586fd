//! Error types for the hub and the agent-side collaborators
//!
//! | Error | Surfaced as |
//! |-------|-------------|
//! | [`HubError::AgentNotFound`] | HTTP 404, or a dropped relay with a warning |
//! | [`HubError::Timeout`] | HTTP 408; the pending request is discarded |
//! | [`HubError::ChannelClosed`] | the target channel went away mid-request |
//! | [`HubError::NotRegistered`] | login of an unknown agent is ignored |
//! | [`HubError::AlreadyLoggedIn`] | a channel tried to log in under a second name |
//!
//! Validation of inbound agent messages is not an error: the engine returns
//! `false` and leaves history untouched.

use crate::hub::RequestId;
use thiserror::Error;

/// Errors produced by the coordination hub
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// The agent is unknown or holds no in-game session
    #[error("Agent {0} not found or not in game")]
    AgentNotFound(String),

    /// The correlated reply did not arrive before the deadline
    #[error("request {id} timed out after {timeout_ms}ms")]
    Timeout { id: RequestId, timeout_ms: u64 },

    /// The target channel closed before the request could be delivered
    #[error("channel closed for agent {0}")]
    ChannelClosed(String),

    /// Login for a name that was never registered
    #[error("Agent {0} not registered")]
    NotRegistered(String),

    /// A channel already logged in under a different name
    #[error("Agent {requested} already logged in as {current}")]
    AlreadyLoggedIn { requested: String, current: String },
}

impl HubError {
    /// HTTP status code the API layer reports for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::AgentNotFound(_) | Self::NotRegistered(_) => 404,
            Self::Timeout { .. } => 408,
            Self::ChannelClosed(_) => 404,
            Self::AlreadyLoggedIn { .. } => 409,
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ChannelClosed(_))
    }
}

/// Errors from history persistence
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to persist history for {agent}: {source}")]
    Persist {
        agent: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Errors from loading settings
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}

/// Errors from the API key store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("API key \"{0}\" not found in keys file or environment variables")]
    Missing(String),
}
