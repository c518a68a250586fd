//! Events exchanged between agent processes and the hub
//!
//! Both directions are serde-tagged enums: the `event` field carries the
//! kebab-case event name and the remaining fields carry its arguments.

use super::correlator::RequestId;
use crate::value_objects::{ApiReply, PeerMessage, RosterEntry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Sent by an agent or manager process to the hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum AgentEvent {
    /// A manager announces the agents it runs
    RegisterAgents { agents: Vec<String> },

    /// The sending channel now hosts this agent in game
    LoginAgent { name: String },

    LogoutAgent { name: String },

    /// Private message to another in-game agent
    ChatMessage {
        recipient: String,
        payload: PeerMessage,
    },

    RestartAgent { name: String },

    StopAgent { name: String },

    StartAgent { name: String },

    StopAllAgents,

    Shutdown,

    /// One reply item for a relayed API command
    ApiResponse {
        request_id: RequestId,
        reply: ApiReply,
    },

    ApiCommandComplete { request_id: RequestId },

    InfoResponse { request_id: RequestId, info: Value },

    ChatMessageSent { request_id: RequestId },

    /// Inject a message into an in-game agent
    SendMessage { name: String, message: String },
}

/// Sent by the hub to a connected channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum HubEvent {
    RegisterAgentsSuccess,

    /// Current roster, broadcast to every channel on change
    AgentsUpdate { agents: Vec<RosterEntry> },

    KeysUpdate { keys: HashMap<String, String> },

    PortsUpdate { hub_port: u16, proxy_port: u16 },

    /// Private message from another agent
    ChatMessage {
        sender: String,
        payload: PeerMessage,
    },

    RestartAgent { name: String },

    StopAgent { name: String },

    StartAgent { name: String },

    Shutdown,

    ApiCommand {
        request_id: RequestId,
        command: String,
    },

    GetInfo { request_id: RequestId },

    SendChatMessage {
        request_id: RequestId,
        message: String,
    },

    SendMessage { name: String, message: String },
}

impl HubEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Self::RegisterAgentsSuccess => "register-agents-success",
            Self::AgentsUpdate { .. } => "agents-update",
            Self::KeysUpdate { .. } => "keys-update",
            Self::PortsUpdate { .. } => "ports-update",
            Self::ChatMessage { .. } => "chat-message",
            Self::RestartAgent { .. } => "restart-agent",
            Self::StopAgent { .. } => "stop-agent",
            Self::StartAgent { .. } => "start-agent",
            Self::Shutdown => "shutdown",
            Self::ApiCommand { .. } => "api-command",
            Self::GetInfo { .. } => "get-info",
            Self::SendChatMessage { .. } => "send-chat-message",
            Self::SendMessage { .. } => "send-message",
        }
    }
}
