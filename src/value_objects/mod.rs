//! Value objects shared by the agent engine and the coordination hub

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity used for messages the agent sends to itself (events, init prompts).
pub const SYSTEM_SOURCE: &str = "system";

/// Identity used for commands relayed from the hub's HTTP surface.
pub const API_SOURCE: &str = "api";

/// An inbound message handed to an agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Who sent the message
    pub source: String,
    /// The message body
    pub text: String,
    /// When the message was received
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message, or `None` when either the source or the text is empty
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Option<Self> {
        let source = source.into();
        let text = text.into();
        if source.is_empty() || text.is_empty() {
            return None;
        }
        Some(Self {
            source,
            text,
            timestamp: Utc::now(),
        })
    }
}

/// A single entry of an agent's conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationEntry {
    /// Speaker identity (a user, a peer agent, the agent itself or `system`)
    pub speaker: String,
    /// What was said
    pub text: String,
    /// When the entry was recorded
    pub timestamp: DateTime<Utc>,
}

impl ConversationEntry {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Classification of a message source relative to the receiving agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// The agent prompting itself (`system`)
    SelfPrompt,
    /// Another agent in the same world
    PeerAgent,
    /// A human player or an API caller
    User,
}

/// Upper bound on generation iterations for one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseBound {
    /// At most this many generation rounds
    Limited(usize),
    /// Explicit opt-in to no limit
    Unbounded,
}

impl ResponseBound {
    /// Interpret a numeric setting; negative values (conventionally `-1`) mean unbounded
    pub fn from_setting(value: i64) -> Self {
        if value < 0 {
            Self::Unbounded
        } else {
            Self::Limited(usize::try_from(value).unwrap_or(usize::MAX))
        }
    }

    /// Whether iteration number `iteration` (zero-based) may still run
    pub fn allows(&self, iteration: usize) -> bool {
        match self {
            Self::Limited(max) => iteration < *max,
            Self::Unbounded => true,
        }
    }
}

/// Kind of a reply captured while serving an API command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiReplyKind {
    /// Text the agent would have said in chat
    Chat,
    /// A system entry written to history (command output, errors)
    System,
    /// Processing failed
    Error,
}

/// One reply collected while an agent served an API command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiReply {
    #[serde(rename = "type")]
    pub kind: ApiReplyKind,
    pub message: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl ApiReply {
    pub fn new(kind: ApiReplyKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Roster entry broadcast to connected channels on `agents-update`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RosterEntry {
    pub name: String,
    pub in_game: bool,
}

/// Agent status returned by `GET /api/agents`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentStatus {
    pub name: String,
    pub in_game: bool,
    /// A manager process is attached for this agent
    pub connected: bool,
}

/// Payload of a private agent-to-agent chat message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerMessage {
    pub message: String,
    /// Set when the sender opens (or re-opens) the conversation
    #[serde(default)]
    pub start: bool,
}

impl PeerMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            start: false,
        }
    }

    pub fn opening(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            start: true,
        }
    }
}
