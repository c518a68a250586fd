//! Mind hub: agent message engine and coordination hub
//!
//! Autonomous agents converse with users and with each other and issue
//! bounded sequences of commands in response to generated text. This crate
//! provides:
//! - [`MessageEngine`]: turns one inbound message into replies and commands
//!   under strict precedence and iteration-bound rules
//! - [`ResponseRouter`]: sends replies over private peer channels or to the
//!   public chat
//! - [`CoordinationHub`]: multiplexes agent processes over channels and
//!   correlates request/response pairs by id with timeouts
//! - [`HubApi`]: the hub's HTTP surface as plain request/response values
//!
//! Language models, game actions, perception and history storage are
//! collaborators behind traits; implementations live with the host process.

pub mod api;
pub mod client;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod hub;
pub mod keys;
pub mod value_objects;

// Re-export main types
pub use api::{ApiRequest, ApiResponse, HubApi};

pub use client::{
    AgentClient, ClientAction, HubTransport, InfoProvider, LocalLink, ManagerAction,
    ManagerClient,
};

pub use commands::{CommandExecutor, CommandGate, CommandMatch, CommandSpec};

pub use config::{AgentSettings, HubConfig};

pub use engine::{
    BehaviorMonitor, ChatSurface, ConversationState, Delivery, EngineParts, Generator,
    MessageEngine, ResponseRouter, ResponseSink, SelfGeneration,
};

pub use error::{ConfigError, HistoryError, HubError, KeyError};

pub use history::{History, HistorySnapshot, InMemoryHistory, SelfPromptState, SessionMemo};

pub use hub::{
    AgentEvent, CompletedRequest, ConnectionId, CoordinationHub, HubEvent, RequestCorrelator,
    RequestId, RequestKind,
};

pub use keys::KeyStore;

pub use value_objects::{
    AgentStatus, ApiReply, ApiReplyKind, ConversationEntry, Message, PeerMessage,
    ResponseBound, RosterEntry, SourceKind,
};
