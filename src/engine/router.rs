//! Outgoing message routing
//!
//! Decides whether a reply goes to a peer agent over the private conversation
//! channel, to the public chat, or to an allowlist of players via whispers.

use super::collaborators::{ChatSurface, ConversationState};
use crate::commands::split_command_tail;
use crate::value_objects::{ApiReply, ApiReplyKind, PeerMessage, SYSTEM_SOURCE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Where a routed message ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delivery {
    /// The agent is muted
    Discarded,
    /// Sent over the private channel to a peer agent
    Private { peer: String },
    /// Said in public chat
    Public,
    /// Whispered to each allowlisted player
    Whispered { recipients: Vec<String> },
    /// Collected into an API response sink
    Captured,
}

/// Collects replies while an API command is processed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseSink {
    replies: Vec<ApiReply>,
}

impl ResponseSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: ApiReplyKind, message: impl Into<String>) {
        self.replies.push(ApiReply::new(kind, message));
    }

    pub fn replies(&self) -> &[ApiReply] {
        &self.replies
    }

    pub fn into_replies(self) -> Vec<ApiReply> {
        self.replies
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }
}

/// Routes an agent's outgoing text
pub struct ResponseRouter {
    agent_name: String,
    only_chat_with: Vec<String>,
    conversations: Arc<dyn ConversationState>,
    surface: Arc<dyn ChatSurface>,
    last_sender: Option<String>,
    muted: bool,
}

impl ResponseRouter {
    pub fn new(
        agent_name: impl Into<String>,
        only_chat_with: Vec<String>,
        conversations: Arc<dyn ConversationState>,
        surface: Arc<dyn ChatSurface>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            only_chat_with,
            conversations,
            surface,
            last_sender: None,
            muted: false,
        }
    }

    pub fn last_sender(&self) -> Option<&str> {
        self.last_sender.as_deref()
    }

    /// Remember the peer agent that spoke last
    pub fn set_last_sender(&mut self, sender: Option<String>) {
        self.last_sender = sender;
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Deliver `text` addressed to `destination`
    pub async fn route(
        &self,
        destination: &str,
        text: &str,
        sink: Option<&mut ResponseSink>,
    ) -> Delivery {
        if self.muted {
            return Delivery::Discarded;
        }

        let destination = self.resolve_destination(destination);
        if self.conversations.is_peer_agent(destination)
            && self.conversations.has_active_conversation(destination)
        {
            self.conversations
                .send_to(destination, PeerMessage::new(text))
                .await;
            return Delivery::Private {
                peer: destination.to_string(),
            };
        }

        // A peer destination reaching this point has no conversation any more
        self.open_chat(text, sink).await
    }

    /// Say `text` on the public surface (or to the allowlist)
    pub async fn open_chat(&self, text: &str, sink: Option<&mut ResponseSink>) -> Delivery {
        let message = normalize_outgoing(text);

        if let Some(sink) = sink {
            sink.push(ApiReplyKind::Chat, message);
            return Delivery::Captured;
        }

        if self.only_chat_with.is_empty() {
            debug!(agent = %self.agent_name, %message, "public chat");
            self.surface.broadcast(&message).await;
            Delivery::Public
        } else {
            for player in &self.only_chat_with {
                self.surface.whisper(player, &message).await;
            }
            Delivery::Whispered {
                recipients: self.only_chat_with.clone(),
            }
        }
    }

    fn resolve_destination<'a>(&'a self, destination: &'a str) -> &'a str {
        let self_prompt = destination == SYSTEM_SOURCE || destination == self.agent_name;
        match (&self.last_sender, self_prompt) {
            (Some(sender), true) => sender,
            _ => destination,
        }
    }
}

impl std::fmt::Debug for ResponseRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseRouter")
            .field("agent_name", &self.agent_name)
            .field("only_chat_with", &self.only_chat_with)
            .field("last_sender", &self.last_sender)
            .field("muted", &self.muted)
            .finish()
    }
}

/// Prepare text for public chat: keep the command tail apart from the prose
/// and flatten newlines, which the game would send as separate messages
pub fn normalize_outgoing(text: &str) -> String {
    let (prose, tail) = split_command_tail(text);
    let joined = if tail.is_empty() {
        prose.trim().to_string()
    } else {
        format!("{} {}", prose.trim(), tail).trim_start().to_string()
    };
    joined.replace('\n', " ")
}
