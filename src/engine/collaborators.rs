//! Interfaces the message engine consumes
//!
//! Implementations live outside this crate: the language model behind
//! [`Generator`], the game connection behind [`ChatSurface`], the
//! conversation manager behind [`ConversationState`] and so on.

use crate::history::SelfPromptState;
use crate::value_objects::{ConversationEntry, PeerMessage, RosterEntry};
use async_trait::async_trait;
use std::time::Duration;

/// Produces the agent's next utterance from its history
#[async_trait]
pub trait Generator: Send + Sync {
    async fn complete(&self, history: &[ConversationEntry]) -> anyhow::Result<String>;
}

/// Public chat of the game world
#[async_trait]
pub trait ChatSurface: Send + Sync {
    /// Say something to everyone
    async fn broadcast(&self, text: &str);

    /// Say something to a single player
    async fn whisper(&self, player: &str, text: &str);
}

/// Private agent-to-agent conversations
#[async_trait]
pub trait ConversationState: Send + Sync {
    /// Whether `name` belongs to another agent
    fn is_peer_agent(&self, name: &str) -> bool;

    /// Whether a private exchange with `name` is in progress
    fn has_active_conversation(&self, name: &str) -> bool;

    /// Whether the peer currently holds an in-game session
    fn is_peer_in_game(&self, name: &str) -> bool;

    /// Whether a reply to `name` is already queued
    fn reply_scheduled(&self, name: &str) -> bool;

    /// Deliver text to a peer over the private channel
    async fn send_to(&self, peer: &str, payload: PeerMessage);

    /// Accept a message that arrived from a peer
    async fn receive_from(&self, peer: &str, payload: PeerMessage);

    /// Refresh the known agent roster
    fn update_agents(&self, roster: &[RosterEntry]);

    /// Close every open exchange
    fn end_all(&self);
}

/// Saved self-prompt goal and state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelfPromptSnapshot {
    pub prompt: Option<String>,
    pub state: SelfPromptState,
}

/// Autonomous self-prompting
#[async_trait]
pub trait SelfGeneration: Send + Sync {
    fn is_active(&self) -> bool;

    /// Whether the current generation loop should yield
    fn should_interrupt(&self, self_prompted: bool) -> bool;

    /// A command was about to run inside a generation loop
    fn notify_command_used(&self, self_prompted: bool, is_action: bool);

    /// Stop self-prompting
    fn stop(&self);

    fn snapshot(&self) -> SelfPromptSnapshot;

    /// Resume from saved state
    async fn restore(&self, snapshot: SelfPromptSnapshot);

    /// One update tick
    async fn update(&self, delta: Duration);
}

/// Autonomous behaviour monitoring ("modes")
#[async_trait]
pub trait BehaviorMonitor: Send + Sync {
    /// Take and clear the text queued since the last call
    fn flush_behavior_log(&self) -> String;

    /// One update tick
    async fn update(&self);
}

/// Self-prompting that never runs
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSelfGeneration;

#[async_trait]
impl SelfGeneration for NoSelfGeneration {
    fn is_active(&self) -> bool {
        false
    }

    fn should_interrupt(&self, _self_prompted: bool) -> bool {
        false
    }

    fn notify_command_used(&self, _self_prompted: bool, _is_action: bool) {}

    fn stop(&self) {}

    fn snapshot(&self) -> SelfPromptSnapshot {
        SelfPromptSnapshot::default()
    }

    async fn restore(&self, _snapshot: SelfPromptSnapshot) {}

    async fn update(&self, _delta: Duration) {}
}

/// Behaviour monitor with nothing to report
#[derive(Debug, Clone, Copy, Default)]
pub struct QuietBehavior;

#[async_trait]
impl BehaviorMonitor for QuietBehavior {
    fn flush_behavior_log(&self) -> String {
        String::new()
    }

    async fn update(&self) {}
}
