//! Per-agent conversation history
//!
//! The history is the prompt context: entries are kept in insertion order and
//! only the owning agent's engine appends to them. How a history is stored is
//! up to the [`History`] implementation; [`InMemoryHistory`] keeps everything
//! in process and records the last persisted snapshot.

use crate::error::HistoryError;
use crate::value_objects::ConversationEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of autonomous self-prompting at save time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelfPromptState {
    #[default]
    Stopped,
    Active,
    Paused,
}

/// Session state saved alongside the turns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMemo {
    /// Goal the agent was prompting itself towards
    pub self_prompt: Option<String>,
    pub self_prompting_state: SelfPromptState,
    /// Peer agent the agent was last talking to
    pub last_sender: Option<String>,
}

/// Everything a history persists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub agent: String,
    pub turns: Vec<ConversationEntry>,
    #[serde(flatten)]
    pub memo: SessionMemo,
    pub saved_at: DateTime<Utc>,
}

/// Ordered conversation record owned by one agent
#[async_trait]
pub trait History: Send + Sync {
    /// Append an entry at the end
    async fn append(&mut self, speaker: &str, text: &str);

    /// All entries in insertion order
    fn ordered(&self) -> &[ConversationEntry];

    /// Flush the current turns plus session state
    async fn persist(&mut self, memo: &SessionMemo) -> Result<(), HistoryError>;

    /// The previously persisted snapshot, if any
    fn load(&self) -> Result<Option<HistorySnapshot>, HistoryError>;
}

/// History kept in memory
#[derive(Debug, Clone)]
pub struct InMemoryHistory {
    agent: String,
    entries: Vec<ConversationEntry>,
    saved: Option<HistorySnapshot>,
    persist_count: u64,
}

impl InMemoryHistory {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            entries: Vec::new(),
            saved: None,
            persist_count: 0,
        }
    }

    /// Start from a previously saved snapshot
    pub fn restored(snapshot: HistorySnapshot) -> Self {
        Self {
            agent: snapshot.agent.clone(),
            entries: snapshot.turns.clone(),
            saved: Some(snapshot),
            persist_count: 0,
        }
    }

    /// How many times the history was persisted
    pub fn persist_count(&self) -> u64 {
        self.persist_count
    }

    /// Entries written by one speaker
    pub fn by_speaker(&self, speaker: &str) -> Vec<&ConversationEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.speaker == speaker)
            .collect()
    }
}

#[async_trait]
impl History for InMemoryHistory {
    async fn append(&mut self, speaker: &str, text: &str) {
        self.entries.push(ConversationEntry::new(speaker, text));
    }

    fn ordered(&self) -> &[ConversationEntry] {
        &self.entries
    }

    async fn persist(&mut self, memo: &SessionMemo) -> Result<(), HistoryError> {
        self.saved = Some(HistorySnapshot {
            agent: self.agent.clone(),
            turns: self.entries.clone(),
            memo: memo.clone(),
            saved_at: Utc::now(),
        });
        self.persist_count += 1;
        Ok(())
    }

    fn load(&self) -> Result<Option<HistorySnapshot>, HistoryError> {
        Ok(self.saved.clone())
    }
}
