//! Command detection, validation and execution
//!
//! [`CommandGate`] pairs a catalog of known commands with an external
//! [`CommandExecutor`]. Detection yields a typed [`CommandMatch`] so callers
//! never re-check names themselves.

pub mod parser;

pub use parser::{CommandToken, find_command, split_command_tail, truncate_at_command};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

/// The one forced command whose preceding user text is kept as context
pub const NEW_ACTION_COMMAND: &str = "!newAction";

/// Description of a command the executor understands
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandSpec {
    /// Name including the leading `!`
    pub name: String,
    pub description: String,
    /// Actions change the world; queries only report
    pub is_action: bool,
}

impl CommandSpec {
    pub fn action(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: normalize_name(name.into()),
            description: description.into(),
            is_action: true,
        }
    }

    pub fn query(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: normalize_name(name.into()),
            description: description.into(),
            is_action: false,
        }
    }
}

/// Result of scanning a text for a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandMatch {
    /// No command token present
    None,
    /// A command the catalog knows
    Known(CommandSpec),
    /// A token naming a command that does not exist (or is blocked)
    Unknown(String),
}

impl CommandMatch {
    /// Name of the detected token, known or not
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Known(spec) => Some(&spec.name),
            Self::Unknown(name) => Some(name),
        }
    }
}

/// Executes commands against the game world
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run the command found in `text` on behalf of `agent`; `Ok(None)` means no output
    async fn execute(&self, agent: &str, text: &str) -> anyhow::Result<Option<String>>;
}

/// Detects, validates and executes command tokens
#[derive(Clone)]
pub struct CommandGate {
    catalog: HashMap<String, CommandSpec>,
    blocked: HashSet<String>,
    executor: Arc<dyn CommandExecutor>,
}

impl CommandGate {
    pub fn new(
        commands: impl IntoIterator<Item = CommandSpec>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            catalog: commands
                .into_iter()
                .map(|spec| (spec.name.clone(), spec))
                .collect(),
            blocked: HashSet::new(),
            executor,
        }
    }

    /// Treat the given commands as nonexistent
    pub fn with_blocked<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked
            .extend(names.into_iter().map(|name| normalize_name(name.into())));
        self
    }

    /// Scan `text` for the first command token
    pub fn detect(&self, text: &str) -> CommandMatch {
        match find_command(text) {
            None => CommandMatch::None,
            Some(token) => match self.lookup(&token.name) {
                Some(spec) => CommandMatch::Known(spec.clone()),
                None => CommandMatch::Unknown(token.name),
            },
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Run the command in `text`; executor failures come back as output text
    pub async fn execute(&self, agent: &str, text: &str) -> Option<String> {
        match self.executor.execute(agent, text).await {
            Ok(output) => output,
            Err(err) => {
                let name = find_command(text).map(|t| t.name).unwrap_or_default();
                warn!(%agent, command = %name, error = %err, "command execution failed");
                Some(format!("Command {name} failed: {err}"))
            }
        }
    }

    /// All commands available to agents
    pub fn available(&self) -> impl Iterator<Item = &CommandSpec> {
        self.catalog
            .values()
            .filter(|spec| !self.blocked.contains(&spec.name))
    }

    fn lookup(&self, name: &str) -> Option<&CommandSpec> {
        if self.blocked.contains(name) {
            return None;
        }
        self.catalog.get(name)
    }
}

impl std::fmt::Debug for CommandGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandGate")
            .field("catalog", &self.catalog.keys().collect::<Vec<_>>())
            .field("blocked", &self.blocked)
            .finish()
    }
}

fn normalize_name(name: String) -> String {
    if name.starts_with('!') {
        name
    } else {
        format!("!{name}")
    }
}
