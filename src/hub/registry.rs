//! Agent registration and channel bookkeeping
//!
//! A connection is one persistent channel to an agent or manager process.
//! Manager channels register agent names; an agent channel logs in under at
//! most one registered name and is then the agent's in-game channel.

use super::events::HubEvent;
use crate::error::HubError;
use crate::value_objects::{AgentStatus, RosterEntry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifier of a connected channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the hub knows about one agent name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRecord {
    pub name: String,
    /// Set on registration and kept for the lifetime of the hub
    pub registered: bool,
    pub in_game: Option<ConnectionId>,
    pub manager: Option<ConnectionId>,
}

#[derive(Debug)]
struct Connection {
    sender: UnboundedSender<HubEvent>,
    /// Name this channel logged in as
    agent: Option<String>,
}

/// Registered agents and live channels
#[derive(Debug, Default)]
pub struct AgentRegistry {
    order: Vec<String>,
    records: HashMap<String, AgentRecord>,
    connections: HashMap<ConnectionId, Connection>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_connection(&mut self, id: ConnectionId, sender: UnboundedSender<HubEvent>) {
        self.connections.insert(
            id,
            Connection {
                sender,
                agent: None,
            },
        );
    }

    /// Drop a channel; returns the agent whose in-game session ended, if any
    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<String> {
        let connection = self.connections.remove(&id)?;

        for record in self.records.values_mut() {
            if record.manager == Some(id) {
                record.manager = None;
            }
        }

        let name = connection.agent?;
        let record = self.records.get_mut(&name)?;
        if record.in_game == Some(id) {
            record.in_game = None;
            Some(name)
        } else {
            None
        }
    }

    /// Register names managed by channel `manager`
    pub fn register(&mut self, names: &[String], manager: ConnectionId) {
        for name in names {
            let record = self.records.entry(name.clone()).or_insert_with(|| {
                self.order.push(name.clone());
                AgentRecord {
                    name: name.clone(),
                    registered: true,
                    in_game: None,
                    manager: None,
                }
            });
            record.manager = Some(manager);
        }
        debug!(agents = ?names, %manager, "agents registered");
    }

    /// Bind channel `connection` as the in-game channel of `name`
    pub fn login(&mut self, connection: ConnectionId, name: &str) -> Result<(), HubError> {
        let Some(channel) = self.connections.get_mut(&connection) else {
            return Err(HubError::ChannelClosed(name.to_string()));
        };

        if let Some(current) = channel.agent.as_deref().filter(|current| *current != name) {
            return Err(HubError::AlreadyLoggedIn {
                requested: name.to_string(),
                current: current.to_string(),
            });
        }

        let record = self
            .records
            .get_mut(name)
            .filter(|record| record.registered)
            .ok_or_else(|| HubError::NotRegistered(name.to_string()))?;

        if let Some(previous) = record.in_game.filter(|previous| *previous != connection) {
            warn!(agent = %name, %previous, "replacing in-game channel");
        }
        record.in_game = Some(connection);
        channel.agent = Some(name.to_string());
        Ok(())
    }

    /// End the in-game session of `name`; `false` when none was active
    pub fn logout(&mut self, name: &str) -> bool {
        match self.records.get_mut(name) {
            Some(record) if record.in_game.is_some() => {
                record.in_game = None;
                true
            }
            _ => false,
        }
    }

    /// Name the channel logged in as
    pub fn logged_in_as(&self, connection: ConnectionId) -> Option<&str> {
        self.connections
            .get(&connection)
            .and_then(|channel| channel.agent.as_deref())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.records.get(name).is_some_and(|record| record.registered)
    }

    pub fn is_in_game(&self, name: &str) -> bool {
        self.records
            .get(name)
            .is_some_and(|record| record.in_game.is_some())
    }

    pub fn manager_of(&self, name: &str) -> Option<ConnectionId> {
        self.records.get(name).and_then(|record| record.manager)
    }

    /// Sender of the in-game channel for `name`
    pub fn in_game_sender(&self, name: &str) -> Option<UnboundedSender<HubEvent>> {
        let id = self.records.get(name)?.in_game?;
        self.sender(id)
    }

    /// Sender of the manager channel for `name`
    pub fn manager_sender(&self, name: &str) -> Option<UnboundedSender<HubEvent>> {
        self.sender(self.manager_of(name)?)
    }

    pub fn sender(&self, connection: ConnectionId) -> Option<UnboundedSender<HubEvent>> {
        self.connections
            .get(&connection)
            .map(|channel| channel.sender.clone())
    }

    /// Distinct manager channels, in registration order
    pub fn managers(&self) -> Vec<ConnectionId> {
        let mut managers = Vec::new();
        for name in &self.order {
            if let Some(manager) = self.manager_of(name) {
                if !managers.contains(&manager) {
                    managers.push(manager);
                }
            }
        }
        managers
    }

    /// Names with an in-game session, in registration order
    pub fn in_game_agents(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| self.is_in_game(name))
            .cloned()
            .collect()
    }

    /// Registered agents in registration order
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.order
            .iter()
            .map(|name| RosterEntry {
                name: name.clone(),
                in_game: self.is_in_game(name),
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<AgentStatus> {
        self.order
            .iter()
            .map(|name| AgentStatus {
                name: name.clone(),
                in_game: self.is_in_game(name),
                connected: self.manager_of(name).is_some(),
            })
            .collect()
    }

    /// Send to one channel; `false` if it is gone
    pub fn send(&self, connection: ConnectionId, event: HubEvent) -> bool {
        self.connections
            .get(&connection)
            .is_some_and(|channel| channel.sender.send(event).is_ok())
    }

    /// Send to every channel
    pub fn broadcast(&self, event: &HubEvent) {
        for (id, channel) in &self.connections {
            if channel.sender.send(event.clone()).is_err() {
                debug!(connection = %id, event = event.name(), "broadcast to closed channel");
            }
        }
    }
}
