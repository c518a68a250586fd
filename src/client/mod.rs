//! Agent-side and manager-side ends of a hub channel
//!
//! An [`AgentClient`] is constructed explicitly per agent process and drives
//! the [`MessageEngine`] from hub events. A [`ManagerClient`] registers the
//! agents a manager process runs and translates lifecycle events into
//! [`ManagerAction`]s for the process supervisor.

use crate::engine::{MessageEngine, ResponseSink};
use crate::error::HubError;
use crate::hub::{AgentEvent, ConnectionId, CoordinationHub, HubEvent, RequestId};
use crate::value_objects::PeerMessage;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

/// Source used for messages injected through the hub without a sender
pub const UNNAMED_USER: &str = "NO USERNAME";

/// Default reason recorded when the hub asks an agent to restart
pub const RESTART_REASON: &str = "Killing agent process...";

/// Outbound half of a channel to the hub
#[async_trait]
pub trait HubTransport: Send + Sync {
    async fn emit(&self, event: AgentEvent) -> Result<(), HubError>;
}

/// In-process channel to a [`CoordinationHub`]
#[derive(Debug, Clone)]
pub struct LocalLink {
    hub: CoordinationHub,
    connection: ConnectionId,
}

impl LocalLink {
    /// Connect to `hub`; the receiver yields everything the hub sends to this channel
    pub async fn connect(hub: &CoordinationHub) -> (Self, UnboundedReceiver<HubEvent>) {
        let (connection, events) = hub.connect().await;
        let link = Self {
            hub: hub.clone(),
            connection,
        };
        (link, events)
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Close the channel
    pub async fn close(&self) {
        self.hub.disconnect(self.connection).await;
    }
}

#[async_trait]
impl HubTransport for LocalLink {
    async fn emit(&self, event: AgentEvent) -> Result<(), HubError> {
        self.hub.handle_event(self.connection, event).await;
        Ok(())
    }
}

/// Reports the agent's current state for `get-info`
pub trait InfoProvider: Send + Sync {
    fn snapshot(&self) -> anyhow::Result<Value>;
}

/// What the agent process should do after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAction {
    Continue,
    /// Terminate with this exit code
    Exit(i32),
}

/// Hub connection of one agent process
pub struct AgentClient {
    name: String,
    transport: Arc<dyn HubTransport>,
    info: Arc<dyn InfoProvider>,
    published_keys: Mutex<HashMap<String, String>>,
    ports: Mutex<Option<(u16, u16)>>,
}

impl AgentClient {
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn HubTransport>,
        info: Arc<dyn InfoProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            info,
            published_keys: Mutex::new(HashMap::new()),
            ports: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Keys last published by the hub
    pub fn published_keys(&self) -> HashMap<String, String> {
        self.published_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Hub and proxy ports last announced by the hub
    pub fn ports(&self) -> Option<(u16, u16)> {
        *self.ports.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn login(&self) -> Result<(), HubError> {
        self.transport
            .emit(AgentEvent::LoginAgent {
                name: self.name.clone(),
            })
            .await
    }

    pub async fn logout(&self) -> Result<(), HubError> {
        self.transport
            .emit(AgentEvent::LogoutAgent {
                name: self.name.clone(),
            })
            .await
    }

    /// Send a private message to another agent through the hub
    pub async fn send_peer_chat(&self, recipient: &str, payload: PeerMessage) -> Result<(), HubError> {
        self.transport
            .emit(AgentEvent::ChatMessage {
                recipient: recipient.to_string(),
                payload,
            })
            .await
    }

    /// Ask the hub to shut everything down
    pub async fn request_shutdown(&self) -> Result<(), HubError> {
        self.transport.emit(AgentEvent::Shutdown).await
    }

    /// Apply one hub event to the engine
    pub async fn handle_event(&self, engine: &mut MessageEngine, event: HubEvent) -> ClientAction {
        match event {
            HubEvent::AgentsUpdate { agents } => {
                engine.conversations().update_agents(&agents);
            }
            HubEvent::KeysUpdate { keys } => {
                *self
                    .published_keys
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = keys;
            }
            HubEvent::PortsUpdate {
                hub_port,
                proxy_port,
            } => {
                *self.ports.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some((hub_port, proxy_port));
            }
            HubEvent::ChatMessage { sender, payload } => {
                engine.conversations().receive_from(&sender, payload).await;
            }
            HubEvent::RestartAgent { .. } => {
                info!(agent = %self.name, "restarting agent");
                let code = engine.clean_kill(RESTART_REASON, 1).await;
                return ClientAction::Exit(code);
            }
            HubEvent::ApiCommand {
                request_id,
                command,
            } => self.serve_api_command(engine, request_id, &command).await,
            HubEvent::GetInfo { request_id } => {
                let info = self.info.snapshot().unwrap_or_else(|err| {
                    error!(agent = %self.name, error = %err, "failed to collect info");
                    json!({ "error": err.to_string() })
                });
                self.emit(AgentEvent::InfoResponse { request_id, info }).await;
            }
            HubEvent::SendChatMessage {
                request_id,
                message,
            } => {
                engine.open_chat(&message).await;
                // Always acknowledged
                self.emit(AgentEvent::ChatMessageSent { request_id }).await;
            }
            HubEvent::SendMessage { message, .. } => {
                // Answered like any user message instead of being logged and dropped
                engine.handle_message(UNNAMED_USER, &message, None).await;
            }
            other => {
                debug!(agent = %self.name, event = other.name(), "event ignored by agent");
            }
        }
        ClientAction::Continue
    }

    /// Drive the engine from hub events; returns the exit code once the agent must stop
    pub async fn run(
        &self,
        engine: &mut MessageEngine,
        mut events: UnboundedReceiver<HubEvent>,
    ) -> Option<i32> {
        while let Some(event) = events.recv().await {
            if let ClientAction::Exit(code) = self.handle_event(engine, event).await {
                return Some(code);
            }
        }
        info!(agent = %self.name, "disconnected from hub");
        None
    }

    async fn serve_api_command(&self, engine: &mut MessageEngine, request_id: RequestId, command: &str) {
        let mut sink = ResponseSink::new();
        engine.handle_api_command(command, &mut sink).await;
        for reply in sink.into_replies() {
            self.emit(AgentEvent::ApiResponse {
                request_id: request_id.clone(),
                reply,
            })
            .await;
        }
        self.emit(AgentEvent::ApiCommandComplete { request_id }).await;
    }

    async fn emit(&self, event: AgentEvent) {
        if let Err(err) = self.transport.emit(event).await {
            warn!(agent = %self.name, error = %err, "failed to reach hub");
        }
    }
}

impl std::fmt::Debug for AgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentClient")
            .field("name", &self.name)
            .field("ports", &self.ports())
            .finish()
    }
}

/// What a manager process should do after an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerAction {
    Continue,
    StopAgent(String),
    StartAgent(String),
    /// Stop every agent and exit
    Shutdown,
}

/// Hub connection of a process that runs agents
pub struct ManagerClient {
    agents: Vec<String>,
    transport: Arc<dyn HubTransport>,
}

impl ManagerClient {
    pub fn new(agents: Vec<String>, transport: Arc<dyn HubTransport>) -> Self {
        Self { agents, transport }
    }

    pub fn agents(&self) -> &[String] {
        &self.agents
    }

    pub async fn register(&self) -> Result<(), HubError> {
        self.transport
            .emit(AgentEvent::RegisterAgents {
                agents: self.agents.clone(),
            })
            .await
    }

    pub async fn restart_agent(&self, name: &str) -> Result<(), HubError> {
        self.transport
            .emit(AgentEvent::RestartAgent {
                name: name.to_string(),
            })
            .await
    }

    pub async fn stop_agent(&self, name: &str) -> Result<(), HubError> {
        self.transport
            .emit(AgentEvent::StopAgent {
                name: name.to_string(),
            })
            .await
    }

    pub async fn start_agent(&self, name: &str) -> Result<(), HubError> {
        self.transport
            .emit(AgentEvent::StartAgent {
                name: name.to_string(),
            })
            .await
    }

    pub async fn stop_all(&self) -> Result<(), HubError> {
        self.transport.emit(AgentEvent::StopAllAgents).await
    }

    pub async fn send_message(&self, name: &str, message: &str) -> Result<(), HubError> {
        self.transport
            .emit(AgentEvent::SendMessage {
                name: name.to_string(),
                message: message.to_string(),
            })
            .await
    }

    pub async fn shutdown(&self) -> Result<(), HubError> {
        self.transport.emit(AgentEvent::Shutdown).await
    }

    /// Translate a hub event into a supervisor action
    pub fn handle_event(&self, event: &HubEvent) -> ManagerAction {
        match event {
            HubEvent::StopAgent { name } => ManagerAction::StopAgent(name.clone()),
            HubEvent::StartAgent { name } => ManagerAction::StartAgent(name.clone()),
            HubEvent::Shutdown => ManagerAction::Shutdown,
            HubEvent::RegisterAgentsSuccess => {
                info!(agents = ?self.agents, "registration confirmed");
                ManagerAction::Continue
            }
            other => {
                debug!(event = other.name(), "event ignored by manager");
                ManagerAction::Continue
            }
        }
    }
}

impl std::fmt::Debug for ManagerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerClient")
            .field("agents", &self.agents)
            .finish()
    }
}
