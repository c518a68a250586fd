//! Coordination hub
//!
//! The hub multiplexes many agent and manager processes over persistent
//! channels. Each connected channel receives [`HubEvent`]s through an
//! unbounded queue and feeds [`AgentEvent`]s back through
//! [`CoordinationHub::handle_event`]. Requests that need a reply from an agent
//! (commands, direct chat, info snapshots) are correlated by id through the
//! [`RequestCorrelator`]; waiting for one never holds the registry lock.

pub mod correlator;
pub mod events;
pub mod registry;

pub use correlator::{CompletedRequest, PendingHandle, RequestCorrelator, RequestId, RequestKind};
pub use events::{AgentEvent, HubEvent};
pub use registry::{AgentRecord, AgentRegistry, ConnectionId};

use crate::config::HubConfig;
use crate::error::HubError;
use crate::keys::KeyStore;
use crate::value_objects::{AgentStatus, PeerMessage, RosterEntry};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, info, warn};

struct HubInner {
    config: HubConfig,
    keys: KeyStore,
    registry: RwLock<AgentRegistry>,
    correlator: Arc<RequestCorrelator>,
    shutdown: watch::Sender<bool>,
}

/// Handle to the hub; clones share the same state
#[derive(Clone)]
pub struct CoordinationHub {
    inner: Arc<HubInner>,
}

impl CoordinationHub {
    pub fn new(config: HubConfig, keys: KeyStore) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(HubInner {
                config,
                keys,
                registry: RwLock::new(AgentRegistry::new()),
                correlator: Arc::new(RequestCorrelator::new()),
                shutdown,
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Accept a new channel and greet it with the roster, keys and ports
    pub async fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<HubEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = ConnectionId::new();
        let config = &self.inner.config;

        let mut registry = self.inner.registry.write().await;
        registry.add_connection(id, sender);
        registry.send(
            id,
            HubEvent::AgentsUpdate {
                agents: registry.roster(),
            },
        );
        registry.send(
            id,
            HubEvent::KeysUpdate {
                keys: self.inner.keys.published(&config.published_keys),
            },
        );
        registry.send(
            id,
            HubEvent::PortsUpdate {
                hub_port: config.port,
                proxy_port: config.proxy_port,
            },
        );
        debug!(connection = %id, "channel connected");

        (id, receiver)
    }

    /// Forget a channel that went away
    pub async fn disconnect(&self, connection: ConnectionId) {
        let mut registry = self.inner.registry.write().await;
        if let Some(name) = registry.remove_connection(connection) {
            info!(agent = %name, "agent disconnected");
            registry.broadcast(&HubEvent::AgentsUpdate {
                agents: registry.roster(),
            });
        }
        debug!(connection = %connection, "channel closed");
    }

    /// Apply one event received from `connection`
    pub async fn handle_event(&self, connection: ConnectionId, event: AgentEvent) {
        let correlator = &self.inner.correlator;
        match event {
            AgentEvent::RegisterAgents { agents } => self.register_agents(connection, &agents).await,
            AgentEvent::LoginAgent { name } => {
                if let Err(err) = self.login(connection, &name).await {
                    warn!(agent = %name, error = %err, "login rejected");
                }
            }
            AgentEvent::LogoutAgent { name } => {
                self.logout(&name).await;
            }
            AgentEvent::ChatMessage { recipient, payload } => {
                if let Err(err) = self.relay_chat(connection, &recipient, payload).await {
                    warn!(error = %err, "chat relay dropped");
                }
            }
            AgentEvent::RestartAgent { name } => self.restart(&name).await,
            AgentEvent::StopAgent { name } => self.stop(&name).await,
            AgentEvent::StartAgent { name } => self.start(&name).await,
            AgentEvent::StopAllAgents => {
                self.broadcast_stop_all().await;
            }
            AgentEvent::Shutdown => self.shutdown().await,
            AgentEvent::ApiResponse { request_id, reply } => {
                correlator.push_response(&request_id, reply);
            }
            AgentEvent::ApiCommandComplete { request_id } => {
                correlator.complete(&request_id);
            }
            AgentEvent::InfoResponse { request_id, info } => {
                correlator.deliver_info(&request_id, info);
            }
            AgentEvent::ChatMessageSent { request_id } => {
                correlator.mark_sent(&request_id);
            }
            AgentEvent::SendMessage { name, message } => {
                if let Err(err) = self.send_message(&name, &message).await {
                    warn!(error = %err, "message not delivered");
                }
            }
        }
    }

    /// Register agents run by the manager on `connection`
    pub async fn register_agents(&self, connection: ConnectionId, names: &[String]) {
        let mut registry = self.inner.registry.write().await;
        registry.register(names, connection);
        registry.send(connection, HubEvent::RegisterAgentsSuccess);
        registry.broadcast(&HubEvent::AgentsUpdate {
            agents: registry.roster(),
        });
        info!(agents = ?names, "agents registered");
    }

    pub async fn login(&self, connection: ConnectionId, name: &str) -> Result<(), HubError> {
        let mut registry = self.inner.registry.write().await;
        registry.login(connection, name)?;
        registry.broadcast(&HubEvent::AgentsUpdate {
            agents: registry.roster(),
        });
        info!(agent = %name, "agent logged in");
        Ok(())
    }

    /// End the in-game session of `name`; `false` when there was none
    pub async fn logout(&self, name: &str) -> bool {
        let mut registry = self.inner.registry.write().await;
        if !registry.logout(name) {
            return false;
        }
        registry.broadcast(&HubEvent::AgentsUpdate {
            agents: registry.roster(),
        });
        info!(agent = %name, "agent logged out");
        true
    }

    /// Forward a private message from the agent on `connection` to `recipient`
    pub async fn relay_chat(
        &self,
        connection: ConnectionId,
        recipient: &str,
        payload: PeerMessage,
    ) -> Result<(), HubError> {
        let registry = self.inner.registry.read().await;
        let Some(sender) = registry.logged_in_as(connection).map(str::to_string) else {
            warn!(%recipient, "chat from a channel that is not logged in");
            return Err(HubError::NotRegistered(connection.to_string()));
        };
        let target = registry
            .in_game_sender(recipient)
            .ok_or_else(|| HubError::AgentNotFound(recipient.to_string()))?;

        target
            .send(HubEvent::ChatMessage { sender, payload })
            .map_err(|_| HubError::ChannelClosed(recipient.to_string()))
    }

    /// Relay an API command and wait for the agent to finish it
    pub async fn dispatch_command(
        &self,
        name: &str,
        command: &str,
    ) -> Result<CompletedRequest, HubError> {
        let handle = self
            .relay(name, RequestKind::Command, |request_id| HubEvent::ApiCommand {
                request_id,
                command: command.to_string(),
            })
            .await?;
        handle.wait(self.inner.config.command_timeout()).await
    }

    /// Ask the agent to say `message` in chat and wait for the acknowledgement
    pub async fn dispatch_chat_send(
        &self,
        name: &str,
        message: &str,
    ) -> Result<CompletedRequest, HubError> {
        let handle = self
            .relay(name, RequestKind::ChatSend, |request_id| HubEvent::SendChatMessage {
                request_id,
                message: message.to_string(),
            })
            .await?;
        handle.wait(self.inner.config.chat_timeout()).await
    }

    /// Fetch the agent's info snapshot
    pub async fn fetch_info(&self, name: &str) -> Result<Value, HubError> {
        let handle = self
            .relay(name, RequestKind::Info, |request_id| HubEvent::GetInfo { request_id })
            .await?;
        let done = handle.wait(self.inner.config.info_timeout()).await?;
        Ok(done.info.unwrap_or(Value::Null))
    }

    /// Ask the manager of every in-game agent to stop it; returns how many were asked
    pub async fn broadcast_stop_all(&self) -> usize {
        let registry = self.inner.registry.read().await;
        let mut stopped = 0;
        for name in registry.in_game_agents() {
            match registry.manager_sender(&name) {
                Some(manager) => {
                    if manager.send(HubEvent::StopAgent { name: name.clone() }).is_ok() {
                        stopped += 1;
                    }
                }
                None => warn!(agent = %name, "no manager to stop agent"),
            }
        }
        info!(stopped, "stopping all agents");
        stopped
    }

    pub async fn restart(&self, name: &str) {
        let registry = self.inner.registry.read().await;
        match registry.in_game_sender(name) {
            Some(agent) => {
                let _ = agent.send(HubEvent::RestartAgent {
                    name: name.to_string(),
                });
            }
            None => warn!(agent = %name, "restart requested for agent not in game"),
        }
    }

    pub async fn stop(&self, name: &str) {
        self.to_manager(name, HubEvent::StopAgent {
            name: name.to_string(),
        })
        .await;
    }

    pub async fn start(&self, name: &str) {
        self.to_manager(name, HubEvent::StartAgent {
            name: name.to_string(),
        })
        .await;
    }

    /// Inject `message` into an in-game agent
    pub async fn send_message(&self, name: &str, message: &str) -> Result<(), HubError> {
        let registry = self.inner.registry.read().await;
        let agent = registry
            .in_game_sender(name)
            .ok_or_else(|| HubError::AgentNotFound(name.to_string()))?;
        agent
            .send(HubEvent::SendMessage {
                name: name.to_string(),
                message: message.to_string(),
            })
            .map_err(|_| HubError::ChannelClosed(name.to_string()))
    }

    /// Forward shutdown to every manager, then signal termination after the grace delay
    pub async fn shutdown(&self) {
        {
            let registry = self.inner.registry.read().await;
            for manager in registry.managers() {
                registry.send(manager, HubEvent::Shutdown);
            }
        }
        info!("shutting down");

        let grace = self.inner.config.shutdown_grace();
        let signal = self.inner.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            signal.send_replace(true);
        });
    }

    /// Turns true once the hub should terminate
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    /// Registered agents with their in-game flag
    pub async fn roster(&self) -> Vec<RosterEntry> {
        self.inner.registry.read().await.roster()
    }

    /// Registered agents with in-game and manager flags
    pub async fn agents(&self) -> Vec<AgentStatus> {
        self.inner.registry.read().await.statuses()
    }

    pub async fn is_in_game(&self, name: &str) -> bool {
        self.inner.registry.read().await.is_in_game(name)
    }

    pub async fn manager_of(&self, name: &str) -> Option<ConnectionId> {
        self.inner.registry.read().await.manager_of(name)
    }

    pub fn outstanding_requests(&self) -> usize {
        self.inner.correlator.outstanding()
    }

    /// Open a pending request and send its event to the agent's in-game channel
    async fn relay(
        &self,
        name: &str,
        kind: RequestKind,
        event: impl FnOnce(RequestId) -> HubEvent,
    ) -> Result<PendingHandle, HubError> {
        let agent = self
            .inner
            .registry
            .read()
            .await
            .in_game_sender(name)
            .ok_or_else(|| HubError::AgentNotFound(name.to_string()))?;

        let handle = self.inner.correlator.open(kind);
        agent
            .send(event(handle.id().clone()))
            .map_err(|_| HubError::ChannelClosed(name.to_string()))?;
        debug!(agent = %name, request_id = %handle.id(), ?kind, "request relayed");
        Ok(handle)
    }

    async fn to_manager(&self, name: &str, event: HubEvent) {
        let registry = self.inner.registry.read().await;
        match registry.manager_sender(name) {
            Some(manager) => {
                let _ = manager.send(event);
            }
            None => warn!(agent = %name, event = event.name(), "no manager for agent"),
        }
    }
}

impl std::fmt::Debug for CoordinationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinationHub")
            .field("config", &self.inner.config)
            .field("correlator", &self.inner.correlator)
            .finish()
    }
}
