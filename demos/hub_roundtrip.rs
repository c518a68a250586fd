//! Hub Round Trip Example
//!
//! This example demonstrates how to:
//! - Start a coordination hub and register an agent through a manager
//! - Run an agent's message engine behind an `AgentClient`
//! - Send commands and chat through the HTTP surface
//! - Shut the hub down

use async_trait::async_trait;
use cim_mind_hub::engine::{NoSelfGeneration, QuietBehavior, run_update_loop};
use cim_mind_hub::{
    AgentClient, AgentSettings, ChatSurface, CommandExecutor, CommandGate, CommandSpec,
    ConversationEntry, ConversationState, CoordinationHub, EngineParts, Generator, HubApi,
    HubConfig, InMemoryHistory, InfoProvider, KeyStore, LocalLink, ManagerClient, MessageEngine,
    PeerMessage, RosterEntry,
};
use serde_json::{Value, json};
use std::sync::Arc;

/// Checks its stats first, then reports back once the command output is in
struct CannedGenerator;

#[async_trait]
impl Generator for CannedGenerator {
    async fn complete(&self, history: &[ConversationEntry]) -> anyhow::Result<String> {
        let last = history.last().map(|entry| entry.speaker.as_str());
        Ok(match last {
            Some("system") => "All good here.".to_string(),
            _ => "Let me check. !stats".to_string(),
        })
    }
}

struct StatsExecutor;

#[async_trait]
impl CommandExecutor for StatsExecutor {
    async fn execute(&self, _agent: &str, _text: &str) -> anyhow::Result<Option<String>> {
        Ok(Some("Health: 20/20, Hunger: 18/20, Position: (12, 64, -30)".to_string()))
    }
}

struct PrintedChat;

#[async_trait]
impl ChatSurface for PrintedChat {
    async fn broadcast(&self, text: &str) {
        println!("   [chat] andy: {text}");
    }

    async fn whisper(&self, player: &str, text: &str) {
        println!("   [whisper to {player}] andy: {text}");
    }
}

struct NoPeers;

#[async_trait]
impl ConversationState for NoPeers {
    fn is_peer_agent(&self, _name: &str) -> bool {
        false
    }
    fn has_active_conversation(&self, _name: &str) -> bool {
        false
    }
    fn is_peer_in_game(&self, _name: &str) -> bool {
        false
    }
    fn reply_scheduled(&self, _name: &str) -> bool {
        false
    }
    async fn send_to(&self, _peer: &str, _payload: PeerMessage) {}
    async fn receive_from(&self, _peer: &str, _payload: PeerMessage) {}
    fn update_agents(&self, roster: &[RosterEntry]) {
        println!("   [roster] {roster:?}");
    }
    fn end_all(&self) {}
}

struct DemoInfo;

impl InfoProvider for DemoInfo {
    fn snapshot(&self) -> anyhow::Result<Value> {
        Ok(json!({ "name": "andy", "health": 20, "food": 18 }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("=== Mind Hub Example ===\n");

    let config = HubConfig::default().with_env_overrides()?;
    let hub = CoordinationHub::new(config, KeyStore::load("keys.json"));
    let api = HubApi::new(hub.clone());

    // Step 1: A manager registers the agent it runs
    println!("1. Registering agent...");
    let (manager_link, _manager_events) = LocalLink::connect(&hub).await;
    let manager = ManagerClient::new(vec!["andy".to_string()], Arc::new(manager_link));
    manager.register().await?;

    // Step 2: The agent process logs in and starts serving hub events
    println!("2. Starting agent...");
    let (agent_link, agent_events) = LocalLink::connect(&hub).await;
    let client = AgentClient::new("andy", Arc::new(agent_link), Arc::new(DemoInfo));
    let mut engine = MessageEngine::new(
        "andy",
        AgentSettings::default(),
        EngineParts {
            history: Box::new(InMemoryHistory::new("andy")),
            generator: Arc::new(CannedGenerator),
            commands: CommandGate::new(
                vec![CommandSpec::query("!stats", "Get your bot's location, health and hunger")],
                Arc::new(StatsExecutor),
            ),
            conversations: Arc::new(NoPeers),
            self_generation: Arc::new(NoSelfGeneration),
            behavior: Arc::new(QuietBehavior),
            surface: Arc::new(PrintedChat),
        },
    );
    let ticker = engine.update_unit();
    let interval = AgentSettings::default().update_interval();
    let stop_ticking = hub.shutdown_signal();
    let ticks = tokio::spawn(async move { run_update_loop(&ticker, interval, stop_ticking).await });

    client.login().await?;
    let agent = tokio::spawn(async move { client.run(&mut engine, agent_events).await });

    // Step 3: Talk to the agent through the HTTP surface
    println!("\n3. Listing agents...");
    let agents = api.handle("GET", "/api/agents", None).await;
    println!("   {} {}", agents.status, agents.body);

    println!("\n4. Sending a command...");
    let command = api
        .handle(
            "POST",
            "/api/agent/andy/command",
            Some(r#"{"command":"how are you doing?"}"#),
        )
        .await;
    println!("   {} {:#}", command.status, command.body);

    println!("\n5. Speaking in chat...");
    let chat = api
        .handle("POST", "/api/chat/andy", Some(r#"{"message":"Hello, world!"}"#))
        .await;
    println!("   {} {}", chat.status, chat.body);

    println!("\n6. Fetching info...");
    let info = api.handle("GET", "/api/agent/andy/info", None).await;
    println!("   {} {}", info.status, info.body);

    // Step 4: Restart the agent, then shut the hub down
    println!("\n7. Restarting agent and shutting down...");
    hub.restart("andy").await;
    let code = agent.await?;
    println!("   agent exited with {code:?}");

    let mut shutdown = hub.shutdown_signal();
    manager.shutdown().await?;
    shutdown.wait_for(|stop| *stop).await?;
    println!("   update loop ran {} cycles", ticks.await?);

    println!("\n=== Example completed successfully ===");
    Ok(())
}
