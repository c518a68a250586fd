//! Coordination hub integration tests
//!
//! Channels are driven the way agent and manager processes drive them: via
//! `handle_event` on the inbound side and the per-connection receiver on the
//! outbound side.

mod support;

use cim_mind_hub::{
    AgentClient, AgentEvent, ApiReply, ApiReplyKind, CoordinationHub, HubConfig, HubError,
    HubEvent, InfoProvider, KeyStore, LocalLink, ManagerClient, PeerMessage,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

fn hub() -> CoordinationHub {
    CoordinationHub::new(HubConfig::default(), KeyStore::new(HashMap::new()))
}

fn drain(rx: &mut UnboundedReceiver<HubEvent>) -> Vec<HubEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Registers `names` from a manager channel and logs the first one in
async fn agent_in_game(hub: &CoordinationHub, names: &[&str]) -> (LocalLink, UnboundedReceiver<HubEvent>) {
    let (manager, _manager_rx) = LocalLink::connect(hub).await;
    let manager = ManagerClient::new(names.iter().map(|n| n.to_string()).collect(), Arc::new(manager));
    manager.register().await.unwrap();

    let (agent, mut rx) = LocalLink::connect(hub).await;
    hub.login(agent.connection(), names[0]).await.unwrap();
    drain(&mut rx);
    (agent, rx)
}

#[tokio::test]
async fn test_register_login_and_list_round_trip() {
    let hub = hub();
    let (manager, mut manager_rx) = hub.connect().await;
    let (agent, _agent_rx) = hub.connect().await;

    hub.handle_event(
        manager,
        AgentEvent::RegisterAgents {
            agents: vec!["andy".to_string(), "jill".to_string()],
        },
    )
    .await;
    hub.handle_event(agent, AgentEvent::LoginAgent { name: "andy".to_string() })
        .await;

    let agents = hub.agents().await;
    assert_eq!(agents.len(), 2);
    assert_eq!(agents[0].name, "andy");
    assert!(agents[0].in_game);
    assert!(agents[0].connected);
    assert!(!agents[1].in_game);

    let events = drain(&mut manager_rx);
    assert!(events.contains(&HubEvent::RegisterAgentsSuccess));
    assert!(matches!(
        events.last(),
        Some(HubEvent::AgentsUpdate { agents }) if agents[0].in_game
    ));
}

#[tokio::test]
async fn test_login_of_unregistered_agent_is_ignored() {
    let hub = hub();
    let (agent, _rx) = hub.connect().await;

    let err = assert_err!(hub.login(agent, "ghost").await);
    assert_eq!(err, HubError::NotRegistered("ghost".to_string()));
    assert!(hub.agents().await.is_empty());
}

#[tokio::test]
async fn test_logout_and_disconnect_clear_in_game() {
    let hub = hub();
    let (andy, _rx) = agent_in_game(&hub, &["andy"]).await;

    assert!(hub.logout("andy").await);
    assert!(!hub.is_in_game("andy").await);
    assert!(!hub.logout("andy").await);

    assert_ok!(hub.login(andy.connection(), "andy").await);
    andy.close().await;
    assert!(!hub.is_in_game("andy").await);
    assert_eq!(hub.agents().await[0].name, "andy");
}

#[tokio::test(start_paused = true)]
async fn test_command_times_out_exactly_and_late_completion_is_harmless() {
    let hub = hub();
    let (andy, mut rx) = agent_in_game(&hub, &["andy"]).await;

    let started = Instant::now();
    let err = assert_err!(hub.dispatch_command("andy", "!stats").await);
    let waited = started.elapsed();

    assert!(matches!(err, HubError::Timeout { timeout_ms: 30_000, .. }));
    assert!(waited >= Duration::from_millis(30_000));
    assert!(waited < Duration::from_millis(30_100));
    assert_eq!(hub.outstanding_requests(), 0);

    let Some(HubEvent::ApiCommand { request_id, .. }) = rx.recv().await else {
        panic!("agent should have received the command");
    };
    hub.handle_event(
        andy.connection(),
        AgentEvent::ApiResponse {
            request_id: request_id.clone(),
            reply: ApiReply::new(ApiReplyKind::Chat, "too late"),
        },
    )
    .await;
    hub.handle_event(andy.connection(), AgentEvent::ApiCommandComplete { request_id })
        .await;
    assert_eq!(hub.outstanding_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_chat_send_deadline_is_five_seconds() {
    let hub = hub();
    let (_andy, _rx) = agent_in_game(&hub, &["andy"]).await;

    let started = Instant::now();
    let err = assert_err!(hub.dispatch_chat_send("andy", "hello").await);

    assert!(matches!(err, HubError::Timeout { timeout_ms: 5_000, .. }));
    assert!(started.elapsed() < Duration::from_millis(5_100));
}

/// Answers every command with a fixed pair of replies
async fn scripted_agent(hub: CoordinationHub, link: LocalLink, mut rx: UnboundedReceiver<HubEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            HubEvent::ApiCommand { request_id, command } => {
                for message in [format!("*api used {}*", &command[1..]), "executed".to_string()] {
                    hub.handle_event(
                        link.connection(),
                        AgentEvent::ApiResponse {
                            request_id: request_id.clone(),
                            reply: ApiReply::new(ApiReplyKind::Chat, message),
                        },
                    )
                    .await;
                }
                hub.handle_event(link.connection(), AgentEvent::ApiCommandComplete { request_id })
                    .await;
            }
            HubEvent::GetInfo { request_id } => {
                hub.handle_event(
                    link.connection(),
                    AgentEvent::InfoResponse {
                        request_id,
                        info: json!({ "name": "andy", "health": 20 }),
                    },
                )
                .await;
            }
            HubEvent::SendChatMessage { request_id, .. } => {
                hub.handle_event(link.connection(), AgentEvent::ChatMessageSent { request_id })
                    .await;
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_identical_dispatches_get_identical_responses() {
    let hub = hub();
    let (andy, rx) = agent_in_game(&hub, &["andy"]).await;
    tokio::spawn(scripted_agent(hub.clone(), andy, rx));

    let (first, second) = tokio::join!(
        hub.dispatch_command("andy", "!stats"),
        hub.dispatch_command("andy", "!stats"),
    );
    let first = first.unwrap();
    let second = second.unwrap();

    assert_ne!(first.id, second.id);
    let messages = |done: &cim_mind_hub::CompletedRequest| {
        done.responses.iter().map(|r| r.message.clone()).collect::<Vec<_>>()
    };
    assert_eq!(messages(&first), messages(&second));
    assert_eq!(messages(&first), vec!["*api used stats*", "executed"]);
    assert_eq!(hub.outstanding_requests(), 0);
}

#[tokio::test]
async fn test_info_and_chat_send_complete_early() {
    let hub = hub();
    let (andy, rx) = agent_in_game(&hub, &["andy"]).await;
    tokio::spawn(scripted_agent(hub.clone(), andy, rx));

    let info = hub.fetch_info("andy").await.unwrap();
    assert_eq!(info["health"], 20);

    let sent = hub.dispatch_chat_send("andy", "hello world").await.unwrap();
    assert!(sent.sent);
}

/// Sends the terminal events of other request kinds before the real one
async fn crossed_agent(hub: CoordinationHub, link: LocalLink, mut rx: UnboundedReceiver<HubEvent>) {
    let connection = link.connection();
    while let Some(event) = rx.recv().await {
        match event {
            HubEvent::ApiCommand { request_id, .. } => {
                let reply = |message: &str| AgentEvent::ApiResponse {
                    request_id: request_id.clone(),
                    reply: ApiReply::new(ApiReplyKind::Chat, message),
                };
                hub.handle_event(connection, reply("first")).await;
                hub.handle_event(
                    connection,
                    AgentEvent::ChatMessageSent { request_id: request_id.clone() },
                )
                .await;
                hub.handle_event(
                    connection,
                    AgentEvent::InfoResponse {
                        request_id: request_id.clone(),
                        info: json!({ "stray": true }),
                    },
                )
                .await;
                hub.handle_event(connection, reply("second")).await;
                hub.handle_event(connection, AgentEvent::ApiCommandComplete { request_id })
                    .await;
            }
            HubEvent::GetInfo { request_id } => {
                hub.handle_event(
                    connection,
                    AgentEvent::ApiCommandComplete { request_id: request_id.clone() },
                )
                .await;
                hub.handle_event(
                    connection,
                    AgentEvent::ChatMessageSent { request_id: request_id.clone() },
                )
                .await;
                hub.handle_event(
                    connection,
                    AgentEvent::InfoResponse { request_id, info: json!({ "health": 20 }) },
                )
                .await;
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_terminal_events_of_another_kind_do_not_finish_a_request() {
    let hub = hub();
    let (andy, rx) = agent_in_game(&hub, &["andy"]).await;
    tokio::spawn(crossed_agent(hub.clone(), andy, rx));

    let done = assert_ok!(hub.dispatch_command("andy", "!stats").await);
    let messages: Vec<_> = done.responses.iter().map(|r| r.message.as_str()).collect();
    assert_eq!(messages, vec!["first", "second"]);
    assert!(!done.sent);
    assert!(done.info.is_none());

    let info = assert_ok!(hub.fetch_info("andy").await);
    assert_eq!(info, json!({ "health": 20 }));
    assert_eq!(hub.outstanding_requests(), 0);
}

#[tokio::test]
async fn test_peer_chat_is_relayed_with_sender_name() {
    let hub = hub();
    let (andy, _andy_rx) = agent_in_game(&hub, &["andy", "jill"]).await;
    let (jill, mut jill_rx) = LocalLink::connect(&hub).await;
    hub.login(jill.connection(), "jill").await.unwrap();
    drain(&mut jill_rx);

    hub.handle_event(
        andy.connection(),
        AgentEvent::ChatMessage {
            recipient: "jill".to_string(),
            payload: PeerMessage::opening("want to trade?"),
        },
    )
    .await;

    assert_eq!(
        jill_rx.recv().await,
        Some(HubEvent::ChatMessage {
            sender: "andy".to_string(),
            payload: PeerMessage::opening("want to trade?"),
        })
    );
}

#[tokio::test]
async fn test_chat_to_agent_not_in_game_is_dropped() {
    let hub = hub();
    let (andy, _rx) = agent_in_game(&hub, &["andy", "jill"]).await;

    let err = hub
        .relay_chat(andy.connection(), "jill", PeerMessage::new("hello?"))
        .await
        .unwrap_err();
    assert_eq!(err, HubError::AgentNotFound("jill".to_string()));
}

#[tokio::test]
async fn test_lifecycle_events_reach_manager() {
    let hub = hub();
    let (manager_link, mut manager_rx) = LocalLink::connect(&hub).await;
    let manager = ManagerClient::new(vec!["andy".to_string()], Arc::new(manager_link));
    manager.register().await.unwrap();
    drain(&mut manager_rx);

    manager.stop_agent("andy").await.unwrap();
    manager.start_agent("andy").await.unwrap();

    let actions: Vec<_> = drain(&mut manager_rx)
        .iter()
        .map(|event| manager.handle_event(event))
        .collect();
    assert_eq!(
        actions,
        vec![
            cim_mind_hub::ManagerAction::StopAgent("andy".to_string()),
            cim_mind_hub::ManagerAction::StartAgent("andy".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_forwards_then_signals_after_grace() {
    let hub = hub();
    let (manager, mut manager_rx) = hub.connect().await;
    hub.register_agents(manager, &["andy".to_string()]).await;
    drain(&mut manager_rx);
    let mut signal = hub.shutdown_signal();

    let started = Instant::now();
    hub.handle_event(manager, AgentEvent::Shutdown).await;
    assert_eq!(manager_rx.recv().await, Some(HubEvent::Shutdown));
    assert!(!*signal.borrow());

    signal.wait_for(|stop| *stop).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(2_000));
}

#[tokio::test]
async fn test_greeting_publishes_keys_and_ports() {
    let keys = KeyStore::new(HashMap::from([(
        "OPENAI_API_KEY".to_string(),
        "sk-test".to_string(),
    )]));
    let hub = CoordinationHub::new(HubConfig::default(), keys);
    let (_id, mut rx) = hub.connect().await;

    let events = drain(&mut rx);
    assert!(events.iter().any(|event| matches!(
        event,
        HubEvent::KeysUpdate { keys } if keys.get("OPENAI_API_KEY").map(String::as_str) == Some("sk-test")
    )));
    assert!(events.contains(&HubEvent::PortsUpdate {
        hub_port: 8080,
        proxy_port: 8081,
    }));
}

struct FixedInfo;

impl InfoProvider for FixedInfo {
    fn snapshot(&self) -> anyhow::Result<Value> {
        Ok(json!({ "name": "andy", "health": 18 }))
    }
}

#[tokio::test]
async fn test_agent_client_serves_hub_requests() {
    let hub = hub();
    let (link, rx) = agent_in_game(&hub, &["andy"]).await;
    let client = AgentClient::new("andy", Arc::new(link), Arc::new(FixedInfo));
    let mut h = support::harness(Default::default(), &["Looking good."], "");

    let agent = tokio::spawn(async move {
        let code = client.run(&mut h.engine, rx).await;
        (code, h)
    });

    let done = hub.dispatch_command("andy", "!stats").await.unwrap();
    let messages: Vec<&str> = done.responses.iter().map(|r| r.message.as_str()).collect();
    assert_eq!(messages, vec!["*api used stats*", "executed !stats"]);

    let done = hub.dispatch_command("andy", "how do you feel?").await.unwrap();
    assert_eq!(done.responses.last().unwrap().message, "Looking good.");

    let info = hub.fetch_info("andy").await.unwrap();
    assert_eq!(info["health"], 18);

    hub.dispatch_chat_send("andy", "hello everyone").await.unwrap();

    hub.restart("andy").await;
    let (code, h) = agent.await.unwrap();
    assert_eq!(code, Some(1));
    assert_eq!(
        h.surface.texts(),
        vec!["hello everyone".to_string(), "Exiting.".to_string()]
    );
}

#[tokio::test]
async fn test_relayed_message_is_answered_as_a_user_message() {
    let hub = hub();
    let (link, rx) = agent_in_game(&hub, &["andy"]).await;
    let client = AgentClient::new("andy", Arc::new(link), Arc::new(FixedInfo));
    let mut h = support::harness(Default::default(), &["Right here."], "");

    let agent = tokio::spawn(async move {
        client.run(&mut h.engine, rx).await;
        h
    });

    assert_ok!(hub.send_message("andy", "are you there?").await);
    hub.restart("andy").await;
    let h = agent.await.unwrap();

    let transcript = support::transcript(&h.engine);
    assert_eq!(
        transcript[..2],
        [
            ("NO USERNAME".to_string(), "are you there?".to_string()),
            ("andy".to_string(), "Right here.".to_string()),
        ]
    );
    assert_eq!(h.surface.texts(), vec!["Right here.".to_string(), "Exiting.".to_string()]);
}
