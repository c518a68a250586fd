//! Scripted collaborators shared by the integration suites

#![allow(dead_code)]

use async_trait::async_trait;
use cim_mind_hub::engine::SelfPromptSnapshot;
use cim_mind_hub::history::{HistorySnapshot, SessionMemo};
use cim_mind_hub::{
    AgentSettings, BehaviorMonitor, ChatSurface, CommandExecutor, CommandGate, CommandSpec,
    ConversationEntry, ConversationState, EngineParts, Generator, History, HistoryError,
    InMemoryHistory,
    MessageEngine, PeerMessage, RosterEntry, SelfGeneration, SelfPromptState,
};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Replies from a script, then `fallback` forever
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<String>>,
    fallback: String,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl ScriptedGenerator {
    pub fn new(script: &[&str], fallback: &str) -> Self {
        Self {
            script: Mutex::new(script.iter().map(|s| s.to_string()).collect()),
            fallback: fallback.to_string(),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make every later call fail as if the model endpoint were down
    pub fn go_down(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn complete(&self, _history: &[ConversationEntry]) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("model endpoint unreachable");
        }
        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Records every command and answers `executed <name>`
#[derive(Default)]
pub struct RecordingExecutor {
    pub calls: Mutex<Vec<String>>,
    silent: AtomicBool,
}

impl RecordingExecutor {
    /// Make subsequent commands produce no output
    pub fn go_silent(&self) {
        self.silent.store(true, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    async fn execute(&self, _agent: &str, text: &str) -> anyhow::Result<Option<String>> {
        self.calls.lock().unwrap().push(text.to_string());
        if self.silent.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let name = cim_mind_hub::commands::find_command(text)
            .map(|token| token.name)
            .unwrap_or_default();
        Ok(Some(format!("executed {name}")))
    }
}

/// Public chat recorder; whispers carry the player name
#[derive(Default)]
pub struct RecordingSurface {
    pub said: Mutex<Vec<(Option<String>, String)>>,
}

impl RecordingSurface {
    pub fn texts(&self) -> Vec<String> {
        self.said.lock().unwrap().iter().map(|(_, text)| text.clone()).collect()
    }
}

#[async_trait]
impl ChatSurface for RecordingSurface {
    async fn broadcast(&self, text: &str) {
        self.said.lock().unwrap().push((None, text.to_string()));
    }

    async fn whisper(&self, player: &str, text: &str) {
        self.said
            .lock()
            .unwrap()
            .push((Some(player.to_string()), text.to_string()));
    }
}

/// Conversation manager double
#[derive(Default)]
pub struct Peers {
    pub agents: Mutex<HashSet<String>>,
    pub active: Mutex<HashSet<String>>,
    pub scheduled: Mutex<HashSet<String>>,
    pub sent: Mutex<Vec<(String, PeerMessage)>>,
    pub received: Mutex<Vec<(String, PeerMessage)>>,
    pub roster: Mutex<Vec<RosterEntry>>,
    pub ended: AtomicBool,
}

impl Peers {
    pub fn with_active(names: &[&str]) -> Self {
        let peers = Self::default();
        for name in names {
            peers.agents.lock().unwrap().insert(name.to_string());
            peers.active.lock().unwrap().insert(name.to_string());
        }
        peers
    }
}

#[async_trait]
impl ConversationState for Peers {
    fn is_peer_agent(&self, name: &str) -> bool {
        self.agents.lock().unwrap().contains(name)
    }

    fn has_active_conversation(&self, name: &str) -> bool {
        self.active.lock().unwrap().contains(name)
    }

    fn is_peer_in_game(&self, name: &str) -> bool {
        self.agents.lock().unwrap().contains(name)
    }

    fn reply_scheduled(&self, name: &str) -> bool {
        self.scheduled.lock().unwrap().contains(name)
    }

    async fn send_to(&self, peer: &str, payload: PeerMessage) {
        self.sent.lock().unwrap().push((peer.to_string(), payload));
    }

    async fn receive_from(&self, peer: &str, payload: PeerMessage) {
        self.received.lock().unwrap().push((peer.to_string(), payload));
    }

    fn update_agents(&self, roster: &[RosterEntry]) {
        *self.roster.lock().unwrap() = roster.to_vec();
    }

    fn end_all(&self) {
        self.ended.store(true, Ordering::SeqCst);
        self.active.lock().unwrap().clear();
    }
}

/// Self-prompting double with switchable state
#[derive(Default)]
pub struct ScriptedSelfGeneration {
    pub active: AtomicBool,
    pub interrupt: AtomicBool,
    pub stopped: AtomicBool,
    pub notified: Mutex<Vec<(bool, bool)>>,
    pub restored: Mutex<Option<SelfPromptSnapshot>>,
    pub ticks: AtomicUsize,
}

#[async_trait]
impl SelfGeneration for ScriptedSelfGeneration {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn should_interrupt(&self, _self_prompted: bool) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    fn notify_command_used(&self, self_prompted: bool, is_action: bool) {
        self.notified.lock().unwrap().push((self_prompted, is_action));
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
    }

    fn snapshot(&self) -> SelfPromptSnapshot {
        SelfPromptSnapshot {
            prompt: None,
            state: if self.is_active() {
                SelfPromptState::Active
            } else {
                SelfPromptState::Stopped
            },
        }
    }

    async fn restore(&self, snapshot: SelfPromptSnapshot) {
        *self.restored.lock().unwrap() = Some(snapshot);
    }

    async fn update(&self, _delta: Duration) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }
}

/// Behaviour monitor holding a pending log
#[derive(Default)]
pub struct ScriptedBehavior {
    pub log: Mutex<String>,
}

#[async_trait]
impl BehaviorMonitor for ScriptedBehavior {
    fn flush_behavior_log(&self) -> String {
        std::mem::take(&mut *self.log.lock().unwrap())
    }

    async fn update(&self) {}
}

/// An engine wired to doubles the test can inspect
pub struct Harness {
    pub engine: MessageEngine,
    pub generator: Arc<ScriptedGenerator>,
    pub executor: Arc<RecordingExecutor>,
    pub peers: Arc<Peers>,
    pub surface: Arc<RecordingSurface>,
    pub self_generation: Arc<ScriptedSelfGeneration>,
    pub behavior: Arc<ScriptedBehavior>,
}

pub fn catalog() -> Vec<CommandSpec> {
    vec![
        CommandSpec::action("!goToPlayer", "Go to the given player"),
        CommandSpec::action("!collectBlocks", "Collect the nearest blocks of a given type"),
        CommandSpec::action("!newAction", "Perform new and unknown custom behaviors"),
        CommandSpec::action("!stop", "Force stop all actions"),
        CommandSpec::query("!stats", "Get your bot's location, health and hunger"),
    ]
}

pub fn harness(settings: AgentSettings, script: &[&str], fallback: &str) -> Harness {
    harness_with_peers(settings, script, fallback, Peers::default())
}

pub fn harness_with_peers(
    settings: AgentSettings,
    script: &[&str],
    fallback: &str,
    peers: Peers,
) -> Harness {
    build(settings, script, fallback, peers, Box::new(InMemoryHistory::new("andy")))
}

pub fn harness_with_history(
    settings: AgentSettings,
    script: &[&str],
    fallback: &str,
    history: Box<dyn History>,
) -> Harness {
    build(settings, script, fallback, Peers::default(), history)
}

fn build(
    settings: AgentSettings,
    script: &[&str],
    fallback: &str,
    peers: Peers,
    history: Box<dyn History>,
) -> Harness {
    let generator = Arc::new(ScriptedGenerator::new(script, fallback));
    let executor = Arc::new(RecordingExecutor::default());
    let peers = Arc::new(peers);
    let surface = Arc::new(RecordingSurface::default());
    let self_generation = Arc::new(ScriptedSelfGeneration::default());
    let behavior = Arc::new(ScriptedBehavior::default());

    let engine = MessageEngine::new(
        "andy",
        settings,
        EngineParts {
            history,
            generator: generator.clone(),
            commands: CommandGate::new(catalog(), executor.clone()),
            conversations: peers.clone(),
            self_generation: self_generation.clone(),
            behavior: behavior.clone(),
            surface: surface.clone(),
        },
    );

    Harness {
        engine,
        generator,
        executor,
        peers,
        surface,
        self_generation,
        behavior,
    }
}

/// Keeps turns in memory but every save fails
pub struct UnwritableHistory {
    inner: InMemoryHistory,
}

impl UnwritableHistory {
    pub fn new(agent: &str) -> Self {
        Self {
            inner: InMemoryHistory::new(agent),
        }
    }
}

#[async_trait]
impl History for UnwritableHistory {
    async fn append(&mut self, speaker: &str, text: &str) {
        self.inner.append(speaker, text).await;
    }

    fn ordered(&self) -> &[ConversationEntry] {
        self.inner.ordered()
    }

    async fn persist(&mut self, _memo: &SessionMemo) -> Result<(), HistoryError> {
        Err(HistoryError::Persist {
            agent: "andy".to_string(),
            source: anyhow::anyhow!("disk full"),
        })
    }

    fn load(&self) -> Result<Option<HistorySnapshot>, HistoryError> {
        Ok(None)
    }
}

/// `(speaker, text)` pairs of the engine's history
pub fn transcript(engine: &MessageEngine) -> Vec<(String, String)> {
    engine
        .history()
        .ordered()
        .iter()
        .map(|entry| (entry.speaker.clone(), entry.text.clone()))
        .collect()
}
