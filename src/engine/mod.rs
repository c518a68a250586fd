//! Per-agent message engine
//!
//! [`MessageEngine::handle_message`] turns one inbound message into zero or
//! more replies and commands:
//!
//! - a command typed by a user runs immediately, without generation;
//! - otherwise the engine alternates generation and command execution until
//!   the model answers in plain text, produces nothing, gets interrupted or
//!   exhausts the iteration bound.
//!
//! Every outgoing text goes through the [`ResponseRouter`].

pub mod collaborators;
pub mod router;
pub mod ticker;

pub use collaborators::{
    BehaviorMonitor, ChatSurface, ConversationState, Generator, NoSelfGeneration, QuietBehavior,
    SelfGeneration, SelfPromptSnapshot,
};
pub use router::{Delivery, ResponseRouter, ResponseSink, normalize_outgoing};
pub use ticker::{AgentUpdate, Update, run_update_loop};

use crate::commands::{CommandGate, CommandMatch, NEW_ACTION_COMMAND, find_command, truncate_at_command};
use crate::config::AgentSettings;
use crate::history::{History, HistorySnapshot, SessionMemo};
use crate::value_objects::{
    API_SOURCE, ApiReplyKind, Message, PeerMessage, ResponseBound, SYSTEM_SOURCE, SourceKind,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sent to the last peer after a restart so the conversation picks up again
pub const RESTART_NOTICE: &str =
    "You restarted, and this message was generated automatically. Continue the conversation with me.";

/// Everything an engine needs besides its name and settings
pub struct EngineParts {
    pub history: Box<dyn History>,
    pub generator: Arc<dyn Generator>,
    pub commands: CommandGate,
    pub conversations: Arc<dyn ConversationState>,
    pub self_generation: Arc<dyn SelfGeneration>,
    pub behavior: Arc<dyn BehaviorMonitor>,
    pub surface: Arc<dyn ChatSurface>,
}

/// Outcome of one generation round
enum Step {
    Continue,
    Stop,
}

/// Converts inbound messages into replies and commands for one agent
pub struct MessageEngine {
    name: String,
    settings: AgentSettings,
    history: Box<dyn History>,
    generator: Arc<dyn Generator>,
    commands: CommandGate,
    conversations: Arc<dyn ConversationState>,
    self_generation: Arc<dyn SelfGeneration>,
    behavior: Arc<dyn BehaviorMonitor>,
    surface: Arc<dyn ChatSurface>,
    router: ResponseRouter,
}

impl MessageEngine {
    pub fn new(name: impl Into<String>, settings: AgentSettings, parts: EngineParts) -> Self {
        let name = name.into();
        let router = ResponseRouter::new(
            name.clone(),
            settings.only_chat_with.clone(),
            parts.conversations.clone(),
            parts.surface.clone(),
        );
        let commands = parts
            .commands
            .with_blocked(settings.blocked_actions.iter().cloned());

        Self {
            name,
            settings,
            history: parts.history,
            generator: parts.generator,
            commands,
            conversations: parts.conversations,
            self_generation: parts.self_generation,
            behavior: parts.behavior,
            surface: parts.surface,
            router,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn history(&self) -> &dyn History {
        self.history.as_ref()
    }

    pub fn conversations(&self) -> &dyn ConversationState {
        self.conversations.as_ref()
    }

    pub fn router(&self) -> &ResponseRouter {
        &self.router
    }

    pub fn last_sender(&self) -> Option<&str> {
        self.router.last_sender()
    }

    pub fn is_muted(&self) -> bool {
        self.router.is_muted()
    }

    /// Periodic work for [`run_update_loop`]
    pub fn update_unit(&self) -> AgentUpdate {
        AgentUpdate::new(self.behavior.clone(), self.self_generation.clone())
    }

    /// Classify who sent a message
    pub fn classify(&self, source: &str) -> SourceKind {
        if source == SYSTEM_SOURCE {
            SourceKind::SelfPrompt
        } else if self.conversations.is_peer_agent(source) {
            SourceKind::PeerAgent
        } else {
            SourceKind::User
        }
    }

    /// Handle one inbound message; returns whether any command was executed
    pub async fn handle_message(
        &mut self,
        source: &str,
        text: &str,
        max_responses: Option<ResponseBound>,
    ) -> bool {
        self.process(source, text, max_responses, None).await
    }

    /// Handle a command relayed from the hub's HTTP surface, collecting
    /// everything the agent says or records as system output into `sink`
    pub async fn handle_api_command(&mut self, command: &str, sink: &mut ResponseSink) -> bool {
        if command.trim().is_empty() {
            sink.push(ApiReplyKind::Error, "Command is required");
            return false;
        }
        self.process(API_SOURCE, command, Some(ResponseBound::Unbounded), Some(sink))
            .await
    }

    /// Say something directly in chat, bypassing generation
    pub async fn open_chat(&self, text: &str) -> Delivery {
        self.router.open_chat(text, None).await
    }

    /// Stop talking: mute output, stop self-prompting, end conversations
    pub fn shut_up(&mut self) {
        self.router.set_muted(true);
        if self.self_generation.is_active() {
            self.self_generation.stop();
        }
        self.conversations.end_all();
        info!(agent = %self.name, "muted");
    }

    /// Pick up where a previous run left off
    pub async fn resume(&mut self, saved: Option<HistorySnapshot>, init_message: Option<&str>) {
        let memo = saved.map(|snapshot| snapshot.memo).unwrap_or_default();

        if let Some(prompt) = memo.self_prompt.clone() {
            if let Some(init) = init_message {
                self.history.append(SYSTEM_SOURCE, init).await;
            }
            self.self_generation
                .restore(SelfPromptSnapshot {
                    prompt: Some(prompt),
                    state: memo.self_prompting_state,
                })
                .await;
        }

        if let Some(last_sender) = memo.last_sender {
            self.router.set_last_sender(Some(last_sender.clone()));
            if self.conversations.is_peer_in_game(&last_sender) {
                self.conversations
                    .receive_from(&last_sender, PeerMessage::opening(RESTART_NOTICE))
                    .await;
            }
        } else if let Some(init) = init_message {
            self.handle_message(SYSTEM_SOURCE, init, Some(ResponseBound::Limited(2)))
                .await;
        } else {
            info!(agent = %self.name, "agent started");
        }
    }

    /// Record why the agent is going down, say goodbye and persist; returns `code`
    pub async fn clean_kill(&mut self, reason: &str, code: i32) -> i32 {
        self.history.append(SYSTEM_SOURCE, reason).await;
        let farewell = if code > 1 { "Restarting." } else { "Exiting." };
        self.surface.broadcast(farewell).await;
        self.persist().await;
        warn!(agent = %self.name, %reason, code, "agent terminating");
        code
    }

    async fn process(
        &mut self,
        source: &str,
        text: &str,
        max_responses: Option<ResponseBound>,
        mut sink: Option<&mut ResponseSink>,
    ) -> bool {
        let Some(message) = Message::new(source, text) else {
            warn!(agent = %self.name, %source, "received empty message");
            return false;
        };
        let (source, text) = (message.source.as_str(), message.text.as_str());

        let mut bound = max_responses.unwrap_or_else(|| self.settings.response_bound());
        let kind = self.classify(source);
        let self_prompt = kind == SourceKind::SelfPrompt;

        if kind == SourceKind::User {
            if let Some(handled) = self.forced_command(source, text, sink.as_deref_mut()).await {
                return handled;
            }
        }

        if kind == SourceKind::PeerAgent {
            self.router.set_last_sender(Some(source.to_string()));
        }

        info!(agent = %self.name, %source, message = %text, "received message");

        self.record_behavior_log(sink.as_deref_mut()).await;
        self.history.append(source, text).await;
        self.persist().await;

        if !self_prompt && self.self_generation.is_active() {
            // Answer this message only, then let self-prompting resume
            bound = ResponseBound::Limited(1);
        }

        let mut used_command = false;
        let mut iteration = 0;
        while bound.allows(iteration) {
            iteration += 1;
            let step = self
                .generation_round(source, self_prompt, &mut used_command, sink.as_deref_mut())
                .await;
            self.persist().await;
            if let Step::Stop = step {
                break;
            }
        }
        used_command
    }

    /// Run a command typed by a user; `None` when the text holds no command
    async fn forced_command(
        &mut self,
        source: &str,
        text: &str,
        mut sink: Option<&mut ResponseSink>,
    ) -> Option<bool> {
        let spec = match self.commands.detect(text) {
            CommandMatch::None => return None,
            CommandMatch::Unknown(name) => {
                warn!(agent = %self.name, %source, command = %name, "user command does not exist");
                let message = format!("Command '{name}' does not exist.");
                self.router.route(source, &message, sink).await;
                return Some(false);
            }
            CommandMatch::Known(spec) => spec,
        };

        let ack = format!("*{source} used {}*", spec.name.trim_start_matches('!'));
        self.router.route(source, &ack, sink.as_deref_mut()).await;
        if spec.name == NEW_ACTION_COMMAND {
            // The request text is the context the new action is built from
            self.history.append(source, text).await;
        }
        if let Some(output) = self.commands.execute(&self.name, text).await {
            self.router.route(source, &output, sink).await;
        }
        Some(true)
    }

    async fn generation_round(
        &mut self,
        source: &str,
        self_prompt: bool,
        used_command: &mut bool,
        mut sink: Option<&mut ResponseSink>,
    ) -> Step {
        if self.interrupted(source, self_prompt) {
            return Step::Stop;
        }

        let response = match self.generator.complete(self.history.ordered()).await {
            Ok(text) => text,
            Err(err) => {
                warn!(agent = %self.name, error = %err, "generation failed");
                String::new()
            }
        };
        debug!(agent = %self.name, %source, %response, "full response");

        if response.trim().is_empty() {
            warn!(agent = %self.name, "no response");
            return Step::Stop;
        }

        let spec = match self.commands.detect(&response) {
            CommandMatch::None => {
                self.history.append(&self.name, &response).await;
                self.router.route(source, &response, sink).await;
                return Step::Stop;
            }
            CommandMatch::Unknown(name) => {
                let truncated = truncate_at_command(&response);
                self.history.append(&self.name, truncated).await;
                warn!(agent = %self.name, command = %name, "agent hallucinated command");
                let note = format!("Command {name} does not exist.");
                self.record_system(&note, sink).await;
                return Step::Continue;
            }
            CommandMatch::Known(spec) => spec,
        };

        let response = truncate_at_command(&response).to_string();
        self.history.append(&self.name, &response).await;

        if self.interrupted(source, self_prompt) {
            return Step::Stop;
        }
        self.self_generation
            .notify_command_used(self_prompt, spec.is_action);

        let ack = if self.settings.verbose_commands {
            response.clone()
        } else {
            let start = find_command(&response).map_or(0, |token| token.start);
            let pre_message = response[..start].trim();
            let used = format!("*used {}*", spec.name.trim_start_matches('!'));
            if pre_message.is_empty() {
                used
            } else {
                format!("{pre_message}  {used}")
            }
        };
        self.router.route(source, &ack, sink.as_deref_mut()).await;

        let output = self.commands.execute(&self.name, &response).await;
        info!(agent = %self.name, command = %spec.name, ?output, "agent executed command");
        *used_command = true;

        match output {
            Some(output) => {
                self.record_system(&output, sink).await;
                Step::Continue
            }
            None => Step::Stop,
        }
    }

    fn interrupted(&self, source: &str, self_prompt: bool) -> bool {
        self.self_generation.should_interrupt(self_prompt)
            || self.router.is_muted()
            || self.conversations.reply_scheduled(source)
    }

    async fn record_behavior_log(&mut self, sink: Option<&mut ResponseSink>) {
        let log = self.behavior.flush_behavior_log();
        let log = log.trim();
        if log.is_empty() {
            return;
        }
        let log = keep_tail(log, self.settings.behavior_log_limit);
        let entry = format!("Recent behaviors log: \n{log}");
        self.record_system(&entry, sink).await;
    }

    async fn record_system(&mut self, text: &str, sink: Option<&mut ResponseSink>) {
        if let Some(sink) = sink {
            sink.push(ApiReplyKind::System, text);
        }
        self.history.append(SYSTEM_SOURCE, text).await;
    }

    async fn persist(&mut self) {
        let snapshot = self.self_generation.snapshot();
        let memo = SessionMemo {
            self_prompt: snapshot.prompt,
            self_prompting_state: snapshot.state,
            last_sender: self.router.last_sender().map(str::to_string),
        };
        if let Err(err) = self.history.persist(&memo).await {
            warn!(agent = %self.name, error = %err, "failed to save history");
        }
    }
}

impl std::fmt::Debug for MessageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageEngine")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("commands", &self.commands)
            .field("router", &self.router)
            .finish()
    }
}

/// Keep the last `limit` characters, marking the cut with `...`
fn keep_tail(text: &str, limit: usize) -> String {
    let count = text.chars().count();
    if count <= limit {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - limit).collect();
    format!("...{tail}")
}
