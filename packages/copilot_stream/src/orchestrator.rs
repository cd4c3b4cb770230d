//! The conversation state machine.
//!
//! [`Conversation`] applies canonical events and user actions to a
//! [`ChatState`] published through a `watch` channel. It is synchronous: it
//! never awaits, and the socket work it triggers reports back later as
//! [`ConnectionSignal`]s. [`ConversationActor`](crate::actor) is the task that
//! feeds it in order.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::assembler::StreamAssembler;
use crate::connection::{ConnectionManager, ConnectionSignal, Connector};
use crate::error::SendRejection;
use crate::message::{Banner, Feedback, Message, MessageId, MessageKind, Role};
use crate::protocol::{ClientMessage, HistoryEntry, ServerEvent};
use crate::settings::ChatSettings;

const GUARDRAIL_BANNER_TEXT: &str =
    "Off-topic query blocked. I only search internal sales knowledge.";
const STALL_BANNER_TEXT: &str = "The server stopped responding. Please try again.";

/// Side effects owned by the embedding application.
pub trait ConversationHooks: Send + Sync + 'static {
    /// The server-side conversation list may have changed.
    fn refresh_conversations(&self) {}

    fn submit_feedback(&self, _message_id: MessageId, _feedback: Feedback) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl ConversationHooks for NoHooks {}

/// Observable snapshot of a conversation.
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    pub messages: Vec<Message>,
    /// Set between an accepted send and the first sign of a reply.
    pub typing: bool,
    pub banner: Option<Banner>,
    pub active_conversation: Option<String>,
    /// Bumped every time the transcript is replaced rather than appended to.
    pub epoch: u64,
}

impl ChatState {
    pub fn is_streaming(&self) -> bool {
        self.messages.iter().any(|m| m.streaming)
    }

    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.streaming)
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }
}

pub struct Conversation {
    connection: ConnectionManager,
    assembler: StreamAssembler,
    state: watch::Sender<ChatState>,
    hooks: Arc<dyn ConversationHooks>,
    settings: ChatSettings,
}

impl Conversation {
    /// Build a conversation in its welcome state. Nothing is connected yet.
    pub fn new(
        settings: ChatSettings,
        connector: Arc<dyn Connector>,
        hooks: Arc<dyn ConversationHooks>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionSignal>) {
        let (connection, signals) = ConnectionManager::new(settings.endpoint.clone(), connector);
        let (state, _) = watch::channel(ChatState {
            messages: welcome(&settings),
            ..ChatState::default()
        });
        let conversation = Self {
            connection,
            assembler: StreamAssembler::new(),
            state,
            hooks,
            settings,
        };
        (conversation, signals)
    }

    pub fn state(&self) -> watch::Ref<'_, ChatState> {
        self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// True while a reply is expected: typing or streaming.
    pub fn awaiting_reply(&self) -> bool {
        self.state.borrow().typing || self.assembler.is_active()
    }

    /// Mutate state and the assembler together, notifying subscribers only
    /// when `f` reports a change.
    fn modify(&mut self, f: impl FnOnce(&mut ChatState, &mut StreamAssembler) -> bool) -> bool {
        let assembler = &mut self.assembler;
        self.state.send_if_modified(|state| f(state, assembler))
    }

    /// Clear typing and freeze any active stream as it stands.
    fn settle(state: &mut ChatState, assembler: &mut StreamAssembler) -> bool {
        let was_waiting = state.typing || assembler.is_active();
        state.typing = false;
        assembler.finalize(&mut state.messages, Vec::new());
        was_waiting
    }

    pub fn connect(&mut self) {
        self.connection.connect();
    }

    /// Close the socket. An answer still streaming is kept as it stands.
    pub fn disconnect(&mut self) {
        self.modify(Self::settle);
        self.connection.disconnect();
    }

    pub fn handle_signal(&mut self, signal: ConnectionSignal) {
        if let Some(event) = self.connection.handle_signal(signal) {
            self.handle_event(event);
        }
    }

    pub fn handle_event(&mut self, event: ServerEvent) {
        debug!(event = event.name(), "handling server event");
        match event {
            ServerEvent::SessionStarted {
                session_id,
                conversation_id,
                new_conversation,
            } => {
                info!(?session_id, ?conversation_id, new_conversation, "session started");
                self.connection
                    .session_mut()
                    .record(session_id, conversation_id.clone());
                self.modify(|state, _| {
                    let changed = state.active_conversation != conversation_id;
                    state.active_conversation = conversation_id;
                    changed
                });
                if !new_conversation {
                    self.hooks.refresh_conversations();
                }
            }
            ServerEvent::ChatHistory { messages } => {
                if messages.is_empty() {
                    return;
                }
                debug!(count = messages.len(), "replaying history");
                self.modify(|state, _| {
                    state.messages.extend(messages.into_iter().map(history_message));
                    true
                });
            }
            ServerEvent::StreamStart { sources, kind } => {
                self.modify(|state, assembler| {
                    state.typing = false;
                    assembler.ensure_bubble(&mut state.messages, sources);
                    if let Some(kind) = kind {
                        apply_kind(state, assembler.active_index(), kind);
                    }
                    true
                });
            }
            ServerEvent::Token { content } => {
                self.modify(|state, assembler| {
                    if !assembler.is_active() {
                        state.typing = false;
                        assembler.ensure_bubble(&mut state.messages, Vec::new());
                    }
                    assembler.append_chunk(&mut state.messages, &content);
                    true
                });
            }
            ServerEvent::StreamEnd {
                sources,
                kind,
                citations,
                follow_ups,
            } => {
                self.modify(|state, assembler| {
                    state.typing = false;
                    let finalized = assembler.finalize(&mut state.messages, sources);
                    if let Some(message) = finalized.and_then(|idx| state.messages.get_mut(idx)) {
                        if !citations.is_empty() {
                            message.citations = citations;
                        }
                        if !follow_ups.is_empty() {
                            message.follow_ups = follow_ups;
                        }
                    }
                    if let Some(kind) = kind {
                        apply_kind(state, finalized, kind);
                    }
                    true
                });
                self.hooks.refresh_conversations();
            }
            ServerEvent::ConversationTitleUpdated { title, .. } => {
                debug!(?title, "conversation title updated");
                self.hooks.refresh_conversations();
            }
            event @ ServerEvent::Error { .. } => {
                let text = event.error_text().unwrap_or_default().to_owned();
                warn!(%text, "server reported an error");
                self.modify(|state, assembler| {
                    Self::settle(state, assembler);
                    state.banner = Some(Banner::error(text));
                    true
                });
            }
            ServerEvent::WsClosed => {
                self.modify(Self::settle);
            }
            ServerEvent::Unrecognized(value) => {
                debug!("ignoring unrecognized frame: {}", value);
            }
        }
    }

    /// Start a turn. On acceptance the user message is in the transcript and
    /// the envelope is on its way (or queued until the socket opens).
    pub fn send_message(&mut self, text: &str) -> Result<MessageId, SendRejection> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SendRejection::Empty);
        }
        if self.state.borrow().typing {
            return Err(SendRejection::AwaitingReply);
        }
        if self.assembler.is_active() {
            return Err(SendRejection::Streaming);
        }

        let message = Message::user(text);
        let id = message.id;
        self.modify(|state, _| {
            state.banner = None;
            state.messages.push(message);
            state.typing = true;
            true
        });
        self.connection.send(ClientMessage::chat(text).encode());
        debug!(%id, "message sent");
        Ok(id)
    }

    /// Drop the current conversation and reconnect anonymously.
    pub fn new_conversation(&mut self) {
        let fresh = welcome(&self.settings);
        self.modify(|state, assembler| {
            Self::settle(state, assembler);
            state.active_conversation = None;
            state.banner = None;
            state.messages = fresh;
            state.epoch += 1;
            true
        });
        self.connection.reset();
        self.connection.connect();
        info!("new conversation");
    }

    pub fn clear_banner(&mut self) {
        self.modify(|state, _| state.banner.take().is_some());
    }

    /// Record feedback on a message and forward it. Returns false for an
    /// unknown id.
    pub fn record_feedback(&mut self, message_id: MessageId, feedback: Feedback) -> bool {
        let found = self.modify(|state, _| {
            match state.messages.iter_mut().find(|m| m.id == message_id) {
                Some(message) => {
                    message.feedback = Some(feedback);
                    true
                }
                None => false,
            }
        });
        if found {
            self.hooks.submit_feedback(message_id, feedback);
        } else {
            debug!(%message_id, "feedback for unknown message ignored");
        }
        found
    }

    /// Give up on a reply that stopped arriving.
    pub fn stall(&mut self) {
        if !self.awaiting_reply() {
            return;
        }
        warn!("no reply from server, abandoning the current turn");
        self.modify(|state, assembler| {
            Self::settle(state, assembler);
            state.banner = Some(Banner::warning(STALL_BANNER_TEXT));
            true
        });
    }
}

fn welcome(settings: &ChatSettings) -> Vec<Message> {
    settings
        .greeting
        .as_ref()
        .map(|greeting| Message::assistant(greeting).with_follow_ups(settings.suggestions.clone()))
        .into_iter()
        .collect()
}

fn history_message(entry: HistoryEntry) -> Message {
    let message = match entry.role {
        Role::User => Message::user(entry.content),
        Role::Assistant => Message::assistant(entry.content),
    };
    message.with_sources(entry.sources)
}

fn apply_kind(state: &mut ChatState, idx: Option<usize>, kind: MessageKind) {
    if let Some(message) = idx.and_then(|idx| state.messages.get_mut(idx)) {
        message.kind = kind;
    }
    if kind == MessageKind::GuardrailInput {
        state.banner = Some(Banner::warning(GUARDRAIL_BANNER_TEXT));
    }
}
