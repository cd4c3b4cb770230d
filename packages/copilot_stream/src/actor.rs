//! The task that owns a [`Conversation`] and the handle used to drive it.
//!
//! Everything that mutates a conversation goes through one `select!` loop:
//! commands from handles, signals from socket tasks, scheduled sends coming
//! due, and the stall watchdog. That loop is the only writer of the state
//! that subscribers observe.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::{ConnectionSignal, ConnectionState, Connector};
use crate::error::{HandleError, SendRejection};
use crate::message::{Feedback, MessageId};
use crate::orchestrator::{ChatState, Conversation, ConversationHooks};
use crate::settings::ChatSettings;

/// Commands that can be sent to a conversation actor
#[derive(Debug)]
enum ConversationCommand {
    SendMessage {
        text: String,
        respond_to: oneshot::Sender<Result<MessageId, SendRejection>>,
    },
    /// Start over, then send `query` once the auto-send delay has passed.
    StartConversation {
        query: Option<String>,
        respond_to: oneshot::Sender<()>,
    },
    NewConversation {
        respond_to: oneshot::Sender<()>,
    },
    Connect {
        respond_to: oneshot::Sender<()>,
    },
    Disconnect {
        respond_to: oneshot::Sender<()>,
    },
    ClearBanner {
        respond_to: oneshot::Sender<()>,
    },
    RecordFeedback {
        message_id: MessageId,
        feedback: Feedback,
        respond_to: oneshot::Sender<bool>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// A send that was scheduled by `StartConversation` and is now due.
struct ScheduledSend {
    generation: u64,
    text: String,
}

/// Handle to communicate with a conversation actor
#[derive(Clone)]
pub struct ConversationHandle {
    sender: mpsc::Sender<ConversationCommand>,
    state: watch::Receiver<ChatState>,
    connection: watch::Receiver<ConnectionState>,
}

impl ConversationHandle {
    /// Spawn the actor and start connecting. Must be called inside a tokio
    /// runtime.
    pub fn spawn(
        settings: ChatSettings,
        connector: Arc<dyn Connector>,
        hooks: Arc<dyn ConversationHooks>,
    ) -> Self {
        ConversationActor::spawn(settings, connector, hooks)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> ConversationCommand,
    ) -> Result<T, HandleError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(command(tx))
            .await
            .map_err(|_| HandleError::ActorGone)?;
        rx.await.map_err(|_| HandleError::NoReply)
    }

    pub async fn send_message(&self, text: impl Into<String>) -> Result<MessageId, HandleError> {
        let text = text.into();
        let result = self
            .request(|respond_to| ConversationCommand::SendMessage { text, respond_to })
            .await?;
        Ok(result?)
    }

    pub async fn start_conversation(&self, query: Option<String>) -> Result<(), HandleError> {
        self.request(|respond_to| ConversationCommand::StartConversation { query, respond_to })
            .await
    }

    pub async fn new_conversation(&self) -> Result<(), HandleError> {
        self.request(|respond_to| ConversationCommand::NewConversation { respond_to })
            .await
    }

    pub async fn connect(&self) -> Result<(), HandleError> {
        self.request(|respond_to| ConversationCommand::Connect { respond_to })
            .await
    }

    pub async fn disconnect(&self) -> Result<(), HandleError> {
        self.request(|respond_to| ConversationCommand::Disconnect { respond_to })
            .await
    }

    pub async fn clear_banner(&self) -> Result<(), HandleError> {
        self.request(|respond_to| ConversationCommand::ClearBanner { respond_to })
            .await
    }

    /// Returns false when no message has that id.
    pub async fn record_feedback(
        &self,
        message_id: MessageId,
        feedback: Feedback,
    ) -> Result<bool, HandleError> {
        self.request(|respond_to| ConversationCommand::RecordFeedback {
            message_id,
            feedback,
            respond_to,
        })
        .await
    }

    /// Close the socket and stop the actor.
    pub async fn shutdown(&self) -> Result<(), HandleError> {
        self.request(|respond_to| ConversationCommand::Shutdown { respond_to })
            .await
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state.clone()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub fn snapshot(&self) -> ChatState {
        self.state.borrow().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }
}

struct ConversationActor {
    conversation: Conversation,
    receiver: mpsc::Receiver<ConversationCommand>,
    signals: mpsc::UnboundedReceiver<ConnectionSignal>,
    scheduled_tx: mpsc::UnboundedSender<ScheduledSend>,
    scheduled_rx: mpsc::UnboundedReceiver<ScheduledSend>,
    /// Cancels every pending scheduled send when the conversation resets.
    schedule: CancellationToken,
    schedule_generation: u64,
    /// Last accepted send or inbound signal, for the watchdog.
    last_activity: Instant,
}

impl ConversationActor {
    fn spawn(
        settings: ChatSettings,
        connector: Arc<dyn Connector>,
        hooks: Arc<dyn ConversationHooks>,
    ) -> ConversationHandle {
        let (conversation, signals) = Conversation::new(settings, connector, hooks);
        let (sender, receiver) = mpsc::channel(32);
        let (scheduled_tx, scheduled_rx) = mpsc::unbounded_channel();

        let handle = ConversationHandle {
            sender,
            state: conversation.subscribe(),
            connection: conversation.connection().subscribe_state(),
        };

        let actor = ConversationActor {
            conversation,
            receiver,
            signals,
            scheduled_tx,
            scheduled_rx,
            schedule: CancellationToken::new(),
            schedule_generation: 0,
            last_activity: Instant::now(),
        };

        tokio::spawn(async move {
            actor.run().await;
        });

        handle
    }

    async fn run(mut self) {
        debug!(endpoint = %self.conversation.settings().endpoint, "conversation actor started");
        self.conversation.connect();

        loop {
            let deadline = self.watchdog_deadline();
            tokio::select! {
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle_command(cmd) {
                        break;
                    }
                }
                Some(signal) = self.signals.recv() => {
                    self.last_activity = Instant::now();
                    self.conversation.handle_signal(signal);
                }
                Some(due) = self.scheduled_rx.recv() => {
                    self.deliver_scheduled(due);
                }
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    self.conversation.stall();
                }
            }
        }

        self.schedule.cancel();
        self.conversation.disconnect();
        debug!("conversation actor stopped");
    }

    /// Returns false when the actor should stop.
    fn handle_command(&mut self, cmd: ConversationCommand) -> bool {
        match cmd {
            ConversationCommand::SendMessage { text, respond_to } => {
                let result = self.conversation.send_message(&text);
                if result.is_ok() {
                    self.last_activity = Instant::now();
                }
                let _ = respond_to.send(result);
            }

            ConversationCommand::StartConversation { query, respond_to } => {
                self.reset_conversation();
                if let Some(query) = query {
                    self.schedule_send(query);
                }
                let _ = respond_to.send(());
            }

            ConversationCommand::NewConversation { respond_to } => {
                self.reset_conversation();
                let _ = respond_to.send(());
            }

            ConversationCommand::Connect { respond_to } => {
                self.conversation.connect();
                let _ = respond_to.send(());
            }

            ConversationCommand::Disconnect { respond_to } => {
                self.conversation.disconnect();
                let _ = respond_to.send(());
            }

            ConversationCommand::ClearBanner { respond_to } => {
                self.conversation.clear_banner();
                let _ = respond_to.send(());
            }

            ConversationCommand::RecordFeedback {
                message_id,
                feedback,
                respond_to,
            } => {
                let _ = respond_to.send(self.conversation.record_feedback(message_id, feedback));
            }

            ConversationCommand::Shutdown { respond_to } => {
                let _ = respond_to.send(());
                return false;
            }
        }
        true
    }

    fn reset_conversation(&mut self) {
        self.schedule.cancel();
        self.schedule = CancellationToken::new();
        self.schedule_generation += 1;
        self.conversation.new_conversation();
    }

    fn schedule_send(&self, text: String) {
        let delay = self.conversation.settings().auto_send_delay;
        let token = self.schedule.clone();
        let tx = self.scheduled_tx.clone();
        let generation = self.schedule_generation;
        debug!(?delay, "scheduling send");

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!("scheduled send cancelled"),
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(ScheduledSend { generation, text });
                }
            }
        });
    }

    fn deliver_scheduled(&mut self, due: ScheduledSend) {
        // Fired just before a reset cancelled it.
        if due.generation != self.schedule_generation {
            debug!("dropping scheduled send from a previous conversation");
            return;
        }
        match self.conversation.send_message(&due.text) {
            Ok(id) => {
                self.last_activity = Instant::now();
                debug!(%id, "scheduled send delivered");
            }
            Err(rejection) => warn!(%rejection, "scheduled send rejected"),
        }
    }

    fn watchdog_deadline(&self) -> Option<Instant> {
        let timeout = self.conversation.settings().stall_timeout?;
        self.conversation
            .awaiting_reply()
            .then(|| self.last_activity + timeout)
    }
}
