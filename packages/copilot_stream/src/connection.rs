//! Socket lifecycle: `Disconnected → Connecting → Open → Closed → Disconnected`.
//!
//! The manager never blocks. [`ConnectionManager::connect`] spawns a link task
//! that performs the handshake and forwards everything the socket produces as
//! [`ConnectionSignal`]s on a channel; whoever owns the manager (the
//! conversation actor) feeds those signals back through
//! [`ConnectionManager::handle_signal`], which is where state transitions,
//! queue flushing and frame normalization happen. Each link carries a
//! generation number so signals from a socket that was torn down by
//! `disconnect`/`reset` are discarded.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ConnectionError;
use crate::protocol::{RawFrame, ServerEvent, normalize};
use crate::session::SessionTracker;

const SOCKET_ERROR_TEXT: &str = "WebSocket connection error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closed,
}

/// What a live socket hands back to the link task. The inbound channel
/// ending means the socket closed.
#[derive(Debug)]
pub enum WireEvent {
    Frame(RawFrame),
    Failed(String),
}

/// An open socket, reduced to two channels.
pub struct Wire {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<WireEvent>,
}

/// Opens sockets. The production implementation is
/// [`TungsteniteConnector`](crate::transport::TungsteniteConnector).
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: Url) -> BoxFuture<'static, Result<Wire, ConnectionError>>;
}

/// Opaque notification from a link task, to be passed to
/// [`ConnectionManager::handle_signal`].
#[derive(Debug)]
pub struct ConnectionSignal {
    generation: u64,
    kind: SignalKind,
}

#[derive(Debug)]
enum SignalKind {
    Opened(mpsc::UnboundedSender<String>),
    Frame(RawFrame),
    Failed(String),
    Closed,
}

struct Link {
    generation: u64,
    /// Present once the handshake completed.
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        // Dropping `outbound` closes the writer; aborting stops the reader side.
        self.task.abort();
    }
}

pub struct ConnectionManager {
    endpoint: Url,
    connector: Arc<dyn Connector>,
    session: SessionTracker,
    state: watch::Sender<ConnectionState>,
    pending: VecDeque<String>,
    link: Option<Link>,
    generation: u64,
    signals: mpsc::UnboundedSender<ConnectionSignal>,
}

impl ConnectionManager {
    /// Create a manager and the receiver its link tasks report to.
    pub fn new(
        endpoint: Url,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionSignal>) {
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let manager = Self {
            endpoint,
            connector,
            session: SessionTracker::new(),
            state,
            pending: VecDeque::new(),
            link: None,
            generation: 0,
            signals,
        };
        (manager, signal_rx)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn session(&self) -> &SessionTracker {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionTracker {
        &mut self.session
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("connection state {:?} -> {:?}", previous, state);
        }
    }

    /// Start opening a socket. No-op while one is connecting or open.
    pub fn connect(&mut self) {
        if matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        let url = self.session.connect_url(&self.endpoint);
        info!(%url, generation, "connecting");

        self.set_state(ConnectionState::Connecting);
        let attempt = self.connector.connect(url);
        let task = tokio::spawn(run_link(generation, attempt, self.signals.clone()));
        self.link = Some(Link {
            generation,
            outbound: None,
            task,
        });
    }

    /// Transmit now if open; otherwise queue and make sure a connection is on
    /// its way.
    pub fn send(&mut self, payload: String) {
        if self.state() == ConnectionState::Open {
            if let Some(outbound) = self.link.as_ref().and_then(|l| l.outbound.as_ref()) {
                if outbound.send(payload).is_err() {
                    warn!("socket writer is gone, payload dropped");
                }
                return;
            }
        }
        self.pending.push_back(payload);
        self.connect();
    }

    /// Close the socket and drop anything still queued.
    pub fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            debug!(generation = link.generation, "closing socket");
        }
        if !self.pending.is_empty() {
            debug!(dropped = self.pending.len(), "discarding queued payloads");
            self.pending.clear();
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// `disconnect` and forget the session, so the next connect is anonymous.
    pub fn reset(&mut self) {
        self.disconnect();
        self.session.clear();
    }

    /// Apply a link signal. Returns the downstream event it produced, if any.
    pub fn handle_signal(&mut self, signal: ConnectionSignal) -> Option<ServerEvent> {
        let current = self.link.as_ref().map(|l| l.generation);
        if current != Some(signal.generation) {
            debug!(
                generation = signal.generation,
                "ignoring signal from superseded socket"
            );
            return None;
        }

        match signal.kind {
            SignalKind::Opened(outbound) => {
                self.set_state(ConnectionState::Open);
                let flushed = self.pending.len();
                for payload in self.pending.drain(..) {
                    if outbound.send(payload).is_err() {
                        warn!("socket writer is gone while flushing queue");
                        break;
                    }
                }
                if let Some(link) = self.link.as_mut() {
                    link.outbound = Some(outbound);
                }
                info!(flushed, "connection open");
                None
            }
            SignalKind::Frame(frame) => normalize(&frame),
            SignalKind::Failed(reason) => {
                warn!(%reason, "socket error");
                // Queued turns end with the failed socket.
                if !self.pending.is_empty() {
                    debug!(
                        dropped = self.pending.len(),
                        "discarding payloads queued for failed socket"
                    );
                    self.pending.clear();
                }
                Some(ServerEvent::error(SOCKET_ERROR_TEXT))
            }
            SignalKind::Closed => {
                self.set_state(ConnectionState::Closed);
                self.link = None;
                self.set_state(ConnectionState::Disconnected);
                info!(queued = self.pending.len(), "connection closed");
                Some(ServerEvent::WsClosed)
            }
        }
    }
}

async fn run_link(
    generation: u64,
    attempt: BoxFuture<'static, Result<Wire, ConnectionError>>,
    signals: mpsc::UnboundedSender<ConnectionSignal>,
) {
    let emit = |kind| {
        let _ = signals.send(ConnectionSignal { generation, kind });
    };

    match attempt.await {
        Ok(Wire {
            outbound,
            mut inbound,
        }) => {
            emit(SignalKind::Opened(outbound));
            while let Some(event) = inbound.recv().await {
                match event {
                    WireEvent::Frame(frame) => emit(SignalKind::Frame(frame)),
                    WireEvent::Failed(reason) => emit(SignalKind::Failed(reason)),
                }
            }
        }
        Err(err) => emit(SignalKind::Failed(err.to_string())),
    }

    emit(SignalKind::Closed);
}
