use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use url::Url;

use crate::connection::{ConnectionSignal, Connector, Wire, WireEvent};
use crate::error::ConnectionError;
use crate::protocol::RawFrame;

/// The server side of a socket opened through [`MockConnector`].
pub struct MockSocket {
    pub url: Url,
    pub from_client: mpsc::UnboundedReceiver<String>,
    pub to_client: mpsc::UnboundedSender<WireEvent>,
}

impl MockSocket {
    pub fn send_text(&self, text: &str) {
        let _ = self
            .to_client
            .send(WireEvent::Frame(RawFrame::Text(text.to_string())));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self.to_client.send(WireEvent::Failed(reason.to_string()));
    }
}

/// In-memory connector. Every successful connect hands a [`MockSocket`] to
/// the test through the receiver returned by [`MockConnector::new`].
pub struct MockConnector {
    attempts: Mutex<Vec<Url>>,
    sockets: mpsc::UnboundedSender<MockSocket>,
    refuse: AtomicBool,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockSocket>) {
        let (sockets, socket_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            attempts: Mutex::new(Vec::new()),
            sockets,
            refuse: AtomicBool::new(false),
        });
        (connector, socket_rx)
    }

    pub fn attempts(&self) -> Vec<Url> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl Connector for MockConnector {
    fn connect(&self, url: Url) -> BoxFuture<'static, Result<Wire, ConnectionError>> {
        self.attempts.lock().unwrap().push(url.clone());
        if self.refuse.load(Ordering::SeqCst) {
            return async { Err(ConnectionError::Unavailable) }.boxed();
        }

        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        let _ = self.sockets.send(MockSocket {
            url,
            from_client,
            to_client,
        });
        async move { Ok(Wire { outbound, inbound }) }.boxed()
    }
}

/// Wait (bounded) for the next link signal.
pub async fn next_signal(
    signals: &mut mpsc::UnboundedReceiver<ConnectionSignal>,
) -> ConnectionSignal {
    tokio::time::timeout(Duration::from_secs(2), signals.recv())
        .await
        .expect("timed out waiting for a connection signal")
        .expect("signal channel closed")
}
