//! WebSocket transport on top of `tokio-tungstenite`.

use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::debug;
use url::Url;

use crate::connection::{Connector, Wire, WireEvent};
use crate::error::ConnectionError;
use crate::protocol::RawFrame;

/// Opens real WebSocket connections. Each open socket gets one writer task
/// (outbound channel → socket) and one reader task (socket → inbound channel).
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn connect(&self, url: Url) -> BoxFuture<'static, Result<Wire, ConnectionError>> {
        async move {
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(ConnectionError::from_tungstenite)?;
            let (mut ws_write, mut ws_read) = ws_stream.split();

            let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
            let (inbound_tx, inbound) = mpsc::unbounded_channel();

            tokio::spawn(async move {
                while let Some(payload) = outbound_rx.recv().await {
                    if let Err(e) = ws_write.send(Message::Text(payload.into())).await {
                        debug!("WebSocket send failed: {}", e);
                        break;
                    }
                }
                // Outbound side dropped: the manager let go of this socket.
                let _ = ws_write.close().await;
            });

            tokio::spawn(async move {
                while let Some(msg) = ws_read.next().await {
                    let event = match msg {
                        Ok(Message::Text(text)) => {
                            WireEvent::Frame(RawFrame::Text(text.as_str().to_owned()))
                        }
                        Ok(Message::Binary(bytes)) => {
                            WireEvent::Frame(RawFrame::Binary(bytes.to_vec()))
                        }
                        Ok(Message::Close(frame)) => {
                            debug!("server sent close frame: {:?}", frame);
                            break;
                        }
                        Ok(_) => continue,
                        Err(tungstenite::Error::ConnectionClosed) => break,
                        Err(e) => {
                            let _ = inbound_tx.send(WireEvent::Failed(e.to_string()));
                            break;
                        }
                    };
                    if inbound_tx.send(event).is_err() {
                        break;
                    }
                }
            });

            Ok(Wire { outbound, inbound })
        }
        .boxed()
    }
}
