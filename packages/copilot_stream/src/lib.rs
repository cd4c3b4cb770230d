//! Copilot Stream - streaming conversation engine for the sales copilot
//!
//! One WebSocket per conversation, one canonical event type for everything
//! the backend sends, and an assembler that turns token chunks into finished
//! answers. No terminal or HTTP knowledge lives here.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use copilot_stream::{ChatSettings, ConversationHandle, NoHooks, TungsteniteConnector};
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings = ChatSettings::new(Url::parse("ws://localhost:8000/ws").unwrap());
//!     let handle = ConversationHandle::spawn(
//!         settings,
//!         Arc::new(TungsteniteConnector),
//!         Arc::new(NoHooks),
//!     );
//!
//!     handle
//!         .send_message("What case studies do we have for fintech?")
//!         .await
//!         .unwrap();
//!
//!     // Watch the answer stream in
//!     let mut state = handle.subscribe();
//!     while state.changed().await.is_ok() {
//!         let snapshot = state.borrow_and_update().clone();
//!         if let Some(answer) = snapshot.streaming_message() {
//!             println!("{}", answer.text);
//!         } else if !snapshot.typing {
//!             break;
//!         }
//!     }
//! }
//! ```

pub mod actor;
pub mod assembler;
pub mod connection;
pub mod error;
pub mod message;
pub mod orchestrator;
pub mod protocol;
pub mod session;
pub mod settings;
pub mod transport;

#[cfg(test)]
mod test_helpers;

pub use actor::ConversationHandle;
pub use connection::{
    ConnectionManager, ConnectionSignal, ConnectionState, Connector, Wire, WireEvent,
};
pub use error::{ConnectionError, HandleError, SendRejection};
pub use message::{Banner, Citation, Feedback, Message, MessageId, MessageKind, Role, Severity};
pub use orchestrator::{ChatState, Conversation, ConversationHooks, NoHooks};
pub use protocol::{ClientMessage, RawFrame, ServerEvent, normalize, normalize_text};
pub use session::{ConversationIdentity, SessionTracker};
pub use settings::ChatSettings;
pub use transport::TungsteniteConnector;
