use tokio_tungstenite::tungstenite;

/// Transport-level failures. Never fatal to a conversation: the orchestrator
/// turns them into a banner and waits for the caller to retry.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("server is unavailable")]
    Unavailable,

    #[error("transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        };
        if is_connect {
            Self::Unavailable
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Why `send_message` refused a turn. A rejection leaves state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendRejection {
    #[error("message is empty")]
    Empty,

    #[error("still waiting for the previous reply")]
    AwaitingReply,

    #[error("an answer is still streaming")]
    Streaming,
}

/// Errors surfaced by [`ConversationHandle`](crate::ConversationHandle).
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error("conversation actor is gone")]
    ActorGone,

    #[error("conversation actor didn't respond")]
    NoReply,

    #[error(transparent)]
    Rejected(#[from] SendRejection),
}
