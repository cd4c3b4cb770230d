use url::Url;

/// Backend-assigned identifiers for the current conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationIdentity {
    pub session_id: Option<String>,
    pub conversation_id: Option<String>,
}

impl ConversationIdentity {
    pub fn is_anonymous(&self) -> bool {
        self.session_id.is_none() && self.conversation_id.is_none()
    }
}

/// Remembers which session/conversation the backend put us in so that a
/// reconnect resumes it. Survives disconnects; only `clear` forgets it.
#[derive(Debug, Default)]
pub struct SessionTracker {
    identity: ConversationIdentity,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite both ids with the values from a `session_started` event.
    pub fn record(&mut self, session_id: Option<String>, conversation_id: Option<String>) {
        self.identity = ConversationIdentity {
            session_id,
            conversation_id,
        };
    }

    pub fn identity(&self) -> &ConversationIdentity {
        &self.identity
    }

    pub fn clear(&mut self) {
        self.identity = ConversationIdentity::default();
    }

    /// The endpoint with `session_id` / `conversation_id` query pairs appended
    /// for whichever ids are known.
    pub fn connect_url(&self, endpoint: &Url) -> Url {
        let mut url = endpoint.clone();
        if self.identity.is_anonymous() {
            return url;
        }
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(ref session_id) = self.identity.session_id {
                pairs.append_pair("session_id", session_id);
            }
            if let Some(ref conversation_id) = self.identity.conversation_id {
                pairs.append_pair("conversation_id", conversation_id);
            }
        }
        url
    }
}
