use std::time::Duration;

use url::Url;

/// Delay between starting a conversation from a suggestion and sending it.
pub const DEFAULT_AUTO_SEND_DELAY: Duration = Duration::from_millis(400);

/// Runtime settings for one conversation.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    /// WebSocket endpoint, without session query parameters.
    pub endpoint: Url,
    pub auto_send_delay: Duration,
    /// `None` disables the stall watchdog.
    pub stall_timeout: Option<Duration>,
    /// First assistant message of every transcript, if any.
    pub greeting: Option<String>,
    /// Follow-up suggestions attached to the greeting.
    pub suggestions: Vec<String>,
}

impl ChatSettings {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            auto_send_delay: DEFAULT_AUTO_SEND_DELAY,
            stall_timeout: None,
            greeting: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_greeting(mut self, greeting: impl Into<String>, suggestions: Vec<String>) -> Self {
        self.greeting = Some(greeting.into());
        self.suggestions = suggestions;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }
}
