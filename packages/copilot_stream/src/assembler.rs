use tracing::{debug, warn};

use crate::message::Message;

/// Owns the "at most one streaming message" invariant.
///
/// The transcript itself lives elsewhere and is passed in; the assembler only
/// remembers which entry (by position) is currently accepting tokens. Entries
/// are only ever appended while a stream is active, so the position stays
/// valid until [`finalize`](Self::finalize).
#[derive(Debug, Default)]
pub struct StreamAssembler {
    active: Option<usize>,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    /// Start a streaming assistant bubble unless one is already active.
    /// Returns true if a bubble was created.
    pub fn ensure_bubble(&mut self, messages: &mut Vec<Message>, sources: Vec<String>) -> bool {
        if self.active.is_some() {
            return false;
        }
        messages.push(Message::streaming_assistant(sources));
        self.active = Some(messages.len() - 1);
        debug!("streaming bubble opened at {}", messages.len() - 1);
        true
    }

    /// Append a chunk to the active bubble. With no active bubble the chunk is
    /// dropped and false is returned.
    pub fn append_chunk(&mut self, messages: &mut [Message], text: &str) -> bool {
        let Some(message) = self.active.and_then(|idx| messages.get_mut(idx)) else {
            warn!(len = text.len(), "token arrived with no active stream, dropped");
            return false;
        };
        message.text.push_str(text);
        true
    }

    /// Freeze the active bubble. Non-empty `sources` replace the bubble's own;
    /// empty ones keep what it had. Returns the position of the frozen message.
    pub fn finalize(&mut self, messages: &mut [Message], sources: Vec<String>) -> Option<usize> {
        let idx = self.active.take()?;
        let message = messages.get_mut(idx)?;
        message.streaming = false;
        if !sources.is_empty() {
            message.sources = sources;
        }
        debug!(chars = message.text.len(), "stream finalized at {}", idx);
        Some(idx)
    }
}
