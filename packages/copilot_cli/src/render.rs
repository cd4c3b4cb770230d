//! Incremental terminal rendering of conversation snapshots.
//!
//! Snapshots arrive whole; the renderer remembers how much it already wrote
//! so each call prints only what is new.

use std::collections::HashSet;
use std::io::{self, Write};

use copilot_stream::{Banner, ChatState, Message, MessageId, MessageKind, Role, Severity};

pub struct Renderer<W: Write> {
    out: W,
    epoch: u64,
    /// Messages fully written.
    done: usize,
    /// Whether the header of `messages[done]` has been written.
    open: bool,
    /// Bytes of `messages[done]` text already written.
    written: usize,
    banner: Option<Banner>,
    typing: bool,
    /// User messages the terminal already shows because they were typed.
    echoed: HashSet<MessageId>,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            epoch: 0,
            done: 0,
            open: false,
            written: 0,
            banner: None,
            typing: false,
            echoed: HashSet::new(),
        }
    }

    /// Don't print this user message; it was typed at the prompt.
    pub fn mark_echoed(&mut self, id: MessageId) {
        self.echoed.insert(id);
    }

    pub fn title(&mut self, title: &str) -> io::Result<()> {
        self.break_line()?;
        writeln!(self.out, "── {} ──", title)?;
        self.out.flush()
    }

    pub fn notice(&mut self, text: &str) -> io::Result<()> {
        self.break_line()?;
        writeln!(self.out, "({})", text)?;
        self.out.flush()
    }

    pub fn render(&mut self, state: &ChatState) -> io::Result<()> {
        if state.epoch != self.epoch {
            self.break_line()?;
            writeln!(self.out, "\n── new conversation ──")?;
            self.epoch = state.epoch;
            self.done = 0;
            self.open = false;
            self.written = 0;
            self.banner = None;
            self.echoed.clear();
        }

        while let Some(message) = state.messages.get(self.done) {
            if !self.write_message(message)? {
                break;
            }
        }

        if state.typing && !self.typing && !self.open {
            writeln!(self.out, "copilot is thinking…")?;
        }
        self.typing = state.typing;

        if state.banner != self.banner {
            if let Some(banner) = &state.banner {
                self.break_line()?;
                let tag = match banner.severity {
                    Severity::Warning => "warning",
                    Severity::Error => "error",
                };
                writeln!(self.out, "! {}: {}", tag, banner.text)?;
            }
            self.banner = state.banner.clone();
        }

        self.out.flush()
    }

    /// Write whatever is new in `messages[done]`. Returns true when the
    /// message is complete and the next one can be written.
    fn write_message(&mut self, message: &Message) -> io::Result<bool> {
        if message.role == Role::User {
            if !self.echoed.contains(&message.id) {
                writeln!(self.out, "you> {}", message.text)?;
            }
            self.advance();
            return Ok(true);
        }

        if !self.open {
            if self.written > 0 {
                write!(self.out, "copilot> …")?;
            } else {
                write!(self.out, "copilot> ")?;
            }
            self.open = true;
        }
        let fresh = message.text.get(self.written..).unwrap_or_default();
        write!(self.out, "{}", fresh)?;
        self.written = message.text.len();

        if message.streaming {
            return Ok(false);
        }

        writeln!(self.out)?;
        self.write_details(message)?;
        self.advance();
        Ok(true)
    }

    fn write_details(&mut self, message: &Message) -> io::Result<()> {
        match message.kind {
            MessageKind::Answer => {}
            MessageKind::GuardrailInput => writeln!(self.out, "  [blocked: off-topic]")?,
            MessageKind::GuardrailOos => writeln!(self.out, "  [outside the knowledge base]")?,
        }
        for (i, c) in message.citations.iter().enumerate() {
            writeln!(
                self.out,
                "  [{}] {} ({}, {}, p. {}) {:.0}%",
                i + 1,
                c.title,
                c.year,
                c.doc_type,
                c.page,
                c.confidence * 100.0
            )?;
        }
        if message.citations.is_empty() && !message.sources.is_empty() {
            writeln!(self.out, "  sources: {}", message.sources.join(", "))?;
        }
        for follow_up in &message.follow_ups {
            writeln!(self.out, "  → {}", follow_up)?;
        }
        Ok(())
    }

    fn advance(&mut self) {
        self.done += 1;
        self.open = false;
        self.written = 0;
    }

    /// End a half-written streaming line before printing something else.
    /// The message resumes after a `…` marker without repeating its text.
    fn break_line(&mut self) -> io::Result<()> {
        if self.open {
            writeln!(self.out)?;
            self.open = false;
        }
        Ok(())
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}
