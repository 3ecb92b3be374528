//! Prints streamed replies to a terminal.

use overlay_core::PresentationSink;
use shared::agent_api::{Role, Turn, TurnId};
use std::io::{self, Write};

const THINKING: &str = "thinking...";

pub struct TerminalSink<W: Write> {
    out: W,
    /// Bytes of the current reply already written.
    printed: usize,
    /// Latest cumulative text, kept while hidden.
    pending: String,
    hidden: bool,
    thinking_shown: bool,
    /// Outcome of a reply that settled while hidden.
    settled_hidden: Option<bool>,
}

impl<W: Write> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            printed: 0,
            pending: String::new(),
            hidden: false,
            thinking_shown: false,
            settled_hidden: None,
        }
    }

    pub fn notice(&mut self, text: &str) {
        let _ = writeln!(self.out, "* {}", text);
        let _ = self.out.flush();
    }

    pub fn print_turns<'a>(&mut self, turns: impl IntoIterator<Item = &'a Turn>) {
        for turn in turns {
            let who = match turn.role {
                Role::User => "you",
                Role::Model => "model",
                Role::System => "system",
            };
            let pin = if turn.pinned { " [pinned]" } else { "" };
            let _ = writeln!(self.out, "{}{}: {}", who, pin, turn.text);
        }
        let _ = self.out.flush();
    }

    fn flush_pending(&mut self) {
        if self.hidden || self.pending.len() <= self.printed {
            return;
        }
        if self.printed == 0 {
            let _ = write!(self.out, "model: ");
        }
        let _ = write!(self.out, "{}", &self.pending[self.printed..]);
        let _ = self.out.flush();
        self.printed = self.pending.len();
    }

    fn end_reply(&mut self, succeeded: bool) {
        let _ = writeln!(self.out);
        if !succeeded {
            let _ = writeln!(self.out, "* reply did not complete");
        }
        let _ = self.out.flush();
    }

    fn clear_thinking_line(&mut self) {
        if self.thinking_shown {
            let _ = write!(self.out, "\r{}\r", " ".repeat(THINKING.len()));
            self.thinking_shown = false;
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> PresentationSink for TerminalSink<W> {
    fn on_thinking(&mut self, _turn: TurnId) {
        self.printed = 0;
        self.pending.clear();
        if !self.hidden {
            let _ = write!(self.out, "{}", THINKING);
            let _ = self.out.flush();
            self.thinking_shown = true;
        }
    }

    fn on_thinking_cleared(&mut self, _turn: TurnId) {
        self.clear_thinking_line();
    }

    fn on_delta_revealed(&mut self, _turn: TurnId, cumulative: &str) {
        self.pending.clear();
        self.pending.push_str(cumulative);
        self.flush_pending();
    }

    fn on_stream_finalized(&mut self, _turn: TurnId, final_text: &str, succeeded: bool) {
        self.clear_thinking_line();
        self.pending.clear();
        self.pending.push_str(final_text);
        self.flush_pending();
        if self.hidden {
            self.settled_hidden = Some(succeeded);
        } else {
            self.end_reply(succeeded);
        }
    }

    fn on_visibility_changed(&mut self, visible: bool) {
        self.hidden = !visible;
        if visible {
            self.flush_pending();
            if let Some(succeeded) = self.settled_hidden.take() {
                self.end_reply(succeeded);
            }
        }
    }
}

/// Stdout sink used by the binary.
pub fn stdout_sink() -> TerminalSink<io::Stdout> {
    TerminalSink::new(io::stdout())
}
