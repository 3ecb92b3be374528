use std::collections::VecDeque;

/// How the relay reveals received text to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealPacing {
    /// Reveal each delta in full as soon as it is drained.
    Batch,
    /// Reveal at most `chars_per_tick` characters per tick.
    Typewriter { chars_per_tick: usize },
}

impl Default for RevealPacing {
    fn default() -> Self {
        RevealPacing::Typewriter { chars_per_tick: 3 }
    }
}

/// Once the stream has ended, reveal this many times faster to catch up.
const CATCH_UP_FACTOR: usize = 4;

/// Characters received but not yet shown, plus what has been shown.
pub struct TypewriterBuffer {
    pacing: RevealPacing,
    pending_chars: VecDeque<char>,
    revealed: String,
    stream_done: bool,
}

impl TypewriterBuffer {
    pub fn new(pacing: RevealPacing) -> Self {
        Self {
            pacing,
            pending_chars: VecDeque::new(),
            revealed: String::new(),
            stream_done: false,
        }
    }

    pub fn add_chunk(&mut self, text: &str) {
        self.pending_chars.extend(text.chars());
    }

    pub fn mark_done(&mut self) {
        self.stream_done = true;
    }

    pub fn is_caught_up(&self) -> bool {
        self.pending_chars.is_empty()
    }

    pub fn revealed(&self) -> &str {
        &self.revealed
    }

    /// Release the next slice of characters. Returns the cumulative revealed
    /// text when anything new became visible.
    pub fn take_chars(&mut self) -> Option<&str> {
        if self.pending_chars.is_empty() {
            return None;
        }
        let budget = match self.pacing {
            RevealPacing::Batch => self.pending_chars.len(),
            RevealPacing::Typewriter { chars_per_tick } => {
                let rate = chars_per_tick.max(1);
                if self.stream_done {
                    rate.saturating_mul(CATCH_UP_FACTOR)
                } else {
                    rate
                }
            }
        };
        let take = budget.min(self.pending_chars.len());
        self.revealed.extend(self.pending_chars.drain(..take));
        Some(&self.revealed)
    }
}
