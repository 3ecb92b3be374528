//! Presentation-side consumer of a [`StreamSession`].
//!
//! The relay is ticked by the presentation loop. Each tick drains at most one
//! chunk, reveals a paced slice of text, and once the stream has ended and
//! the reveal has caught up, finalizes the model turn in the log.

use shared::agent_api::{StreamChunk, TurnId};
use shared::OverlayResult;
use std::time::Duration;

use crate::conversation::ConversationLog;
use crate::session::StreamSession;
use crate::typewriter::{RevealPacing, TypewriterBuffer};

/// Default interval between relay ticks.
pub const TICK_INTERVAL: Duration = Duration::from_millis(50);

/// Receives everything the user should see about a streaming turn.
/// All calls happen on the presentation thread.
pub trait PresentationSink {
    /// The model turn is open and nothing has arrived yet.
    fn on_thinking(&mut self, _turn: TurnId) {}

    /// The thinking placeholder should go away.
    fn on_thinking_cleared(&mut self, _turn: TurnId) {}

    /// More text became visible. `cumulative` is everything revealed so far.
    fn on_delta_revealed(&mut self, turn: TurnId, cumulative: &str);

    /// The turn is settled. Called exactly once per stream.
    fn on_stream_finalized(&mut self, turn: TurnId, final_text: &str, succeeded: bool);

    /// The overlay was hidden and is being brought back for new text.
    fn on_visibility_changed(&mut self, _visible: bool) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayStatus {
    /// Nothing new was revealed this tick.
    Waiting,
    /// Some text was revealed this tick.
    Revealing,
    Finished { turn: TurnId, succeeded: bool },
}

enum Ending {
    Done,
    Failed(String),
}

pub struct ChunkRelay {
    session: StreamSession,
    turn: TurnId,
    typewriter: TypewriterBuffer,
    received: String,
    announced: bool,
    thinking: bool,
    ending: Option<Ending>,
    succeeded: Option<bool>,
}

impl ChunkRelay {
    pub fn new(session: StreamSession, turn: TurnId, pacing: RevealPacing) -> Self {
        Self {
            session,
            turn,
            typewriter: TypewriterBuffer::new(pacing),
            received: String::new(),
            announced: false,
            thinking: true,
            ending: None,
            succeeded: None,
        }
    }

    pub fn turn(&self) -> TurnId {
        self.turn
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    pub fn is_finished(&self) -> bool {
        self.succeeded.is_some()
    }

    /// Ask the worker to stop. The relay still finalizes through the usual
    /// error path on a later tick.
    pub fn cancel(&mut self) {
        self.session.cancel();
    }

    pub fn tick(
        &mut self,
        log: &mut ConversationLog,
        sink: &mut dyn PresentationSink,
    ) -> OverlayResult<RelayStatus> {
        if let Some(succeeded) = self.succeeded {
            return Ok(RelayStatus::Finished {
                turn: self.turn,
                succeeded,
            });
        }
        if !self.announced {
            self.announced = true;
            sink.on_thinking(self.turn);
        }

        if self.ending.is_none() {
            if let Some(chunk) = self.session.try_next() {
                self.accept(chunk, log, sink)?;
            }
        }

        let mut status = RelayStatus::Waiting;
        if let Some(cumulative) = self.typewriter.take_chars() {
            sink.on_delta_revealed(self.turn, cumulative);
            status = RelayStatus::Revealing;
        }

        if self.ending.is_some() && self.typewriter.is_caught_up() {
            return self.finalize(log, sink);
        }
        Ok(status)
    }

    fn accept(
        &mut self,
        chunk: StreamChunk,
        log: &mut ConversationLog,
        sink: &mut dyn PresentationSink,
    ) -> OverlayResult<()> {
        match chunk {
            StreamChunk::Text(delta) => {
                if delta.is_empty() {
                    return Ok(());
                }
                self.clear_thinking(sink);
                log.append_delta(self.turn, &delta)?;
                self.typewriter.add_chunk(&delta);
                self.received.push_str(&delta);
            }
            StreamChunk::Done { stop_reason } => {
                tracing::debug!(turn = %self.turn, ?stop_reason, "stream done");
                self.typewriter.mark_done();
                self.ending = Some(Ending::Done);
            }
            StreamChunk::Error(message) => {
                tracing::warn!(turn = %self.turn, error = %message, "stream ended with error");
                self.typewriter.mark_done();
                self.ending = Some(Ending::Failed(message));
            }
        }
        Ok(())
    }

    fn clear_thinking(&mut self, sink: &mut dyn PresentationSink) {
        if self.thinking {
            self.thinking = false;
            sink.on_thinking_cleared(self.turn);
        }
    }

    fn finalize(
        &mut self,
        log: &mut ConversationLog,
        sink: &mut dyn PresentationSink,
    ) -> OverlayResult<RelayStatus> {
        let (text, succeeded) = match self.ending.take() {
            Some(Ending::Failed(message)) if self.received.is_empty() => (message, false),
            Some(Ending::Failed(message)) => (format!("{}\n\n{}", self.received, message), false),
            _ => (std::mem::take(&mut self.received), true),
        };
        self.clear_thinking(sink);
        log.finalize(self.turn, text.clone())?;
        self.succeeded = Some(succeeded);
        sink.on_stream_finalized(self.turn, &text, succeeded);
        tracing::info!(turn = %self.turn, succeeded, "stream finalized");
        Ok(RelayStatus::Finished {
            turn: self.turn,
            succeeded,
        })
    }
}
