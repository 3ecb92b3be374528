//! The presentation-thread owner of all conversation state.
//!
//! `OverlayHost` ties the log, the autopilot and the active relay together.
//! A front-end calls [`OverlayHost::tick`] on a fixed cadence and forwards
//! user actions to the other methods. Autopilot fires are queued by the
//! scheduler thread and only handled inside `tick`.

use parking_lot::Mutex;
use providers::Transport;
use shared::agent_api::{Attachment, Turn, TurnId};
use shared::settings::{persona_preset, OverlaySettings};
use shared::{OverlayError, OverlayResult};
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Instant;
use zeroize::Zeroizing;

use crate::autopilot::{Autopilot, AutopilotFire};
use crate::context::{CaptureProvider, ContextProvider};
use crate::conversation::ConversationLog;
use crate::interval::IntervalSequence;
use crate::prompts::{CONTEXT_SHARING_DISABLED, OBSERVATION_PROMPT};
use crate::relay::{ChunkRelay, PresentationSink, RelayStatus};
use crate::session::{SessionConfig, SessionRequest, StreamSession};
use crate::typewriter::RevealPacing;

/// A stream that settled during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub turn: TurnId,
    pub succeeded: bool,
}

/// What the host did with an autopilot fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireDecision {
    /// An observation turn was injected and a stream started.
    Observed(TurnId),
    /// The user interacted recently; the timer was rewound.
    Cooldown,
    /// A stream was already running; the timer was rewound.
    Busy,
    /// The fire arrived after the autopilot was switched off.
    Stale,
}

pub struct OverlayHost {
    settings: OverlaySettings,
    log: ConversationLog,
    autopilot: Autopilot,
    fires: Receiver<AutopilotFire>,
    relay: Option<ChunkRelay>,
    transport: Arc<dyn Transport>,
    context: Box<dyn ContextProvider>,
    capture: Option<Box<dyn CaptureProvider>>,
    api_key: Zeroizing<String>,
    pacing: RevealPacing,
    last_interaction: Instant,
    visible: bool,
}

impl OverlayHost {
    /// Build a host from validated settings. Starts the autopilot when the
    /// settings enable it.
    pub fn new(
        settings: OverlaySettings,
        transport: Arc<dyn Transport>,
        api_key: Zeroizing<String>,
        context: Box<dyn ContextProvider>,
    ) -> OverlayResult<Self> {
        settings.validate()?;
        let intervals = IntervalSequence::from_secs(&settings.autopilot_intervals)?;

        let (fire_tx, fires) = mpsc::channel();
        let fire_tx = Mutex::new(fire_tx);
        let autopilot = Autopilot::new(
            intervals,
            Arc::new(move |fire: AutopilotFire| fire_tx.lock().send(fire).is_ok()),
        );

        let mut host = Self {
            settings,
            log: ConversationLog::new(),
            autopilot,
            fires,
            relay: None,
            transport,
            context,
            capture: None,
            api_key,
            pacing: RevealPacing::default(),
            last_interaction: Instant::now(),
            visible: true,
        };
        if host.settings.autopilot_enabled {
            host.autopilot.start()?;
        }
        Ok(host)
    }

    pub fn with_capture(mut self, capture: Box<dyn CaptureProvider>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn with_pacing(mut self, pacing: RevealPacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn settings(&self) -> &OverlaySettings {
        &self.settings
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn autopilot(&self) -> &Autopilot {
        &self.autopilot
    }

    pub fn is_busy(&self) -> bool {
        self.relay.is_some()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Any user interaction: typing, clicking, showing the overlay.
    pub fn record_activity(&mut self) {
        self.last_interaction = Instant::now();
        self.autopilot.reset_timer();
    }

    /// Append a user turn and start streaming the reply.
    /// Returns the id of the open model turn.
    pub fn submit_user_turn(
        &mut self,
        text: &str,
        attachment: Option<Attachment>,
    ) -> OverlayResult<TurnId> {
        if self.is_busy() {
            return Err(OverlayError::Busy);
        }
        let text = text.trim();
        if text.is_empty() && attachment.is_none() {
            return Err(OverlayError::InvalidTurn("message is empty".into()));
        }
        self.record_activity();

        let mut turn = Turn::user(text);
        if let Some(att) = &attachment {
            turn = turn.with_attachment(att.clone());
        }
        self.log.push(turn)?;
        self.start_stream(attachment)
    }

    fn active_context(&self) -> String {
        if self.settings.share_context {
            self.context.active_context()
        } else {
            CONTEXT_SHARING_DISABLED.to_string()
        }
    }

    fn start_stream(&mut self, attachment: Option<Attachment>) -> OverlayResult<TurnId> {
        let turn = self.log.open_model_turn()?;
        let config = SessionConfig {
            api_key: self.api_key.clone(),
            model: self.settings.model.clone(),
            persona: self.settings.persona.clone(),
        };
        let request = SessionRequest {
            history: self.log.snapshot(),
            attachment,
            context: self.active_context(),
        };
        match StreamSession::start(self.transport.clone(), &config, request) {
            Ok(session) => {
                self.relay = Some(ChunkRelay::new(session, turn, self.pacing));
                Ok(turn)
            }
            Err(e) => {
                self.log.finalize(turn, format!("Error: {}", e))?;
                Err(e)
            }
        }
    }

    /// Advance the host by one presentation tick: handle queued autopilot
    /// fires, then drain and reveal the active stream.
    pub fn tick(&mut self, sink: &mut dyn PresentationSink) -> OverlayResult<Option<Completion>> {
        while let Ok(fire) = self.fires.try_recv() {
            self.on_autopilot_fire(fire);
        }

        let Some(relay) = self.relay.as_mut() else {
            return Ok(None);
        };
        let status = match relay.tick(&mut self.log, sink) {
            Ok(status) => status,
            Err(e) => {
                relay.cancel();
                self.relay = None;
                tracing::error!(error = %e, "dropping stream after relay failure");
                return Err(e);
            }
        };
        match status {
            RelayStatus::Waiting => Ok(None),
            RelayStatus::Revealing => {
                if !self.visible {
                    self.visible = true;
                    sink.on_visibility_changed(true);
                }
                Ok(None)
            }
            RelayStatus::Finished { turn, succeeded } => {
                self.relay = None;
                // Failures are shown even when the overlay was hidden.
                if !succeeded && !self.visible {
                    self.visible = true;
                    sink.on_visibility_changed(true);
                }
                Ok(Some(Completion { turn, succeeded }))
            }
        }
    }

    /// Decide what to do with one autopilot expiry.
    pub fn on_autopilot_fire(&mut self, fire: AutopilotFire) -> FireDecision {
        if !self.autopilot.is_running() {
            tracing::debug!(sequence = fire.sequence, "ignoring fire from stopped autopilot");
            return FireDecision::Stale;
        }
        if self.last_interaction.elapsed() < self.settings.cooldown() {
            tracing::info!(sequence = fire.sequence, "autopilot fire within cooldown, rewinding");
            self.autopilot.reset_timer();
            return FireDecision::Cooldown;
        }
        if self.is_busy() {
            tracing::info!(sequence = fire.sequence, "autopilot fire while streaming, rewinding");
            self.autopilot.reset_timer();
            return FireDecision::Busy;
        }

        let attachment = self.capture.as_ref().and_then(|c| match c.capture() {
            Ok(att) => Some(att),
            Err(e) => {
                tracing::warn!(error = %e, "screen capture failed, observing without image");
                None
            }
        });
        let mut observation = Turn::observation(OBSERVATION_PROMPT);
        if let Some(att) = &attachment {
            observation = observation.with_attachment(att.clone());
        }

        tracing::info!(
            sequence = fire.sequence,
            interval_secs = fire.interval.as_secs(),
            "autopilot observing"
        );
        let started = self
            .log
            .push(observation)
            .and_then(|_| self.start_stream(attachment));
        match started {
            Ok(turn) => FireDecision::Observed(turn),
            Err(e) => {
                tracing::warn!(error = %e, "autopilot could not start a stream");
                self.autopilot.reset_timer();
                FireDecision::Busy
            }
        }
    }

    /// Abort the active stream. It still finalizes through `tick`.
    pub fn cancel_stream(&mut self) -> bool {
        match self.relay.as_mut() {
            Some(relay) => {
                relay.cancel();
                true
            }
            None => false,
        }
    }

    /// Hiding never cancels a stream; new text brings the overlay back.
    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        if visible {
            self.record_activity();
        }
    }

    /// Validate and adopt new settings, updating the autopilot in place.
    pub fn apply_settings(&mut self, settings: OverlaySettings) -> OverlayResult<()> {
        settings.validate()?;
        let intervals = IntervalSequence::from_secs(&settings.autopilot_intervals)?;
        if settings.autopilot_intervals != self.settings.autopilot_intervals {
            self.autopilot.reconfigure(intervals);
        }
        match (settings.autopilot_enabled, self.autopilot.is_running()) {
            (true, false) => self.autopilot.start()?,
            (false, true) => self.autopilot.stop(),
            _ => {}
        }
        tracing::info!(model = %settings.model, autopilot = settings.autopilot_enabled, "settings applied");
        self.settings = settings;
        Ok(())
    }

    pub fn set_autopilot_enabled(&mut self, enabled: bool) -> OverlayResult<()> {
        let mut settings = self.settings.clone();
        settings.autopilot_enabled = enabled;
        self.apply_settings(settings)
    }

    /// Switch to a named persona preset.
    pub fn set_persona(&mut self, preset: &str) -> OverlayResult<()> {
        let persona = persona_preset(preset)
            .ok_or_else(|| OverlayError::Config(format!("unknown persona '{}'", preset)))?;
        let mut settings = self.settings.clone();
        settings.persona = persona.to_string();
        self.apply_settings(settings)
    }

    pub fn set_pinned(&mut self, turn: TurnId, pinned: bool) -> OverlayResult<()> {
        self.log.set_pinned(turn, pinned)
    }

    pub fn clear_chat(&mut self) -> OverlayResult<()> {
        self.log.clear()?;
        self.record_activity();
        Ok(())
    }

    pub fn save_chat(&self, path: &Path) -> OverlayResult<()> {
        self.log.save_json(path)
    }

    /// Replace the log with a saved chat. Refused while streaming.
    pub fn load_chat(&mut self, path: &Path) -> OverlayResult<()> {
        if self.is_busy() {
            return Err(OverlayError::Busy);
        }
        self.log = ConversationLog::load_json(path)?;
        self.record_activity();
        Ok(())
    }

    /// Stop the autopilot and abort any stream.
    pub fn shutdown(&mut self) {
        self.cancel_stream();
        self.autopilot.stop();
    }
}

impl Drop for OverlayHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}
