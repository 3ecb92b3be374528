//! Conversation, streaming and autopilot core of the overlay.
//!
//! Everything here except the worker and autopilot threads is meant to be
//! driven from one presentation thread through [`OverlayHost`].

pub mod autopilot;
pub mod context;
pub mod conversation;
pub mod host;
pub mod interval;
pub mod prompts;
pub mod relay;
pub mod session;
pub mod typewriter;

pub use autopilot::{Autopilot, AutopilotFire, FireCallback};
pub use context::{ActiveWindowContext, CaptureProvider, CommandCapture, ContextProvider, StaticContext};
pub use conversation::ConversationLog;
pub use host::{Completion, FireDecision, OverlayHost};
pub use interval::IntervalSequence;
pub use relay::{ChunkRelay, PresentationSink, RelayStatus, TICK_INTERVAL};
pub use session::{SessionConfig, SessionRequest, StreamSession};
pub use typewriter::{RevealPacing, TypewriterBuffer};
