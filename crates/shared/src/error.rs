//! Error taxonomy shared by every crate in the workspace.

/// Typed failures surfaced to the host.
///
/// Stream workers never return these across the channel boundary; they encode
/// failures as `StreamChunk::Error` instead.
#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    /// Missing or invalid credential, malformed interval settings.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection failure, timeout, non-2xx response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A single malformed server-sent unit.
    #[error("Malformed stream unit: {0}")]
    Decode(String),

    /// Internal failure of the autopilot loop.
    #[error("Autopilot fault: {0}")]
    SchedulerFault(String),

    #[error("A response is still streaming")]
    Busy,

    #[error("Invalid turn: {0}")]
    InvalidTurn(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type OverlayResult<T> = Result<T, OverlayError>;
