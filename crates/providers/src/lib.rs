//! Streaming generation backends.

pub mod gemini;
pub mod scripted;
pub mod sse;
pub mod transport;

pub use gemini::GeminiClient;
pub use scripted::{ScriptEnd, ScriptedTransport};
pub use transport::{GenerateRequest, Transport};
