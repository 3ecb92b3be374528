use anyhow::Result;
use async_trait::async_trait;
use shared::agent_api::{Attachment, StreamChunk, Turn};
use tokio::sync::mpsc::UnboundedSender;
use zeroize::Zeroizing;

/// Everything a transport needs for one streaming generation call.
///
/// `history` is an owned snapshot taken at submission time, so the host may
/// keep mutating its log while the request is in flight.
#[derive(Clone)]
pub struct GenerateRequest {
    pub api_key: Zeroizing<String>,
    pub model: String,
    pub history: Vec<Turn>,
    pub system_instruction: String,
    pub attachment: Option<Attachment>,
}

impl std::fmt::Debug for GenerateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerateRequest")
            .field("model", &self.model)
            .field("history_len", &self.history.len())
            .field("has_attachment", &self.attachment.is_some())
            .finish_non_exhaustive()
    }
}

/// A streaming text-generation backend.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Stream text deltas for `request` onto `tx`, in arrival order.
    ///
    /// Contract: if the call fails *before* any chunk is sent, returns
    /// `Err(...)`. Once streaming starts, failures go through
    /// `StreamChunk::Error` and the method returns `Ok(())`. A successful
    /// stream ends with `StreamChunk::Done`.
    async fn stream_generate(
        &self,
        request: GenerateRequest,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<()>;
}
