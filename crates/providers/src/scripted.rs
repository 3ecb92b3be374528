//! In-process transport that replays a fixed script of chunks.
//!
//! Used by the offline demo mode of the terminal front-end and by tests that
//! need a deterministic stream.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use shared::agent_api::StreamChunk;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::transport::{GenerateRequest, Transport};

/// What happens after the scripted chunks have been sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEnd {
    /// Send `StreamChunk::Done`.
    Done,
    /// Send nothing and keep the stream open until the caller aborts it.
    Stall,
    /// Fail before sending anything, like a refused connection.
    FailBeforeStream(String),
}

pub struct ScriptedTransport {
    chunks: Vec<StreamChunk>,
    end: ScriptEnd,
    delay: Duration,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedTransport {
    /// Stream `deltas` as text chunks, then `Done`.
    pub fn deltas<S: Into<String>>(deltas: impl IntoIterator<Item = S>) -> Self {
        Self::chunks(
            deltas.into_iter().map(|d| StreamChunk::Text(d.into())),
            ScriptEnd::Done,
        )
    }

    pub fn chunks(chunks: impl IntoIterator<Item = StreamChunk>, end: ScriptEnd) -> Self {
        Self {
            chunks: chunks.into_iter().collect(),
            end,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Pause between chunks, to look like a network stream.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_generate(
        &self,
        request: GenerateRequest,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<()> {
        self.requests.lock().push(request);

        if let ScriptEnd::FailBeforeStream(reason) = &self.end {
            return Err(anyhow!(reason.clone()));
        }

        for chunk in &self.chunks {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let terminal = chunk.is_terminal();
            if tx.send(chunk.clone()).is_err() || terminal {
                return Ok(());
            }
        }

        match self.end {
            ScriptEnd::Stall => futures::future::pending::<()>().await,
            _ => {
                let _ = tx.send(StreamChunk::Done { stop_reason: None });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::agent_api::Turn;
    use zeroize::Zeroizing;

    fn request() -> GenerateRequest {
        GenerateRequest {
            api_key: Zeroizing::new(String::new()),
            model: "test".into(),
            history: vec![Turn::user("hello")],
            system_instruction: String::new(),
            attachment: None,
        }
    }

    #[tokio::test]
    async fn test_replays_deltas_then_done() {
        let transport = ScriptedTransport::deltas(["Hi", " there"]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        transport.stream_generate(request(), tx).await.unwrap();

        assert_eq!(rx.recv().await, Some(StreamChunk::Text("Hi".into())));
        assert_eq!(rx.recv().await, Some(StreamChunk::Text(" there".into())));
        assert_eq!(rx.recv().await, Some(StreamChunk::Done { stop_reason: None }));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_error_is_terminal() {
        let transport = ScriptedTransport::chunks(
            [
                StreamChunk::Text("partial".into()),
                StreamChunk::Error("Error: boom".into()),
            ],
            ScriptEnd::Done,
        );
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        transport.stream_generate(request(), tx).await.unwrap();

        assert_eq!(rx.recv().await, Some(StreamChunk::Text("partial".into())));
        assert_eq!(rx.recv().await, Some(StreamChunk::Error("Error: boom".into())));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_fail_before_stream() {
        let transport =
            ScriptedTransport::chunks([], ScriptEnd::FailBeforeStream("refused".into()));
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let err = transport.stream_generate(request(), tx).await.unwrap_err();
        assert_eq!(err.to_string(), "refused");
    }
}
