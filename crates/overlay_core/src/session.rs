//! One in-flight generation request.
//!
//! A session owns a single worker thread that runs the transport on its own
//! runtime and the receiving end of the channel the worker writes to. The
//! worker is the only producer; whoever holds the session is the only consumer.

use futures::future::{AbortHandle, AbortRegistration, Abortable};
use providers::{GenerateRequest, Transport};
use shared::agent_api::{Attachment, StreamChunk, Turn};
use shared::{OverlayError, OverlayResult};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::prompts;

/// Text pushed when a session is cancelled mid-stream.
pub const CANCELLED_MESSAGE: &str = "Error: Response cancelled.";

/// Per-request settings that do not come from the conversation.
#[derive(Clone)]
pub struct SessionConfig {
    pub api_key: Zeroizing<String>,
    pub model: String,
    pub persona: String,
}

/// Inputs captured at submission time.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Owned copy of the settled log, taken before the model turn opened.
    pub history: Vec<Turn>,
    pub attachment: Option<Attachment>,
    /// Free-form description of what the user is doing.
    pub context: String,
}

pub struct StreamSession {
    id: Uuid,
    rx: UnboundedReceiver<StreamChunk>,
    abort: AbortHandle,
    cancelled: bool,
    finished: bool,
}

impl StreamSession {
    /// Spawn the worker and return immediately.
    pub fn start(
        transport: Arc<dyn Transport>,
        config: &SessionConfig,
        request: SessionRequest,
    ) -> OverlayResult<Self> {
        let id = Uuid::new_v4();
        let proactive = request
            .history
            .last()
            .map(|t| t.observation)
            .unwrap_or(false);
        let generate = GenerateRequest {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            system_instruction: prompts::system_instruction(
                &config.persona,
                &request.context,
                proactive,
            ),
            history: request.history,
            attachment: request.attachment,
        };

        let (tx, rx) = unbounded_channel();
        let (abort, registration) = AbortHandle::new_pair();
        thread::Builder::new()
            .name(format!("stream-{}", id.simple()))
            .spawn(move || run_worker(transport, generate, tx, registration))
            .map_err(|e| OverlayError::Transport(format!("failed to spawn stream worker: {}", e)))?;

        tracing::info!(session = %id, proactive, "stream session started");
        Ok(Self {
            id,
            rx,
            abort,
            cancelled: false,
            finished: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Non-blocking poll for the next chunk.
    ///
    /// After a terminal chunk has been returned this always yields `None`.
    /// A worker that vanished without a terminal chunk surfaces as an error.
    pub fn try_next(&mut self) -> Option<StreamChunk> {
        if self.finished {
            return None;
        }
        let chunk = match self.rx.try_recv() {
            Ok(chunk) => chunk,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => {
                StreamChunk::Error("Error: The response stream ended unexpectedly.".into())
            }
        };
        if chunk.is_terminal() {
            self.finished = true;
        }
        Some(chunk)
    }

    /// Abort the worker's I/O. The worker then pushes an error chunk so the
    /// consumer still sees a terminal item.
    pub fn cancel(&mut self) {
        if !self.cancelled && !self.finished {
            tracing::info!(session = %self.id, "cancelling stream session");
            self.cancelled = true;
            self.abort.abort();
        }
    }
}

fn run_worker(
    transport: Arc<dyn Transport>,
    request: GenerateRequest,
    tx: UnboundedSender<StreamChunk>,
    registration: AbortRegistration,
) {
    let tx_panic = tx.clone();
    let res = panic::catch_unwind(AssertUnwindSafe(|| {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                let _ = tx.send(StreamChunk::Error(format!(
                    "Error: Failed to start async runtime: {}",
                    e
                )));
                return;
            }
        };

        let streamed = rt.block_on(Abortable::new(
            transport.stream_generate(request, tx.clone()),
            registration,
        ));
        match streamed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(transport = transport.name(), error = %e, "stream request failed");
                let _ = tx.send(StreamChunk::Error(format!("Error: {}", e)));
            }
            Err(_aborted) => {
                let _ = tx.send(StreamChunk::Error(CANCELLED_MESSAGE.into()));
            }
        }
    }));
    if res.is_err() {
        tracing::error!("stream worker panicked");
        let _ = tx_panic.send(StreamChunk::Error(
            "Error: Something went wrong while generating that response. Please try again.".into(),
        ));
    }
}
