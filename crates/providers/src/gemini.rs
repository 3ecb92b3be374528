use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::agent_api::{Role, StreamChunk, Turn};
use shared::OverlayError;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::sse::SseParser;
use crate::transport::{GenerateRequest, Transport};

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const MAX_OUTPUT_TOKENS: u32 = 1024;
const TEMPERATURE: f32 = 1.0;

// ── Request types ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    system_instruction: GeminiSystemInstruction,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    temperature: f32,
}

// ── Streaming response types ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GeminiStreamResponse {
    #[serde(default)]
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiCandidateContent>,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiCandidatePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidatePart {
    #[serde(default)]
    text: Option<String>,
}

/// Text and finish reason carried by one decoded SSE unit.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct DecodedUnit {
    pub text: Option<String>,
    pub finish_reason: Option<String>,
}

// ── Conversion ───────────────────────────────────────────────────────

/// Accept both `models/gemini-...` and `gemini-...` identifiers.
pub fn normalize_model_id(model: &str) -> &str {
    let model = model.trim();
    model.strip_prefix("models/").unwrap_or(model)
}

/// Build the wire request. System-role turns are local feedback and never
/// leave the machine; the attachment rides on the last user turn.
fn to_gemini_request(request: &GenerateRequest) -> GeminiRequest {
    let mut contents: Vec<GeminiContent> = request
        .history
        .iter()
        .filter(|t| t.role != Role::System)
        .map(|t: &Turn| GeminiContent {
            role: t.role.as_str().to_string(),
            parts: vec![GeminiPart::Text {
                text: t.text.clone(),
            }],
        })
        .collect();

    if let Some(attachment) = &request.attachment {
        if let Some(last_user) = contents.iter_mut().rev().find(|c| c.role == "user") {
            last_user.parts.push(GeminiPart::InlineData {
                inline_data: InlineData {
                    mime_type: attachment.mime_type.clone(),
                    data: STANDARD.encode(&attachment.data),
                },
            });
        }
    }

    GeminiRequest {
        contents,
        system_instruction: GeminiSystemInstruction {
            parts: vec![GeminiPart::Text {
                text: request.system_instruction.clone(),
            }],
        },
        generation_config: GenerationConfig {
            max_output_tokens: MAX_OUTPUT_TOKENS,
            temperature: TEMPERATURE,
        },
    }
}

/// Decode one SSE `data:` payload.
///
/// Units without candidates (usage metadata, prompt feedback) decode to an
/// empty unit; unparseable payloads are a `Decode` error for the caller to skip.
pub(crate) fn decode_unit(data: &str) -> Result<DecodedUnit, OverlayError> {
    let parsed: GeminiStreamResponse =
        serde_json::from_str(data).map_err(|e| OverlayError::Decode(e.to_string()))?;
    let Some(candidate) = parsed.candidates.and_then(|c| c.into_iter().next()) else {
        return Ok(DecodedUnit::default());
    };
    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    Ok(DecodedUnit {
        text: (!text.is_empty()).then_some(text),
        finish_reason: candidate.finish_reason,
    })
}

fn describe_request_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "The request to the API timed out.".to_string()
    } else if err.is_connect() {
        "Could not connect to the API. Please check your internet connection.".to_string()
    } else {
        format!("An unexpected API request error occurred: {}", err)
    }
}

// ── Client ───────────────────────────────────────────────────────────

pub struct GeminiClient {
    http: Client,
    base_url: String,
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiClient {
    pub fn new() -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url,
            normalize_model_id(model)
        )
    }
}

#[async_trait]
impl Transport for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn stream_generate(
        &self,
        request: GenerateRequest,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<()> {
        let api_key = request.api_key.trim();
        if api_key.is_empty() {
            return Err(anyhow!("Gemini API key is missing."));
        }
        if request.history.is_empty() {
            return Err(anyhow!("Conversation history is empty."));
        }

        let url = self.stream_url(&request.model);
        tracing::debug!(model = normalize_model_id(&request.model), "requesting stream");
        let body = to_gemini_request(&request);
        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!(describe_request_error(&e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let detail: String = body.chars().take(800).collect();
            let summary = format!(
                "API returned an HTTP error: {}. Check your API key and model name.",
                status
            );
            if detail.trim().is_empty() {
                return Err(anyhow!(summary));
            }
            return Err(anyhow!("{}\n{}", summary, detail.trim()));
        }

        let mut parser = SseParser::new();
        let mut stream = resp.bytes_stream();
        let mut stop_reason: Option<String> = None;

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = tx.send(StreamChunk::Error(format!(
                        "Error: {}",
                        describe_request_error(&e)
                    )));
                    return Ok(());
                }
            };
            for event in parser.feed(&bytes) {
                if !forward_event(&event.data, &tx, &mut stop_reason) {
                    // Relay is gone; nobody is listening any more.
                    return Ok(());
                }
            }
        }
        if let Some(event) = parser.finish() {
            forward_event(&event.data, &tx, &mut stop_reason);
        }

        let _ = tx.send(StreamChunk::Done { stop_reason });
        Ok(())
    }
}

/// Push the text of one SSE unit. Returns `false` once the receiver is closed.
fn forward_event(
    data: &str,
    tx: &UnboundedSender<StreamChunk>,
    stop_reason: &mut Option<String>,
) -> bool {
    match decode_unit(data) {
        Ok(unit) => {
            if unit.finish_reason.is_some() {
                *stop_reason = unit.finish_reason;
            }
            match unit.text {
                Some(text) => tx.send(StreamChunk::Text(text)).is_ok(),
                None => !tx.is_closed(),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed chunk from API stream");
            !tx.is_closed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::agent_api::Attachment;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use zeroize::Zeroizing;

    /// Serve one canned HTTP/1.1 response on a local port. The handle yields
    /// the request head the client sent.
    async fn serve_once(
        status: &'static str,
        content_type: &'static str,
        body: &'static str,
    ) -> (GeminiClient, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let head_end = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "client closed before sending headers");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
            let content_length = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            while buf.len() < head_end + content_length {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                content_type,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            head
        });

        let client = GeminiClient {
            http: Client::builder().no_proxy().build().unwrap(),
            base_url: format!("http://{}", addr),
        };
        (client, handle)
    }

    fn request(history: Vec<Turn>, attachment: Option<Attachment>) -> GenerateRequest {
        GenerateRequest {
            api_key: Zeroizing::new("key".to_string()),
            model: "models/gemini-2.5-flash".into(),
            history,
            system_instruction: "Be brief.".into(),
            attachment,
        }
    }

    #[test]
    fn test_normalize_model_id() {
        assert_eq!(normalize_model_id("models/gemini-2.5-flash"), "gemini-2.5-flash");
        assert_eq!(normalize_model_id(" gemini-pro "), "gemini-pro");
    }

    #[test]
    fn test_stream_url() {
        let client = GeminiClient::with_base_url("http://localhost:9000/");
        assert_eq!(
            client.stream_url("models/gemini-2.5-flash"),
            "http://localhost:9000/v1beta/models/gemini-2.5-flash:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn test_request_skips_system_turns_and_attaches_to_last_user() {
        let history = vec![
            Turn::user("first"),
            Turn::model("reply"),
            Turn::system("Chat saved!"),
            Turn::user("second"),
        ];
        let req = request(history, Some(Attachment::png("shot", vec![0xde, 0xad])));
        let json = serde_json::to_value(to_gemini_request(&req)).unwrap();

        let contents = json["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["parts"][1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(contents[2]["parts"][1]["inline_data"]["data"], "3q0=");
        assert!(contents[0]["parts"].as_array().unwrap().len() == 1);
        assert_eq!(json["system_instruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn test_decode_text_unit() {
        let unit = decode_unit(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hi"},{"text":" there"}],"role":"model"}}]}"#,
        )
        .unwrap();
        assert_eq!(unit.text.as_deref(), Some("Hi there"));
        assert!(unit.finish_reason.is_none());
    }

    #[test]
    fn test_decode_finish_and_metadata_units() {
        let unit = decode_unit(
            r#"{"candidates":[{"content":{"parts":[{"text":""}]},"finishReason":"STOP"}]}"#,
        )
        .unwrap();
        assert_eq!(unit.text, None);
        assert_eq!(unit.finish_reason.as_deref(), Some("STOP"));

        let meta = decode_unit(r#"{"usageMetadata":{"totalTokenCount":12}}"#).unwrap();
        assert_eq!(meta, DecodedUnit::default());
    }

    #[test]
    fn test_decode_malformed_unit_is_decode_error() {
        let err = decode_unit("{not json").unwrap_err();
        assert!(matches!(err, OverlayError::Decode(_)));
    }

    #[test]
    fn test_forward_event_skips_malformed_and_keeps_going() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut stop = None;
        assert!(forward_event("garbage", &tx, &mut stop));
        assert!(forward_event(
            r#"{"candidates":[{"content":{"parts":[{"text":"ok"}]}}]}"#,
            &tx,
            &mut stop
        ));
        assert_eq!(rx.try_recv().unwrap(), StreamChunk::Text("ok".into()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_streaming() {
        let client = GeminiClient::new();
        let mut req = request(vec![Turn::user("hello")], None);
        req.api_key = Zeroizing::new("  ".to_string());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let err = client.stream_generate(req, tx).await.unwrap_err();
        assert!(err.to_string().contains("API key is missing"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_streams_text_and_skips_malformed_unit() {
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hello\"}]}}]}\n\n",
            "data: {not json\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\" world\"}]},\"finishReason\":\"STOP\"}]}",
        );
        let (client, server) = serve_once("200 OK", "text/event-stream", body).await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        client
            .stream_generate(request(vec![Turn::user("hi")], None), tx)
            .await
            .unwrap();

        let mut chunks = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            chunks.push(chunk);
        }
        assert_eq!(
            chunks,
            vec![
                StreamChunk::Text("Hello".into()),
                StreamChunk::Text(" world".into()),
                StreamChunk::Done {
                    stop_reason: Some("STOP".into())
                },
            ]
        );

        let head = server.await.unwrap();
        assert!(head.starts_with(
            "POST /v1beta/models/gemini-2.5-flash:streamGenerateContent?alt=sse HTTP/1.1"
        ));
        assert!(head.to_ascii_lowercase().contains("x-goog-api-key: key"));
    }

    #[tokio::test]
    async fn test_http_error_status_is_reported() {
        let (client, server) = serve_once(
            "403 Forbidden",
            "application/json",
            r#"{"error":{"message":"API key not valid"}}"#,
        )
        .await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let err = client
            .stream_generate(request(vec![Turn::user("hi")], None), tx)
            .await
            .unwrap_err()
            .to_string();

        assert!(err.contains("HTTP error: 403"), "{}", err);
        assert!(err.contains("API key not valid"));
        assert!(rx.try_recv().is_err());
        server.await.unwrap();
    }
}
