//! Groq (OpenAI-compatible chat completions) provider with SSE streaming

use crate::provider::{LlmError, LlmProvider, LlmResult, LlmStream};
use crate::types::{LlmRequest, StreamDelta, Usage};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const DEFAULT_RETRY_AFTER_MS: u64 = 60_000;

pub struct GroqProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GroqProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: GROQ_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn build_body(request: &LlmRequest) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(ChatMessage { role: "system".into(), content: system.clone() });
        }
        messages.extend(request.messages.iter().map(|m| ChatMessage {
            role: m.role.clone(),
            content: m.content.clone(),
        }));
        ChatCompletionRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: true,
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for GroqProvider {
    fn name(&self) -> &str { "groq" }

    async fn complete_stream(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream> {
        let body = Self::build_body(&request);
        debug!("Groq request: model={} messages={}", body.model, body.messages.len());

        let send = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        let response = match &cancel {
            Some(token) => tokio::select! {
                r = send => r?,
                _ = token.cancelled() => return Err(LlmError::Cancelled),
            },
            None => send.await?,
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(DEFAULT_RETRY_AFTER_MS);
            let error_text = response.text().await.unwrap_or_default();
            error!("Groq error {}: {}", status, error_text);
            return Err(classify_status(status.as_u16(), error_text, retry_after_ms));
        }

        let stream = parse_sse_stream(response.bytes_stream(), cancel.unwrap_or_default());
        Ok(Box::pin(stream))
    }
}

/// Map a non-success HTTP status to an error with the right retry semantics.
pub fn classify_status(status: u16, body: String, retry_after_ms: u64) -> LlmError {
    match status {
        401 | 403 => LlmError::AuthFailed(body),
        429 => LlmError::RateLimited { retry_after_ms },
        408 | 500..=599 => LlmError::RequestFailed(format!("{}: {}", status, body)),
        _ => LlmError::Rejected { status, message: body },
    }
}

/// Parse `data:` lines of an OpenAI-style event stream.
pub fn parse_sse_stream(
    bytes_stream: impl futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    cancel: CancellationToken,
) -> impl futures::Stream<Item = LlmResult<StreamDelta>> + Send {
    async_stream::stream! {
        let mut buffer = String::new();
        let mut stop_reason: Option<String> = None;
        let mut usage: Option<Usage> = None;
        let mut finished = false;

        tokio::pin!(bytes_stream);

        while !finished {
            let chunk = tokio::select! {
                c = bytes_stream.next() => c,
                _ = cancel.cancelled() => {
                    yield Err(LlmError::Cancelled);
                    return;
                }
            };
            let chunk = match chunk {
                Some(Ok(c)) => c,
                Some(Err(e)) => {
                    yield Err(LlmError::StreamError(e.to_string()));
                    return;
                }
                None => break,
            };

            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer.drain(..=line_end);

                let Some(data) = line.strip_prefix("data:").map(str::trim) else { continue };
                if data.is_empty() { continue; }
                if data == "[DONE]" {
                    finished = true;
                    break;
                }

                let parsed: ChatCompletionChunk = match serde_json::from_str(data) {
                    Ok(p) => p,
                    Err(e) => {
                        yield Err(LlmError::InvalidResponse(format!("bad chunk: {}", e)));
                        return;
                    }
                };
                if let Some(err) = parsed.error {
                    yield Err(LlmError::StreamError(err.message));
                    return;
                }
                if let Some(u) = parsed.usage.or(parsed.x_groq.and_then(|x| x.usage)) {
                    usage = Some(u);
                }
                for choice in parsed.choices {
                    if let Some(text) = choice.delta.content {
                        if !text.is_empty() {
                            yield Ok(StreamDelta::Text(text));
                        }
                    }
                    if let Some(reason) = choice.finish_reason {
                        debug!("Completion finished: finish_reason={}", reason);
                        stop_reason = Some(reason);
                    }
                }
            }
        }

        if !finished && stop_reason.is_none() {
            yield Err(LlmError::StreamError("stream ended before completion".into()));
            return;
        }
        yield Ok(StreamDelta::Done { stop_reason, usage });
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    x_groq: Option<GroqExtension>,
    #[serde(default)]
    error: Option<ErrorDetail>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct GroqExtension {
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LlmMessage;

    fn chunks(parts: &[&str]) -> impl futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static {
        let owned: Vec<Result<bytes::Bytes, reqwest::Error>> = parts
            .iter()
            .map(|p| Ok(bytes::Bytes::from(p.to_string())))
            .collect();
        futures::stream::iter(owned)
    }

    #[test]
    fn body_puts_system_first() {
        let req = LlmRequest {
            system: Some("be terse".into()),
            messages: vec![LlmMessage::user("hi")],
            ..Default::default()
        };
        let body = GroqProvider::build_body(&req);
        assert_eq!(body.messages[0].role, "system");
        assert_eq!(body.messages[1].content, "hi");
        assert!(body.stream);
    }

    #[test]
    fn status_classification() {
        assert!(matches!(classify_status(401, "no".into(), 0), LlmError::AuthFailed(_)));
        assert!(matches!(classify_status(429, "".into(), 5), LlmError::RateLimited { retry_after_ms: 5 }));
        assert!(classify_status(503, "".into(), 0).is_transient());
        assert!(!classify_status(400, "".into(), 0).is_transient());
    }

    #[tokio::test]
    async fn parses_split_chunks() {
        let stream = parse_sse_stream(
            chunks(&[
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi",
                "ces\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}],\"x_groq\":{\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2}}}\n\n",
                "data: [DONE]\n\n",
            ]),
            CancellationToken::new(),
        );
        let deltas: Vec<_> = stream.collect().await;
        let deltas: Vec<StreamDelta> = deltas.into_iter().map(|d| d.unwrap()).collect();
        assert_eq!(deltas[0], StreamDelta::Text("Hel".into()));
        assert_eq!(deltas[1], StreamDelta::Text("lo".into()));
        match &deltas[2] {
            StreamDelta::Done { stop_reason, usage } => {
                assert_eq!(stop_reason.as_deref(), Some("stop"));
                assert_eq!(usage.as_ref().unwrap().output_tokens, 2);
            }
            other => panic!("expected Done, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn truncated_stream_is_error() {
        let stream = parse_sse_stream(
            chunks(&["data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n"]),
            CancellationToken::new(),
        );
        let deltas: Vec<_> = stream.collect().await;
        assert!(matches!(deltas.last(), Some(Err(LlmError::StreamError(_)))));
    }

    #[tokio::test]
    async fn cancelled_stream_yields_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let stream = parse_sse_stream(futures::stream::pending::<Result<bytes::Bytes, reqwest::Error>>(), token);
        let deltas: Vec<_> = stream.collect().await;
        assert_eq!(deltas.len(), 1);
        assert!(matches!(deltas[0], Err(LlmError::Cancelled)));
    }
}
