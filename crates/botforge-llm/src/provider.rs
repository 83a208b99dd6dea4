//! LLM Provider trait

use crate::types::{Completion, LlmRequest, StreamDelta};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// LLM error types
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl LlmError {
    /// Whether repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(_)
            | Self::RateLimited { .. }
            | Self::InvalidResponse(_)
            | Self::StreamError(_) => true,
            Self::Rejected { .. } | Self::AuthFailed(_) | Self::Cancelled => false,
            Self::NetworkError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        }
    }
}

/// Stream type for LLM responses
pub type LlmStream = Pin<Box<dyn Stream<Item = LlmResult<StreamDelta>> + Send>>;

/// LLM Provider trait
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Stream a completion response. If `cancel` is provided and triggered,
    /// the underlying HTTP connection is dropped and the stream yields `LlmError::Cancelled`.
    async fn complete_stream(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream>;

    /// Drain the stream into a single [`Completion`].
    async fn complete(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<Completion> {
        let mut stream = self.complete_stream(request, cancel).await?;
        let mut completion = Completion::default();
        while let Some(delta) = stream.next().await {
            match delta? {
                StreamDelta::Text(t) => completion.text.push_str(&t),
                StreamDelta::Done { stop_reason, usage } => {
                    completion.stop_reason = stop_reason;
                    completion.usage = usage;
                }
                StreamDelta::Error(e) => return Err(LlmError::StreamError(e)),
            }
        }
        Ok(completion)
    }
}
