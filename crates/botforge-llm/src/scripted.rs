//! ScriptedProvider: deterministic responses for offline runs and tests
//!
//! Each call to `complete_stream` pops the next step. When the script is
//! exhausted the default step repeats.

use crate::provider::{LlmError, LlmProvider, LlmResult, LlmStream};
use crate::types::{LlmRequest, StreamDelta};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// One scripted reply.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    /// Stream the text in small chunks.
    Text(String),
    /// Wait, then stream the text. Cancellation cuts the wait short.
    Delayed(Duration, String),
    /// Never answer; only cancellation or a caller timeout ends the call.
    Hang,
    /// Fail with a retryable error.
    Transient(String),
    /// Fail with a non-retryable rejection.
    Reject(String),
}

pub struct ScriptedProvider {
    steps: Mutex<Vec<ScriptStep>>,
    default_step: ScriptStep,
    call_count: AtomicUsize,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedProvider {
    /// Always answer with the same step.
    pub fn constant(step: ScriptStep) -> Self {
        Self {
            steps: Mutex::new(Vec::new()),
            default_step: step,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Consume steps in order, then fall back to a canned text reply.
    pub fn sequence(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps),
            default_step: ScriptStep::Text("(scripted: sequence exhausted)".into()),
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_default(mut self, step: ScriptStep) -> Self {
        self.default_step = step;
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Requests received so far, oldest first.
    pub async fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().await.clone()
    }

    async fn next_step(&self, request: LlmRequest) -> ScriptStep {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().await.push(request);
        let mut steps = self.steps.lock().await;
        if steps.is_empty() {
            self.default_step.clone()
        } else {
            steps.remove(0)
        }
    }
}

fn text_stream(text: String) -> LlmStream {
    Box::pin(async_stream::stream! {
        let chars: Vec<char> = text.chars().collect();
        for chunk in chars.chunks(24) {
            yield Ok(StreamDelta::Text(chunk.iter().collect()));
        }
        yield Ok(StreamDelta::Done { stop_reason: Some("stop".into()), usage: None });
    })
}

async fn wait_or_cancel(delay: Option<Duration>, cancel: &Option<CancellationToken>) -> LlmResult<()> {
    let token = cancel.clone().unwrap_or_default();
    match delay {
        Some(d) => tokio::select! {
            _ = tokio::time::sleep(d) => Ok(()),
            _ = token.cancelled() => Err(LlmError::Cancelled),
        },
        None => {
            token.cancelled().await;
            Err(LlmError::Cancelled)
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str { "scripted" }

    async fn complete_stream(
        &self,
        request: LlmRequest,
        cancel: Option<CancellationToken>,
    ) -> LlmResult<LlmStream> {
        if cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(LlmError::Cancelled);
        }
        match self.next_step(request).await {
            ScriptStep::Text(text) => Ok(text_stream(text)),
            ScriptStep::Delayed(delay, text) => {
                wait_or_cancel(Some(delay), &cancel).await?;
                Ok(text_stream(text))
            }
            ScriptStep::Hang => {
                wait_or_cancel(None, &cancel).await?;
                Err(LlmError::Cancelled)
            }
            ScriptStep::Transient(reason) => Err(LlmError::RequestFailed(reason)),
            ScriptStep::Reject(reason) => Err(LlmError::Rejected { status: 400, message: reason }),
        }
    }
}
