//! Tests for botforge-llm: request types, error classification, scripted provider

use botforge_llm::*;
use std::time::Duration;

// ===========================================================================
// LlmRequest
// ===========================================================================

#[test]
fn llm_request_default() {
    let req = LlmRequest::default();
    assert!(req.model.contains("llama"));
    assert!(req.messages.is_empty());
    assert_eq!(req.max_tokens, Some(4096));
    assert!(req.temperature.is_none());
    assert!(req.system.is_none());
}

#[test]
fn llm_request_serde_skips_none() {
    let req = LlmRequest {
        messages: vec![LlmMessage::user("hi")],
        max_tokens: None,
        ..Default::default()
    };
    let json = serde_json::to_string(&req).unwrap();
    assert!(!json.contains("max_tokens"));
    assert!(!json.contains("system"));
    assert!(json.contains(r#""role":"user""#));
}

#[test]
fn usage_accepts_openai_field_names() {
    let u: Usage = serde_json::from_str(r#"{"prompt_tokens":10,"completion_tokens":4}"#).unwrap();
    assert_eq!(u.input_tokens, 10);
    assert_eq!(u.output_tokens, 4);
}

// ===========================================================================
// LlmError
// ===========================================================================

#[test]
fn transient_classification() {
    assert!(LlmError::RequestFailed("503".into()).is_transient());
    assert!(LlmError::RateLimited { retry_after_ms: 10 }.is_transient());
    assert!(LlmError::StreamError("eof".into()).is_transient());
    assert!(!LlmError::AuthFailed("bad key".into()).is_transient());
    assert!(!LlmError::Rejected { status: 400, message: "bad".into() }.is_transient());
    assert!(!LlmError::Cancelled.is_transient());
}

#[test]
fn llm_error_display() {
    let e = LlmError::Rejected { status: 422, message: "model not found".into() };
    assert_eq!(e.to_string(), "request rejected (422): model not found");
}

// ===========================================================================
// ScriptedProvider
// ===========================================================================

#[tokio::test]
async fn scripted_text_completes() {
    let provider = ScriptedProvider::constant(ScriptStep::Text("x".repeat(100)));
    let completion = provider.complete(LlmRequest::default(), None).await.unwrap();
    assert_eq!(completion.text.len(), 100);
    assert_eq!(completion.stop_reason.as_deref(), Some("stop"));
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn scripted_sequence_then_default() {
    let provider = ScriptedProvider::sequence(vec![
        ScriptStep::Transient("busy".into()),
        ScriptStep::Text("ok".into()),
    ])
    .with_default(ScriptStep::Reject("done".into()));

    let first = provider.complete(LlmRequest::default(), None).await;
    assert!(matches!(first, Err(LlmError::RequestFailed(_))));
    let second = provider.complete(LlmRequest::default(), None).await.unwrap();
    assert_eq!(second.text, "ok");
    let third = provider.complete(LlmRequest::default(), None).await;
    assert!(matches!(third, Err(LlmError::Rejected { status: 400, .. })));
    assert_eq!(provider.call_count(), 3);
}

#[tokio::test]
async fn scripted_records_requests() {
    let provider = ScriptedProvider::constant(ScriptStep::Text("ok".into()));
    let req = LlmRequest { system: Some("sys".into()), ..Default::default() };
    provider.complete(req, None).await.unwrap();
    let seen = provider.requests().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].system.as_deref(), Some("sys"));
}

#[tokio::test]
async fn scripted_hang_ends_on_cancel() {
    let provider = ScriptedProvider::constant(ScriptStep::Hang);
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let result = provider.complete(LlmRequest::default(), Some(token)).await;
    assert!(matches!(result, Err(LlmError::Cancelled)));
}

#[tokio::test]
async fn scripted_hang_trips_caller_timeout() {
    let provider = ScriptedProvider::constant(ScriptStep::Hang);
    let result = tokio::time::timeout(
        Duration::from_millis(20),
        provider.complete(LlmRequest::default(), None),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn scripted_delayed_answers_after_wait() {
    let provider = ScriptedProvider::constant(ScriptStep::Delayed(Duration::from_millis(5), "late".into()));
    let completion = provider.complete(LlmRequest::default(), None).await.unwrap();
    assert_eq!(completion.text, "late");
}

#[tokio::test]
async fn scripted_precancelled_token_short_circuits() {
    let provider = ScriptedProvider::constant(ScriptStep::Text("never".into()));
    let token = CancellationToken::new();
    token.cancel();
    let result = provider.complete(LlmRequest::default(), Some(token)).await;
    assert!(matches!(result, Err(LlmError::Cancelled)));
    assert_eq!(provider.call_count(), 0);
}

// ===========================================================================
// GroqProvider
// ===========================================================================

#[tokio::test]
async fn groq_unreachable_endpoint_is_transient() {
    let provider = GroqProvider::new("test-key").with_base_url("http://127.0.0.1:1/chat/completions");
    let err = provider.complete(LlmRequest::default(), None).await.unwrap_err();
    assert!(err.is_transient(), "connect failure should be transient: {err}");
}

#[test]
fn groq_provider_name() {
    assert_eq!(GroqProvider::new("k").name(), "groq");
}
