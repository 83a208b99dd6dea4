//! Botforge LLM - Reasoning backend adapters with streaming and cancellation

pub mod groq;
pub mod provider;
pub mod scripted;
pub mod types;

pub use groq::GroqProvider;
pub use provider::{LlmError, LlmProvider, LlmResult, LlmStream};
pub use scripted::{ScriptStep, ScriptedProvider};
pub use tokio_util::sync::CancellationToken;
pub use types::*;
