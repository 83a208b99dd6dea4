//! Factory settings
//!
//! All tunable parameters in one place. Loaded from TOML at startup,
//! falls back to defaults if no config file exists.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level factory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorySettings {
    /// Where generated chatbots and templates live.
    pub paths: PathsConfig,
    /// Reasoning backend connection.
    pub backend: BackendConfig,
    /// Architecture planner retry policy.
    pub planner: RetryConfig,
    /// Retry policy for model-authored files.
    pub renderer: RetryConfig,
    /// Worker pool and finalization.
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root directory; each run gets its own subdirectory.
    pub output_root: PathBuf,
    /// Optional template overlay directory (`<dir>/<kind>/<wiring>.tmpl`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub templates: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// OpenAI-compatible chat completions endpoint.
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt.
    pub base_delay_ms: u64,
    /// Per-attempt timeout.
    pub attempt_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Runs allowed past admission at once; the rest queue in order.
    pub max_concurrent_runs: usize,
    /// Retries for transient I/O while writing the output tree.
    pub finalize_retries: u32,
}

// ============================================================
// Defaults
// ============================================================

impl Default for FactorySettings {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            backend: BackendConfig::default(),
            planner: RetryConfig::default(),
            renderer: RetryConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("./Output_Chatbot"),
            templates: None,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1/chat/completions".into(),
            model: "llama-3.1-70b-versatile".into(),
            temperature: 0.3,
            max_tokens: 4096,
            api_key_env: "GROQ_API_KEY".into(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 2, base_delay_ms: 500, attempt_timeout_ms: 60_000 }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { max_concurrent_runs: 5, finalize_retries: 2 }
    }
}

// ============================================================
// Loading
// ============================================================

impl FactorySettings {
    /// Load settings from a TOML file, falling back to defaults when it is absent.
    /// A file that exists but does not parse is an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let mut settings = match std::fs::read_to_string(path) {
            Ok(content) => {
                let parsed: Self = toml::from_str(&content)?;
                tracing::info!("Loaded settings from {}", path.display());
                parsed
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No settings at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        settings.apply_env();
        settings.check()?;
        Ok(settings)
    }

    /// `BOTFORGE_OUTPUT` overrides the output root.
    pub fn apply_env(&mut self) {
        if let Ok(out) = std::env::var("BOTFORGE_OUTPUT") {
            if !out.trim().is_empty() {
                self.paths.output_root = PathBuf::from(out);
            }
        }
    }

    pub fn check(&self) -> Result<()> {
        if self.orchestrator.max_concurrent_runs == 0 {
            return Err(Error::config("orchestrator.max_concurrent_runs must be at least 1"));
        }
        if self.planner.attempt_timeout_ms == 0 || self.renderer.attempt_timeout_ms == 0 {
            return Err(Error::config("attempt_timeout_ms must be greater than zero"));
        }
        Ok(())
    }

    /// API key from the configured environment variable, if set.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.backend.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    /// Write the current settings as TOML (for generating a default settings file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}
