//! Artifact renderer: plan + templates -> artifact tree.
//!
//! Template files are a pure function of (configuration, plan, library).
//! Model-authored files go through a reasoning backend with the same retry
//! shape as the planner.

use crate::artifact::{ArtifactTree, GeneratedFile};
use crate::plan::{ArchitecturePlan, GenerationStrategy, PlannedFile, Topology};
use crate::planner::tools_for;
use crate::retry::{RetryPolicy, Retryable};
use crate::templates::{expand, TemplateError, TemplateLibrary};
use botforge_core::{Capability, Configuration, FileKind};
use botforge_llm::{LlmError, LlmMessage, LlmProvider, LlmRequest};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error("capability '{capability}' is enabled but has no wiring entry")]
    MissingWiring { capability: Capability },

    #[error("no template for {kind}/{wiring} (needed by {path})")]
    MissingTemplate { path: String, kind: FileKind, wiring: String },

    #[error("template for {path}: {detail}")]
    Template { path: String, detail: String },

    #[error("authoring {path}: {reason}")]
    Backend { path: String, reason: String },

    #[error("cancelled")]
    Cancelled,

    #[error("rendered tree does not match plan (missing: {missing:?}, unexpected: {unexpected:?})")]
    Incomplete { missing: Vec<String>, unexpected: Vec<String> },
}

/// Failure of one authoring attempt.
#[derive(Debug)]
enum AuthorError {
    Backend { reason: String, retryable: bool },
    Cancelled,
}

impl std::fmt::Display for AuthorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend { reason, .. } => write!(f, "{}", reason),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl From<LlmError> for AuthorError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Cancelled => Self::Cancelled,
            other => Self::Backend { retryable: other.is_transient(), reason: other.to_string() },
        }
    }
}

impl Retryable for AuthorError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend { retryable: true, .. })
    }

    fn timed_out(_after: Duration) -> Self {
        Self::Backend { reason: "timeout".into(), retryable: true }
    }

    fn cancelled() -> Self {
        Self::Cancelled
    }
}

const AUTHOR_SYSTEM_PROMPT: &str = "\
You write one file of a generated chatbot project at a time.\n\
Reply with the complete file content only: no commentary, no code fences.";

pub struct Renderer {
    library: Arc<TemplateLibrary>,
    author: Option<Arc<dyn LlmProvider>>,
    retry: RetryPolicy,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl Renderer {
    pub fn new(library: Arc<TemplateLibrary>) -> Self {
        let defaults = LlmRequest::default();
        Self {
            library,
            author: None,
            retry: RetryPolicy::default(),
            model: defaults.model,
            temperature: 0.3,
            max_tokens: defaults.max_tokens,
        }
    }

    /// Backend used for model-authored files. Without one, such files fail to render.
    pub fn with_author(mut self, provider: Arc<dyn LlmProvider>, retry: RetryPolicy) -> Self {
        self.author = Some(provider);
        self.retry = retry;
        self
    }

    /// Model settings written into the generated app and used for authoring.
    pub fn with_model(mut self, model: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        self.model = model.into();
        self.temperature = temperature;
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn library(&self) -> &TemplateLibrary {
        &self.library
    }

    pub async fn render(
        &self,
        config: &Configuration,
        plan: &ArchitecturePlan,
        cancel: &CancellationToken,
    ) -> Result<ArtifactTree, RenderError> {
        if let Some(capability) = plan.missing_wiring(config) {
            return Err(RenderError::MissingWiring { capability });
        }

        let vars = self.template_vars(config, plan);
        let mut tree = ArtifactTree::new();
        let mut duplicates = Vec::new();

        for file in &plan.files {
            if cancel.is_cancelled() {
                return Err(RenderError::Cancelled);
            }
            let content = match file.strategy {
                GenerationStrategy::Template => self.render_template(file, &vars)?,
                GenerationStrategy::ModelAuthored => self.author_file(file, config, plan, cancel).await?,
            };
            debug!(path = %file.path, bytes = content.len(), "rendered");
            let generated = GeneratedFile::new(file.kind, file.wiring.clone(), content);
            if tree.insert(file.path.clone(), generated).is_err() {
                duplicates.push(file.path.clone());
            }
        }

        let declared: BTreeSet<&str> = plan.paths();
        let produced: BTreeSet<&str> = tree.paths().collect();
        let missing: Vec<String> = declared.difference(&produced).map(|s| s.to_string()).collect();
        let mut unexpected: Vec<String> = produced.difference(&declared).map(|s| s.to_string()).collect();
        unexpected.extend(duplicates);
        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(RenderError::Incomplete { missing, unexpected });
        }

        info!(files = tree.len(), bytes = tree.total_bytes(), "artifact tree rendered");
        Ok(tree)
    }

    fn render_template(&self, file: &PlannedFile, vars: &BTreeMap<String, String>) -> Result<String, RenderError> {
        let body = self.library.lookup(file.kind, &file.wiring).ok_or_else(|| RenderError::MissingTemplate {
            path: file.path.clone(),
            kind: file.kind,
            wiring: file.wiring.clone(),
        })?;
        expand(body, vars).map_err(|e| match e {
            TemplateError::Unresolved(names) => RenderError::Template {
                path: file.path.clone(),
                detail: format!("unresolved placeholders: {}", names.join(", ")),
            },
            other => RenderError::Template { path: file.path.clone(), detail: other.to_string() },
        })
    }

    async fn author_file(
        &self,
        file: &PlannedFile,
        config: &Configuration,
        plan: &ArchitecturePlan,
        cancel: &CancellationToken,
    ) -> Result<String, RenderError> {
        let provider = self.author.as_ref().ok_or_else(|| RenderError::Backend {
            path: file.path.clone(),
            reason: "no reasoning backend configured for model-authored files".into(),
        })?;

        let request = self.author_request(file, config, plan);
        let (result, attempts) = self
            .retry
            .run("renderer", cancel, move |_| {
                let request = request.clone();
                async move {
                    let completion = provider.complete(request, Some(cancel.clone())).await?;
                    let text = strip_code_fence(&completion.text);
                    if text.trim().is_empty() {
                        return Err(AuthorError::Backend { reason: "empty response".into(), retryable: true });
                    }
                    Ok(text.to_string())
                }
            })
            .await;

        match result {
            Ok(text) => {
                debug!(path = %file.path, attempts, "model-authored file written");
                Ok(ensure_trailing_newline(text))
            }
            Err(AuthorError::Cancelled) => Err(RenderError::Cancelled),
            Err(AuthorError::Backend { reason, .. }) => Err(RenderError::Backend {
                path: file.path.clone(),
                reason: format!("{} (after {} attempts)", reason, attempts),
            }),
        }
    }

    fn author_request(&self, file: &PlannedFile, config: &Configuration, plan: &ArchitecturePlan) -> LlmRequest {
        let others: Vec<String> = plan
            .files
            .iter()
            .filter(|f| f.path != file.path)
            .map(|f| format!("- {} ({})", f.path, f.kind))
            .collect();
        let content = format!(
            "File: {} ({})\nBrief: {}\n\nProject configuration:\n{}\n\nOther files in the project:\n{}",
            file.path,
            file.kind,
            file.brief.as_deref().unwrap_or_default(),
            serde_json::to_string_pretty(config).unwrap_or_default(),
            others.join("\n"),
        );
        LlmRequest {
            model: self.model.clone(),
            messages: vec![LlmMessage::user(content)],
            max_tokens: self.max_tokens,
            temperature: Some(self.temperature),
            system: Some(AUTHOR_SYSTEM_PROMPT.to_string()),
        }
    }

    /// Sorted variable map shared by every template of a run.
    pub fn template_vars(&self, config: &Configuration, plan: &ArchitecturePlan) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        let mut set = |k: &str, v: String| {
            vars.insert(k.to_string(), v);
        };

        set("name", config.name.clone());
        set("name_literal", py_str(&config.name));
        set("name_doc", py_doc(&config.name));
        set("slug", config.slug.clone());
        set("class_name", config.class_name());
        set("description", config.description.clone());
        set("description_literal", py_str(&config.description));
        set("description_doc", py_doc(&config.description));
        set("chatbot_type", config.chatbot_type.to_string());
        set("tone", config.tone.clone());
        set("tone_literal", py_str(&config.tone));
        set("language", config.language.clone());
        set("language_literal", py_str(&config.language));
        set("personality", joined_or_none(config.personality_traits.iter()));
        set("expertise", joined_or_none(config.domain_expertise.iter()));
        set("knowledge_sources", py_list(&config.knowledge_sources));
        set("port", config.deployment.port.to_string());
        set("theme", config.deployment.theme.clone());
        set("theme_literal", py_str(&config.deployment.theme));
        set("container", if config.deployment.container { "Dockerfile and docker-compose.yml included" } else { "not packaged" }.into());
        set("context_window", config.limits.context_window.to_string());
        set("max_conversation_length", config.limits.max_conversation_length.to_string());
        set("response_timeout", config.limits.response_timeout_secs.to_string());
        set(
            "rate_limit",
            config.limits.rate_limit_per_minute.map(|r| r.to_string()).unwrap_or_else(|| "None".into()),
        );
        set("model", self.model.clone());
        set("model_literal", py_str(&self.model));
        set("temperature", format!("{:.1}", self.temperature));
        set("system_prompt_literal", py_str(&system_prompt(config)));
        set("tools", py_list(&tools_for(config)));

        for capability in Capability::ALL {
            set(&format!("{}_enabled", capability), py_bool(config.capabilities.is_enabled(capability)));
        }
        let enabled: Vec<&str> = config.capabilities.enabled().iter().map(|c| c.as_str()).collect();
        set("capabilities", if enabled.is_empty() { "none".into() } else { enabled.join(", ") });

        let (agent_name, coordinator) = match &plan.topology {
            Topology::Single { agent } => (agent.name.clone(), agent.name.clone()),
            Topology::Team { coordinator, .. } => (coordinator.clone(), coordinator.clone()),
        };
        set("agent_name_literal", py_str(&agent_name));
        set("agent_name", agent_name);
        set("coordinator_literal", py_str(&coordinator));
        set("coordinator", coordinator);
        set("agents", serde_json::to_string(&plan.agents()).unwrap_or_else(|_| "[]".into()));
        set("agent_table", agent_table(plan));
        set("wiring_list", bullet_list(plan.wiring.iter().map(|w| format!("{}: {}", w.capability, w.adapter))));

        let integrations: Vec<serde_json::Value> = config
            .integrations
            .iter()
            .map(|i| {
                serde_json::json!({
                    "name": i.name,
                    "kind": i.kind.as_str(),
                    "tool": i.kind.tool_name(),
                    "params": i.params,
                })
            })
            .collect();
        set("integrations", serde_json::to_string(&integrations).unwrap_or_else(|_| "[]".into()));
        set("integration_list", bullet_list(config.integrations.iter().map(|i| format!("{} ({})", i.name, i.kind))));
        set("file_list", bullet_list(plan.files.iter().map(|f| format!("`{}` ({})", f.path, f.kind))));

        vars
    }
}

fn system_prompt(config: &Configuration) -> String {
    let mut prompt = format!(
        "You are {}, a {} assistant. {}",
        config.name,
        config.chatbot_type.as_str().replace('_', " "),
        config.description
    );
    if !config.personality_traits.is_empty() {
        let traits: Vec<&str> = config.personality_traits.iter().map(String::as_str).collect();
        prompt.push_str(&format!(" Personality: {}.", traits.join(", ")));
    }
    prompt.push_str(&format!(" Keep a {} tone and answer in {}.", config.tone, config.language));
    if !config.domain_expertise.is_empty() {
        prompt.push_str(&format!(" Expertise: {}.", config.domain_expertise.join(", ")));
    }
    prompt
}

fn agent_table(plan: &ArchitecturePlan) -> String {
    let mut out = String::from("| Agent | Role | Tools | Delegates to |\n|---|---|---|---|");
    for a in plan.agents() {
        out.push_str(&format!(
            "\n| {} | {} | {} | {} |",
            a.name,
            a.role,
            a.tools.join(", "),
            if a.delegates_to.is_empty() { "-".to_string() } else { a.delegates_to.join(", ") }
        ));
    }
    out
}

fn bullet_list(items: impl Iterator<Item = String>) -> String {
    let lines: Vec<String> = items.map(|i| format!("- {}", i)).collect();
    if lines.is_empty() { "- none".into() } else { lines.join("\n") }
}

fn joined_or_none<'a>(items: impl Iterator<Item = &'a String>) -> String {
    let items: Vec<&str> = items.map(String::as_str).collect();
    if items.is_empty() { "none".into() } else { items.join(", ") }
}

/// JSON string literals are valid Python string literals.
fn py_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".into())
}

/// Text safe to place inside a `"""` docstring.
fn py_doc(s: &str) -> String {
    s.replace('\\', "\\\\").replace("\"\"\"", "\\\"\\\"\\\"")
}

fn py_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".into())
}

fn py_bool(b: bool) -> String {
    if b { "True".into() } else { "False".into() }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else { return text };
    let body = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => return text,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body)
}

fn ensure_trailing_newline(mut text: String) -> String {
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_fence_variants() {
        assert_eq!(strip_code_fence("```markdown\n# Hi\n```"), "# Hi\n");
        assert_eq!(strip_code_fence("# Hi"), "# Hi");
        assert_eq!(strip_code_fence("```"), "```");
    }

    #[test]
    fn python_literals() {
        assert_eq!(py_str("it's \"x\""), r#""it's \"x\"""#);
        assert_eq!(py_list(&["a".into(), "b".into()]), r#"["a","b"]"#);
        assert_eq!(py_bool(false), "False");
        assert_eq!(py_doc(r#"a\b """quoted""""#), r#"a\\b \"\"\"quoted\"\"\""#);
    }

    #[tokio::test]
    async fn user_text_is_quoted_for_python() {
        use crate::planner::RuleBasedPlanner;
        use botforge_core::RawConfiguration;

        let config = Configuration::validate(&RawConfiguration {
            name: Some("3D Helper".into()),
            description: Some(r#"Says """hi""" \o/"#.into()),
            chatbot_type: Some("customer_support".into()),
            tone: r#"warm "and" kind"#.into(),
            language: "en\"gb".into(),
            ..Default::default()
        })
        .unwrap();
        let plan = RuleBasedPlanner::new().derive(&config);
        let renderer = Renderer::new(Arc::new(TemplateLibrary::builtin()));
        let tree = renderer.render(&config, &plan, &CancellationToken::new()).await.unwrap();
        let text = |path: &str| String::from_utf8(tree.get(path).unwrap().content.clone()).unwrap();

        let main = text("main.py");
        assert!(main.contains("class Bot3dHelperBot:"), "{main}");
        assert!(main.starts_with(r#""""3D Helper: Says \"\"\"hi\"\"\" \\o/"#), "{main}");

        let settings = text("config.py");
        assert!(settings.contains(r#"TONE = "warm \"and\" kind""#), "{settings}");
        assert!(settings.contains(r#"LANGUAGE = "en\"gb""#), "{settings}");
    }
}
