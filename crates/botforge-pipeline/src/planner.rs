//! Architecture planners.
//!
//! [`LlmPlanner`] asks a reasoning backend for a plan and holds the answer to
//! the plan schema; [`RuleBasedPlanner`] derives the same shape of plan from
//! the configuration alone and never touches the network.

use crate::plan::{default_adapter, AgentNode, ArchitecturePlan, PlannedFile, Topology, WiringEntry, README};
use crate::retry::{RetryPolicy, Retryable};
use crate::templates::TemplateLibrary;
use botforge_core::{AgentRole, Capability, ChatbotType, Configuration, FileKind};
use botforge_llm::{LlmError, LlmMessage, LlmProvider, LlmRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanningError {
    #[error("backend: {reason}")]
    Backend { reason: String, retryable: bool },

    #[error("parse: {detail}")]
    Parse { detail: String },

    #[error("cancelled")]
    Cancelled,
}

impl PlanningError {
    /// Short name of the step that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Backend { .. } => "backend",
            Self::Parse { .. } => "parse",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(detail: impl Into<String>) -> Self {
        Self::Parse { detail: detail.into() }
    }
}

impl From<LlmError> for PlanningError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Cancelled => Self::Cancelled,
            other => Self::Backend { retryable: other.is_transient(), reason: other.to_string() },
        }
    }
}

impl Retryable for PlanningError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Backend { retryable, .. } => *retryable,
            Self::Parse { .. } => true,
            Self::Cancelled => false,
        }
    }

    fn timed_out(_after: Duration) -> Self {
        Self::Backend { reason: "timeout".into(), retryable: true }
    }

    fn cancelled() -> Self {
        Self::Cancelled
    }
}

#[async_trait::async_trait]
pub trait ArchitecturePlanner: Send + Sync {
    fn name(&self) -> &str;

    async fn plan(
        &self,
        config: &Configuration,
        cancel: &CancellationToken,
    ) -> Result<ArchitecturePlan, PlanningError>;

    /// Like [`plan`](Self::plan), also reporting how many backend attempts were made.
    async fn plan_with_attempts(
        &self,
        config: &Configuration,
        cancel: &CancellationToken,
    ) -> (Result<ArchitecturePlan, PlanningError>, u32) {
        (self.plan(config, cancel).await, 1)
    }
}

// ---------------------------------------------------------------------------
// Rule-based planner
// ---------------------------------------------------------------------------

/// Deterministic planner: same configuration, same plan.
#[derive(Clone, Debug, Default)]
pub struct RuleBasedPlanner {
    authored_readme: bool,
}

impl RuleBasedPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plan README.md as a model-authored file instead of a template.
    pub fn with_authored_readme(mut self, on: bool) -> Self {
        self.authored_readme = on;
        self
    }

    pub fn derive(&self, config: &Configuration) -> ArchitecturePlan {
        let topology = if config.is_multi_agent() {
            team_topology(config)
        } else {
            Topology::Single { agent: single_agent(config) }
        };

        let wiring: Vec<WiringEntry> = config
            .capabilities
            .enabled()
            .into_iter()
            .map(|c| WiringEntry { capability: c, adapter: default_adapter(c).to_string() })
            .collect();

        let mut files = vec![
            PlannedFile::template(
                "main.py",
                FileKind::Source,
                if config.is_multi_agent() { "team" } else { "app" },
            ),
            PlannedFile::template("config.py", FileKind::Config, "settings"),
            PlannedFile::template(".env.example", FileKind::Config, "env"),
        ];
        for w in &wiring {
            files.push(PlannedFile::template(module_path(w.capability), FileKind::Source, &w.key()));
        }
        if !config.integrations.is_empty() {
            files.push(PlannedFile::template("integrations.py", FileKind::Source, "integrations"));
        }
        files.push(PlannedFile::template("api.py", FileKind::Source, "api"));
        if config.scaffolding.tests {
            files.push(PlannedFile::template("tests/test_chatbot.py", FileKind::Test, "chat"));
        }
        if config.scaffolding.docs {
            files.push(PlannedFile::template("docs/api.md", FileKind::Doc, "api"));
        }
        files.push(if self.authored_readme {
            PlannedFile::authored(
                README,
                FileKind::Doc,
                "readme",
                "Project README: what the bot does, how to configure and run it.",
            )
        } else {
            PlannedFile::template(README, FileKind::Doc, "readme")
        });

        ArchitecturePlan { topology, wiring, files }
    }
}

#[async_trait::async_trait]
impl ArchitecturePlanner for RuleBasedPlanner {
    fn name(&self) -> &str { "rule-based" }

    async fn plan(
        &self,
        config: &Configuration,
        cancel: &CancellationToken,
    ) -> Result<ArchitecturePlan, PlanningError> {
        if cancel.is_cancelled() {
            return Err(PlanningError::Cancelled);
        }
        let plan = self.derive(config);
        plan.check(config).map_err(PlanningError::parse)?;
        Ok(plan)
    }
}

/// Module the generated app imports for a capability.
fn module_path(capability: Capability) -> &'static str {
    match capability {
        Capability::Rag => "rag.py",
        Capability::Memory => "memory.py",
        Capability::FunctionCalling => "tools.py",
        Capability::WebSearch => "web_search.py",
    }
}

/// Tools an agent gets from the configuration's capabilities and integrations.
pub fn tools_for(config: &Configuration) -> Vec<String> {
    let mut tools = vec!["conversation".to_string()];
    if config.capabilities.rag {
        tools.push("vector_search".into());
    }
    if config.capabilities.function_calling {
        tools.push("function_calling".into());
    }
    if config.capabilities.web_search {
        tools.push("web_search".into());
    }
    for integration in &config.integrations {
        let tool = integration.kind.tool_name().to_string();
        if !tools.contains(&tool) {
            tools.push(tool);
        }
    }
    tools
}

fn single_agent(config: &Configuration) -> AgentNode {
    AgentNode {
        name: format!("{}_agent", config.slug.replace('-', "_")),
        role: "primary".into(),
        description: config.description.clone(),
        tools: tools_for(config),
        delegates_to: Vec::new(),
    }
}

fn role_description(role: AgentRole, chatbot_type: ChatbotType) -> String {
    let domain = chatbot_type.as_str().replace('_', " ");
    match role {
        AgentRole::Coordinator => "Coordinates tasks between specialized agents".into(),
        AgentRole::Researcher => format!("Researches questions for the {} team", domain),
        AgentRole::Analyst => "Analyzes problems and data in depth".into(),
        AgentRole::Writer => "Drafts clear, well-structured responses".into(),
        AgentRole::Reviewer => "Reviews drafts for accuracy and tone".into(),
        AgentRole::Specialist => format!("Handles {} queries that need domain knowledge", domain),
    }
}

fn role_tools(role: AgentRole, config: &Configuration) -> Vec<String> {
    let mut tools = match role {
        AgentRole::Coordinator => vec!["agent_communication".to_string()],
        AgentRole::Researcher => vec!["documentation_search".to_string()],
        AgentRole::Analyst => vec!["analysis".to_string()],
        AgentRole::Writer => vec!["drafting".to_string()],
        AgentRole::Reviewer => vec!["review".to_string()],
        AgentRole::Specialist => vec!["knowledge_base".to_string()],
    };
    if role != AgentRole::Coordinator {
        for t in tools_for(config).into_iter().skip(1) {
            if !tools.contains(&t) {
                tools.push(t);
            }
        }
    }
    tools
}

fn team_topology(config: &Configuration) -> Topology {
    // The coordinator always exists, even when the roles list omits it.
    let mut roles = vec![AgentRole::Coordinator];
    for r in &config.agent_roles {
        if !roles.contains(r) {
            roles.push(*r);
        }
    }

    let members: Vec<String> = roles
        .iter()
        .filter(|r| **r != AgentRole::Coordinator)
        .map(|r| r.as_str().to_string())
        .collect();

    let agents = roles
        .iter()
        .map(|role| AgentNode {
            name: role.as_str().to_string(),
            role: role.as_str().to_string(),
            description: role_description(*role, config.chatbot_type),
            tools: role_tools(*role, config),
            delegates_to: if *role == AgentRole::Coordinator { members.clone() } else { Vec::new() },
        })
        .collect();

    Topology::Team { coordinator: AgentRole::Coordinator.as_str().to_string(), agents }
}

// ---------------------------------------------------------------------------
// LLM planner
// ---------------------------------------------------------------------------

const PLANNER_SYSTEM_PROMPT: &str = "\
You are a software architect designing chatbot applications.\n\
Answer with ONE JSON object and nothing else. Schema:\n\
{\n\
  \"topology\": {\"kind\": \"single\", \"agent\": AGENT}\n\
             | {\"kind\": \"team\", \"coordinator\": NAME, \"agents\": [AGENT, ...]},\n\
  \"wiring\": [{\"capability\": CAPABILITY, \"adapter\": ADAPTER}, ...],\n\
  \"files\": [{\"path\": RELATIVE_PATH, \"kind\": \"source\"|\"config\"|\"container\"|\"doc\"|\"test\",\n\
             \"wiring\": TEMPLATE_KEY, \"strategy\": \"template\"|\"model_authored\",\n\
             \"brief\": TEXT (model_authored only)}, ...]\n\
}\n\
AGENT = {\"name\": NAME, \"role\": ROLE, \"description\": TEXT, \"tools\": [NAME, ...], \"delegates_to\": [NAME, ...]}\n\
Rules: every enabled capability needs exactly one wiring entry; use only adapters and\n\
template keys from the catalog; use a team topology only for multi_agent_team; delegation\n\
must not form cycles; paths are relative and unique. Do not list Dockerfile,\n\
docker-compose.yml, .dockerignore or requirements.txt; they are added during packaging.";

pub struct LlmPlanner {
    provider: Arc<dyn LlmProvider>,
    library: Arc<TemplateLibrary>,
    retry: RetryPolicy,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl LlmPlanner {
    pub fn new(provider: Arc<dyn LlmProvider>, library: Arc<TemplateLibrary>) -> Self {
        let defaults = LlmRequest::default();
        Self {
            provider,
            library,
            retry: RetryPolicy::default(),
            model: defaults.model,
            temperature: Some(0.3),
            max_tokens: defaults.max_tokens,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        self.model = model.into();
        self.temperature = Some(temperature);
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Catalog of adapters and template keys the plan may reference.
    fn catalog(&self) -> String {
        let mut out = String::from("Adapters:\n");
        for capability in Capability::ALL {
            let adapters = self.library.adapters(capability.as_str());
            out.push_str(&format!(
                "- {} (default {}): {}\n",
                capability,
                default_adapter(capability),
                adapters.join(", ")
            ));
        }
        out.push_str("Template keys by file kind:\n");
        for kind in FileKind::ALL {
            let wirings = self.library.wirings(kind);
            if !wirings.is_empty() {
                out.push_str(&format!("- {}: {}\n", kind, wirings.join(", ")));
            }
        }
        out
    }

    /// The request is a pure function of the configuration and catalog.
    pub fn build_request(&self, config: &Configuration) -> LlmRequest {
        let config_json = serde_json::to_string_pretty(config).unwrap_or_default();
        let enabled: Vec<&str> = config.capabilities.enabled().iter().map(|c| c.as_str()).collect();
        let content = format!(
            "Design the architecture for this chatbot.\n\nConfiguration:\n{}\n\nEnabled capabilities: {}\n\
             Test files: {}\nDocumentation beyond README.md: {}\n\n{}",
            config_json,
            if enabled.is_empty() { "none".to_string() } else { enabled.join(", ") },
            if config.scaffolding.tests { "include" } else { "omit" },
            if config.scaffolding.docs { "include" } else { "omit" },
            self.catalog(),
        );
        LlmRequest {
            model: self.model.clone(),
            messages: vec![LlmMessage::user(content)],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: Some(PLANNER_SYSTEM_PROMPT.to_string()),
        }
    }

    async fn attempt(
        &self,
        request: LlmRequest,
        config: &Configuration,
        cancel: &CancellationToken,
    ) -> Result<ArchitecturePlan, PlanningError> {
        let completion = self.provider.complete(request, Some(cancel.clone())).await?;
        debug!(chars = completion.text.len(), "planner response received");
        parse_plan(&completion.text, config)
    }
}

#[async_trait::async_trait]
impl ArchitecturePlanner for LlmPlanner {
    fn name(&self) -> &str { "llm" }

    async fn plan(
        &self,
        config: &Configuration,
        cancel: &CancellationToken,
    ) -> Result<ArchitecturePlan, PlanningError> {
        self.plan_with_attempts(config, cancel).await.0
    }

    async fn plan_with_attempts(
        &self,
        config: &Configuration,
        cancel: &CancellationToken,
    ) -> (Result<ArchitecturePlan, PlanningError>, u32) {
        let request = self.build_request(config);
        let (result, attempts) = self
            .retry
            .run("planner", cancel, move |_| self.attempt(request.clone(), config, cancel))
            .await;
        match &result {
            Ok(plan) => info!(
                provider = self.provider.name(),
                attempts,
                files = plan.files.len(),
                "architecture planned"
            ),
            Err(e) => warn!(provider = self.provider.name(), attempts, step = e.stage(), error = %e, "planning failed"),
        }
        (result, attempts)
    }
}

/// Pull the JSON object out of a reply and hold it to the plan schema.
pub fn parse_plan(text: &str, config: &Configuration) -> Result<ArchitecturePlan, PlanningError> {
    let json = extract_json(text);
    if !json.starts_with('{') {
        return Err(PlanningError::parse("no JSON object in response"));
    }
    let plan: ArchitecturePlan =
        serde_json::from_str(json).map_err(|e| PlanningError::parse(e.to_string()))?;
    plan.check(config).map_err(PlanningError::parse)?;
    Ok(plan)
}

/// Extract a JSON object from noisy model output (code fences, prose).
pub fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(start) = trimmed.find('{') {
        let remainder = &trimmed[start..];
        if let Some(end) = find_matching_brace(remainder) {
            return &remainder[..end];
        }
    }
    trimmed
}

/// Byte offset just past the brace that closes the first `{`, ignoring braces in strings.
fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if c == '\\' && in_string {
            escape = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}
