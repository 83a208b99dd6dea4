//! Chatbot configuration model.
//!
//! Callers hand us a loosely-typed [`RawConfiguration`] (usually JSON from a form
//! or API). [`Configuration::validate`] maps it onto closed enums and checked
//! values, or returns the first [`ValidationError`] in field order.

use crate::types::Capability;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// Raw (untrusted) payload
// ---------------------------------------------------------------------------

/// Configuration exactly as submitted. Every field is optional.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConfiguration {
    pub name: Option<String>,
    pub description: Option<String>,
    pub chatbot_type: Option<String>,
    pub personality_traits: Vec<String>,
    pub tone: String,
    pub language: String,
    pub domain_expertise: Vec<String>,
    pub knowledge_sources: Vec<String>,
    pub context_window: u32,
    pub enable_rag: bool,
    pub enable_function_calling: bool,
    pub enable_memory: bool,
    pub enable_web_search: bool,
    pub integrations: Vec<RawIntegration>,
    pub agent_roles: Vec<String>,
    pub ui_theme: String,
    pub enable_docker: bool,
    pub port: u16,
    pub max_conversation_length: u32,
    pub response_timeout: u32,
    pub rate_limit: Option<u32>,
    pub include_tests: bool,
    pub include_docs: bool,
}

impl Default for RawConfiguration {
    fn default() -> Self {
        Self {
            name: None,
            description: None,
            chatbot_type: None,
            personality_traits: Vec::new(),
            tone: "professional".into(),
            language: "en".into(),
            domain_expertise: Vec::new(),
            knowledge_sources: Vec::new(),
            context_window: 4096,
            enable_rag: true,
            enable_function_calling: true,
            enable_memory: true,
            enable_web_search: false,
            integrations: Vec::new(),
            agent_roles: Vec::new(),
            ui_theme: "default".into(),
            enable_docker: true,
            port: 7860,
            max_conversation_length: 50,
            response_timeout: 30,
            rate_limit: None,
            include_tests: true,
            include_docs: true,
        }
    }
}

impl RawConfiguration {
    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

/// Integration entry as submitted: `{"type": "...", "name": "...", ...params}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawIntegration {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub params: BTreeMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Closed enums
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChatbotType {
    CustomerSupport,
    SalesAssistant,
    KnowledgeBase,
    CreativeAssistant,
    TechnicalSupport,
    MultiAgentTeam,
}

impl ChatbotType {
    pub const ALL: [ChatbotType; 6] = [
        ChatbotType::CustomerSupport,
        ChatbotType::SalesAssistant,
        ChatbotType::KnowledgeBase,
        ChatbotType::CreativeAssistant,
        ChatbotType::TechnicalSupport,
        ChatbotType::MultiAgentTeam,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomerSupport => "customer_support",
            Self::SalesAssistant => "sales_assistant",
            Self::KnowledgeBase => "knowledge_base",
            Self::CreativeAssistant => "creative_assistant",
            Self::TechnicalSupport => "technical_support",
            Self::MultiAgentTeam => "multi_agent_team",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for ChatbotType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a node in a multi-agent team.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Coordinator,
    Researcher,
    Analyst,
    Writer,
    Reviewer,
    Specialist,
}

impl AgentRole {
    pub const ALL: [AgentRole; 6] = [
        AgentRole::Coordinator,
        AgentRole::Researcher,
        AgentRole::Analyst,
        AgentRole::Writer,
        AgentRole::Reviewer,
        AgentRole::Specialist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coordinator => "coordinator",
            Self::Researcher => "researcher",
            Self::Analyst => "analyst",
            Self::Writer => "writer",
            Self::Reviewer => "reviewer",
            Self::Specialist => "specialist",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|r| r.as_str() == s)
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationKind {
    RestApi,
    Database,
    Email,
    Slack,
    Discord,
    Webhook,
    FileSystem,
    SearchEngine,
}

impl IntegrationKind {
    pub const ALL: [IntegrationKind; 8] = [
        IntegrationKind::RestApi,
        IntegrationKind::Database,
        IntegrationKind::Email,
        IntegrationKind::Slack,
        IntegrationKind::Discord,
        IntegrationKind::Webhook,
        IntegrationKind::FileSystem,
        IntegrationKind::SearchEngine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RestApi => "rest_api",
            Self::Database => "database",
            Self::Email => "email",
            Self::Slack => "slack",
            Self::Discord => "discord",
            Self::Webhook => "webhook",
            Self::FileSystem => "file_system",
            Self::SearchEngine => "search_engine",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Tool name exposed to the generated agent for this integration.
    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::RestApi => "api_client",
            Self::Database => "database_query",
            Self::Email => "email_client",
            Self::Slack => "slack_client",
            Self::Discord => "discord_client",
            Self::Webhook => "webhook_sender",
            Self::FileSystem => "file_reader",
            Self::SearchEngine => "search_client",
        }
    }
}

impl std::fmt::Display for IntegrationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Validated configuration
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capabilities {
    pub rag: bool,
    pub memory: bool,
    pub function_calling: bool,
    pub web_search: bool,
}

impl Capabilities {
    pub fn is_enabled(&self, capability: Capability) -> bool {
        match capability {
            Capability::Rag => self.rag,
            Capability::Memory => self.memory,
            Capability::FunctionCalling => self.function_calling,
            Capability::WebSearch => self.web_search,
        }
    }

    /// Enabled capabilities in canonical order.
    pub fn enabled(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| self.is_enabled(*c))
            .collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Integration {
    pub kind: IntegrationKind,
    pub name: String,
    pub params: BTreeMap<String, String>,
}

/// Optional parts of the generated project.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scaffolding {
    pub tests: bool,
    pub docs: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deployment {
    pub container: bool,
    pub port: u16,
    pub theme: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationLimits {
    pub context_window: u32,
    pub max_conversation_length: u32,
    pub response_timeout_secs: u32,
    pub rate_limit_per_minute: Option<u32>,
}

/// A validated, immutable chatbot description.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Configuration {
    pub name: String,
    pub slug: String,
    pub description: String,
    pub chatbot_type: ChatbotType,
    pub personality_traits: BTreeSet<String>,
    pub tone: String,
    pub language: String,
    pub domain_expertise: Vec<String>,
    pub knowledge_sources: Vec<String>,
    pub capabilities: Capabilities,
    pub integrations: Vec<Integration>,
    pub agent_roles: Vec<AgentRole>,
    pub deployment: Deployment,
    pub limits: ConversationLimits,
    pub scaffolding: Scaffolding,
}

/// First problem found while validating a [`RawConfiguration`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl Configuration {
    pub fn validate(raw: &RawConfiguration) -> Result<Configuration, ValidationError> {
        let name = raw.name.as_deref().map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return Err(ValidationError::new("name", "chatbot name is required"));
        }
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(ValidationError::new(
                "name",
                "name must contain at least one ASCII letter or digit",
            ));
        }

        let chatbot_type = match raw.chatbot_type.as_deref() {
            None => return Err(ValidationError::new("chatbot_type", "chatbot type is required")),
            Some(s) => ChatbotType::parse(s).ok_or_else(|| {
                ValidationError::new("chatbot_type", format!("unknown chatbot type '{}'", s))
            })?,
        };

        let personality_traits = raw
            .personality_traits
            .iter()
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        let mut integrations = Vec::with_capacity(raw.integrations.len());
        for (i, ri) in raw.integrations.iter().enumerate() {
            let field = format!("integrations[{}].type", i);
            let kind = match ri.kind.as_deref() {
                None => return Err(ValidationError::new(field, "integration type is required")),
                Some(k) => IntegrationKind::parse(k).ok_or_else(|| {
                    ValidationError::new(field.clone(), format!("unknown integration type '{}'", k))
                })?,
            };
            let name = ri
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(String::from)
                .unwrap_or_else(|| kind.as_str().to_string());
            let params = ri
                .params
                .iter()
                .map(|(k, v)| {
                    let v = match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect();
            integrations.push(Integration { kind, name, params });
        }

        let mut agent_roles = Vec::with_capacity(raw.agent_roles.len());
        for (i, r) in raw.agent_roles.iter().enumerate() {
            let role = AgentRole::parse(r).ok_or_else(|| {
                ValidationError::new(
                    format!("agent_roles[{}]", i),
                    format!("unknown agent role '{}'", r),
                )
            })?;
            agent_roles.push(role);
        }
        if chatbot_type == ChatbotType::MultiAgentTeam && agent_roles.is_empty() {
            return Err(ValidationError::new(
                "agent_roles",
                "multi_agent_team requires at least one agent role",
            ));
        }
        if agent_roles.iter().filter(|r| **r == AgentRole::Coordinator).count() > 1 {
            return Err(ValidationError::new(
                "agent_roles",
                "at most one coordinator is allowed",
            ));
        }

        if raw.port == 0 {
            return Err(ValidationError::new("port", "port must be non-zero"));
        }
        if raw.context_window == 0 {
            return Err(ValidationError::new("context_window", "must be greater than zero"));
        }
        if raw.max_conversation_length == 0 {
            return Err(ValidationError::new(
                "max_conversation_length",
                "must be greater than zero",
            ));
        }
        if raw.response_timeout == 0 {
            return Err(ValidationError::new("response_timeout", "must be greater than zero"));
        }
        if raw.rate_limit == Some(0) {
            return Err(ValidationError::new("rate_limit", "must be greater than zero when set"));
        }

        let description = raw
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(String::from)
            .unwrap_or_else(|| format!("A {} chatbot.", chatbot_type.as_str().replace('_', " ")));

        Ok(Configuration {
            name: name.to_string(),
            slug,
            description,
            chatbot_type,
            personality_traits,
            tone: non_empty_or(&raw.tone, "professional"),
            language: non_empty_or(&raw.language, "en"),
            domain_expertise: trimmed_list(&raw.domain_expertise),
            knowledge_sources: trimmed_list(&raw.knowledge_sources),
            capabilities: Capabilities {
                rag: raw.enable_rag,
                memory: raw.enable_memory,
                function_calling: raw.enable_function_calling,
                web_search: raw.enable_web_search,
            },
            integrations,
            agent_roles,
            deployment: Deployment {
                container: raw.enable_docker,
                port: raw.port,
                theme: non_empty_or(&raw.ui_theme, "default"),
            },
            limits: ConversationLimits {
                context_window: raw.context_window,
                max_conversation_length: raw.max_conversation_length,
                response_timeout_secs: raw.response_timeout,
                rate_limit_per_minute: raw.rate_limit,
            },
            scaffolding: Scaffolding { tests: raw.include_tests, docs: raw.include_docs },
        })
    }

    pub fn is_multi_agent(&self) -> bool {
        self.chatbot_type == ChatbotType::MultiAgentTeam
    }

    /// Identifier-safe form of the name, e.g. `SupportBot`. Names that start
    /// with a digit get a `Bot` prefix (`3D Helper` becomes `Bot3dHelper`).
    pub fn class_name(&self) -> String {
        let name: String = self
            .slug
            .split('-')
            .filter(|p| !p.is_empty())
            .map(|p| {
                let mut chars = p.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect();
        if name.starts_with(|c: char| c.is_ascii_digit()) {
            format!("Bot{}", name)
        } else {
            name
        }
    }
}

/// Lowercase ASCII alphanumerics; every run of other characters becomes one `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    let v = value.trim();
    if v.is_empty() { fallback.to_string() } else { v.to_string() }
}

fn trimmed_list(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Support Bot"), "support-bot");
        assert_eq!(slugify("  --Hello,  World!! "), "hello-world");
        assert_eq!(slugify("../etc/passwd"), "etc-passwd");
        assert_eq!(slugify("日本"), "");
    }

    #[test]
    fn class_name_from_slug() {
        let raw = RawConfiguration {
            name: Some("support bot 2".into()),
            chatbot_type: Some("customer_support".into()),
            ..Default::default()
        };
        let config = Configuration::validate(&raw).unwrap();
        assert_eq!(config.class_name(), "SupportBot2");
    }

    #[test]
    fn scaffolding_defaults_on_and_can_be_dropped() {
        let on = RawConfiguration::from_json(r#"{"name": "Bot", "chatbot_type": "knowledge_base"}"#).unwrap();
        let config = Configuration::validate(&on).unwrap();
        assert_eq!(config.scaffolding, Scaffolding { tests: true, docs: true });

        let off = RawConfiguration::from_json(
            r#"{"name": "Bot", "chatbot_type": "knowledge_base", "include_tests": false, "include_docs": false}"#,
        )
        .unwrap();
        let config = Configuration::validate(&off).unwrap();
        assert_eq!(config.scaffolding, Scaffolding { tests: false, docs: false });
    }

    #[test]
    fn class_name_never_starts_with_digit() {
        let raw = RawConfiguration {
            name: Some("3D Helper".into()),
            chatbot_type: Some("customer_support".into()),
            ..Default::default()
        };
        let config = Configuration::validate(&raw).unwrap();
        assert_eq!(config.slug, "3d-helper");
        assert_eq!(config.class_name(), "Bot3dHelper");
    }
}
