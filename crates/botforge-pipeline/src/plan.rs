//! Architecture plan schema.
//!
//! A plan names the agent topology, which adapter backs each enabled
//! capability, and every file the renderer must produce. Plans arrive either
//! from a reasoning backend (untrusted JSON) or from the rule-based planner;
//! both go through [`ArchitecturePlan::check`].

use crate::packaging::RESERVED_PATHS;
use botforge_core::{Capability, Configuration, FileKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Always planned, even when other docs are off.
pub const README: &str = "README.md";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ArchitecturePlan {
    pub topology: Topology,
    pub wiring: Vec<WiringEntry>,
    pub files: Vec<PlannedFile>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Topology {
    Single { agent: AgentNode },
    Team { coordinator: String, agents: Vec<AgentNode> },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AgentNode {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub delegates_to: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WiringEntry {
    pub capability: Capability,
    pub adapter: String,
}

impl WiringEntry {
    /// Template wiring key, e.g. `rag:chroma`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.capability, self.adapter)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStrategy {
    Template,
    ModelAuthored,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PlannedFile {
    pub path: String,
    pub kind: FileKind,
    pub wiring: String,
    pub strategy: GenerationStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief: Option<String>,
}

impl PlannedFile {
    pub fn template(path: &str, kind: FileKind, wiring: &str) -> Self {
        Self {
            path: path.into(),
            kind,
            wiring: wiring.into(),
            strategy: GenerationStrategy::Template,
            brief: None,
        }
    }

    pub fn authored(path: &str, kind: FileKind, wiring: &str, brief: &str) -> Self {
        Self {
            path: path.into(),
            kind,
            wiring: wiring.into(),
            strategy: GenerationStrategy::ModelAuthored,
            brief: Some(brief.into()),
        }
    }
}

/// Default adapter for each capability.
pub fn default_adapter(capability: Capability) -> &'static str {
    match capability {
        Capability::Rag => "chroma",
        Capability::Memory => "sqlite",
        Capability::FunctionCalling => "tool_registry",
        Capability::WebSearch => "duckduckgo",
    }
}

impl ArchitecturePlan {
    /// Adapter wired for a capability (first entry wins).
    pub fn adapter_for(&self, capability: Capability) -> Option<&str> {
        self.wiring
            .iter()
            .find(|w| w.capability == capability)
            .map(|w| w.adapter.as_str())
    }

    /// First enabled capability with no wiring entry.
    pub fn missing_wiring(&self, config: &Configuration) -> Option<Capability> {
        config
            .capabilities
            .enabled()
            .into_iter()
            .find(|c| self.adapter_for(*c).is_none())
    }

    pub fn agents(&self) -> Vec<&AgentNode> {
        match &self.topology {
            Topology::Single { agent } => vec![agent],
            Topology::Team { agents, .. } => agents.iter().collect(),
        }
    }

    pub fn paths(&self) -> BTreeSet<&str> {
        self.files.iter().map(|f| f.path.as_str()).collect()
    }

    /// Structural validation against the configuration it was planned for.
    /// Returns a human-readable description of the first problem.
    pub fn check(&self, config: &Configuration) -> Result<(), String> {
        if let Some(c) = self.missing_wiring(config) {
            return Err(format!("no wiring entry for enabled capability '{}'", c));
        }
        for w in &self.wiring {
            if w.adapter.trim().is_empty() {
                return Err(format!("empty adapter for capability '{}'", w.capability));
            }
        }

        self.check_topology(config)?;

        if self.files.is_empty() {
            return Err("plan declares no files".into());
        }
        let mut seen = BTreeSet::new();
        for f in &self.files {
            check_path(&f.path)?;
            if RESERVED_PATHS.contains(&f.path.as_str()) {
                return Err(format!("file '{}' is added during packaging", f.path));
            }
            if f.kind == FileKind::Test && !config.scaffolding.tests {
                return Err(format!("test file '{}' planned but tests are disabled", f.path));
            }
            if f.kind == FileKind::Doc && f.path != README && !config.scaffolding.docs {
                return Err(format!("doc file '{}' planned but docs are disabled", f.path));
            }
            if !seen.insert(f.path.as_str()) {
                return Err(format!("duplicate file path '{}'", f.path));
            }
            if f.wiring.trim().is_empty() {
                return Err(format!("file '{}' has no wiring key", f.path));
            }
            if f.strategy == GenerationStrategy::ModelAuthored
                && f.brief.as_deref().map(str::trim).unwrap_or_default().is_empty()
            {
                return Err(format!("model-authored file '{}' has no brief", f.path));
            }
        }
        Ok(())
    }

    fn check_topology(&self, config: &Configuration) -> Result<(), String> {
        match &self.topology {
            Topology::Single { agent } => {
                if config.is_multi_agent() {
                    return Err("multi_agent_team needs a team topology".into());
                }
                if agent.name.trim().is_empty() {
                    return Err("agent name is empty".into());
                }
                if !agent.delegates_to.is_empty() {
                    return Err(format!("single agent '{}' cannot delegate", agent.name));
                }
                Ok(())
            }
            Topology::Team { coordinator, agents } => {
                if !config.is_multi_agent() {
                    return Err(format!(
                        "{} needs a single-agent topology",
                        config.chatbot_type
                    ));
                }
                let mut names = BTreeSet::new();
                for a in agents {
                    if a.name.trim().is_empty() {
                        return Err("agent name is empty".into());
                    }
                    if !names.insert(a.name.as_str()) {
                        return Err(format!("duplicate agent '{}'", a.name));
                    }
                }
                if !names.contains(coordinator.as_str()) {
                    return Err(format!("unknown coordinator '{}'", coordinator));
                }
                for a in agents {
                    for d in &a.delegates_to {
                        if !names.contains(d.as_str()) {
                            return Err(format!("agent '{}' delegates to unknown '{}'", a.name, d));
                        }
                    }
                }
                if let Some(cycle_at) = find_cycle(agents) {
                    return Err(format!("delegation cycle through '{}'", cycle_at));
                }
                Ok(())
            }
        }
    }
}

/// Relative, forward-slash, no `..`, no empty or `.` segments.
fn check_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("empty file path".into());
    }
    if path.starts_with('/') || path.contains('\\') || path.contains(':') {
        return Err(format!("unsafe file path '{}'", path));
    }
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(format!("unsafe file path '{}'", path));
        }
    }
    Ok(())
}

/// Depth-first search over `delegates_to`; returns a node on a cycle.
fn find_cycle(agents: &[AgentNode]) -> Option<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let edges: BTreeMap<&str, &[String]> = agents
        .iter()
        .map(|a| (a.name.as_str(), a.delegates_to.as_slice()))
        .collect();
    let mut marks: BTreeMap<&str, Mark> = edges.keys().map(|k| (*k, Mark::Unvisited)).collect();

    fn visit<'a>(
        node: &'a str,
        edges: &BTreeMap<&'a str, &'a [String]>,
        marks: &mut BTreeMap<&'a str, Mark>,
    ) -> Option<String> {
        match marks.get(node).copied() {
            Some(Mark::InProgress) => return Some(node.to_string()),
            Some(Mark::Done) | None => return None,
            Some(Mark::Unvisited) => {}
        }
        marks.insert(node, Mark::InProgress);
        for next in edges.get(node).copied().unwrap_or_default() {
            if let Some(found) = visit(next.as_str(), edges, marks) {
                return Some(found);
            }
        }
        marks.insert(node, Mark::Done);
        None
    }

    let names: Vec<&str> = edges.keys().copied().collect();
    names.into_iter().find_map(|n| visit(n, &edges, &mut marks))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, delegates: &[&str]) -> AgentNode {
        AgentNode {
            name: name.into(),
            role: name.into(),
            description: String::new(),
            tools: vec![],
            delegates_to: delegates.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn cycle_detection() {
        assert!(find_cycle(&[node("a", &["b"]), node("b", &["c"]), node("c", &[])]).is_none());
        assert!(find_cycle(&[node("a", &["b"]), node("b", &["a"])]).is_some());
        assert!(find_cycle(&[node("a", &["a"])]).is_some());
    }

    #[test]
    fn packaging_paths_are_rejected() {
        let config = Configuration::validate(&botforge_core::RawConfiguration {
            name: Some("Helper".into()),
            chatbot_type: Some("customer_support".into()),
            ..Default::default()
        })
        .unwrap();
        let base = crate::planner::RuleBasedPlanner::new().derive(&config);
        base.check(&config).unwrap();

        for reserved in ["requirements.txt", "Dockerfile", "docker-compose.yml", ".dockerignore"] {
            let mut plan = base.clone();
            plan.files.push(PlannedFile::template(reserved, FileKind::Config, "config"));
            let err = plan.check(&config).unwrap_err();
            assert!(err.contains("added during packaging"), "{reserved}: {err}");
        }
    }

    #[test]
    fn path_safety() {
        assert!(check_path("main.py").is_ok());
        assert!(check_path("docs/api.md").is_ok());
        assert!(check_path("/etc/passwd").is_err());
        assert!(check_path("../x").is_err());
        assert!(check_path("a//b").is_err());
        assert!(check_path("a/./b").is_err());
        assert!(check_path("C:\\x").is_err());
    }

    #[test]
    fn wiring_key_format() {
        let w = WiringEntry { capability: Capability::FunctionCalling, adapter: "tool_registry".into() };
        assert_eq!(w.key(), "function_calling:tool_registry");
    }

    #[test]
    fn topology_json_shape() {
        let t = Topology::Team { coordinator: "coordinator".into(), agents: vec![node("coordinator", &[])] };
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["kind"], "team");
        assert_eq!(json["coordinator"], "coordinator");
    }
}
