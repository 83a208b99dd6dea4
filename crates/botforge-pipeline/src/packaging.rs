//! Deployment descriptors and dependency manifest.
//!
//! Everything here is derived from the configuration and plan alone, so a
//! failure means the pipeline produced inconsistent input. It is never retried.

use crate::artifact::{ArtifactTree, GeneratedFile};
use crate::plan::ArchitecturePlan;
use botforge_core::{Capability, Configuration, FileKind, IntegrationKind};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PackagingError {
    #[error("packaging file {path} collides with a rendered file")]
    Collision { path: String },

    #[error("cannot serialize {path}: {detail}")]
    Serialize { path: String, detail: String },
}

const SOURCE: &str = "packaging";

const REQUIREMENTS: &str = "requirements.txt";
const DOCKERFILE: &str = "Dockerfile";
const COMPOSE: &str = "docker-compose.yml";
const DOCKERIGNORE_PATH: &str = ".dockerignore";

/// Paths packaging owns; a plan may not declare them.
pub const RESERVED_PATHS: &[&str] = &[REQUIREMENTS, DOCKERFILE, COMPOSE, DOCKERIGNORE_PATH];

/// Add container descriptors (when enabled) and `requirements.txt` to the tree.
pub fn package(
    config: &Configuration,
    plan: &ArchitecturePlan,
    tree: &mut ArtifactTree,
) -> Result<(), PackagingError> {
    let mut add = |path: &str, kind: FileKind, content: String| {
        tree.insert(path, GeneratedFile::new(kind, SOURCE, content))
            .map_err(|_| PackagingError::Collision { path: path.to_string() })
    };

    add(REQUIREMENTS, FileKind::Config, requirements(config, plan))?;
    if config.deployment.container {
        add(DOCKERFILE, FileKind::Container, dockerfile(config))?;
        add(COMPOSE, FileKind::Container, compose(config, plan)?)?;
        add(DOCKERIGNORE_PATH, FileKind::Container, DOCKERIGNORE.to_string())?;
    }
    debug!(container = config.deployment.container, "packaging files added");
    Ok(())
}

/// One requirement per line, sorted and de-duplicated.
pub fn requirements(config: &Configuration, plan: &ArchitecturePlan) -> String {
    let mut reqs: BTreeSet<&str> = [
        "fastapi>=0.110",
        "gradio>=4.0",
        "groq>=0.9",
        "pydantic>=2.0",
        "python-dotenv>=1.0",
        "uvicorn>=0.29",
    ]
    .into_iter()
    .collect();

    for w in &plan.wiring {
        if !config.capabilities.is_enabled(w.capability) {
            continue;
        }
        match (w.capability, w.adapter.as_str()) {
            (Capability::Rag, "chroma") => {
                reqs.insert("chromadb>=0.4");
            }
            (Capability::WebSearch, "duckduckgo") => {
                reqs.insert("duckduckgo-search>=5.0");
            }
            _ => {}
        }
    }

    for i in &config.integrations {
        match i.kind {
            IntegrationKind::RestApi | IntegrationKind::Webhook => {
                reqs.insert("httpx>=0.27");
            }
            IntegrationKind::Database => {
                reqs.insert("sqlalchemy>=2.0");
            }
            IntegrationKind::Slack => {
                reqs.insert("slack-sdk>=3.0");
            }
            IntegrationKind::Discord => {
                reqs.insert("discord.py>=2.0");
            }
            IntegrationKind::SearchEngine => {
                reqs.insert("duckduckgo-search>=5.0");
            }
            IntegrationKind::Email | IntegrationKind::FileSystem => {}
        }
    }

    if plan.files.iter().any(|f| f.kind == FileKind::Test) {
        reqs.insert("pytest>=8.0");
        reqs.insert("pytest-asyncio>=0.23");
    }

    let mut out = reqs.into_iter().collect::<Vec<_>>().join("\n");
    out.push('\n');
    out
}

fn dockerfile(config: &Configuration) -> String {
    format!(
        "FROM python:3.11-slim\n\
         \n\
         WORKDIR /app\n\
         ENV PYTHONDONTWRITEBYTECODE=1 PYTHONUNBUFFERED=1 PORT={port}\n\
         \n\
         COPY requirements.txt .\n\
         RUN pip install --no-cache-dir -r requirements.txt\n\
         \n\
         COPY . .\n\
         RUN mkdir -p /app/data\n\
         \n\
         EXPOSE {port}\n\
         CMD [\"python\", \"main.py\"]\n",
        port = config.deployment.port
    )
}

#[derive(Serialize)]
struct ComposeFile {
    services: BTreeMap<String, ComposeService>,
}

#[derive(Serialize)]
struct ComposeService {
    build: String,
    container_name: String,
    ports: Vec<String>,
    env_file: Vec<String>,
    environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    volumes: Vec<String>,
    restart: String,
}

fn compose(config: &Configuration, plan: &ArchitecturePlan) -> Result<String, PackagingError> {
    let port = config.deployment.port;
    let persistent = plan.wiring.iter().any(|w| {
        config.capabilities.is_enabled(w.capability)
            && matches!((w.capability, w.adapter.as_str()), (Capability::Rag, _) | (Capability::Memory, "sqlite"))
    });

    let mut environment = BTreeMap::new();
    environment.insert("PORT".to_string(), port.to_string());
    environment.insert("DATA_DIR".to_string(), "/app/data".to_string());

    let service = ComposeService {
        build: ".".into(),
        container_name: config.slug.clone(),
        ports: vec![format!("{}:{}", port, port)],
        env_file: vec![".env".into()],
        environment,
        volumes: if persistent { vec!["./data:/app/data".into()] } else { Vec::new() },
        restart: "unless-stopped".into(),
    };
    let mut services = BTreeMap::new();
    services.insert(config.slug.clone(), service);

    serde_yaml::to_string(&ComposeFile { services }).map_err(|e| PackagingError::Serialize {
        path: "docker-compose.yml".into(),
        detail: e.to_string(),
    })
}

const DOCKERIGNORE: &str = "\
__pycache__/\n\
*.pyc\n\
.env\n\
.git/\n\
data/\n\
.pytest_cache/\n";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::RuleBasedPlanner;
    use botforge_core::RawConfiguration;

    fn config(docker: bool) -> Configuration {
        Configuration::validate(&RawConfiguration {
            name: Some("Support Bot".into()),
            chatbot_type: Some("customer_support".into()),
            enable_docker: docker,
            port: 8080,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn container_files_follow_flag() {
        for docker in [true, false] {
            let c = config(docker);
            let plan = RuleBasedPlanner::new().derive(&c);
            let mut tree = ArtifactTree::new();
            package(&c, &plan, &mut tree).unwrap();
            assert!(tree.contains("requirements.txt"));
            assert_eq!(tree.contains("Dockerfile"), docker);
            assert_eq!(tree.contains("docker-compose.yml"), docker);
            assert_eq!(tree.contains(".dockerignore"), docker);
        }
    }

    #[test]
    fn compose_is_valid_yaml() {
        let c = config(true);
        let plan = RuleBasedPlanner::new().derive(&c);
        let text = compose(&c, &plan).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();
        let svc = &doc["services"]["support-bot"];
        assert_eq!(svc["ports"][0], serde_yaml::Value::from("8080:8080"));
        assert_eq!(svc["volumes"][0], serde_yaml::Value::from("./data:/app/data"));
    }

    #[test]
    fn requirements_track_capabilities() {
        let c = config(true);
        let plan = RuleBasedPlanner::new().derive(&c);
        let reqs = requirements(&c, &plan);
        assert!(reqs.contains("chromadb"));
        assert!(!reqs.contains("duckduckgo"));
        assert!(reqs.contains("pytest"));
        assert!(reqs.ends_with('\n'));
    }

    #[test]
    fn collision_is_reported() {
        let c = config(false);
        let plan = RuleBasedPlanner::new().derive(&c);
        let mut tree = ArtifactTree::new();
        tree.insert("requirements.txt", GeneratedFile::new(FileKind::Config, "x", "")).unwrap();
        assert_eq!(
            package(&c, &plan, &mut tree),
            Err(PackagingError::Collision { path: "requirements.txt".into() })
        );
    }
}
