//! botforge-pipeline: configuration in, deployable chatbot tree out.
//!
//! Stages run in a fixed order (validate, plan, render, package, finalize)
//! under the [`Orchestrator`]; every committed stage lands in the
//! [`RunRegistry`] before work on it begins.

pub mod artifact;
pub mod finalize;
pub mod orchestrator;
pub mod packaging;
pub mod plan;
pub mod planner;
pub mod record;
pub mod registry;
pub mod renderer;
pub mod retry;
pub mod templates;

pub use artifact::{ArtifactTree, GeneratedFile};
pub use finalize::{FinalizeError, LocalFsStore, OutputStore};
pub use orchestrator::{CancelAck, Orchestrator};
pub use packaging::{package, PackagingError};
pub use plan::{AgentNode, ArchitecturePlan, GenerationStrategy, PlannedFile, Topology, WiringEntry};
pub use planner::{extract_json, ArchitecturePlanner, LlmPlanner, PlanningError, RuleBasedPlanner};
pub use record::{FailureStage, RunFailure, RunRecord, RunStatus, Stage};
pub use registry::{RegistryError, RunRegistry};
pub use renderer::{RenderError, Renderer};
pub use retry::RetryPolicy;
pub use templates::{TemplateError, TemplateKey, TemplateLibrary};
