//! Run record: the single source of truth for one pipeline run.

use crate::plan::ArchitecturePlan;
use botforge_core::{Configuration, RawConfiguration, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Pipeline stage. Moves strictly forward; `Completed` and `Failed` are terminal.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Pending,
    Validating,
    Planning,
    Rendering,
    Packaging,
    Finalizing,
    Completed,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The stage that follows on success, if any.
    pub fn successor(&self) -> Option<Stage> {
        match self {
            Self::Pending => Some(Self::Validating),
            Self::Validating => Some(Self::Planning),
            Self::Planning => Some(Self::Rendering),
            Self::Rendering => Some(Self::Packaging),
            Self::Packaging => Some(Self::Finalizing),
            Self::Finalizing => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    /// Only the immediate successor or `Failed` (from a non-terminal stage) is allowed.
    pub fn can_advance_to(&self, next: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Stage::Failed || self.successor() == Some(next)
    }

    /// Whether a cancel request can still take effect.
    pub fn accepts_cancel(&self) -> bool {
        *self < Stage::Finalizing
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Validating => write!(f, "validating"),
            Self::Planning => write!(f, "planning"),
            Self::Rendering => write!(f, "rendering"),
            Self::Packaging => write!(f, "packaging"),
            Self::Finalizing => write!(f, "finalizing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Where a failed run stopped.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Validation,
    Planning,
    Rendering,
    Packaging,
    Finalizing,
    Cancelled,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Planning => write!(f, "planning"),
            Self::Rendering => write!(f, "rendering"),
            Self::Packaging => write!(f, "packaging"),
            Self::Finalizing => write!(f, "finalizing"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RunFailure {
    pub stage: FailureStage,
    pub reason: String,
}

impl RunFailure {
    pub fn new(stage: FailureStage, reason: impl Into<String>) -> Self {
        Self { stage, reason: reason.into() }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureStage::Cancelled, "run cancelled")
    }
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.stage, self.reason)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StageEntry {
    pub stage: Stage,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub from: Stage,
    pub to: Stage,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RunRecord {
    pub id: RunId,
    pub raw: Arc<RawConfiguration>,
    pub config: Option<Arc<Configuration>>,
    pub stage: Stage,
    pub plan: Option<Arc<ArchitecturePlan>>,
    pub output_path: Option<PathBuf>,
    /// Relative paths of the exposed tree, sorted; empty until completed.
    pub files: Vec<String>,
    pub failure: Option<RunFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub history: Vec<StageEntry>,
    pub planner_attempts: u32,
}

impl RunRecord {
    pub fn new(id: RunId, raw: RawConfiguration) -> Self {
        let now = Utc::now();
        Self {
            id,
            raw: Arc::new(raw),
            config: None,
            stage: Stage::Pending,
            plan: None,
            output_path: None,
            files: Vec::new(),
            failure: None,
            created_at: now,
            updated_at: now,
            ended_at: None,
            history: vec![StageEntry { stage: Stage::Pending, at: now }],
            planner_attempts: 0,
        }
    }

    /// Commit the next stage. The only way `stage` changes.
    pub fn transition(&mut self, next: Stage) -> Result<(), TransitionError> {
        if !self.stage.can_advance_to(next) {
            return Err(TransitionError { from: self.stage, to: next });
        }
        let now = Utc::now();
        self.stage = next;
        self.updated_at = now;
        self.history.push(StageEntry { stage: next, at: now });
        if next.is_terminal() {
            self.ended_at = Some(now);
        }
        Ok(())
    }

    pub fn fail(&mut self, failure: RunFailure) -> Result<(), TransitionError> {
        self.transition(Stage::Failed)?;
        self.failure = Some(failure);
        Ok(())
    }

    pub fn complete(&mut self, output_path: PathBuf, files: Vec<String>) -> Result<(), TransitionError> {
        self.transition(Stage::Completed)?;
        self.output_path = Some(output_path);
        self.files = files;
        Ok(())
    }

    pub fn status(&self) -> RunStatus {
        RunStatus {
            id: self.id.clone(),
            stage: self.stage,
            failure: self.failure.clone(),
            output_path: self.output_path.clone(),
            files: self.files.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            ended_at: self.ended_at,
            planner_attempts: self.planner_attempts,
        }
    }

    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(self).unwrap_or_default()
    }
}

/// Caller-facing view of a run.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RunStatus {
    pub id: RunId,
    pub stage: Stage,
    pub failure: Option<RunFailure>,
    pub output_path: Option<PathBuf>,
    pub files: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub planner_attempts: u32,
}

impl RunStatus {
    pub fn is_finished(&self) -> bool {
        self.stage.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> RunRecord {
        RunRecord::new(RunId::new("run-1"), RawConfiguration::default())
    }

    #[test]
    fn record_lifecycle() {
        let mut r = record();
        for stage in [
            Stage::Validating,
            Stage::Planning,
            Stage::Rendering,
            Stage::Packaging,
            Stage::Finalizing,
        ] {
            r.transition(stage).unwrap();
        }
        r.complete(PathBuf::from("/tmp/out"), vec!["main.py".into()]).unwrap();
        assert_eq!(r.stage, Stage::Completed);
        assert_eq!(r.history.len(), 7);
        assert!(r.ended_at.is_some());
        assert_eq!(r.output_path.as_deref(), Some(std::path::Path::new("/tmp/out")));
        assert_eq!(r.status().files, vec!["main.py"]);
    }

    #[test]
    fn transitions_never_go_backwards_or_repeat() {
        let mut r = record();
        r.transition(Stage::Validating).unwrap();
        assert!(r.transition(Stage::Validating).is_err());
        assert!(r.transition(Stage::Pending).is_err());
        assert!(r.transition(Stage::Rendering).is_err());
        assert_eq!(r.stage, Stage::Validating);
    }

    #[test]
    fn terminal_records_are_frozen() {
        let mut r = record();
        r.fail(RunFailure::new(FailureStage::Validation, "bad name")).unwrap();
        assert!(r.transition(Stage::Validating).is_err());
        assert!(r.fail(RunFailure::cancelled()).is_err());
        assert_eq!(r.failure.as_ref().unwrap().stage, FailureStage::Validation);
    }

    #[test]
    fn cancel_window_closes_at_finalizing() {
        assert!(Stage::Pending.accepts_cancel());
        assert!(Stage::Packaging.accepts_cancel());
        assert!(!Stage::Finalizing.accepts_cancel());
        assert!(!Stage::Completed.accepts_cancel());
    }

    #[test]
    fn record_yaml_has_stage() {
        let r = record();
        let yaml = r.to_yaml();
        assert!(yaml.contains("run-1"));
        assert!(yaml.contains("pending"));
    }
}
