//! Run registry: every run record, keyed by id.
//!
//! Each record lives behind its own `watch` channel inside a sharded map, so
//! updates to different runs never contend and readers always get the last
//! committed snapshot. Terminal records are frozen.

use crate::record::{RunRecord, TransitionError};
use botforge_core::{RawConfiguration, RunId};
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("run not found: {0}")]
    NotFound(RunId),

    #[error("run {0} is finished and can no longer change")]
    Frozen(RunId),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("update rejected: {0}")]
    Rejected(String),
}

pub struct RunRegistry {
    runs: DashMap<RunId, watch::Sender<RunRecord>>,
}

impl Default for RunRegistry {
    fn default() -> Self { Self::new() }
}

impl RunRegistry {
    pub fn new() -> Self {
        Self { runs: DashMap::new() }
    }

    /// Register a new `Pending` run for `raw`.
    pub fn create(&self, raw: RawConfiguration) -> RunId {
        let id = RunId::generate();
        let (tx, _rx) = watch::channel(RunRecord::new(id.clone(), raw));
        self.runs.insert(id.clone(), tx);
        debug!(run_id = %id, "run created");
        id
    }

    /// Apply `mutate` to a copy of the record and commit it only if it succeeds.
    /// The record is locked for the duration, so concurrent updates to the same
    /// run are serialized.
    pub fn update<F>(&self, id: &RunId, mutate: F) -> Result<RunRecord, RegistryError>
    where
        F: FnOnce(&mut RunRecord) -> Result<(), RegistryError>,
    {
        let tx = self.runs.get(id).ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        let mut outcome = Err(RegistryError::Frozen(id.clone()));
        tx.send_if_modified(|current| {
            if current.stage.is_terminal() {
                return false;
            }
            let mut next = current.clone();
            match mutate(&mut next) {
                Ok(()) => {
                    next.updated_at = Utc::now();
                    *current = next;
                    outcome = Ok(current.clone());
                    true
                }
                Err(e) => {
                    outcome = Err(e);
                    false
                }
            }
        });
        outcome
    }

    pub fn get(&self, id: &RunId) -> Option<RunRecord> {
        self.runs.get(id).map(|tx| tx.borrow().clone())
    }

    /// Receiver that observes every committed change of a run.
    pub fn subscribe(&self, id: &RunId) -> Option<watch::Receiver<RunRecord>> {
        self.runs.get(id).map(|tx| tx.subscribe())
    }

    /// All records, oldest first.
    pub fn list(&self) -> Vec<RunRecord> {
        let mut records: Vec<RunRecord> = self.runs.iter().map(|e| e.value().borrow().clone()).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn purge(&self, id: &RunId) -> Option<RunRecord> {
        self.runs.remove(id).map(|(_, tx)| tx.borrow().clone())
    }

    /// Drop every terminal record; returns how many were removed.
    pub fn purge_finished(&self) -> usize {
        let before = self.runs.len();
        self.runs.retain(|_, tx| !tx.borrow().stage.is_terminal());
        let removed = before.saturating_sub(self.runs.len());
        if removed > 0 {
            info!("Purged {} finished runs", removed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FailureStage, RunFailure, Stage};

    #[test]
    fn create_get_update() {
        let reg = RunRegistry::new();
        let id = reg.create(RawConfiguration::default());
        assert_eq!(reg.get(&id).unwrap().stage, Stage::Pending);

        let rec = reg.update(&id, |r| Ok(r.transition(Stage::Validating)?)).unwrap();
        assert_eq!(rec.stage, Stage::Validating);
        assert_eq!(reg.get(&id).unwrap().stage, Stage::Validating);
    }

    #[test]
    fn failed_mutation_is_not_committed() {
        let reg = RunRegistry::new();
        let id = reg.create(RawConfiguration::default());
        let err = reg
            .update(&id, |r| {
                r.planner_attempts = 9;
                Err(RegistryError::Rejected("nope".into()))
            })
            .unwrap_err();
        assert_eq!(err, RegistryError::Rejected("nope".into()));
        assert_eq!(reg.get(&id).unwrap().planner_attempts, 0);
    }

    #[test]
    fn terminal_record_is_frozen() {
        let reg = RunRegistry::new();
        let id = reg.create(RawConfiguration::default());
        reg.update(&id, |r| Ok(r.fail(RunFailure::new(FailureStage::Validation, "x"))?)).unwrap();
        assert_eq!(reg.update(&id, |_| Ok(())).unwrap_err(), RegistryError::Frozen(id.clone()));
    }

    #[test]
    fn unknown_id() {
        let reg = RunRegistry::new();
        let id = RunId::new("missing");
        assert!(reg.get(&id).is_none());
        assert_eq!(reg.update(&id, |_| Ok(())).unwrap_err(), RegistryError::NotFound(id));
    }

    #[test]
    fn purge_finished_keeps_active_runs() {
        let reg = RunRegistry::new();
        let active = reg.create(RawConfiguration::default());
        let done = reg.create(RawConfiguration::default());
        reg.update(&done, |r| Ok(r.fail(RunFailure::cancelled())?)).unwrap();

        assert_eq!(reg.list().len(), 2);
        assert_eq!(reg.purge_finished(), 1);
        assert!(reg.get(&active).is_some());
        assert!(reg.get(&done).is_none());
        assert!(reg.purge(&active).is_some());
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn subscribers_see_commits() {
        let reg = RunRegistry::new();
        let id = reg.create(RawConfiguration::default());
        let mut rx = reg.subscribe(&id).unwrap();
        reg.update(&id, |r| Ok(r.transition(Stage::Validating)?)).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().stage, Stage::Validating);
    }
}
