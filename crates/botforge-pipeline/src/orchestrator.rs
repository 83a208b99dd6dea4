//! Pipeline orchestrator: drives each run through its stages.
//!
//! Submissions are queued in acceptance order and admitted by a single
//! dispatcher through a semaphore, so at most `max_concurrent` runs are past
//! `Pending` at once. Every stage is entered through the registry before its
//! work starts; the same registry lock serializes `cancel`, which makes the
//! cut-off at `Finalizing` exact.

use crate::artifact::ArtifactTree;
use crate::finalize::OutputStore;
use crate::packaging::package;
use crate::planner::{ArchitecturePlanner, PlanningError};
use crate::record::{FailureStage, RunFailure, RunRecord, RunStatus, Stage};
use crate::registry::{RegistryError, RunRegistry};
use crate::renderer::{RenderError, Renderer};
use botforge_core::{Configuration, RawConfiguration, RunId};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Answer to a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAck {
    /// The run will end as `Failed{cancelled}`.
    Accepted,
    /// The run is finalizing or already finished; nothing changes.
    TooLate,
    NotFound,
}

struct Inner {
    registry: Arc<RunRegistry>,
    planner: Arc<dyn ArchitecturePlanner>,
    renderer: Arc<Renderer>,
    store: Arc<dyn OutputStore>,
    permits: Arc<Semaphore>,
    cancels: DashMap<RunId, CancellationToken>,
}

pub struct Orchestrator {
    inner: Arc<Inner>,
    queue: mpsc::UnboundedSender<RunId>,
}

impl Orchestrator {
    /// Must be called inside a Tokio runtime; spawns the dispatcher.
    pub fn new(
        registry: Arc<RunRegistry>,
        planner: Arc<dyn ArchitecturePlanner>,
        renderer: Arc<Renderer>,
        store: Arc<dyn OutputStore>,
        max_concurrent: usize,
    ) -> Self {
        let inner = Arc::new(Inner {
            registry,
            planner,
            renderer,
            store,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            cancels: DashMap::new(),
        });
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(inner.clone(), rx));
        info!(max_concurrent = max_concurrent.max(1), planner = inner.planner.name(), "orchestrator started");
        Self { inner, queue }
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.inner.registry
    }

    /// Accept a configuration and queue it. Never blocks on running work.
    pub fn submit(&self, raw: RawConfiguration) -> RunId {
        let id = self.inner.registry.create(raw);
        self.inner.cancels.insert(id.clone(), CancellationToken::new());
        if self.queue.send(id.clone()).is_err() {
            // Dispatcher is gone only if the runtime is shutting down.
            warn!(run_id = %id, "dispatcher unavailable, run stays pending");
        }
        info!(run_id = %id, "run submitted");
        id
    }

    pub fn status(&self, id: &RunId) -> Option<RunStatus> {
        self.inner.registry.get(id).map(|r| r.status())
    }

    pub fn record(&self, id: &RunId) -> Option<RunRecord> {
        self.inner.registry.get(id)
    }

    /// Request cancellation. Honored while queued or in any stage before
    /// `Finalizing`.
    pub fn cancel(&self, id: &RunId) -> CancelAck {
        let inner = &self.inner;
        let result = inner.registry.update(id, |rec| {
            if !rec.stage.accepts_cancel() {
                return Err(RegistryError::Rejected(format!("run is {}", rec.stage)));
            }
            if let Some(token) = inner.cancels.get(id) {
                token.cancel();
            }
            if rec.stage == Stage::Pending {
                rec.fail(RunFailure::cancelled())?;
            }
            Ok(())
        });

        match result {
            Ok(rec) => {
                info!(run_id = %id, stage = %rec.stage, "cancel accepted");
                CancelAck::Accepted
            }
            Err(RegistryError::NotFound(_)) => CancelAck::NotFound,
            Err(e) => {
                debug!(run_id = %id, reason = %e, "cancel too late");
                CancelAck::TooLate
            }
        }
    }

    /// Resolves once the run is `Completed` or `Failed`. `None` for unknown or
    /// purged runs.
    pub async fn wait(&self, id: &RunId) -> Option<RunStatus> {
        let mut rx = self.inner.registry.subscribe(id)?;
        let status = rx.wait_for(|r| r.stage.is_terminal()).await.ok().map(|r| r.status());
        status
    }

    pub fn list(&self) -> Vec<RunStatus> {
        self.inner.registry.list().iter().map(RunRecord::status).collect()
    }

    pub fn purge_finished(&self) -> usize {
        self.inner.registry.purge_finished()
    }
}

/// Admit queued runs one at a time, in order.
async fn dispatch(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<RunId>) {
    while let Some(id) = rx.recv().await {
        let Some(token) = inner.cancels.get(&id).map(|t| t.value().clone()) else {
            continue;
        };
        let queued = inner.registry.get(&id).map_or(false, |r| r.stage == Stage::Pending);
        if !queued || token.is_cancelled() {
            inner.cancels.remove(&id);
            debug!(run_id = %id, "skipping run that left the queue");
            continue;
        }

        let permit = tokio::select! {
            permit = inner.permits.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
            _ = token.cancelled() => {
                inner.cancels.remove(&id);
                debug!(run_id = %id, "cancelled while queued");
                continue;
            }
        };

        let span = info_span!("run", run_id = %id);
        tokio::spawn(inner.clone().run(id, token, permit).instrument(span));
    }
    debug!("dispatcher stopped");
}

/// Failure for a refused stage entry. Only work stages are ever entered;
/// anything else is reported against validation with the stage named.
fn entry_failure(stage: Stage, error: RegistryError) -> RunFailure {
    let failed_at = match stage {
        Stage::Validating => FailureStage::Validation,
        Stage::Planning => FailureStage::Planning,
        Stage::Rendering => FailureStage::Rendering,
        Stage::Packaging => FailureStage::Packaging,
        Stage::Finalizing => FailureStage::Finalizing,
        Stage::Pending | Stage::Completed | Stage::Failed => {
            return RunFailure::new(
                FailureStage::Validation,
                format!("{} is not a work stage: {}", stage, error),
            );
        }
    };
    RunFailure::new(failed_at, error.to_string())
}

impl Inner {
    async fn run(self: Arc<Self>, id: RunId, cancel: CancellationToken, _permit: OwnedSemaphorePermit) {
        let started = std::time::Instant::now();
        let outcome = match self.drive(&id, &cancel).await {
            // An accepted cancel wins over whatever the interrupted stage reported.
            Err(_) if cancel.is_cancelled() => Err(RunFailure::cancelled()),
            other => other,
        };
        let result = self.registry.update(&id, |rec| match &outcome {
            Ok((path, files)) => Ok(rec.complete(path.clone(), files.clone())?),
            Err(failure) => Ok(rec.fail(failure.clone())?),
        });
        match (&outcome, result) {
            (Ok((path, files)), Ok(_)) => {
                info!(path = %path.display(), files = files.len(), elapsed_ms = started.elapsed().as_millis() as u64, "run completed");
            }
            (Err(failure), Ok(_)) => {
                warn!(failure = %failure, elapsed_ms = started.elapsed().as_millis() as u64, "run failed");
            }
            (_, Err(e)) => warn!(error = %e, "could not record run outcome"),
        }
        self.cancels.remove(&id);
    }

    /// Commit `stage` unless the run was cancelled; `attach` rides along in
    /// the same update.
    fn enter<F>(&self, id: &RunId, stage: Stage, cancel: &CancellationToken, attach: F) -> Result<RunRecord, RunFailure>
    where
        F: FnOnce(&mut RunRecord),
    {
        let result = self.registry.update(id, |rec| {
            if cancel.is_cancelled() {
                return Err(RegistryError::Rejected("cancelled".into()));
            }
            rec.transition(stage)?;
            attach(rec);
            Ok(())
        });
        match result {
            Ok(rec) => {
                debug!(stage = %stage, "stage entered");
                Ok(rec)
            }
            Err(RegistryError::Rejected(_)) => Err(RunFailure::cancelled()),
            Err(e) => Err(entry_failure(stage, e)),
        }
    }

    /// Run every stage; yields the output location and the exposed paths.
    async fn drive(&self, id: &RunId, cancel: &CancellationToken) -> Result<(PathBuf, Vec<String>), RunFailure> {
        let rec = self.enter(id, Stage::Validating, cancel, |_| {})?;
        let config = Arc::new(
            Configuration::validate(&rec.raw)
                .map_err(|e| RunFailure::new(FailureStage::Validation, e.to_string()))?,
        );
        info!(name = %config.name, chatbot_type = config.chatbot_type.as_str(), "configuration valid");

        let attached = config.clone();
        self.enter(id, Stage::Planning, cancel, move |rec| rec.config = Some(attached))?;
        let (planned, attempts) = self.planner.plan_with_attempts(&config, cancel).await;
        debug!(attempts, "planner returned");
        let plan = match planned {
            Ok(plan) => Arc::new(plan),
            Err(PlanningError::Cancelled) => return Err(RunFailure::cancelled()),
            Err(e) => {
                self.record_attempts(id, attempts);
                return Err(RunFailure::new(FailureStage::Planning, format!("{} after {} attempts", e, attempts)));
            }
        };
        plan.check(&config).map_err(|reason| RunFailure::new(FailureStage::Planning, reason))?;

        let attached = plan.clone();
        self.enter(id, Stage::Rendering, cancel, move |rec| {
            rec.plan = Some(attached);
            rec.planner_attempts = attempts;
        })?;
        let mut tree: ArtifactTree = match self.renderer.render(&config, &plan, cancel).await {
            Ok(tree) => tree,
            Err(RenderError::Cancelled) => return Err(RunFailure::cancelled()),
            Err(e) => return Err(RunFailure::new(FailureStage::Rendering, e.to_string())),
        };

        self.enter(id, Stage::Packaging, cancel, |_| {})?;
        package(&config, &plan, &mut tree).map_err(|e| RunFailure::new(FailureStage::Packaging, e.to_string()))?;

        // Past this point cancel answers TooLate.
        self.enter(id, Stage::Finalizing, cancel, |_| {})?;
        let path = self
            .store
            .commit(id, &config.slug, &tree)
            .await
            .map_err(|e| RunFailure::new(FailureStage::Finalizing, e.to_string()))?;
        Ok((path, tree.paths().map(String::from).collect()))
    }

    fn record_attempts(&self, id: &RunId, attempts: u32) {
        if let Err(e) = self.registry.update(id, |rec| {
            rec.planner_attempts = attempts;
            Ok(())
        }) {
            debug!(error = %e, "planner attempts not recorded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_failure_names_the_stage() {
        let refused = || RegistryError::Rejected("busy".into());
        assert_eq!(entry_failure(Stage::Validating, refused()).stage, FailureStage::Validation);
        assert_eq!(entry_failure(Stage::Planning, refused()).stage, FailureStage::Planning);
        assert_eq!(entry_failure(Stage::Finalizing, refused()).stage, FailureStage::Finalizing);

        let odd = entry_failure(Stage::Completed, refused());
        assert_eq!(odd.stage, FailureStage::Validation);
        assert!(odd.reason.contains("completed is not a work stage"), "{}", odd.reason);
    }
}
