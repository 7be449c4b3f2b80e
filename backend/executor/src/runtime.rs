use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use docpipe_core::{
    Clock, InputId, InstanceId, InstanceStatus, OutputReference, PipelineError, PipelineResult,
    WorkflowInstance,
};
use docpipe_scheduler::UploadSink;
use docpipe_supervisor::HistoryStore;

use crate::orchestrator::Orchestrator;

/// Result of [`WorkflowRuntime::start_new`].
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub instance: WorkflowInstance,
    /// `false` when the same upload event had already started an instance.
    pub created: bool,
}

/// Starts, runs and resumes workflow instances.
///
/// Each instance runs on its own tokio task. An instance is never driven by
/// two tasks at once within one runtime.
pub struct WorkflowRuntime {
    orchestrator: Arc<Orchestrator>,
    history: Arc<HistoryStore>,
    clock: Arc<dyn Clock>,
    input_container: String,
    active: Arc<Mutex<HashSet<InstanceId>>>,
}

impl WorkflowRuntime {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        clock: Arc<dyn Clock>,
        input_container: impl Into<String>,
    ) -> Self {
        Self {
            history: orchestrator.history().clone(),
            orchestrator,
            clock,
            input_container: input_container.into(),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// Instance id for an upload event. The same `(input, event_key)` always
    /// maps to the same id; without an event key every start is distinct.
    pub fn instance_id_for(&self, input_id: &InputId, event_key: Option<&str>) -> InstanceId {
        match event_key {
            Some(key) => Uuid::new_v5(
                &Uuid::NAMESPACE_URL,
                format!("{}/{}@{}", self.input_container, input_id, key).as_bytes(),
            ),
            None => Uuid::new_v4(),
        }
    }

    /// Persist a new instance for `input_id`, or return the existing one for
    /// the same upload event. Does not run it.
    pub fn create(&self, input_id: InputId, event_key: Option<&str>) -> PipelineResult<StartOutcome> {
        let id = self.instance_id_for(&input_id, event_key);
        let instance = WorkflowInstance::new(id, input_id, self.clock.now());
        if self.history.create_instance(&instance)? {
            info!(instance_id = %id, input_id = %instance.input_id, "Started orchestration");
            return Ok(StartOutcome {
                instance,
                created: true,
            });
        }

        let existing = self
            .history
            .get_instance(&id)?
            .ok_or_else(|| PipelineError::History(format!("instance {id} vanished after insert")))?;
        info!(instance_id = %id, status = %existing.status, "Upload event already has an instance");
        Ok(StartOutcome {
            instance: existing,
            created: false,
        })
    }

    /// Create (or find) the instance for an upload event and run it in the
    /// background if it is still running and not already being driven.
    pub fn start_new(&self, input_id: InputId, event_key: Option<&str>) -> PipelineResult<StartOutcome> {
        let outcome = self.create(input_id, event_key)?;
        if outcome.instance.status == InstanceStatus::Running {
            self.spawn(outcome.instance.clone());
        }
        Ok(outcome)
    }

    /// Run `instance` on its own task. Returns `None` when it is already active.
    pub fn spawn(&self, instance: WorkflowInstance) -> Option<JoinHandle<()>> {
        let guard = ActiveGuard::claim(&self.active, instance.id)?;
        let orchestrator = self.orchestrator.clone();
        Some(tokio::spawn(async move {
            let result = orchestrator.run(&instance).await;
            drop(guard);
            log_outcome(&instance, result);
        }))
    }

    /// Create an instance and drive it to a terminal state on the current task.
    pub async fn run_to_completion(
        &self,
        input_id: InputId,
        event_key: Option<&str>,
    ) -> PipelineResult<WorkflowInstance> {
        let instance = self.create(input_id, event_key)?.instance;
        if instance.status == InstanceStatus::Running {
            let guard = ActiveGuard::claim(&self.active, instance.id).ok_or_else(|| {
                PipelineError::Validation(format!("instance {} is already running", instance.id))
            })?;
            let result = self.orchestrator.run(&instance).await;
            drop(guard);
            if let Err(e @ PipelineError::History(_)) = result {
                return Err(e);
            }
        }
        self.history
            .get_instance(&instance.id)?
            .ok_or_else(|| PipelineError::History(format!("unknown instance {}", instance.id)))
    }

    /// Re-run every instance the history store still has as running.
    pub fn resume_pending(&self) -> PipelineResult<Vec<JoinHandle<()>>> {
        let pending = self.history.list_running()?;
        if !pending.is_empty() {
            info!(count = pending.len(), "Resuming pending instances");
        }
        Ok(pending
            .into_iter()
            .filter_map(|instance| self.spawn(instance))
            .collect())
    }

    pub fn is_active(&self, id: &InstanceId) -> bool {
        lock_active(&self.active).contains(id)
    }
}

fn log_outcome(instance: &WorkflowInstance, result: PipelineResult<OutputReference>) {
    match result {
        Ok(output) => info!(instance_id = %instance.id, output = %output, "Instance completed"),
        Err(e @ PipelineError::StepFailed { .. }) => {
            warn!(instance_id = %instance.id, error = %e, "Instance failed")
        }
        Err(e) => error!(
            instance_id = %instance.id,
            error = %e,
            "Instance interrupted, will resume on restart"
        ),
    }
}

fn lock_active(active: &Mutex<HashSet<InstanceId>>) -> MutexGuard<'_, HashSet<InstanceId>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks an instance as being driven; releases the mark on drop.
struct ActiveGuard {
    active: Arc<Mutex<HashSet<InstanceId>>>,
    id: InstanceId,
}

impl ActiveGuard {
    fn claim(active: &Arc<Mutex<HashSet<InstanceId>>>, id: InstanceId) -> Option<Self> {
        if !lock_active(active).insert(id) {
            return None;
        }
        Some(Self {
            active: active.clone(),
            id,
        })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        lock_active(&self.active).remove(&self.id);
    }
}

/// Uploads seen by the watcher start instances keyed by the blob's etag.
#[async_trait]
impl UploadSink for WorkflowRuntime {
    async fn on_upload(&self, input_id: InputId, etag: &str) -> PipelineResult<()> {
        self.start_new(input_id, Some(etag)).map(|_| ())
    }
}
