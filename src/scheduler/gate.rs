use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ClustermError, Result};
use crate::scheduler::job::{
    random_ids, Clock, IdGenerator, JobInfo, JobLog, JobRunner, JobStatus, OnComplete,
    SystemClock, DEFAULT_MAX_LOG_LINES,
};

struct ActiveJob {
    info: JobInfo,
    runner: Option<JobRunner>,
    on_complete: Option<OnComplete>,
    cancel: CancellationToken,
    log: JobLog,
}

impl ActiveJob {
    fn snapshot(&self) -> JobInfo {
        let mut info = self.info.clone();
        info.logs = self.log.lines();
        info
    }

    fn launched(&self) -> bool {
        self.runner.is_none()
    }
}

#[derive(Default)]
struct GateState {
    active: Option<ActiveJob>,
    last: Option<JobInfo>,
}

/// Serializes cluster-mutating jobs: at most one job is active at a time.
///
/// The gate is cheap to clone; clones share the same state. Locks are never
/// held across an `.await`.
#[derive(Clone)]
pub struct ActiveJobGate {
    state: Arc<Mutex<GateState>>,
    clock: Arc<dyn Clock>,
    ids: IdGenerator,
    max_log_lines: usize,
}

impl Default for ActiveJobGate {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ActiveJobGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveJobGate")
            .field("active", &self.active_job().map(|j| j.id))
            .finish()
    }
}

impl ActiveJobGate {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock), random_ids())
    }

    pub fn with_clock(clock: Arc<dyn Clock>, ids: IdGenerator) -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState::default())),
            clock,
            ids,
            max_log_lines: DEFAULT_MAX_LOG_LINES,
        }
    }

    pub fn with_max_log_lines(mut self, max_log_lines: usize) -> Self {
        self.max_log_lines = max_log_lines;
        self
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a new active job, or fail if one is already active.
    ///
    /// Nothing is mutated when the gate is taken.
    pub fn check_and_set_active_job(
        &self,
        description: impl Into<String>,
        runner: JobRunner,
        on_complete: OnComplete,
    ) -> Result<Uuid> {
        let mut state = self.lock();
        if let Some(job) = &state.active {
            return Err(ClustermError::ActiveJob(job.info.description.clone()));
        }

        let id = (self.ids)();
        let info = JobInfo {
            id,
            description: description.into(),
            status: JobStatus::Active,
            error: None,
            started_at: self.clock.now(),
            finished_at: None,
            logs: Vec::new(),
        };
        tracing::info!(job_id = %id, description = %info.description, "Active job set");
        state.active = Some(ActiveJob {
            info,
            runner: Some(runner),
            on_complete: Some(on_complete),
            cancel: CancellationToken::new(),
            log: JobLog::with_capacity(self.max_log_lines),
        });
        Ok(id)
    }

    /// Spawn the active job's runner as a background task.
    ///
    /// When the runner finishes the completion callback is awaited, then the
    /// gate is cleared so a new job can be accepted.
    pub fn run_active_job(&self) -> Result<JoinHandle<()>> {
        let (id, runner, on_complete, cancel, log) = {
            let mut state = self.lock();
            let job = state
                .active
                .as_mut()
                .ok_or_else(|| ClustermError::Internal("no active job to run".to_string()))?;
            let runner = job
                .runner
                .take()
                .ok_or_else(|| ClustermError::Internal("active job is already running".to_string()))?;
            let on_complete = job.on_complete.take();
            (job.info.id, runner, on_complete, job.cancel.clone(), job.log.clone())
        };

        let gate = self.clone();
        Ok(tokio::spawn(async move {
            tracing::info!(job_id = %id, "Running active job");
            let result = runner(cancel, log).await;
            gate.finish(id, result, on_complete).await;
        }))
    }

    async fn finish(&self, id: Uuid, result: Result<()>, on_complete: Option<OnComplete>) {
        let (status, err) = match result {
            Ok(()) => (JobStatus::Completed, None),
            Err(e) => (JobStatus::Errored, Some(e)),
        };
        let error_text = err.as_ref().map(|e| e.to_string());

        {
            let mut state = self.lock();
            if let Some(job) = state.active.as_mut().filter(|j| j.info.id == id) {
                job.info.status = status;
                job.info.error = error_text.clone();
            }
        }

        match &error_text {
            Some(e) => tracing::error!(job_id = %id, status = %status, error = %e, "Active job finished"),
            None => tracing::info!(job_id = %id, status = %status, "Active job finished"),
        }

        if let Some(on_complete) = on_complete {
            on_complete(status, err).await;
        }

        let mut state = self.lock();
        let finished = match state.active.take() {
            Some(job) if job.info.id == id => Some(job.snapshot()),
            other => {
                state.active = other;
                None
            }
        };
        let mut info = finished.unwrap_or_else(|| JobInfo {
            id,
            description: String::new(),
            status,
            error: error_text,
            started_at: self.clock.now(),
            finished_at: None,
            logs: Vec::new(),
        });
        info.finished_at = Some(self.clock.now());
        state.last = Some(info);
    }

    /// Clear a job that was set but not launched. No-op when idle.
    ///
    /// A launched job is only cancelled: it keeps the gate until its
    /// completion callback has run, so two mutating jobs never overlap.
    pub fn reset_active_job(&self) {
        let mut state = self.lock();
        let Some(job) = state.active.as_ref() else {
            return;
        };
        if job.launched() {
            tracing::info!(job_id = %job.info.id, "Active job is running, cancelling instead of reset");
            job.cancel.cancel();
            return;
        }
        if let Some(job) = state.active.take() {
            tracing::info!(job_id = %job.info.id, "Active job reset");
        }
    }

    /// Request cancellation of the active job. Returns false when idle.
    pub fn cancel_active_job(&self) -> bool {
        let state = self.lock();
        match &state.active {
            Some(job) => {
                tracing::info!(job_id = %job.info.id, "Cancelling active job");
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().active.is_some()
    }

    pub fn active_job(&self) -> Option<JobInfo> {
        self.lock().active.as_ref().map(ActiveJob::snapshot)
    }

    pub fn last_job(&self) -> Option<JobInfo> {
        self.lock().last.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::BoxFuture;

    fn noop_runner() -> JobRunner {
        Box::new(|_cancel: CancellationToken, _log: JobLog| -> BoxFuture<Result<()>> { Box::pin(async { Ok(()) }) })
    }

    fn noop_complete() -> OnComplete {
        Box::new(|_status: JobStatus, _err: Option<ClustermError>| -> BoxFuture<()> { Box::pin(async {}) })
    }

    #[test]
    fn second_job_conflicts_without_mutation() {
        let gate = ActiveJobGate::new();
        let first = gate
            .check_and_set_active_job("first", noop_runner(), noop_complete())
            .unwrap();

        let err = gate
            .check_and_set_active_job("second", noop_runner(), noop_complete())
            .unwrap_err();
        assert!(matches!(err, ClustermError::ActiveJob(ref d) if d == "first"));
        assert_eq!(gate.active_job().unwrap().id, first);
    }

    #[tokio::test]
    async fn reset_keeps_launched_job_until_finished() {
        let gate = ActiveJobGate::new();
        let runner: JobRunner = Box::new(
            |cancel: CancellationToken, _log: JobLog| -> BoxFuture<Result<()>> {
                Box::pin(async move {
                    cancel.cancelled().await;
                    Err(ClustermError::Cancelled)
                })
            },
        );
        gate.check_and_set_active_job("running", runner, noop_complete())
            .unwrap();
        let handle = gate.run_active_job().unwrap();

        gate.reset_active_job();
        assert!(gate.is_active());
        assert!(matches!(
            gate.check_and_set_active_job("next", noop_runner(), noop_complete()),
            Err(ClustermError::ActiveJob(_))
        ));

        handle.await.unwrap();
        assert!(!gate.is_active());
        assert_eq!(gate.last_job().unwrap().description, "running");
    }

    #[test]
    fn reset_is_idempotent() {
        let gate = ActiveJobGate::new();
        gate.reset_active_job();
        gate.check_and_set_active_job("job", noop_runner(), noop_complete())
            .unwrap();
        gate.reset_active_job();
        gate.reset_active_job();
        assert!(!gate.is_active());
    }

    #[test]
    fn injected_ids_are_used() {
        let fixed = Uuid::new_v4();
        let gate = ActiveJobGate::with_clock(Arc::new(SystemClock), Arc::new(move || fixed));
        let id = gate
            .check_and_set_active_job("job", noop_runner(), noop_complete())
            .unwrap();
        assert_eq!(id, fixed);
    }

    #[test]
    fn run_without_active_job_fails() {
        let gate = ActiveJobGate::new();
        assert!(matches!(
            gate.run_active_job(),
            Err(ClustermError::Internal(_))
        ));
        assert!(!gate.cancel_active_job());
    }
}
