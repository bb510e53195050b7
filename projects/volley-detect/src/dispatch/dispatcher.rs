// Job dispatcher: validates requests, launches execution units and tracks them
//
// Each Dispatcher owns its registry, id counter and event channel. A
// background completion loop receives natural exits from the execution units
// and moves finished jobs from the live table into a bounded history.

use crate::dispatch::error::DispatchError;
use crate::dispatch::execution::{ExecutionUnit, ScriptCommand, UnitExit};
use crate::dispatch::types::{DetectionRequest, JobEvent, JobId, JobState, JobStatus, ModelSelection};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub command: ScriptCommand,
    /// Admission limit on live jobs. `None` accepts every request.
    pub max_jobs: Option<usize>,
    /// Number of finished jobs kept for status queries.
    pub history_limit: usize,
}

struct LiveJob {
    status: JobStatus,
    unit: ExecutionUnit,
}

#[derive(Default)]
struct Registry {
    live: HashMap<JobId, LiveJob>,
    history: VecDeque<JobStatus>,
    closing: bool,
}

impl Registry {
    fn remember(&mut self, status: JobStatus, limit: usize) {
        self.history.push_back(status);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }
}

struct Shared {
    config: DispatcherConfig,
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    events: broadcast::Sender<JobEvent>,
    exit_tx: mpsc::UnboundedSender<UnitExit>,
    /// Set once `shutdown` has terminated every job.
    closed: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Creates a dispatcher and spawns its completion loop on the current runtime.
    pub fn new(config: DispatcherConfig) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            config,
            registry: Mutex::new(Registry::default()),
            next_id: AtomicU64::new(1),
            events,
            exit_tx,
            closed: watch::Sender::new(false),
        });

        tokio::spawn(completion_loop(Arc::downgrade(&shared), exit_rx));

        Self { shared }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.shared
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, job_id: JobId, state: JobState) {
        // No subscribers is fine.
        let _ = self.shared.events.send(JobEvent::new(job_id, state));
    }

    /// Validates the request and launches the detection script.
    ///
    /// Returns as soon as the subprocess is running; the outcome is published
    /// on the event channel and kept in the job history.
    pub async fn start_job(
        &self,
        detection_target: &str,
        selection: &str,
        path: impl Into<PathBuf>,
        confidence: f64,
    ) -> Result<JobId, DispatchError> {
        let model: ModelSelection = selection.parse()?;

        let path = path.into();
        if let Err(source) = tokio::fs::metadata(&path).await {
            warn!("Rejecting job, cannot access {:?}: {}", path, source);
            return Err(DispatchError::PathNotFound { path, source });
        }

        if !(0.0..=1.0).contains(&confidence) {
            warn!(confidence, "Confidence outside [0, 1], forwarding unchanged");
        }

        let request = DetectionRequest {
            path,
            detection_target: detection_target.to_string(),
            model,
            confidence,
        };

        let config = &self.shared.config;
        let mut registry = self.registry();
        if registry.closing {
            warn!("Rejecting job, dispatcher is shutting down");
            return Err(DispatchError::ShuttingDown);
        }
        if let Some(limit) = config.max_jobs {
            if registry.live.len() >= limit {
                warn!(limit, "Rejecting job, admission limit reached");
                return Err(DispatchError::AtCapacity { limit });
            }
        }

        let job_id = JobId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let mut status = JobStatus::new(job_id, &request);
        self.publish(job_id, JobState::Starting);

        match ExecutionUnit::launch(job_id, &config.command, &request, self.shared.exit_tx.clone())
        {
            Ok(unit) => {
                status.state = JobState::Running;
                status.pid = unit.pid();
                registry.live.insert(job_id, LiveJob { status, unit });
                self.publish(job_id, JobState::Running);
                info!(
                    job_id = %job_id,
                    target = %request.detection_target,
                    model = request.model.code(),
                    "Analysis started for {:?}",
                    request.path
                );
                Ok(job_id)
            }
            Err(e) => {
                error!(job_id = %job_id, "Failed to launch detection script: {}", e);
                let state = JobState::Failed { exit_code: None };
                registry.remember(status.finish(state), config.history_limit);
                self.publish(job_id, state);
                Err(DispatchError::Launch(e))
            }
        }
    }

    /// Terminates a live job and waits until its subprocess has been reaped.
    ///
    /// The registry entry is removed before termination is attempted, so a
    /// second cancel of the same id reports `JobNotFound`.
    pub async fn cancel_job(&self, job_id: JobId) -> Result<JobStatus, DispatchError> {
        let live = self.registry().live.remove(&job_id);
        match live {
            Some(job) => self.terminate_live(job_id, job).await,
            None => {
                debug!(job_id = %job_id, "Cancel requested for unknown job");
                Err(DispatchError::JobNotFound(job_id))
            }
        }
    }

    async fn terminate_live(&self, job_id: JobId, job: LiveJob) -> Result<JobStatus, DispatchError> {
        let LiveJob { status, mut unit } = job;
        let history_limit = self.shared.config.history_limit;

        match unit.terminate().await {
            Ok(exit) => {
                info!(
                    job_id = %job_id,
                    code = ?exit.and_then(|s| s.code()),
                    "Job cancelled"
                );
                let status = status.finish(JobState::Cancelled);
                self.registry().remember(status.clone(), history_limit);
                self.publish(job_id, JobState::Cancelled);
                Ok(status)
            }
            Err(source) => {
                error!(job_id = %job_id, "Error terminating job: {}", source);
                let state = JobState::Failed { exit_code: None };
                self.registry().remember(status.finish(state), history_limit);
                self.publish(job_id, state);
                Err(DispatchError::Terminate { job_id, source })
            }
        }
    }

    fn complete(&self, exit: UnitExit) {
        let state = match &exit.status {
            Ok(status) => JobState::from_exit_code(status.code()),
            Err(_) => JobState::Failed { exit_code: None },
        };

        let mut registry = self.registry();
        let Some(job) = registry.live.remove(&exit.job_id) else {
            debug!(job_id = %exit.job_id, "Exit for job no longer live, ignoring");
            return;
        };
        registry.remember(job.status.finish(state), self.shared.config.history_limit);
        self.publish(exit.job_id, state);
        drop(registry);

        match state {
            JobState::Completed => info!(job_id = %exit.job_id, "Analysis complete"),
            _ => warn!(job_id = %exit.job_id, ?state, "Analysis failed"),
        }
    }

    /// Stops admitting jobs and terminates every live job. Event subscribers
    /// see the terminal events before `closed` flips.
    pub async fn shutdown(&self) {
        let live: Vec<(JobId, LiveJob)> = {
            let mut registry = self.registry();
            registry.closing = true;
            registry.live.drain().collect()
        };
        if !live.is_empty() {
            info!("Terminating {} running job(s)", live.len());
        }
        for (job_id, job) in live {
            if let Err(e) = self.terminate_live(job_id, job).await {
                error!("Shutdown: {}", e);
            }
        }
        self.shared.closed.send_replace(true);
    }

    /// Status of a live job, or of a finished one still in the history.
    pub fn job_status(&self, job_id: JobId) -> Option<JobStatus> {
        let registry = self.registry();
        registry
            .live
            .get(&job_id)
            .map(|job| job.status.clone())
            .or_else(|| {
                registry
                    .history
                    .iter()
                    .rev()
                    .find(|s| s.job_id == job_id)
                    .cloned()
            })
    }

    pub fn active_jobs(&self) -> Vec<JobStatus> {
        let mut jobs: Vec<JobStatus> = self
            .registry()
            .live
            .values()
            .map(|job| job.status.clone())
            .collect();
        jobs.sort_by_key(|s| s.job_id);
        jobs
    }

    pub fn active_count(&self) -> usize {
        self.registry().live.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.shared.events.subscribe()
    }

    /// Turns `true` once `shutdown` has finished terminating jobs.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.shared.closed.subscribe()
    }
}

async fn completion_loop(shared: Weak<Shared>, mut exit_rx: mpsc::UnboundedReceiver<UnitExit>) {
    while let Some(exit) = exit_rx.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        Dispatcher { shared }.complete(exit);
    }
    debug!("Completion loop stopped");
}
