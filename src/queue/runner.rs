//! Sliding-window runner.
//!
//! At most `CONCURRENCY_LIMIT` probes are in flight at once. The moment one
//! finishes, the next queued job is admitted, so the window refills
//! continuously instead of in fixed waves.
//!
//! The coordinator task that owns the window is also the only writer of the
//! run's `RunState`, published through a `watch` channel. Probe tasks never
//! touch shared state; they just return their outcome to the coordinator.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::job::build_jobs;
use super::{Job, RunState, TargetConfig};
use crate::adapters::{ProbeOutcome, Prober, VerificationStatus};
use crate::error::RunError;

/// Maximum probes in flight per run. Small enough to stay clear of
/// provider-side rate limiting, large enough to overlap network waits.
pub const CONCURRENCY_LIMIT: usize = 3;

pub struct Runner {
    prober: Arc<dyn Prober>,
}

impl Runner {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self { prober }
    }

    /// Start a run in the background and return a handle to its live state.
    ///
    /// The target config is cloned here; later edits to the caller's copy
    /// never reach this run's jobs. Blank input is refused before any state
    /// is created or request sent.
    pub fn start(&self, target: &TargetConfig, credentials_text: &str) -> Result<RunHandle, RunError> {
        let target = Arc::new(target.clone());
        let jobs = build_jobs(credentials_text, &target.model);
        if jobs.is_empty() {
            return Err(RunError::NoCredentials);
        }

        info!(
            jobs = jobs.len(),
            protocol = %target.protocol,
            model = %target.model,
            base_url = target.base_url.as_deref().unwrap_or("default"),
            concurrency = CONCURRENCY_LIMIT,
            "🚀 Verification run starting"
        );

        let (tx, rx) = watch::channel(RunState::start(&jobs));
        let task = tokio::spawn(drive(Arc::clone(&self.prober), target, jobs, tx));
        Ok(RunHandle { state: rx, task })
    }

    /// Start a run and wait for every job to settle.
    pub async fn run(&self, target: &TargetConfig, credentials_text: &str) -> Result<RunState, RunError> {
        Ok(self.start(target, credentials_text)?.wait().await)
    }
}

/// Handle to a run in progress. Dropping it does not cancel the run.
pub struct RunHandle {
    state: watch::Receiver<RunState>,
    task: JoinHandle<RunState>,
}

impl RunHandle {
    /// Receiver that sees every state change of this run.
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.clone()
    }

    pub fn snapshot(&self) -> RunState {
        self.state.borrow().clone()
    }

    pub async fn wait(self) -> RunState {
        match self.task.await {
            Ok(state) => state,
            Err(e) => {
                error!("Run coordinator failed: {}", e);
                let mut state = self.state.borrow().clone();
                state.finish();
                state
            }
        }
    }
}

async fn drive(
    prober: Arc<dyn Prober>,
    target: Arc<TargetConfig>,
    jobs: Vec<Job>,
    state: watch::Sender<RunState>,
) -> RunState {
    let total = jobs.len();
    let mut queue: VecDeque<Job> = jobs.into();
    let mut window: JoinSet<ProbeOutcome> = JoinSet::new();

    loop {
        // Refill the window up to the cap.
        while window.len() < CONCURRENCY_LIMIT {
            let Some(job) = queue.pop_front() else { break };
            debug!(job_id = %job.id, key = %job.credential, "Job admitted");
            state.send_modify(RunState::mark_admitted);

            let prober = Arc::clone(&prober);
            let target = Arc::clone(&target);
            window.spawn(async move { prober.probe(&job, &target).await });
        }

        match window.join_next().await {
            Some(Ok(outcome)) => {
                let job_id = outcome.id.clone();
                let status = outcome.status;
                let latency_ms = outcome.latency_ms;
                state.send_modify(|s| {
                    s.apply(outcome);
                });

                let snap = state.borrow();
                match status {
                    VerificationStatus::Valid => debug!(
                        job_id = %job_id, latency_ms,
                        completed = snap.completed_count, total,
                        progress = snap.progress(),
                        "✅ Key valid"
                    ),
                    _ => debug!(
                        job_id = %job_id, latency_ms,
                        completed = snap.completed_count, total,
                        progress = snap.progress(),
                        "❌ Key invalid"
                    ),
                }
            }
            Some(Err(e)) => {
                // The job's slot stays pending and is settled by `finish`.
                warn!("Probe task ended without an outcome: {}", e);
                state.send_modify(|s| s.in_flight = s.in_flight.saturating_sub(1));
            }
            None => break,
        }
    }

    state.send_modify(RunState::finish);
    let done = state.borrow().clone();
    info!(
        total = done.total_count,
        valid = done.count(VerificationStatus::Valid),
        invalid = done.count(VerificationStatus::Invalid),
        "🏁 Verification run complete"
    );
    done
}
