//! Live state of one run. Only the run's coordinator task mutates it;
//! everyone else reads snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

use super::Job;
use crate::adapters::{ProbeOutcome, VerificationStatus};

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunState {
    /// One entry per input key, in input order. Slots never move; only
    /// their fields change when the job completes.
    pub results: Vec<ProbeOutcome>,
    pub is_running: bool,
    pub completed_count: usize,
    pub total_count: usize,
    /// Jobs admitted to the window and not yet finished.
    pub in_flight: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    slots: HashMap<String, usize>,
}

impl RunState {
    /// Fresh state with every job `Pending`.
    pub fn start(jobs: &[Job]) -> Self {
        Self {
            results: jobs.iter().map(ProbeOutcome::pending).collect(),
            is_running: !jobs.is_empty(),
            completed_count: 0,
            total_count: jobs.len(),
            in_flight: 0,
            started_at: Some(Utc::now()),
            last_run_at: None,
            slots: jobs.iter().enumerate().map(|(i, j)| (j.id.clone(), i)).collect(),
        }
    }

    /// Whole-percent progress, `round(completed / total * 100)`.
    pub fn progress(&self) -> u8 {
        if self.total_count == 0 {
            return 0;
        }
        ((self.completed_count as f64 / self.total_count as f64) * 100.0).round() as u8
    }

    pub fn mark_admitted(&mut self) {
        self.in_flight += 1;
    }

    /// Record a finished job in its slot. Returns `false` (and changes
    /// nothing) for an unknown id or a slot that is already terminal, so a
    /// job can complete at most once.
    pub fn apply(&mut self, outcome: ProbeOutcome) -> bool {
        let Some(&slot) = self.slots.get(&outcome.id) else {
            warn!(job_id = %outcome.id, "Completion for unknown job ignored");
            return false;
        };
        if self.results[slot].status.is_terminal() || !outcome.status.is_terminal() {
            warn!(job_id = %outcome.id, "Duplicate or non-terminal completion ignored");
            return false;
        }

        self.results[slot] = outcome;
        self.completed_count += 1;
        self.in_flight = self.in_flight.saturating_sub(1);
        self.is_running = self.completed_count < self.total_count;
        if !self.is_running {
            self.last_run_at = Some(Utc::now());
        }
        true
    }

    /// Close the run. Any slot still pending is a job that never reported
    /// back; it is settled as `Invalid` so every job ends terminal.
    pub fn finish(&mut self) {
        let lost: Vec<ProbeOutcome> = self
            .results
            .iter()
            .filter(|r| !r.status.is_terminal())
            .map(ProbeOutcome::lost)
            .collect();
        for outcome in lost {
            warn!(job_id = %outcome.id, "Job ended without an outcome, marked invalid");
            self.apply(outcome);
        }
        self.in_flight = 0;
        self.is_running = false;
        self.last_run_at.get_or_insert_with(Utc::now);
    }

    pub fn count(&self, status: VerificationStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}
