//! Aggregate numbers over a run's results.

use serde::Serialize;

use crate::adapters::VerificationStatus;
use crate::queue::RunState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total: usize,
    /// Keys with a final verdict.
    pub tested: usize,
    pub valid: usize,
    pub invalid: usize,
    /// Mean latency of valid keys only; failures are often fast rejects.
    pub avg_latency_ms: u64,
    pub progress: u8,
}

impl Stats {
    pub fn from_state(state: &RunState) -> Self {
        let mut valid = 0usize;
        let mut invalid = 0usize;
        let mut valid_latency = 0u64;

        for r in &state.results {
            match r.status {
                VerificationStatus::Valid => {
                    valid += 1;
                    valid_latency += r.latency_ms;
                }
                VerificationStatus::Invalid => invalid += 1,
                VerificationStatus::Pending => {}
            }
        }

        let avg_latency_ms = if valid > 0 {
            (valid_latency as f64 / valid as f64).round() as u64
        } else {
            0
        };

        Self {
            total: state.results.len(),
            tested: valid + invalid,
            valid,
            invalid,
            avg_latency_ms,
            progress: state.progress(),
        }
    }
}
