//! Verification queue — turns a list of keys into jobs and runs them
//! through a bounded sliding window of in-flight probes.

pub mod job;
pub mod runner;
pub mod state;

pub use job::{parse_credentials, Job, TargetConfig};
pub use runner::{RunHandle, Runner, CONCURRENCY_LIMIT};
pub use state::RunState;
