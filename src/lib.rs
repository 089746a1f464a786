//! RelayProbe — validates batches of LLM provider API keys.
//!
//! A run takes one target configuration (protocol, optional relay base URL,
//! model id) and a multi-line list of keys, then probes every key against
//! the provider under a fixed concurrency cap. Results stay index-aligned
//! with the input no matter in which order the probes complete.
//!
//! Layout:
//! - `adapters` — one minimal-cost probe per protocol (Google, OpenAI-compatible)
//! - `queue` — jobs, live run state, and the sliding-window runner
//! - `targets` — named targets and their run lifecycle
//! - `stats` / `export` — aggregates and CSV over a run
//! - `server` — local JSON-RPC control surface

pub mod adapters;
pub mod config;
pub mod error;
pub mod export;
pub mod presets;
pub mod queue;
pub mod secret;
pub mod server;
pub mod stats;
pub mod targets;

pub use adapters::{ProbeClient, ProbeOutcome, Prober, Protocol, VerificationStatus};
pub use error::{ProbeError, RunError};
pub use queue::{RunHandle, RunState, Runner, TargetConfig, CONCURRENCY_LIMIT};
pub use secret::{mask_key, Credential};
