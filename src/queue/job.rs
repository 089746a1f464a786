use serde::{Deserialize, Serialize};

use crate::adapters::Protocol;
use crate::secret::Credential;

/// What a run probes against. A run clones this once at start and every
/// job reads that snapshot, never the caller's live copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub protocol: Protocol,
    /// Relay/alternate endpoint. `None` or blank → provider default.
    #[serde(default)]
    pub base_url: Option<String>,
    pub model: String,
}

impl TargetConfig {
    pub fn new(protocol: Protocol, base_url: Option<String>, model: impl Into<String>) -> Self {
        Self {
            protocol,
            base_url: base_url.filter(|b| !b.trim().is_empty()),
            model: model.into(),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self::new(Protocol::Google, None, "gemini-1.5-flash")
    }
}

/// One queued unit of work: a single key to probe.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    /// Position in the input; also the slot in `RunState::results`.
    pub index: usize,
    pub credential: Credential,
    pub model: String,
}

impl Job {
    pub fn new(index: usize, credential: Credential, model: impl Into<String>) -> Self {
        Self {
            id: format!("job-{}-{}", index, uuid::Uuid::new_v4().simple()),
            index,
            credential,
            model: model.into(),
        }
    }
}

/// Split raw multi-line input into keys: each line trimmed, blanks dropped,
/// input order kept.
pub fn parse_credentials(text: &str) -> Vec<Credential> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(Credential::new)
        .collect()
}

/// One job per surviving line, in input order.
pub fn build_jobs(text: &str, model: &str) -> Vec<Job> {
    parse_credentials(text)
        .into_iter()
        .enumerate()
        .map(|(index, credential)| Job::new(index, credential, model))
        .collect()
}
