//! Probe adapters — one minimal-cost request per key.
//!
//! Each protocol owns its request shape behind `ProtocolAdapter`. The
//! `ProbeClient` dispatches to the right adapter once per probe, times it,
//! and folds every failure into an `Invalid` outcome. Nothing past this
//! module ever sees a `ProbeError` as an error; it is data on the outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::ProbeError;
use crate::queue::{Job, TargetConfig};
use crate::secret::Credential;

pub mod google;
pub mod openai;

pub use google::GoogleAdapter;
pub use openai::OpenAiAdapter;

pub const DEFAULT_GOOGLE_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Prompt sent by every probe. The reply is never inspected.
pub(crate) const PROBE_PROMPT: &str = "ping";

// ── Core Types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "GOOGLE", alias = "google")]
    Google,
    #[serde(rename = "OPENAI", alias = "openai", alias = "openai_compatible")]
    OpenAiCompatible,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Google => "GOOGLE",
            Protocol::OpenAiCompatible => "OPENAI",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" | "gemini" => Some(Protocol::Google),
            "openai" | "openai_compatible" | "openai-compatible" => Some(Protocol::OpenAiCompatible),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerificationStatus {
    Pending,
    Valid,
    Invalid,
}

impl VerificationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, VerificationStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "PENDING",
            VerificationStatus::Valid => "VALID",
            VerificationStatus::Invalid => "INVALID",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(VerificationStatus::Pending),
            "VALID" => Some(VerificationStatus::Valid),
            "INVALID" => Some(VerificationStatus::Invalid),
            _ => None,
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of probing one key. Starts `Pending`; `Valid`/`Invalid` are final.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    pub id: String,
    /// Raw key, for CSV export only.
    #[serde(skip)]
    pub credential: Credential,
    pub key_masked: String,
    pub status: VerificationStatus,
    pub latency_ms: u64,
    pub model: String,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ProbeOutcome {
    pub fn pending(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            key_masked: job.credential.masked(),
            credential: job.credential.clone(),
            status: VerificationStatus::Pending,
            latency_ms: 0,
            model: job.model.clone(),
            error: None,
            completed_at: None,
        }
    }

    fn finished(
        id: &str,
        credential: &Credential,
        model: &str,
        latency_ms: u64,
        result: Result<(), ProbeError>,
    ) -> Self {
        let (status, error) = match result {
            Ok(()) => (VerificationStatus::Valid, None),
            Err(e) => (VerificationStatus::Invalid, Some(e.to_string())),
        };
        Self {
            id: id.to_string(),
            key_masked: credential.masked(),
            credential: credential.clone(),
            status,
            latency_ms,
            model: model.to_string(),
            error,
            completed_at: Some(Utc::now()),
        }
    }

    /// Terminal `Invalid` outcome for a job that never reported back.
    pub fn lost(pending: &ProbeOutcome) -> Self {
        Self {
            status: VerificationStatus::Invalid,
            error: Some(ProbeError::Unknown.to_string()),
            completed_at: Some(Utc::now()),
            ..pending.clone()
        }
    }
}

// ── Adapter Trait ───────────────────────────────────────────────────

/// One protocol's probe. Returns `Ok(())` iff the endpoint answered with a
/// success status and a parseable JSON body.
///
/// The key is passed per call; adapters must not store, log, or cache it.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    fn protocol(&self) -> Protocol;

    async fn send_probe(
        &self,
        key: &str,
        model: &str,
        base_url_override: Option<&str>,
    ) -> Result<(), ProbeError>;
}

/// Shared success classification: 2xx and a JSON body.
pub(crate) async fn classify_response(resp: reqwest::Response) -> Result<(), ProbeError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp
            .text()
            .await
            .unwrap_or_else(|_| ProbeError::Unknown.to_string());
        return Err(ProbeError::http(status.as_u16(), &body));
    }
    resp.json::<serde_json::Value>()
        .await
        .map(|_| ())
        .map_err(ProbeError::from_reqwest)
}

/// Trim a user-supplied base URL; blank means "use the default".
pub(crate) fn clean_base(base: Option<&str>) -> Option<&str> {
    base.map(|b| b.trim().trim_end_matches('/'))
        .filter(|b| !b.is_empty())
}

// ── Probe Client ────────────────────────────────────────────────────

/// What the runner calls for each job.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, job: &Job, target: &TargetConfig) -> ProbeOutcome;
}

/// Default endpoints, overridable for relays and tests.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub google: String,
    pub openai: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            google: DEFAULT_GOOGLE_BASE.to_string(),
            openai: DEFAULT_OPENAI_BASE.to_string(),
        }
    }
}

pub struct ProbeClient {
    google: GoogleAdapter,
    openai: OpenAiAdapter,
}

impl ProbeClient {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        Self::with_endpoints(Endpoints::default(), timeout)
    }

    pub fn with_endpoints(endpoints: Endpoints, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            google: GoogleAdapter::new(client.clone(), endpoints.google),
            openai: OpenAiAdapter::new(client, endpoints.openai),
        })
    }

    fn adapter(&self, protocol: Protocol) -> &dyn ProtocolAdapter {
        match protocol {
            Protocol::Google => &self.google,
            Protocol::OpenAiCompatible => &self.openai,
        }
    }

    /// Probe one key. Never fails: errors become an `Invalid` outcome that
    /// still carries the measured latency.
    pub async fn probe_key(
        &self,
        credential: &Credential,
        model: &str,
        job_id: &str,
        base_url_override: Option<&str>,
        protocol: Protocol,
    ) -> ProbeOutcome {
        let adapter = self.adapter(protocol);
        let start = Instant::now();
        let result = adapter
            .send_probe(credential.expose(), model, base_url_override)
            .await;
        let latency_ms = start.elapsed().as_millis() as u64;

        debug!(
            job_id = %job_id,
            key = %credential,
            protocol = %adapter.protocol(),
            latency_ms,
            ok = result.is_ok(),
            "Probe finished"
        );

        ProbeOutcome::finished(job_id, credential, model, latency_ms, result)
    }
}

#[async_trait]
impl Prober for ProbeClient {
    async fn probe(&self, job: &Job, target: &TargetConfig) -> ProbeOutcome {
        self.probe_key(
            &job.credential,
            &job.model,
            &job.id,
            target.base_url.as_deref(),
            target.protocol,
        )
        .await
    }
}
