//! Error types.
//!
//! `ProbeError` never escapes a run: the probe client turns it into the
//! `error` field of an `Invalid` outcome. `RunError` is what a caller gets
//! back when a run is refused before any job is created.

use thiserror::Error;

/// Maximum characters of a provider's error body kept in a diagnostic.
pub const ERROR_BODY_SNIPPET_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The endpoint answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Connection, TLS, timeout, or other transport failure.
    #[error("{0}")]
    Transport(String),

    /// Success status but the body was not valid JSON.
    #[error("{0}")]
    Decode(String),

    #[error("Unknown error")]
    Unknown,
}

impl ProbeError {
    pub fn http(status: u16, body: &str) -> Self {
        Self::Http {
            status,
            body: body.chars().take(ERROR_BODY_SNIPPET_CHARS).collect(),
        }
    }

    /// Build from a reqwest error, dropping the URL (the Google relay path
    /// carries the key as a query parameter) and keeping the source chain.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let err = err.without_url();
        let mut parts = vec![err.to_string()];
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            let text = cause.to_string();
            if !text.is_empty() && !parts.contains(&text) {
                parts.push(text);
            }
            source = cause.source();
        }
        let message = parts.join(": ");
        if message.trim().is_empty() {
            Self::Unknown
        } else if err.is_decode() {
            Self::Decode(message)
        } else {
            Self::Transport(message)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("No credentials to verify: input is empty after trimming")]
    NoCredentials,

    #[error("Target '{0}' not found")]
    TargetNotFound(String),

    #[error("Target '{0}' already has a run in progress")]
    AlreadyRunning(String),

    #[error("Cannot remove the last remaining target")]
    LastTarget,
}
