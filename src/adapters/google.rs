//! Google Gemini adapter — one 1-token `generateContent` call via the
//! generativelanguage REST API or a compatible relay.

use async_trait::async_trait;
use serde_json::json;

use super::{classify_response, clean_base, Protocol, ProtocolAdapter, PROBE_PROMPT};
use crate::error::ProbeError;

pub struct GoogleAdapter {
    client: reqwest::Client,
    default_base: String,
}

impl GoogleAdapter {
    pub fn new(client: reqwest::Client, default_base: impl Into<String>) -> Self {
        Self {
            client,
            default_base: default_base.into().trim_end_matches('/').to_string(),
        }
    }
}

/// Normalize a relay base URL: strip trailing slashes and append `/v1beta`
/// unless a version segment is already present.
///
/// Best effort only. Relays that mount the API under an unusual path
/// containing `/v1` somewhere else will not get the suffix.
pub fn normalize_relay_base(base: &str) -> String {
    let clean = base.trim().trim_end_matches('/');
    if clean.contains("/v1") {
        clean.to_string()
    } else {
        format!("{}/v1beta", clean)
    }
}

fn probe_body() -> serde_json::Value {
    json!({
        "contents": [{"parts": [{"text": PROBE_PROMPT}]}],
        "generationConfig": {"maxOutputTokens": 1}
    })
}

#[async_trait]
impl ProtocolAdapter for GoogleAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Google
    }

    async fn send_probe(
        &self,
        key: &str,
        model: &str,
        base_url_override: Option<&str>,
    ) -> Result<(), ProbeError> {
        let request = match clean_base(base_url_override) {
            // Relays get the key as a query parameter.
            Some(base) => {
                let url = format!(
                    "{}/models/{}:generateContent",
                    normalize_relay_base(base),
                    model
                );
                self.client.post(&url).query(&[("key", key)])
            }
            None => {
                let url = format!(
                    "{}/v1beta/models/{}:generateContent",
                    self.default_base, model
                );
                self.client.post(&url).header("x-goog-api-key", key)
            }
        };

        let resp = request
            .json(&probe_body())
            .send()
            .await
            .map_err(ProbeError::from_reqwest)?;
        classify_response(resp).await
    }
}
