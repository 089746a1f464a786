//! OpenAI-compatible adapter — a 1-token chat completion against
//! `{base}/chat/completions`. Works for OpenAI itself and the many
//! relays/gateways that mimic its API.

use async_trait::async_trait;
use serde_json::json;

use super::{classify_response, clean_base, Protocol, ProtocolAdapter, PROBE_PROMPT};
use crate::error::ProbeError;

pub struct OpenAiAdapter {
    client: reqwest::Client,
    default_base: String,
}

impl OpenAiAdapter {
    pub fn new(client: reqwest::Client, default_base: impl Into<String>) -> Self {
        Self {
            client,
            default_base: default_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn completions_url(&self, base_url_override: Option<&str>) -> String {
        let base = clean_base(base_url_override).unwrap_or(&self.default_base);
        format!("{}/chat/completions", base)
    }
}

fn probe_body(model: &str) -> serde_json::Value {
    json!({
        "model": model,
        "messages": [{"role": "user", "content": PROBE_PROMPT}],
        "max_tokens": 1
    })
}

#[async_trait]
impl ProtocolAdapter for OpenAiAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::OpenAiCompatible
    }

    async fn send_probe(
        &self,
        key: &str,
        model: &str,
        base_url_override: Option<&str>,
    ) -> Result<(), ProbeError> {
        let resp = self
            .client
            .post(self.completions_url(base_url_override))
            .bearer_auth(key)
            .json(&probe_body(model))
            .send()
            .await
            .map_err(ProbeError::from_reqwest)?;
        classify_response(resp).await
    }
}
