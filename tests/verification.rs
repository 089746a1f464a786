//! End-to-end probe runs against a local mock provider.
//!
//! The mock speaks just enough of the Gemini `generateContent` and OpenAI
//! `chat/completions` APIs to accept or reject a key the way the real
//! services do.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use relayprobe::adapters::Endpoints;
use relayprobe::export::{parse_csv, to_csv};
use relayprobe::server::Server;
use relayprobe::targets::TargetRegistry;
use relayprobe::{
    mask_key, Credential, ProbeClient, Protocol, Runner, TargetConfig, VerificationStatus,
    CONCURRENCY_LIMIT,
};

const GOOD_KEYS: &[&str] = &["AIzaGoodKey0001", "AIzaGoodKey0002", "sk-good-openai-key"];

#[derive(Default)]
struct Provider {
    hits: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Provider {
    fn record(&self, uri: &Uri) {
        let line = uri.path_and_query().map(|p| p.to_string()).unwrap_or_default();
        self.hits.lock().unwrap().push(line);
    }

    fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }
}

async fn gemini(
    State(provider): State<Arc<Provider>>,
    Path(action): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    uri: Uri,
    Json(body): Json<Value>,
) -> Response {
    provider.record(&uri);
    assert_eq!(body["generationConfig"]["maxOutputTokens"], 1);
    assert!(action.ends_with(":generateContent"), "action: {}", action);

    let key = headers
        .get("x-goog-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| query.get("key").cloned())
        .unwrap_or_default();

    if !GOOD_KEYS.contains(&key.as_str()) {
        let body = json!({"error": {
            "code": 400,
            "message": "API key not valid. Please pass a valid API key.",
            "status": "INVALID_ARGUMENT",
            "details": [{"reason": "API_KEY_INVALID", "domain": "googleapis.com"}]
        }});
        return (StatusCode::BAD_REQUEST, body.to_string()).into_response();
    }

    if action.starts_with("broken-model") {
        return (StatusCode::OK, "upstream hiccup").into_response();
    }

    if action.starts_with("slow-model") {
        let now = provider.active.fetch_add(1, Ordering::SeqCst) + 1;
        provider.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        provider.active.fetch_sub(1, Ordering::SeqCst);
    }

    Json(json!({"candidates": [{"content": {"parts": [{"text": "p"}]}}]})).into_response()
}

async fn chat(
    State(provider): State<Arc<Provider>>,
    headers: HeaderMap,
    uri: Uri,
    Json(body): Json<Value>,
) -> Response {
    provider.record(&uri);
    assert_eq!(body["max_tokens"], 1);
    assert_eq!(body["messages"][0]["role"], "user");

    let key = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();

    if !GOOD_KEYS.contains(&key) {
        let body = json!({"error": {
            "message": "Incorrect API key provided.",
            "type": "invalid_request_error",
            "code": "invalid_api_key"
        }});
        return (StatusCode::UNAUTHORIZED, body.to_string()).into_response();
    }
    Json(json!({"id": "chatcmpl-1", "model": body["model"], "choices": []})).into_response()
}

async fn spawn_provider() -> (String, Arc<Provider>) {
    let provider = Arc::new(Provider::default());
    let app = Router::new()
        .route("/v1beta/models/:action", post(gemini))
        .route("/relay/v1beta/models/:action", post(gemini))
        .route("/v1/chat/completions", post(chat))
        .with_state(Arc::clone(&provider));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), provider)
}

fn client_for(base: &str) -> ProbeClient {
    let endpoints = Endpoints {
        google: base.to_string(),
        openai: format!("{}/v1", base),
    };
    ProbeClient::with_endpoints(endpoints, Duration::from_secs(5)).unwrap()
}

const MIXED_KEYS: &str = "AIzaGoodKey0001\nAIzaRevoked0001\n\n  AIzaGoodKey0002  \nAIzaRevoked0002\nAIzaRevoked0003\n";

#[tokio::test]
async fn test_google_default_endpoint_mixed_keys() {
    let (base, provider) = spawn_provider().await;
    let runner = Runner::new(Arc::new(client_for(&base)));
    let target = TargetConfig::new(Protocol::Google, None, "gemini-1.5-flash");

    let state = runner.run(&target, MIXED_KEYS).await.unwrap();

    assert!(!state.is_running);
    assert_eq!(state.total_count, 5);
    assert_eq!(state.completed_count, 5);
    assert_eq!(state.in_flight, 0);

    let expected = [
        ("AIzaGoodKey0001", VerificationStatus::Valid),
        ("AIzaRevoked0001", VerificationStatus::Invalid),
        ("AIzaGoodKey0002", VerificationStatus::Valid),
        ("AIzaRevoked0002", VerificationStatus::Invalid),
        ("AIzaRevoked0003", VerificationStatus::Invalid),
    ];
    for (result, (key, status)) in state.results.iter().zip(expected) {
        assert_eq!(result.key_masked, mask_key(key));
        assert_eq!(result.credential.expose(), key);
        assert_eq!(result.status, status);
        assert_eq!(result.model, "gemini-1.5-flash");
        assert!(result.completed_at.is_some());
        match status {
            VerificationStatus::Valid => assert!(result.error.is_none()),
            _ => {
                let error = result.error.as_deref().unwrap();
                assert!(error.starts_with("HTTP 400: "), "error: {}", error);
                assert!(error.chars().count() <= "HTTP 400: ".len() + 100);
            }
        }
    }

    // Default endpoint: key travels in the header, never in the URL.
    let hits = provider.hits();
    assert_eq!(hits.len(), 5);
    for hit in hits {
        assert_eq!(hit, "/v1beta/models/gemini-1.5-flash:generateContent");
    }
}

#[tokio::test]
async fn test_google_relay_base_is_normalized() {
    let (base, provider) = spawn_provider().await;
    let runner = Runner::new(Arc::new(client_for("http://127.0.0.1:1")));
    let target = TargetConfig::new(
        Protocol::Google,
        Some(format!("{}/relay//", base)),
        "gemini-1.5-flash",
    );

    let state = runner.run(&target, "AIzaGoodKey0001\nAIzaRevoked0001").await.unwrap();

    assert_eq!(state.results[0].status, VerificationStatus::Valid);
    assert_eq!(state.results[1].status, VerificationStatus::Invalid);

    let hits = provider.hits();
    assert_eq!(hits.len(), 2);
    assert!(hits.contains(&"/relay/v1beta/models/gemini-1.5-flash:generateContent?key=AIzaGoodKey0001".to_string()));
}

#[tokio::test]
async fn test_openai_default_and_relay() {
    let (base, provider) = spawn_provider().await;
    let runner = Runner::new(Arc::new(client_for(&base)));

    let target = TargetConfig::new(Protocol::OpenAiCompatible, None, "gpt-4o-mini");
    let state = runner.run(&target, "sk-good-openai-key\nsk-revoked-key-000").await.unwrap();

    assert_eq!(state.results[0].status, VerificationStatus::Valid);
    assert_eq!(state.results[1].status, VerificationStatus::Invalid);
    let error = state.results[1].error.as_deref().unwrap();
    assert!(error.starts_with("HTTP 401: "), "error: {}", error);
    assert!(error.contains("Incorrect API key"));

    // Explicit base with a trailing slash goes to the same place.
    let relay = TargetConfig::new(Protocol::OpenAiCompatible, Some(format!("{}/v1/", base)), "gpt-4o-mini");
    let state = runner.run(&relay, "sk-good-openai-key").await.unwrap();
    assert_eq!(state.results[0].status, VerificationStatus::Valid);

    assert!(provider.hits().iter().all(|h| h == "/v1/chat/completions"));
}

#[tokio::test]
async fn test_non_json_success_is_invalid() {
    let (base, _provider) = spawn_provider().await;
    let runner = Runner::new(Arc::new(client_for(&base)));
    let target = TargetConfig::new(Protocol::Google, None, "broken-model");

    let state = runner.run(&target, "AIzaGoodKey0001").await.unwrap();

    let result = &state.results[0];
    assert_eq!(result.status, VerificationStatus::Invalid);
    let error = result.error.as_deref().unwrap();
    assert!(!error.is_empty());
    assert!(!error.starts_with("HTTP "));
}

#[tokio::test]
async fn test_transport_failure_does_not_leak_key() {
    let client = client_for("http://127.0.0.1:1");
    let secret = "AIzaSecretThatMustNotLeak";

    let outcome = client
        .probe_key(
            &Credential::new(secret),
            "gemini-1.5-flash",
            "job-0-test",
            Some("http://127.0.0.1:1"),
            Protocol::Google,
        )
        .await;

    assert_eq!(outcome.status, VerificationStatus::Invalid);
    assert_eq!(outcome.id, "job-0-test");
    let error = outcome.error.as_deref().unwrap();
    assert!(!error.is_empty());
    assert!(!error.contains(secret), "error leaked key: {}", error);
    assert!(!serde_json::to_string(&outcome).unwrap().contains(secret));
}

#[tokio::test]
async fn test_provider_never_sees_more_than_the_cap() {
    let (base, provider) = spawn_provider().await;
    let runner = Runner::new(Arc::new(client_for(&base)));
    let target = TargetConfig::new(Protocol::Google, None, "slow-model");
    let keys = vec!["AIzaGoodKey0001"; 9].join("\n");

    let state = runner.run(&target, &keys).await.unwrap();

    assert_eq!(state.count(VerificationStatus::Valid), 9);
    let peak = provider.peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= CONCURRENCY_LIMIT, "peak {}", peak);
}

#[tokio::test]
async fn test_export_round_trip_after_run() {
    let (base, _provider) = spawn_provider().await;
    let runner = Runner::new(Arc::new(client_for(&base)));
    let target = TargetConfig::new(Protocol::Google, None, "gemini-1.5-flash");

    let state = runner.run(&target, MIXED_KEYS).await.unwrap();
    let rows = parse_csv(&to_csv(&state, &target)).unwrap();

    assert_eq!(rows.len(), 5);
    for (row, result) in rows.iter().zip(&state.results) {
        assert_eq!(row.key, result.credential.expose());
        assert_eq!(row.status, result.status);
        assert_eq!(row.latency_ms, result.latency_ms);
        assert_eq!(row.protocol, Protocol::Google);
        assert_eq!(row.base_url, "Default");
        assert_eq!(row.error, result.error.clone().unwrap_or_default());
    }
}

// ── JSON-RPC over the socket ────────────────────────────────────────

async fn call(stream: &mut BufReader<UnixStream>, method: &str, params: Value) -> Value {
    let request = json!({"jsonrpc": "2.0", "method": method, "params": params, "id": 1});
    let mut line = request.to_string();
    line.push('\n');
    stream.get_mut().write_all(line.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_line(&mut response).await.unwrap();
    serde_json::from_str(&response).unwrap()
}

#[tokio::test]
async fn test_socket_run_and_poll() {
    let (base, _provider) = spawn_provider().await;
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("rp.sock");

    let runner = Runner::new(Arc::new(client_for(&base)));
    let seeds = vec![(
        "Gemini".to_string(),
        TargetConfig::new(Protocol::Google, None, "gemini-1.5-flash"),
        MIXED_KEYS.to_string(),
    )];
    let registry = Arc::new(TargetRegistry::with_targets(runner, seeds));
    let server = Server::new(socket.clone(), registry);
    tokio::spawn(async move { server.run().await });

    let mut stream = None;
    for _ in 0..100 {
        if let Ok(s) = UnixStream::connect(&socket).await {
            stream = Some(s);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let mut stream = BufReader::new(stream.expect("server did not come up"));

    let listed = call(&mut stream, "rp.targets.list", json!({})).await;
    assert_eq!(listed["result"]["targets"][0]["name"], "Gemini");
    assert_eq!(listed["result"]["targets"][0]["key_count"], 5);

    let started = call(&mut stream, "rp.run", json!({"target": "Gemini"})).await;
    assert!(started["error"].is_null(), "{}", started);

    let mut state = Value::Null;
    for _ in 0..200 {
        state = call(&mut stream, "rp.state", json!({"target": "Gemini"})).await;
        if state["result"]["state"]["is_running"] == false {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state["result"]["progress"], 100);
    let results = state["result"]["state"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 5);
    assert!(!state.to_string().contains("AIzaRevoked0001"));

    let stats = call(&mut stream, "rp.stats", json!({"target": "Gemini"})).await;
    assert_eq!(stats["result"]["valid"], 2);
    assert_eq!(stats["result"]["invalid"], 3);
}
