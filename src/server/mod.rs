//! Unix socket JSON-RPC control surface.
//!
//! Listens on ~/.relayprobe/relayprobe.sock for newline-delimited JSON-RPC
//! 2.0 requests. Local-only, owner-only socket; no TCP exposure.
//!
//! Responses only ever carry masked keys, except `rp.export`, which returns
//! the CSV report with raw keys like the file export does.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::{info, warn};

use crate::adapters::Protocol;
use crate::error::RunError;
use crate::presets::MODEL_PRESETS;
use crate::stats::Stats;
use crate::targets::{TargetRegistry, TargetUpdate};

/// Bound on a single request line.
const MAX_REQUEST_BYTES: u64 = 1_048_576;

// ── JSON-RPC Types ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    method: String,
    params: Option<Value>,
    id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: "2.0".into(), result: Some(result), error: None, id }
    }
    fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self { jsonrpc: "2.0".into(), result: None, error: Some(JsonRpcError { code, message }), id }
    }
    fn invalid_params(id: Option<Value>, message: impl Into<String>) -> Self {
        Self::error(id, -32602, message.into())
    }
    fn run_error(id: Option<Value>, err: RunError) -> Self {
        let code = match err {
            RunError::TargetNotFound(_) => -32004,
            RunError::AlreadyRunning(_) => -32009,
            RunError::NoCredentials | RunError::LastTarget => -32000,
        };
        Self::error(id, code, err.to_string())
    }
}

// ── Server ──────────────────────────────────────────────────────────

pub struct Server {
    socket_path: PathBuf,
    registry: Arc<TargetRegistry>,
}

impl Server {
    pub fn new(socket_path: PathBuf, registry: Arc<TargetRegistry>) -> Self {
        Self { socket_path, registry }
    }

    pub async fn run(&self) -> Result<()> {
        // Remove stale socket file
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        info!(socket = %self.socket_path.display(), "📡 RelayProbe server listening");

        loop {
            let (stream, _) = listener.accept().await?;
            let registry = Arc::clone(&self.registry);

            tokio::spawn(async move {
                let (reader, mut writer) = stream.into_split();
                let mut reader = BufReader::new(reader.take(MAX_REQUEST_BYTES));
                let mut line = String::new();

                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) => break,
                        Ok(_) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            let response = handle_request(&line, &registry);
                            let resp_json = serde_json::to_string(&response).unwrap_or_default();
                            if writer.write_all(resp_json.as_bytes()).await.is_err() { break; }
                            if writer.write_all(b"\n").await.is_err() { break; }
                        }
                        Err(_) => break,
                    }
                }
            });
        }
    }
}

// ── Request Handling ────────────────────────────────────────────────

fn handle_request(raw: &str, registry: &TargetRegistry) -> JsonRpcResponse {
    let req: JsonRpcRequest = match serde_json::from_str(raw) {
        Ok(r) => r,
        Err(e) => return JsonRpcResponse::error(None, -32700, format!("Parse error: {}", e)),
    };
    let params = req.params.unwrap_or(Value::Null);

    match req.method.as_str() {
        "rp.targets.list" => JsonRpcResponse::success(req.id, json!({ "targets": registry.list() })),
        "rp.targets.add" => handle_add_target(req.id, params, registry),
        "rp.targets.update" => handle_update_target(req.id, params, registry),
        "rp.targets.remove" => with_target(req.id, &params, |target| {
            registry.remove(target).map(|()| json!({ "ok": true, "removed": target }))
        }),
        "rp.run" => handle_run(req.id, params, registry),
        "rp.state" => with_target(req.id, &params, |target| {
            registry
                .state(target)
                .map(|s| json!({ "progress": s.progress(), "state": s }))
        }),
        "rp.stats" => with_target(req.id, &params, |target| {
            registry.stats(target).map(|s: Stats| json!(s))
        }),
        "rp.export" => with_target(req.id, &params, |target| {
            registry
                .export(target)
                .map(|(file_name, csv)| json!({ "file_name": file_name, "csv": csv }))
        }),
        "rp.presets" => JsonRpcResponse::success(req.id, json!({ "presets": MODEL_PRESETS })),
        _ => JsonRpcResponse::error(req.id, -32601, format!("Unknown method: {}", req.method)),
    }
}

/// Pull the required `target` param and run `f` against it.
fn with_target(
    id: Option<Value>,
    params: &Value,
    f: impl FnOnce(&str) -> Result<Value, RunError>,
) -> JsonRpcResponse {
    let Some(target) = params.get("target").and_then(|v| v.as_str()) else {
        return JsonRpcResponse::invalid_params(id, "Missing required param: target");
    };
    match f(target) {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(e) => JsonRpcResponse::run_error(id, e),
    }
}

fn handle_add_target(id: Option<Value>, params: Value, registry: &TargetRegistry) -> JsonRpcResponse {
    let update = match parse_update(&params) {
        Ok(u) => u,
        Err(msg) => return JsonRpcResponse::invalid_params(id, msg),
    };
    let target_id = registry.add(update.name.clone());
    match registry.update(&target_id, update) {
        Ok(target_id) => JsonRpcResponse::success(id, json!({ "ok": true, "id": target_id })),
        Err(e) => JsonRpcResponse::run_error(id, e),
    }
}

/// Partial update: any of `name`, `protocol`, `base_url`, `model`, `keys`.
/// Nothing is written unless every given param is valid.
fn handle_update_target(id: Option<Value>, params: Value, registry: &TargetRegistry) -> JsonRpcResponse {
    let Some(target) = params.get("target").and_then(|v| v.as_str()) else {
        return JsonRpcResponse::invalid_params(id, "Missing required param: target");
    };
    let update = match parse_update(&params) {
        Ok(u) => u,
        Err(msg) => return JsonRpcResponse::invalid_params(id, msg),
    };
    match registry.update(target, update) {
        Ok(target_id) => JsonRpcResponse::success(id, json!({ "ok": true, "id": target_id })),
        Err(e) => JsonRpcResponse::run_error(id, e),
    }
}

fn optional_str(params: &Value, field: &str) -> Result<Option<String>, String> {
    match params.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(format!("'{}' must be a string", field)),
    }
}

fn parse_update(params: &Value) -> Result<TargetUpdate, String> {
    let protocol = match optional_str(params, "protocol")? {
        Some(p) => Some(Protocol::parse(&p).ok_or_else(|| format!("Unknown protocol '{}'", p))?),
        None => None,
    };
    // An explicit null or "" clears the override.
    let base_url = match params.get("base_url") {
        None => None,
        Some(_) => Some(optional_str(params, "base_url")?),
    };
    let keys_text = match params.get("keys") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .map(|k| k.as_str().ok_or("'keys' entries must be strings"))
                .collect::<Result<Vec<_>, _>>()?
                .join("\n"),
        ),
        Some(_) => return Err("'keys' must be a string or array".to_string()),
    };

    Ok(TargetUpdate {
        name: optional_str(params, "name")?,
        protocol,
        base_url,
        model: optional_str(params, "model")?,
        keys_text,
    })
}

/// Start a run; returns immediately. Poll `rp.state` for progress.
fn handle_run(id: Option<Value>, params: Value, registry: &TargetRegistry) -> JsonRpcResponse {
    let Some(target) = params.get("target").and_then(|v| v.as_str()) else {
        return JsonRpcResponse::invalid_params(id, "Missing required param: target");
    };
    match registry.start_run(target) {
        Ok(state) => {
            let total = state.borrow().total_count;
            info!(target = %target, total, "Run started via RPC");
            JsonRpcResponse::success(id, json!({ "ok": true, "total": total }))
        }
        Err(e) => {
            warn!(target = %target, "Run refused: {}", e);
            JsonRpcResponse::run_error(id, e)
        }
    }
}
