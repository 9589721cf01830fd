//! JSON-RPC 2.0 methods served on `/rpc`.
//!
//! Supported methods:
//!   - `login`    -- authenticate this connection with the access token
//!   - `list`     -- directory listing
//!   - `read`     -- file content as text (capped)
//!   - `download` -- whole file, base64
//!   - `upload`   -- batch of files into a directory
//!   - `rename`   -- move an entry
//!   - `delete`   -- remove an entry (directories recursively)

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use wb_core::browse::{self, UploadFile, UploadRejection, UploadReport};
use wb_core::{ErrorKind, Identity, WbError};

use crate::context::SharedContext;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

fn default_jsonrpc() -> String {
    "2.0".into()
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    pub id: Option<u64>,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
pub const NOT_AUTHENTICATED: i32 = -32001;
pub const FORBIDDEN: i32 = -32003;
pub const NOT_FOUND: i32 = -32004;
pub const IO_FAILURE: i32 = -32010;
pub const TOO_LARGE: i32 = -32013;
pub const INVALID_TARGET: i32 = -32022;

impl JsonRpcResponse {
    pub fn ok(id: Option<u64>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Option<u64>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    fn from_wb_error(id: Option<u64>, e: &WbError) -> Self {
        let kind = e.kind();
        let code = match kind {
            ErrorKind::Forbidden => FORBIDDEN,
            ErrorKind::NotFound => NOT_FOUND,
            ErrorKind::Unauthenticated => NOT_AUTHENTICATED,
            ErrorKind::IoFailure => IO_FAILURE,
            ErrorKind::Invalid => INVALID_TARGET,
            ErrorKind::TooLarge => TOO_LARGE,
        };
        let mut resp = Self::err(id, code, e.client_message());
        if let Some(error) = resp.error.as_mut() {
            error.data = Some(serde_json::json!({ "kind": kind.as_str() }));
        }
        resp
    }
}

// ---------------------------------------------------------------------------
// Params
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LoginParams {
    token: String,
}

#[derive(Debug, Deserialize)]
struct PathParams {
    #[serde(default)]
    path: String,
}

#[derive(Debug, Deserialize)]
struct RenameParams {
    source: String,
    destination: String,
}

#[derive(Debug, Deserialize)]
struct UploadParams {
    #[serde(default)]
    directory: String,
    files: Vec<UploadEntry>,
}

#[derive(Debug, Deserialize)]
struct UploadEntry {
    name: String,
    content_b64: String,
}

// ---------------------------------------------------------------------------
// Per-connection dispatcher
// ---------------------------------------------------------------------------

/// State of one `/rpc` connection: the shared context plus whatever identity
/// the connection has proven so far.
pub struct RpcConnection {
    ctx: SharedContext,
    identity: Option<Identity>,
}

enum Failure {
    Rpc(i32, String),
    Wb(WbError),
}

impl From<WbError> for Failure {
    fn from(e: WbError) -> Self {
        Self::Wb(e)
    }
}

type Outcome = Result<serde_json::Value, Failure>;

impl RpcConnection {
    pub fn new(ctx: SharedContext, identity: Option<Identity>) -> Self {
        Self { ctx, identity }
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub async fn handle(&mut self, req: JsonRpcRequest) -> JsonRpcResponse {
        let id = req.id;
        let outcome = self.dispatch(&req.method, req.params).await;
        match outcome {
            Ok(result) => JsonRpcResponse::ok(id, result),
            Err(Failure::Rpc(code, message)) => JsonRpcResponse::err(id, code, message),
            Err(Failure::Wb(e)) => {
                tracing::debug!(method = %req.method, error = %e, "rpc: request failed");
                JsonRpcResponse::from_wb_error(id, &e)
            }
        }
    }

    async fn dispatch(&mut self, method: &str, params: serde_json::Value) -> Outcome {
        if method == "login" {
            let params: LoginParams = parse_params(params)?;
            let identity = self.ctx.auth.authenticate(&params.token)?;
            self.identity = Some(identity);
            tracing::info!("rpc: connection authenticated");
            return Ok(serde_json::json!({ "authenticated": true }));
        }

        let known = matches!(method, "list" | "read" | "download" | "upload" | "rename" | "delete");
        if !known {
            return Err(Failure::Rpc(METHOD_NOT_FOUND, format!("method not found: {method}")));
        }
        if self.identity.is_none() {
            return Err(WbError::NotAuthenticated.into());
        }

        let ctx = self.ctx.clone();
        match method {
            "list" => {
                let params: PathParams = parse_params(params)?;
                let listing = blocking(move || browse::list_dir(ctx.root(), &params.path)).await?;
                to_value(&listing)
            }
            "read" => {
                let params: PathParams = parse_params(params)?;
                let limit = ctx.config.max_read_bytes;
                let text = blocking(move || browse::read_text(ctx.root(), &params.path, limit)).await?;
                to_value(&text)
            }
            "download" => {
                let params: PathParams = parse_params(params)?;
                let limit = ctx.config.max_read_bytes;
                let file = blocking(move || browse::read_bytes(ctx.root(), &params.path, limit)).await?;
                Ok(serde_json::json!({
                    "name": file.name,
                    "size": file.bytes.len(),
                    "content_b64": BASE64.encode(&file.bytes),
                }))
            }
            "upload" => {
                let params: UploadParams = parse_params(params)?;
                let report = upload(ctx, params).await?;
                to_value(&report)
            }
            "rename" => {
                let params: RenameParams = parse_params(params)?;
                let outcome = blocking(move || {
                    browse::rename(ctx.root(), &params.source, &params.destination)
                })
                .await?;
                to_value(&outcome)
            }
            "delete" => {
                let params: PathParams = parse_params(params)?;
                let outcome = blocking(move || browse::delete(ctx.root(), &params.path)).await?;
                to_value(&outcome)
            }
            _ => Err(Failure::Rpc(METHOD_NOT_FOUND, format!("method not found: {method}"))),
        }
    }
}

/// Decode every entry, then hand the decodable ones to the batch upload.
/// Entries that fail to decode are reported alongside the batch's own
/// rejections.
async fn upload(ctx: SharedContext, params: UploadParams) -> Result<UploadReport, Failure> {
    let mut undecodable = Vec::new();
    let mut files = Vec::with_capacity(params.files.len());
    for entry in params.files {
        match BASE64.decode(entry.content_b64.as_bytes()) {
            Ok(bytes) => files.push(UploadFile {
                name: entry.name,
                bytes,
            }),
            Err(e) => undecodable.push(UploadRejection {
                name: entry.name,
                kind: ErrorKind::Invalid.as_str(),
                reason: format!("invalid base64: {e}"),
            }),
        }
    }

    let directory = params.directory;
    let max_file_bytes = ctx.config.max_upload_bytes;
    let mut report = blocking(move || {
        browse::upload_batch(ctx.root(), &directory, files, max_file_bytes)
    })
    .await?;
    report.rejected.extend(undecodable);
    if !report.is_complete() {
        tracing::warn!(
            written = report.written.len(),
            rejected = report.rejected.len(),
            "rpc: upload partially rejected"
        );
    }
    Ok(report)
}

async fn blocking<T, F>(f: F) -> Result<T, Failure>
where
    F: FnOnce() -> wb_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(Failure::Wb),
        Err(e) => {
            tracing::error!(error = %e, "rpc: blocking task failed");
            Err(Failure::Rpc(INTERNAL_ERROR, "internal error".into()))
        }
    }
}

fn parse_params<T: DeserializeOwned>(params: serde_json::Value) -> Result<T, Failure> {
    let params = if params.is_null() {
        serde_json::json!({})
    } else {
        params
    };
    serde_json::from_value(params)
        .map_err(|e| Failure::Rpc(INVALID_PARAMS, format!("invalid params: {e}")))
}

fn to_value<T: Serialize>(value: &T) -> Outcome {
    serde_json::to_value(value).map_err(|e| Failure::Rpc(INTERNAL_ERROR, e.to_string()))
}
