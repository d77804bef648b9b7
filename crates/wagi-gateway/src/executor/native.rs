//! In-process native modules addressed as `builtin:<name>`.
//!
//! | Name | Behaviour |
//! |------|-----------|
//! | `echo` | `200 {"data": "<body>"}` |
//! | `blob-write` | `PUT` the body to `<endpoint>/<container>/<blob>`, answer `Writing N bytes.` |
//! | `blob-read` | `GET` the same URL and answer the stored bytes |
//!
//! The blob modules take `container` and `blob` from the query string. The
//! endpoint is `STORAGE_ENDPOINT` from the module environment, or
//! `https://<STORAGE_ACCOUNT>.blob.core.windows.net`. An optional
//! `STORAGE_SAS_TOKEN` is appended as the query string; without one,
//! `STORAGE_MASTER_KEY` signs the request with [`SharedKey`]. All network
//! access goes through the capability client, so the allowlist applies.

use super::shared_key::SharedKey;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;
use wagi_kernel::gateway::{
    EnvironmentSnapshot, ModuleCapabilities, ModuleExecutor, ModuleFault, ModuleInput, ModuleKind,
    ModuleOutput, OutboundError, OutboundRequest, OutboundResponse,
};

/// Prefix selecting the native registry in a module reference.
pub const BUILTIN_PREFIX: &str = "builtin:";

/// Named native modules available to `builtin:` references.
#[derive(Clone)]
pub struct NativeRegistry {
    modules: HashMap<String, Arc<dyn ModuleExecutor>>,
}

impl NativeRegistry {
    /// A registry with no modules.
    pub fn empty() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    /// Register (or replace) a module under `name`.
    pub fn register(&mut self, name: impl Into<String>, module: Arc<dyn ModuleExecutor>) {
        self.modules.insert(name.into(), module);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, name: impl Into<String>, module: Arc<dyn ModuleExecutor>) -> Self {
        self.register(name, module);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ModuleExecutor>> {
        self.modules.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for NativeRegistry {
    fn default() -> Self {
        Self::empty()
            .with("echo", Arc::new(EchoModule))
            .with("blob-write", Arc::new(BlobWriteModule))
            .with("blob-read", Arc::new(BlobReadModule))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// echo
// ─────────────────────────────────────────────────────────────────────────────

/// Reflects the request body as `{"data": "<body>"}`.
pub struct EchoModule;

#[async_trait]
impl ModuleExecutor for EchoModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Native
    }

    async fn execute(
        &self,
        _caps: ModuleCapabilities,
        input: ModuleInput,
    ) -> Result<ModuleOutput, ModuleFault> {
        let data = String::from_utf8_lossy(&input.body);
        let body = serde_json::to_vec(&json!({ "data": data }))
            .map_err(|e| ModuleFault::InvalidOutput(e.to_string()))?;
        Ok(ModuleOutput::ok(body).with_header("content-type", "application/json"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// blob storage
// ─────────────────────────────────────────────────────────────────────────────

/// Writes the request body as a block blob.
pub struct BlobWriteModule;

/// Reads a blob back.
pub struct BlobReadModule;

#[async_trait]
impl ModuleExecutor for BlobWriteModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Native
    }

    async fn execute(
        &self,
        caps: ModuleCapabilities,
        input: ModuleInput,
    ) -> Result<ModuleOutput, ModuleFault> {
        let url = match blob_url(&caps.env, &input) {
            Ok(url) => url,
            Err(resp) => return Ok(resp),
        };
        let len = input.body.len();
        let request = OutboundRequest::put(url)
            .with_header("x-ms-blob-type", "BlockBlob")
            .with_header("content-type", "application/octet-stream")
            .with_body(input.body);
        let request = match authorize(&caps.env, request) {
            Ok(request) => request,
            Err(resp) => return Ok(resp),
        };

        match relay(caps.http.send(request).await)? {
            Ok(_) => Ok(text(200, format!("Writing {len} bytes."))),
            Err(resp) => Ok(resp),
        }
    }
}

#[async_trait]
impl ModuleExecutor for BlobReadModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Native
    }

    async fn execute(
        &self,
        caps: ModuleCapabilities,
        input: ModuleInput,
    ) -> Result<ModuleOutput, ModuleFault> {
        let request = match blob_url(&caps.env, &input)
            .and_then(|url| authorize(&caps.env, OutboundRequest::get(url)))
        {
            Ok(request) => request,
            Err(resp) => return Ok(resp),
        };

        match relay(caps.http.send(request).await)? {
            Ok(upstream) => {
                let mut out = ModuleOutput::ok(upstream.body);
                if let Some(ct) = upstream.headers.get("content-type") {
                    out = out.with_header("content-type", ct.clone());
                }
                Ok(out)
            }
            Err(resp) => Ok(resp),
        }
    }
}

fn text(status: u16, body: impl Into<String>) -> ModuleOutput {
    ModuleOutput::new(status)
        .with_header("content-type", "text/plain; charset=utf-8")
        .with_body(body.into())
}

/// Build `<endpoint>/<container>/<blob>[?sas]`, or the error response to send.
fn blob_url(env: &EnvironmentSnapshot, input: &ModuleInput) -> Result<String, ModuleOutput> {
    let (Some(container), Some(blob)) = (input.query_param("container"), input.query_param("blob"))
    else {
        return Err(text(400, "query parameters 'container' and 'blob' are required"));
    };

    let endpoint = match (env.get("STORAGE_ENDPOINT"), env.get("STORAGE_ACCOUNT")) {
        (Some(endpoint), _) => endpoint.trim_end_matches('/').to_string(),
        (None, Some(account)) => format!("https://{account}.blob.core.windows.net"),
        (None, None) => {
            return Err(text(500, "STORAGE_ENDPOINT or STORAGE_ACCOUNT must be configured"));
        }
    };

    let mut url = Url::parse(&endpoint)
        .map_err(|e| text(500, format!("invalid storage endpoint '{endpoint}': {e}")))?;
    url.path_segments_mut()
        .map_err(|_| text(500, format!("storage endpoint '{endpoint}' cannot carry a path")))?
        .pop_if_empty()
        .push(&container)
        .push(&blob);
    if let Some(sas) = env.get("STORAGE_SAS_TOKEN") {
        url.set_query(Some(sas.trim_start_matches('?')));
    }
    Ok(url.into())
}

/// Sign with `STORAGE_MASTER_KEY` unless a SAS token already authorizes the URL.
fn authorize(env: &EnvironmentSnapshot, request: OutboundRequest) -> Result<OutboundRequest, ModuleOutput> {
    if env.contains_key("STORAGE_SAS_TOKEN") {
        return Ok(request);
    }
    let Some(key) = env.get("STORAGE_MASTER_KEY") else {
        return Ok(request);
    };
    let account = env
        .get("STORAGE_ACCOUNT")
        .ok_or_else(|| text(500, "STORAGE_ACCOUNT is required to sign with STORAGE_MASTER_KEY"))?;
    SharedKey::new(account, key)
        .and_then(|signer| signer.sign(request, Utc::now()))
        .map_err(|e| text(500, e))
}

/// Classify an outbound result. The inner `Err` is the response to send as is.
///
/// Denials become 403 and transport failures 502; an upstream non-success
/// status is relayed with its body. Cancellation is a fault: nobody is
/// waiting for the answer any more.
fn relay(
    result: Result<OutboundResponse, OutboundError>,
) -> Result<Result<OutboundResponse, ModuleOutput>, ModuleFault> {
    match result {
        Ok(resp) if resp.is_success() => Ok(Ok(resp)),
        Ok(resp) => Ok(Err(ModuleOutput::new(resp.status).with_body(resp.body))),
        Err(OutboundError::Denied(url)) => Ok(Err(text(403, format!("destination not allowed: {url}")))),
        Err(OutboundError::Transport(msg)) => Ok(Err(text(502, format!("storage request failed: {msg}")))),
        Err(OutboundError::Cancelled) => Err(ModuleFault::Interrupted),
        Err(other) => Ok(Err(text(502, other.to_string()))),
    }
}
