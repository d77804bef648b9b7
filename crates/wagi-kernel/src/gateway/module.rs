//! Module capability contracts.
//!
//! Every execution technology (native Rust, interpreted script, sandboxed
//! bytecode) implements [`ModuleExecutor`]. The dispatcher only ever talks to
//! this trait. The module receives [`ModuleCapabilities`]: its resolved
//! environment, an [`OutboundHttp`] client already bound to its allowlist,
//! and a cancellation token. The client is the module's only network path.

use super::environment::EnvironmentSnapshot;
use super::types::HttpMethod;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

// ─────────────────────────────────────────────────────────────────────────────
// Module input / output
// ─────────────────────────────────────────────────────────────────────────────

/// Request data marshalled into the sandbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleInput {
    pub request_id: String,
    pub method: Option<HttpMethod>,
    pub path: String,
    pub query: Option<String>,
    pub path_params: HashMap<String, String>,
    pub wildcard: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl ModuleInput {
    /// First value of the query parameter `name`, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// All query parameters in declaration order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.query
            .as_deref()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Response produced by a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleOutput {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl ModuleOutput {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    /// `200 OK` with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200).with_body(body)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into().to_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound HTTP
// ─────────────────────────────────────────────────────────────────────────────

/// An outbound HTTP call issued by a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl OutboundRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, url)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }
}

/// Response to an [`OutboundRequest`], relayed to the module unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl OutboundResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into().to_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Why an outbound call produced no response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum OutboundError {
    /// The target is not on the module's allowlist.
    #[error("destination not allowed: {0}")]
    Denied(String),

    /// The network collaborator failed (connect, TLS, body read, …).
    #[error("outbound transport error: {0}")]
    Transport(String),

    /// The invocation was cancelled while the call was in flight.
    #[error("outbound call cancelled")]
    Cancelled,
}

/// The HTTP client handed to a module.
#[async_trait]
pub trait OutboundHttp: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse, OutboundError>;
}

/// The network collaborator used after an allow decision.
///
/// Retry, timeout and TLS behaviour are the transport's own business.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: OutboundRequest) -> Result<OutboundResponse, OutboundError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Module execution
// ─────────────────────────────────────────────────────────────────────────────

/// Which execution technology backs a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleKind {
    /// Rust code running in-process.
    Native,
    /// Interpreted script.
    Script,
    /// WebAssembly bytecode in a wasmtime sandbox.
    Wasm,
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleKind::Native => "native",
            ModuleKind::Script => "script",
            ModuleKind::Wasm => "wasm",
        };
        f.write_str(name)
    }
}

/// Abnormal termination of a module.
///
/// A fault never carries partial module output.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModuleFault {
    /// The sandbox trapped (unreachable, bad memory access, script error, …).
    #[error("module trapped: {0}")]
    Trap(String),

    /// A resource limit was hit (memory, fuel, operation count).
    #[error("module exceeded a resource limit: {0}")]
    ResourceExhausted(String),

    /// Execution was interrupted by cancellation or deadline.
    #[error("module execution interrupted")]
    Interrupted,

    /// The module panicked or its worker died.
    #[error("module crashed: {0}")]
    Crashed(String),

    /// The module finished but produced something that is not a response.
    #[error("module produced an invalid response: {0}")]
    InvalidOutput(String),
}

/// Everything a module may use while it runs.
#[derive(Clone)]
pub struct ModuleCapabilities {
    /// Resolved environment for this invocation.
    pub env: EnvironmentSnapshot,
    /// Allowlist-checked HTTP client.
    pub http: Arc<dyn OutboundHttp>,
    /// Fires when the invocation is cancelled or its deadline passes.
    pub cancel: CancellationToken,
}

impl fmt::Debug for ModuleCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleCapabilities")
            .field("env_keys", &self.env.keys().collect::<Vec<_>>())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// A unit of request-scoped executable logic bound to one route.
#[async_trait]
pub trait ModuleExecutor: Send + Sync {
    fn kind(&self) -> ModuleKind;

    async fn execute(
        &self,
        caps: ModuleCapabilities,
        input: ModuleInput,
    ) -> Result<ModuleOutput, ModuleFault>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_params_are_decoded() {
        let input = ModuleInput {
            query: Some("container=wagi%20test&blob=b1&blob=b2".into()),
            ..Default::default()
        };
        assert_eq!(input.query_param("container").as_deref(), Some("wagi test"));
        assert_eq!(input.query_param("blob").as_deref(), Some("b1"));
        assert_eq!(input.query_param("missing"), None);
        assert_eq!(input.query_pairs().len(), 3);
    }

    #[test]
    fn missing_query_yields_nothing() {
        let input = ModuleInput::default();
        assert_eq!(input.query_param("x"), None);
        assert!(input.query_pairs().is_empty());
    }
}
