//! Interpreted modules written in Rhai (`*.rhai`).
//!
//! A script is compiled once at load. Each request runs it on a fresh engine
//! inside a blocking task, with:
//!
//! - `env`: constant map of the module's resolved environment,
//! - `request`: constant map `#{method, path, query, params, wildcard, headers, body}`,
//! - `http_get(url)` / `http_send(method, url, body)`: go through the
//!   module's allowlisted client and return `#{status, body, headers}` or
//!   `#{error, message}` (`error` is `"denied"`, `"transport"` or `"cancelled"`).
//!
//! The script's value is the response: a string (200), a map
//! `#{status, body, headers}`, or `()` for an empty 200.

use async_trait::async_trait;
use rhai::{AST, Dynamic, Engine, EvalAltResult, Map, Scope};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};
use wagi_kernel::gateway::{
    GatewayError, HttpMethod, ModuleCapabilities, ModuleExecutor, ModuleFault, ModuleInput,
    ModuleKind, ModuleOutput, OutboundError, OutboundHttp, OutboundRequest,
};

/// Execution bounds for script modules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    /// Maximum Rhai operations per request.
    pub max_operations: u64,
    /// Maximum nested call depth.
    pub max_call_levels: usize,
    /// Maximum string length in bytes.
    pub max_string_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 1_000_000,
            max_call_levels: 64,
            max_string_size: 4 * 1024 * 1024,
        }
    }
}

/// A compiled Rhai module.
pub struct ScriptModule {
    name: String,
    ast: Arc<AST>,
    limits: ScriptLimits,
}

impl ScriptModule {
    /// Compile `source`. Syntax errors are [`GatewayError::ModuleLoad`].
    pub fn compile(
        route_id: &str,
        name: impl Into<String>,
        source: &str,
        limits: ScriptLimits,
    ) -> Result<Self, GatewayError> {
        let ast = Engine::new()
            .compile(source)
            .map_err(|e| GatewayError::ModuleLoad(route_id.to_string(), e.to_string()))?;
        Ok(Self {
            name: name.into(),
            ast: Arc::new(ast),
            limits,
        })
    }

    /// Read and compile a script file.
    pub fn load(route_id: &str, path: &Path, limits: ScriptLimits) -> Result<Self, GatewayError> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::ModuleLoad(route_id.to_string(), format!("{}: {e}", path.display()))
        })?;
        Self::compile(route_id, path.display().to_string(), &source, limits)
    }

    fn build_engine(&self, caps: &ModuleCapabilities, runtime: Handle) -> Engine {
        let mut engine = Engine::new();
        engine.set_max_operations(self.limits.max_operations);
        engine.set_max_call_levels(self.limits.max_call_levels);
        engine.set_max_string_size(self.limits.max_string_size);

        let cancel = caps.cancel.clone();
        engine.on_progress(move |_ops| {
            if cancel.is_cancelled() {
                Some(Dynamic::from("cancelled"))
            } else {
                None
            }
        });

        let name = self.name.clone();
        engine.on_print(move |msg| debug!(script = %name, "{msg}"));

        let (http, rt) = (caps.http.clone(), runtime.clone());
        engine.register_fn("http_get", move |url: &str| -> Map {
            call(&rt, http.as_ref(), OutboundRequest::get(url))
        });

        let (http, rt) = (caps.http.clone(), runtime);
        engine.register_fn(
            "http_send",
            move |method: &str, url: &str, body: &str| -> Result<Map, Box<EvalAltResult>> {
                let method = HttpMethod::from_str_ci(method)
                    .ok_or_else(|| format!("unknown HTTP method '{method}'"))?;
                let request = OutboundRequest::new(method, url).with_body(body);
                Ok(call(&rt, http.as_ref(), request))
            },
        );

        engine
    }
}

#[async_trait]
impl ModuleExecutor for ScriptModule {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Script
    }

    async fn execute(
        &self,
        caps: ModuleCapabilities,
        input: ModuleInput,
    ) -> Result<ModuleOutput, ModuleFault> {
        let engine = self.build_engine(&caps, Handle::current());
        let ast = self.ast.clone();
        let env: Map = caps
            .env
            .iter()
            .map(|(k, v)| (k.into(), Dynamic::from(v.to_string())))
            .collect();
        let request = request_map(&input);

        let task = tokio::task::spawn_blocking(move || {
            let mut scope = Scope::new();
            scope.push_constant("env", env);
            scope.push_constant("request", request);
            engine.eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
        });

        let value = match task.await {
            Ok(result) => result.map_err(|err| script_fault(*err))?,
            Err(join) if join.is_panic() => {
                return Err(ModuleFault::Crashed("script worker panicked".into()));
            }
            Err(_) => return Err(ModuleFault::Interrupted),
        };
        output_from_value(value)
    }
}

/// Run an outbound call from inside a blocking worker.
fn call(runtime: &Handle, http: &dyn OutboundHttp, request: OutboundRequest) -> Map {
    let mut map = Map::new();
    match runtime.block_on(http.send(request)) {
        Ok(resp) => {
            map.insert("status".into(), Dynamic::from(i64::from(resp.status)));
            map.insert(
                "body".into(),
                Dynamic::from(String::from_utf8_lossy(&resp.body).into_owned()),
            );
            let headers: Map = resp
                .headers
                .into_iter()
                .map(|(k, v)| (k.into(), Dynamic::from(v)))
                .collect();
            map.insert("headers".into(), Dynamic::from_map(headers));
        }
        Err(err) => {
            let kind = match &err {
                OutboundError::Denied(_) => "denied",
                OutboundError::Cancelled => "cancelled",
                _ => "transport",
            };
            map.insert("error".into(), Dynamic::from(kind.to_string()));
            map.insert("message".into(), Dynamic::from(err.to_string()));
        }
    }
    map
}

fn request_map(input: &ModuleInput) -> Map {
    let strings = |pairs: &std::collections::HashMap<String, String>| -> Map {
        pairs
            .iter()
            .map(|(k, v)| (k.into(), Dynamic::from(v.clone())))
            .collect()
    };
    let mut map = Map::new();
    map.insert(
        "method".into(),
        Dynamic::from(input.method.map(|m| m.as_str()).unwrap_or_default().to_string()),
    );
    map.insert("path".into(), Dynamic::from(input.path.clone()));
    map.insert("query".into(), Dynamic::from(input.query.clone().unwrap_or_default()));
    map.insert("params".into(), Dynamic::from_map(strings(&input.path_params)));
    map.insert(
        "wildcard".into(),
        input.wildcard.clone().map(Dynamic::from).unwrap_or(Dynamic::UNIT),
    );
    map.insert("headers".into(), Dynamic::from_map(strings(&input.headers)));
    map.insert(
        "body".into(),
        Dynamic::from(String::from_utf8_lossy(&input.body).into_owned()),
    );
    map
}

fn script_fault(err: EvalAltResult) -> ModuleFault {
    match err {
        EvalAltResult::ErrorTooManyOperations(_) => {
            ModuleFault::ResourceExhausted("script operation limit reached".into())
        }
        EvalAltResult::ErrorTerminated(..) => ModuleFault::Interrupted,
        EvalAltResult::ErrorStackOverflow(_) => {
            ModuleFault::ResourceExhausted("script call depth exceeded".into())
        }
        EvalAltResult::ErrorDataTooLarge(what, _) => {
            ModuleFault::ResourceExhausted(format!("{what} too large"))
        }
        other => {
            warn!(error = %other, "script raised an error");
            ModuleFault::Trap(other.to_string())
        }
    }
}

/// Turn the script's final value into a response.
fn output_from_value(value: Dynamic) -> Result<ModuleOutput, ModuleFault> {
    if value.is_unit() {
        return Ok(ModuleOutput::new(200));
    }
    if value.is_string() {
        let body = value
            .into_string()
            .map_err(|t| ModuleFault::InvalidOutput(format!("expected string, got {t}")))?;
        return Ok(ModuleOutput::ok(body));
    }
    let Some(map) = value.clone().try_cast::<Map>() else {
        return Err(ModuleFault::InvalidOutput(format!(
            "script returned {} instead of a string or map",
            value.type_name()
        )));
    };

    let status = match map.get("status") {
        None => 200,
        Some(v) => v
            .as_int()
            .ok()
            .and_then(|s| u16::try_from(s).ok())
            .filter(|s| (100..=599).contains(s))
            .ok_or_else(|| ModuleFault::InvalidOutput(format!("invalid status {v}")))?,
    };
    let mut out = ModuleOutput::new(status);
    if let Some(body) = map.get("body") {
        if !body.is_unit() {
            out = out.with_body(body.to_string());
        }
    }
    if let Some(headers) = map.get("headers").and_then(|h| h.read_lock::<Map>()) {
        for (k, v) in headers.iter() {
            out = out.with_header(k.as_str(), v.to_string());
        }
    }
    Ok(out)
}
