//! Gateway router trait and route configuration types.
//!
//! The [`GatewayRouter`] trait is the kernel-level abstraction for request
//! routing. Implementations (the trie router in `wagi-gateway`) are populated
//! once at startup and looked up on every inbound request.

use super::error::GatewayError;
use super::types::{HttpMethod, RouteMatch};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Suffix marking a wildcard route (`/static/...` matches `/static/a/b`).
pub const WILDCARD_SUFFIX: &str = "/...";

// ─────────────────────────────────────────────────────────────────────────────
// Route configuration
// ─────────────────────────────────────────────────────────────────────────────

/// A single routing rule mapping a path pattern + method set to a module.
///
/// Path patterns accept three segment kinds:
/// ```text
/// /writeblob            exact path
/// /items/{id}           captures `id`
/// /static/...           wildcard: the prefix and everything beneath it
/// ```
///
/// `environment` values and `allowed_hosts` entries are kept as declared
/// (possibly containing `${NAME}` placeholders); resolution happens in the
/// environment binder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteConfig {
    /// Unique stable identifier for this route (the module name).
    pub id: String,
    /// URL path template. Must begin with `/`.
    pub path_pattern: String,
    /// Accepted HTTP methods. An empty vec means *all* methods are accepted.
    pub methods: Vec<HttpMethod>,
    /// Opaque reference to the sandboxed code (`builtin:echo`, `blob.wasm`, …).
    pub module_reference: String,
    /// Declared environment, key → value template.
    pub environment: BTreeMap<String, String>,
    /// Declared outbound allowlist entries.
    pub allowed_hosts: Vec<String>,
    /// Per-route execution deadline in milliseconds.
    /// A value of `0` means "use the gateway default".
    pub timeout_ms: u64,
}

impl RouteConfig {
    /// Create a minimal route with just id, path_pattern, and module reference.
    pub fn new(
        id: impl Into<String>,
        path_pattern: impl Into<String>,
        module_reference: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            path_pattern: path_pattern.into(),
            methods: Vec::new(),
            module_reference: module_reference.into(),
            environment: BTreeMap::new(),
            allowed_hosts: Vec::new(),
            timeout_ms: 0,
        }
    }

    /// Builder: restrict to specific HTTP methods.
    pub fn with_methods(mut self, methods: Vec<HttpMethod>) -> Self {
        self.methods = methods;
        self
    }

    /// Builder: declare one environment entry.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Builder: add one allowlist entry.
    pub fn with_allowed_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts.push(host.into());
        self
    }

    /// Builder: set a per-route timeout.
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Whether this route accepts `method`.
    pub fn accepts(&self, method: &HttpMethod) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }

    /// Whether two routes can both answer at least one method.
    pub fn methods_overlap(&self, other: &RouteConfig) -> bool {
        self.methods.is_empty()
            || other.methods.is_empty()
            || self.methods.iter().any(|m| other.methods.contains(m))
    }

    /// Structural checks run during [`GatewayConfig::validate()`](super::validation::GatewayConfig::validate).
    pub(crate) fn validate(&self) -> Result<(), GatewayError> {
        if self.id.trim().is_empty() {
            return Err(GatewayError::EmptyRouteId);
        }
        validate_path_pattern(&self.id, &self.path_pattern)?;
        if self.module_reference.trim().is_empty() {
            return Err(GatewayError::EmptyModuleReference(self.id.clone()));
        }
        Ok(())
    }
}

/// Check a path template for the syntax described on [`RouteConfig`].
pub fn validate_path_pattern(route_id: &str, pattern: &str) -> Result<(), GatewayError> {
    let invalid = |msg: &str| GatewayError::InvalidPathPattern(route_id.to_string(), msg.to_string());

    if pattern.trim().is_empty() {
        return Err(invalid("path pattern cannot be empty"));
    }
    if !pattern.starts_with('/') {
        return Err(invalid("path pattern must start with '/'"));
    }

    let body = pattern.strip_suffix(WILDCARD_SUFFIX).unwrap_or(pattern);
    for segment in body.trim_matches('/').split('/') {
        if segment == "..." {
            return Err(invalid("'...' is only allowed as the final segment"));
        }
        let opens = segment.starts_with('{');
        let closes = segment.ends_with('}');
        if opens != closes {
            return Err(invalid("unbalanced '{' in capture segment"));
        }
        if opens && segment.len() <= 2 {
            return Err(invalid("capture segment needs a name"));
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Router trait
// ─────────────────────────────────────────────────────────────────────────────

/// Kernel contract for request routing.
///
/// Implementations receive [`RouteConfig`] entries at startup (via
/// [`register`](GatewayRouter::register)) and resolve incoming
/// (path, method) pairs to a [`RouteMatch`] at request time.
///
/// Lookups are synchronous: no I/O on the hot path.
pub trait GatewayRouter: Send + Sync {
    /// Register a new route. Returns [`GatewayError::DuplicateRoute`] if a
    /// route with the same `id` exists, or [`GatewayError::ConflictingRoute`]
    /// if another route already claims the same (method, path) pair.
    fn register(&mut self, route: RouteConfig) -> Result<(), GatewayError>;

    /// Resolve a request `(path, method)` to the most specific matching route.
    /// Returns `None` when no route matches.
    fn resolve(&self, path: &str, method: &HttpMethod) -> Option<RouteMatch>;

    /// Whether any route matches `path` regardless of method.
    fn matches_path(&self, path: &str) -> bool;

    /// Return all registered routes in resolution order.
    fn routes(&self) -> Vec<&RouteConfig>;
}
