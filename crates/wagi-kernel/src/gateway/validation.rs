//! Gateway configuration container and load-time validation.
//!
//! [`GatewayConfig`] aggregates the route table and global settings and
//! exposes a single [`validate()`](GatewayConfig::validate) that checks every
//! structural invariant *before* any module is compiled or request served.

use super::document::ModuleDocument;
use super::error::GatewayError;
use super::router::{RouteConfig, WILDCARD_SUFFIX};
use std::collections::HashSet;

/// Top-level gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Identifier for this gateway instance (used in logs).
    pub id: String,
    /// All route definitions.
    pub routes: Vec<RouteConfig>,
    /// Global default execution deadline in milliseconds (must be > 0).
    pub request_timeout_ms: u64,
}

impl GatewayConfig {
    /// Construct a config with no routes.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            routes: Vec::new(),
            request_timeout_ms: 30_000,
        }
    }

    /// Build a config from a parsed module document.
    pub fn from_document(id: impl Into<String>, document: &ModuleDocument) -> Result<Self, GatewayError> {
        let mut config = Self::new(id);
        config.routes = document.to_route_configs()?;
        Ok(config)
    }

    /// Builder: add a route.
    pub fn with_route(mut self, route: RouteConfig) -> Self {
        self.routes.push(route);
        self
    }

    /// Builder: set the global request timeout.
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    /// Effective deadline for `route` in milliseconds.
    pub fn timeout_for(&self, route: &RouteConfig) -> u64 {
        if route.timeout_ms == 0 {
            self.request_timeout_ms
        } else {
            route.timeout_ms
        }
    }

    /// Validate all structural invariants of this configuration.
    ///
    /// Checks performed (in order):
    /// 1. Gateway id is non-empty.
    /// 2. Global `request_timeout_ms` is non-zero.
    /// 3. Each route passes [`RouteConfig::validate()`].
    /// 4. No two routes share the same id.
    /// 5. No two routes claim the same (method, path) pair.
    ///
    /// Run this on routes whose placeholders are already bound.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.id.trim().is_empty() {
            return Err(GatewayError::EmptyGatewayId);
        }
        if self.request_timeout_ms == 0 {
            return Err(GatewayError::InvalidTimeout);
        }

        let mut route_ids: HashSet<&str> = HashSet::new();
        for (idx, route) in self.routes.iter().enumerate() {
            route.validate()?;
            if !route_ids.insert(route.id.as_str()) {
                return Err(GatewayError::DuplicateRoute(route.id.clone()));
            }
            if let Some(other) = self.routes[..idx].iter().find(|o| routes_conflict(o, route)) {
                return Err(GatewayError::ConflictingRoute(
                    other.id.clone(),
                    route.id.clone(),
                    route.path_pattern.clone(),
                ));
            }
        }
        Ok(())
    }
}

/// Whether two routes would answer the same (method, path) pair.
pub fn routes_conflict(a: &RouteConfig, b: &RouteConfig) -> bool {
    pattern_key(&a.path_pattern) == pattern_key(&b.path_pattern) && a.methods_overlap(b)
}

/// Canonical form of a path template: capture names erased and trailing
/// slashes dropped, so `/items/{id}/` and `/items/{key}` compare equal.
pub fn pattern_key(pattern: &str) -> String {
    let (body, wildcard) = match pattern.strip_suffix(WILDCARD_SUFFIX) {
        Some(body) => (body, true),
        None => (pattern, false),
    };
    let mut key = String::new();
    for segment in body.split('/').filter(|s| !s.is_empty()) {
        key.push('/');
        key.push_str(if segment.starts_with('{') { "{}" } else { segment });
    }
    if wildcard {
        key.push_str(WILDCARD_SUFFIX);
    }
    if key.is_empty() {
        key.push('/');
    }
    key
}
