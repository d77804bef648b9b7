//! Gateway error types for `wagi-kernel`.
//!
//! [`GatewayError`] covers failures detected at *definition time*, before
//! any request is served: malformed documents, duplicate routes, bad
//! allowlist entries and unresolved placeholders. Runtime failures (route miss, module fault, deadline) belong in
//! the gateway implementation crate (`wagi-gateway`).

use thiserror::Error;

/// Configuration error type for the gateway kernel contract.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum GatewayError {
    // ── Document ────────────────────────────────────────────────────────────
    /// The configuration document could not be parsed into the expected shape.
    #[error("invalid module document: {0}")]
    InvalidDocument(String),

    /// The document file extension maps to no supported format.
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// A module entry lacks a field that is required after merging.
    #[error("module '{0}' is missing required field '{1}'")]
    MissingField(String, String),

    // ── Identity ────────────────────────────────────────────────────────────
    /// The gateway configuration `id` field is empty or whitespace-only.
    #[error("gateway id cannot be empty")]
    EmptyGatewayId,

    // ── Routes ───────────────────────────────────────────────────────────────
    /// A route `id` (module name) is empty or whitespace-only.
    #[error("route id cannot be empty")]
    EmptyRouteId,

    /// A route with this id has already been registered.
    #[error("route '{0}' is already registered")]
    DuplicateRoute(String),

    /// Two routes claim the same (method, path) pair.
    #[error("routes '{0}' and '{1}' both claim {2}")]
    ConflictingRoute(String, String, String),

    /// A route path pattern is syntactically invalid.
    #[error("route '{0}' has an invalid path pattern: {1}")]
    InvalidPathPattern(String, String),

    /// A route lists a method name the gateway does not understand.
    #[error("route '{0}' declares unknown method '{1}'")]
    InvalidMethod(String, String),

    /// A per-route timeout of zero was configured explicitly.
    #[error("route '{0}' timeout must be greater than 0 ms")]
    InvalidRouteTimeout(String),

    // ── Modules ──────────────────────────────────────────────────────────────
    /// A route has an empty module reference.
    #[error("route '{0}' has an empty module reference")]
    EmptyModuleReference(String),

    /// The module reference could not be loaded or compiled.
    #[error("route '{0}' failed to load module: {1}")]
    ModuleLoad(String, String),

    // ── Allowlist ────────────────────────────────────────────────────────────
    /// An `AllowedHosts` entry is not an absolute http(s) URL with a host.
    #[error("route '{0}' has an invalid allowed host '{1}'")]
    InvalidAllowedHost(String, String),

    // ── Environment ──────────────────────────────────────────────────────────
    /// A `${NAME}` placeholder references a deployment variable that is absent.
    #[error("route '{route}' key '{key}' references unresolved variable '{variable}'")]
    UnresolvedPlaceholder {
        route: String,
        key: String,
        variable: String,
    },

    // ── Timeouts ─────────────────────────────────────────────────────────────
    /// `request_timeout_ms` is zero, which would reject every request.
    #[error("request timeout must be greater than 0 ms")]
    InvalidTimeout,
}

impl GatewayError {
    /// Whether this error disables a single route rather than the gateway.
    ///
    /// Unresolved placeholders and module load failures are route-scoped: the
    /// gateway keeps serving every other route. Everything else is a
    /// structural defect of the document and aborts startup.
    pub fn is_route_scoped(&self) -> bool {
        matches!(
            self,
            GatewayError::UnresolvedPlaceholder { .. } | GatewayError::ModuleLoad(..)
        )
    }
}
