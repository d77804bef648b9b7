//! Gateway runtime error types

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use wagi_kernel::gateway::{GatewayError, ModuleFault};

/// Request-time errors produced by the dispatcher.
///
/// Module-level application errors never appear here: a module that answers
/// 403 or 502 has *completed*, and its response is relayed verbatim.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no route matched '{0}'")]
    RouteNotFound(String),

    #[error("method {method} is not allowed on '{path}'")]
    MethodNotAllowed { method: String, path: String },

    #[error("module for route '{route}' faulted: {fault}")]
    ModuleFault { route: String, fault: ModuleFault },

    #[error("route '{route}' exceeded its {timeout_ms} ms deadline")]
    TimedOut { route: String, timeout_ms: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            DispatchError::ModuleFault { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            DispatchError::TimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code used in the JSON error body.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::RouteNotFound(_) => "ROUTE_NOT_FOUND",
            DispatchError::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            DispatchError::ModuleFault { .. } => "MODULE_FAULT",
            DispatchError::TimedOut { .. } => "TIMED_OUT",
            DispatchError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));

        (self.status(), body).into_response()
    }
}

/// Errors raised while building a [`Gateway`](crate::Gateway).
#[derive(Debug, Error)]
pub enum LoadError {
    /// The module document is structurally invalid; nothing is served.
    #[error(transparent)]
    Document(#[from] GatewayError),

    /// The outbound HTTP client could not be constructed.
    #[error("failed to build outbound transport: {0}")]
    Transport(String),

    /// The wasm engine could not be configured.
    #[error("failed to initialise wasm runtime: {0}")]
    Runtime(String),
}

pub type DispatchResult<T> = Result<T, DispatchError>;
