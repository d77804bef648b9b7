//! Axum-based HTTP front end.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/_wagi/health` | Liveness check, always `200 OK`. |
//! | `GET`  | `/_wagi/routes` | Served and disabled routes as JSON. |
//! | `ANY`  | everything else | Dispatched to the matching module. |

use crate::gateway::Gateway;
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;
use wagi_kernel::gateway::{GatewayRequest, GatewayResponse, HttpMethod};

/// Response header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the axum [`Router`] serving `gateway`.
pub fn build_app(gateway: Arc<Gateway>) -> Router {
    let body_limit = gateway.settings().max_body_bytes;
    Router::new()
        .route("/_wagi/health", get(health_handler))
        .route("/_wagi/routes", get(routes_handler))
        .fallback(dispatch_handler)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

/// Bind the configured listen address and serve until the process exits.
pub async fn serve(gateway: Arc<Gateway>) -> std::io::Result<()> {
    let addr = gateway.settings().listen.clone();
    let app = build_app(gateway);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "wagi gateway listening");
    axum::serve(listener, app).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn health_handler(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": gateway.id() }))
}

async fn routes_handler(State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    Json(json!({
        "routes": gateway.routes(),
        "disabled": gateway.report().disabled,
    }))
}

async fn dispatch_handler(
    State(gateway): State<Arc<Gateway>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(http_method) = axum_method_to_kernel(&method) else {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            Json(json!({
                "error": {
                    "code": "METHOD_NOT_ALLOWED",
                    "message": format!("method '{method}' is not supported"),
                }
            })),
        )
            .into_response();
    };

    let request_id = Uuid::now_v7().to_string();
    let mut req = GatewayRequest::new(&request_id, http_method, uri.path());
    if let Some(query) = uri.query() {
        req = req.with_query(query);
    }
    for (name, value) in &headers {
        match value.to_str() {
            Ok(v) => req = req.with_header(name.as_str(), v),
            Err(_) => warn!(request_id = %request_id, header = %name, "dropping non-UTF-8 header"),
        }
    }
    req = req.with_body(body.to_vec());

    let mut response = match gateway.dispatch(req).await {
        Ok(resp) => build_axum_response(resp),
        Err(err) => err.into_response(),
    };
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Convert an axum [`Method`] to the kernel [`HttpMethod`].
///
/// Returns `None` for methods outside the kernel enum (e.g. `CONNECT`,
/// `TRACE`).
fn axum_method_to_kernel(m: &Method) -> Option<HttpMethod> {
    HttpMethod::from_str_ci(m.as_str())
}

fn build_axum_response(resp: GatewayResponse) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::new(Body::from(resp.body));
    *response.status_mut() = status;
    for (k, v) in &resp.headers {
        match (HeaderName::from_bytes(k.as_bytes()), HeaderValue::from_str(v)) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().append(name, value);
            }
            _ => warn!(route = %resp.route_id, header = %k, "dropping invalid module response header"),
        }
    }
    response
}
