//! Real network transport used after an allow decision.
//!
//! [`ReqwestTransport`] sends an [`OutboundRequest`] as-is and relays status,
//! headers and body verbatim. Non-success statuses are *responses*, not
//! errors: the module decides what a 404 from upstream means.

use async_trait::async_trait;
use reqwest::{Client, Method};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};
use wagi_kernel::gateway::{HttpTransport, OutboundError, OutboundRequest, OutboundResponse};

/// [`HttpTransport`] backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a transport whose calls give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn execute(&self, request: OutboundRequest) -> Result<OutboundResponse, OutboundError> {
        let method = Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| OutboundError::Transport(e.to_string()))?;

        let start = std::time::Instant::now();
        let mut builder = self.client.request(method, &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let upstream = builder
            .send()
            .await
            .map_err(|e| OutboundError::Transport(e.to_string()))?;

        let status = upstream.status().as_u16();
        let mut headers = HashMap::new();
        for (name, value) in upstream.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.to_string(), v.to_string());
            }
        }
        let body = upstream
            .bytes()
            .await
            .map_err(|e| OutboundError::Transport(e.to_string()))?;

        debug!(
            status,
            bytes = body.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "outbound call finished"
        );

        Ok(OutboundResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}
