//! Outbound HTTP interceptor.
//!
//! [`OutboundInterceptor`] is the only [`OutboundHttp`] a module ever
//! receives. Every call is checked against the route's allowlist before the
//! transport sees it; both outcomes are appended to the invocation's call
//! log. A permitted call is logged before it is sent and its status filled
//! in afterwards, so calls cut short by a timeout or disconnect still show
//! up. Requests are forwarded exactly as the module built them: no retries,
//! no injected headers.

use crate::context::{CallLog, OutboundCallRecord};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use wagi_kernel::gateway::{
    AllowList, HttpMethod, HttpTransport, OutboundError, OutboundHttp, OutboundRequest,
    OutboundResponse, is_allowed,
};

pub struct OutboundInterceptor {
    route_id: String,
    allowlist: Arc<AllowList>,
    transport: Arc<dyn HttpTransport>,
    calls: CallLog,
    cancel: CancellationToken,
}

impl OutboundInterceptor {
    pub fn new(
        route_id: impl Into<String>,
        allowlist: Arc<AllowList>,
        transport: Arc<dyn HttpTransport>,
        calls: CallLog,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            route_id: route_id.into(),
            allowlist,
            transport,
            calls,
            cancel,
        }
    }

    /// Append a call with no status yet; returns its slot in the log.
    fn record(&self, url: String, method: HttpMethod, permitted: bool) -> usize {
        let mut calls = self.calls.lock();
        calls.push(OutboundCallRecord {
            url,
            method,
            permitted,
            timestamp: Utc::now(),
            status: None,
        });
        calls.len() - 1
    }

    fn record_status(&self, slot: usize, status: u16) {
        if let Some(call) = self.calls.lock().get_mut(slot) {
            call.status = Some(status);
        }
    }
}

#[async_trait]
impl OutboundHttp for OutboundInterceptor {
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse, OutboundError> {
        if self.cancel.is_cancelled() {
            return Err(OutboundError::Cancelled);
        }

        let url = request.url.clone();
        let method = request.method;

        if !is_allowed(&self.allowlist, &url) {
            warn!(route = %self.route_id, url = %url, "outbound call denied by allowlist");
            self.record(url.clone(), method, false);
            return Err(OutboundError::Denied(url));
        }

        debug!(route = %self.route_id, %method, url = %url, "outbound call permitted");
        let slot = self.record(url, method, true);
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(OutboundError::Cancelled),
            result = self.transport.execute(request) => result,
        };

        if let Ok(resp) = &result {
            self.record_status(slot, resp.status);
        }
        result
    }
}
