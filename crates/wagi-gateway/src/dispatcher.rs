//! Request dispatch.
//!
//! For every inbound request the [`Dispatcher`] resolves a route, creates a
//! fresh [`InvocationContext`], binds the route's environment, runs the
//! module under its deadline and turns the outcome into a
//! [`GatewayResponse`]. Contexts are never reused, so nothing a module sees
//! or does outlives its request.
//!
//! Each dispatch produces one [`DispatchRecord`] handed to a
//! [`DispatchSink`]; the default sink writes it to `tracing`. A dispatch
//! whose future is dropped mid-run (the client went away) still produces
//! one, with outcome [`DispatchOutcome::Cancelled`].

use crate::context::{CallLog, InvocationContext, OutboundCallRecord};
use crate::error::{DispatchError, DispatchResult};
use crate::table::{LoadedModule, ModuleTable};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, error, info, info_span, warn};
use wagi_kernel::gateway::{
    GatewayRequest, GatewayResponse, HttpMethod, HttpTransport, ModuleCapabilities, ModuleFault,
    ModuleInput,
};

/// How a dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Completed,
    RouteNotFound,
    MethodNotAllowed,
    Faulted,
    TimedOut,
    /// The caller stopped waiting before the module finished.
    Cancelled,
}

/// Status logged for dispatches abandoned by the client (nginx convention).
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Access-log entry for one request.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchRecord {
    pub request_id: String,
    pub route_id: Option<String>,
    pub method: HttpMethod,
    pub path: String,
    pub outcome: DispatchOutcome,
    pub status: u16,
    pub duration_ms: u64,
    /// Outbound calls the module attempted, allowed or not.
    pub calls: Vec<OutboundCallRecord>,
}

/// Receives one record per dispatched request.
pub trait DispatchSink: Send + Sync {
    fn record(&self, record: DispatchRecord);
}

/// Writes dispatch records as structured `tracing` events.
#[derive(Debug, Default)]
pub struct TracingSink;

impl DispatchSink for TracingSink {
    fn record(&self, r: DispatchRecord) {
        let denied = r.calls.iter().filter(|c| !c.permitted).count();
        let route = r.route_id.as_deref().unwrap_or("-");
        if r.status >= 500 {
            error!(
                request_id = %r.request_id,
                route      = %route,
                method     = r.method.as_str(),
                path       = %r.path,
                status     = r.status,
                outcome    = ?r.outcome,
                latency_ms = r.duration_ms,
                outbound   = r.calls.len(),
                denied,
                "← dispatch failed"
            );
        } else {
            info!(
                request_id = %r.request_id,
                route      = %route,
                method     = r.method.as_str(),
                path       = %r.path,
                status     = r.status,
                outcome    = ?r.outcome,
                latency_ms = r.duration_ms,
                outbound   = r.calls.len(),
                denied,
                "← dispatched"
            );
        }
    }
}

pub struct Dispatcher {
    table: Arc<ModuleTable>,
    transport: Arc<dyn HttpTransport>,
    sink: Arc<dyn DispatchSink>,
}

impl Dispatcher {
    pub fn new(
        table: Arc<ModuleTable>,
        transport: Arc<dyn HttpTransport>,
        sink: Arc<dyn DispatchSink>,
    ) -> Self {
        Self {
            table,
            transport,
            sink,
        }
    }

    pub fn table(&self) -> &ModuleTable {
        &self.table
    }

    /// Run `request` through its module.
    ///
    /// Application-level answers from modules (including 403 for a denied
    /// outbound call) are `Ok`. `Err` is reserved for routing misses, faults
    /// and deadline overruns.
    pub async fn dispatch(&self, request: GatewayRequest) -> DispatchResult<GatewayResponse> {
        let span = info_span!(
            "dispatch",
            request_id = %request.id,
            method = request.method.as_str(),
            path = %request.path,
        );
        self.dispatch_inner(request).instrument(span).await
    }

    async fn dispatch_inner(&self, request: GatewayRequest) -> DispatchResult<GatewayResponse> {
        let started = Instant::now();
        let GatewayRequest {
            id,
            method,
            path,
            query,
            headers,
            body,
        } = request;

        let mut record = DispatchRecord {
            request_id: id.clone(),
            route_id: None,
            method,
            path: path.clone(),
            outcome: DispatchOutcome::RouteNotFound,
            status: 404,
            duration_ms: 0,
            calls: Vec::new(),
        };

        let Some((route_match, module)) = self.table.resolve(&path, &method) else {
            let err = if self.table.matches_path(&path) {
                record.outcome = DispatchOutcome::MethodNotAllowed;
                DispatchError::MethodNotAllowed {
                    method: method.to_string(),
                    path: path.clone(),
                }
            } else {
                DispatchError::RouteNotFound(path.clone())
            };
            return self.finish(record, started, Err(err));
        };
        let route_id = route_match.route_id.clone();
        record.route_id = Some(route_id.clone());

        let input = ModuleInput {
            request_id: id.clone(),
            method: Some(method),
            path,
            query,
            path_params: route_match.path_params,
            wildcard: route_match.wildcard,
            headers,
            body,
        };
        let mut ctx = InvocationContext::new(&id, &route_id, module.allowlist.clone(), input);

        let (caps, input) = match self.prepare(&mut ctx, &module) {
            Ok(bound) => bound,
            Err(err) => {
                record.outcome = DispatchOutcome::Faulted;
                return self.finish(record, started, Err(err));
            }
        };

        let abandoned = AbandonGuard {
            sink: self.sink.as_ref(),
            record: Some(record.clone()),
            calls: ctx.call_log(),
            started,
        };

        let deadline = Duration::from_millis(module.timeout_ms);
        let run = AssertUnwindSafe(module.executor.execute(caps, input)).catch_unwind();
        let result = match tokio::time::timeout(deadline, run).await {
            Ok(Ok(Ok(output))) => {
                let _ = ctx.complete(output);
                match ctx.take_response() {
                    Some(output) => {
                        record.outcome = DispatchOutcome::Completed;
                        let mut response = GatewayResponse::new(output.status, &route_id);
                        response.headers = output.headers;
                        response.body = output.body;
                        Ok(response)
                    }
                    None => Err(DispatchError::Internal("module response was lost".to_string())),
                }
            }
            Ok(Ok(Err(fault))) => {
                let _ = ctx.fault();
                record.outcome = DispatchOutcome::Faulted;
                warn!(route = %route_id, fault = %fault, "module faulted");
                Err(DispatchError::ModuleFault {
                    route: route_id.clone(),
                    fault,
                })
            }
            Ok(Err(panic)) => {
                let _ = ctx.fault();
                record.outcome = DispatchOutcome::Faulted;
                let msg = panic_message(panic.as_ref());
                error!(route = %route_id, panic = %msg, "module panicked");
                Err(DispatchError::ModuleFault {
                    route: route_id.clone(),
                    fault: ModuleFault::Crashed(msg),
                })
            }
            Err(_) => {
                let _ = ctx.time_out();
                record.outcome = DispatchOutcome::TimedOut;
                warn!(route = %route_id, timeout_ms = module.timeout_ms, "module exceeded deadline");
                Err(DispatchError::TimedOut {
                    route: route_id.clone(),
                    timeout_ms: module.timeout_ms,
                })
            }
        };

        abandoned.disarm();
        record.calls = ctx.calls();
        self.finish(record, started, result)
    }

    /// Bind a fresh environment snapshot and move the context to `Running`.
    fn prepare(
        &self,
        ctx: &mut InvocationContext,
        module: &LoadedModule,
    ) -> DispatchResult<(ModuleCapabilities, ModuleInput)> {
        let internal = |e: &dyn std::fmt::Display| DispatchError::Internal(e.to_string());
        let env = self.table.binder().resolve(&module.route).map_err(|e| internal(&e))?;
        ctx.bind_environment(env).map_err(|e| internal(&e))?;
        ctx.start(self.transport.clone()).map_err(|e| internal(&e))
    }

    fn finish(
        &self,
        mut record: DispatchRecord,
        started: Instant,
        result: DispatchResult<GatewayResponse>,
    ) -> DispatchResult<GatewayResponse> {
        let elapsed = started.elapsed().as_millis() as u64;
        record.duration_ms = elapsed;
        record.status = match &result {
            Ok(resp) => resp.status,
            Err(err) => err.status().as_u16(),
        };
        self.sink.record(record);
        result.map(|mut resp| {
            resp.latency_ms = elapsed;
            resp
        })
    }
}

/// Emits a `Cancelled` record if the dispatch future is dropped while the
/// module is running.
struct AbandonGuard<'a> {
    sink: &'a dyn DispatchSink,
    record: Option<DispatchRecord>,
    calls: CallLog,
    started: Instant,
}

impl AbandonGuard<'_> {
    fn disarm(mut self) {
        self.record = None;
    }
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        let Some(mut record) = self.record.take() else {
            return;
        };
        record.outcome = DispatchOutcome::Cancelled;
        record.status = CLIENT_CLOSED_REQUEST;
        record.duration_ms = self.started.elapsed().as_millis() as u64;
        record.calls = self.calls.lock().clone();
        warn!(
            request_id = %record.request_id,
            route = record.route_id.as_deref().unwrap_or("-"),
            "dispatch abandoned by client"
        );
        self.sink.record(record);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "module panicked".to_string()
    }
}
