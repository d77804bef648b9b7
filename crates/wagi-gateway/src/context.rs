//! Per-request module invocation context.
//!
//! An [`InvocationContext`] is created for every dispatched request and
//! walks a small state machine:
//!
//! ```text
//! Created ──bind_environment──▶ EnvironmentBound ──start──▶ Running
//!                                                             │
//!                              ┌──────────────┬───────────────┤
//!                              ▼              ▼               ▼
//!                          Completed       Faulted         TimedOut
//! ```
//!
//! The context owns the invocation's cancellation token. Reaching `TimedOut`
//! or dropping the context while `Running` (the client went away) cancels it,
//! which aborts in-flight outbound calls and interrupts the sandbox.

use crate::interceptor::OutboundInterceptor;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use wagi_kernel::gateway::{
    AllowList, EnvironmentSnapshot, HttpMethod, HttpTransport, ModuleCapabilities, ModuleInput,
    ModuleOutput,
};

/// Lifecycle state of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InvocationState {
    Created,
    EnvironmentBound,
    Running,
    Completed,
    Faulted,
    TimedOut,
}

impl InvocationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InvocationState::Completed | InvocationState::Faulted | InvocationState::TimedOut
        )
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A state change that the lifecycle does not permit.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid invocation transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: InvocationState,
    pub to: InvocationState,
}

/// One outbound call attempted by a module.
///
/// Records are for observability only: allow decisions never consult them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundCallRecord {
    pub url: String,
    pub method: HttpMethod,
    pub permitted: bool,
    pub timestamp: DateTime<Utc>,
    /// Upstream status for permitted calls that got a response.
    pub status: Option<u16>,
}

/// Shared, append-only log of outbound calls for one invocation.
pub type CallLog = Arc<Mutex<Vec<OutboundCallRecord>>>;

/// Per-request state bundle governing one module execution.
pub struct InvocationContext {
    request_id: String,
    route_id: String,
    state: InvocationState,
    environment: Option<EnvironmentSnapshot>,
    allowlist: Arc<AllowList>,
    input: Option<ModuleInput>,
    calls: CallLog,
    response: Option<ModuleOutput>,
    cancel: CancellationToken,
    created_at: Instant,
}

impl InvocationContext {
    /// Allocate a context for `route_id`. No resources are bound yet.
    pub fn new(
        request_id: impl Into<String>,
        route_id: impl Into<String>,
        allowlist: Arc<AllowList>,
        input: ModuleInput,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            route_id: route_id.into(),
            state: InvocationState::Created,
            environment: None,
            allowlist,
            input: Some(input),
            calls: Arc::new(Mutex::new(Vec::new())),
            response: None,
            cancel: CancellationToken::new(),
            created_at: Instant::now(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    pub fn environment(&self) -> Option<&EnvironmentSnapshot> {
        self.environment.as_ref()
    }

    pub fn allowlist(&self) -> &AllowList {
        &self.allowlist
    }

    /// Token fired on timeout or when the context is dropped mid-run.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.created_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Shared handle to the outbound call log.
    pub fn call_log(&self) -> CallLog {
        self.calls.clone()
    }

    /// Snapshot of the outbound call log.
    pub fn calls(&self) -> Vec<OutboundCallRecord> {
        self.calls.lock().clone()
    }

    /// Attach the resolved environment. `Created -> EnvironmentBound`.
    pub fn bind_environment(&mut self, env: EnvironmentSnapshot) -> Result<(), InvalidTransition> {
        self.transition(InvocationState::Created, InvocationState::EnvironmentBound)?;
        self.environment = Some(env);
        Ok(())
    }

    /// Hand the module its capabilities and input. `EnvironmentBound -> Running`.
    ///
    /// The returned HTTP client is an [`OutboundInterceptor`] bound to this
    /// context's allowlist, call log and cancellation token.
    pub fn start(
        &mut self,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<(ModuleCapabilities, ModuleInput), InvalidTransition> {
        self.transition(InvocationState::EnvironmentBound, InvocationState::Running)?;
        let interceptor = OutboundInterceptor::new(
            self.route_id.clone(),
            self.allowlist.clone(),
            transport,
            self.calls.clone(),
            self.cancel.clone(),
        );
        let caps = ModuleCapabilities {
            env: self.environment.clone().unwrap_or_default(),
            http: Arc::new(interceptor),
            cancel: self.cancel.clone(),
        };
        Ok((caps, self.input.take().unwrap_or_default()))
    }

    /// Record the module's response. `Running -> Completed`.
    pub fn complete(&mut self, output: ModuleOutput) -> Result<(), InvalidTransition> {
        self.transition(InvocationState::Running, InvocationState::Completed)?;
        self.response = Some(output);
        Ok(())
    }

    /// The module trapped or crashed. `Running -> Faulted`.
    pub fn fault(&mut self) -> Result<(), InvalidTransition> {
        self.transition(InvocationState::Running, InvocationState::Faulted)?;
        self.response = None;
        self.cancel.cancel();
        Ok(())
    }

    /// The deadline elapsed. `Running -> TimedOut`; outstanding work is cancelled.
    pub fn time_out(&mut self) -> Result<(), InvalidTransition> {
        self.transition(InvocationState::Running, InvocationState::TimedOut)?;
        self.response = None;
        self.cancel.cancel();
        Ok(())
    }

    /// Take the completed response. `None` unless the state is `Completed`.
    pub fn take_response(&mut self) -> Option<ModuleOutput> {
        if self.state == InvocationState::Completed {
            self.response.take()
        } else {
            None
        }
    }

    fn transition(&mut self, from: InvocationState, to: InvocationState) -> Result<(), InvalidTransition> {
        if self.state != from {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

impl Drop for InvocationContext {
    fn drop(&mut self) {
        if self.state == InvocationState::Running {
            debug!(
                request_id = %self.request_id,
                route = %self.route_id,
                "invocation dropped while running, cancelling"
            );
        }
        self.cancel.cancel();
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("request_id", &self.request_id)
            .field("route_id", &self.route_id)
            .field("state", &self.state)
            .field("calls", &self.calls.lock().len())
            .finish()
    }
}
