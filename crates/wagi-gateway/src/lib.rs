//! `wagi-gateway`: Wagi module gateway runtime.
//!
//! This crate provides the concrete implementations of the contracts defined
//! in `wagi-kernel::gateway`:
//!
//! | Kernel contract | Implementation |
//! |----------------|----------------|
//! | [`GatewayRouter`](wagi_kernel::gateway::GatewayRouter) | [`router::TrieRouter`] |
//! | [`ModuleExecutor`](wagi_kernel::gateway::ModuleExecutor) | [`executor::native`], [`executor::ScriptModule`], [`executor::WasmModule`] |
//! | [`OutboundHttp`](wagi_kernel::gateway::OutboundHttp) | [`interceptor::OutboundInterceptor`] |
//! | [`HttpTransport`](wagi_kernel::gateway::HttpTransport) | [`transport::ReqwestTransport`] |
//!
//! A [`Gateway`] loads a module document into a [`table::ModuleTable`] and
//! dispatches requests through a [`dispatcher::Dispatcher`]; [`server`] puts
//! an axum HTTP service in front of it.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wagi_gateway::{Gateway, GatewaySettings, server};
//! use wagi_kernel::gateway::{DeploymentVars, ModuleDocument};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let document = ModuleDocument::load("modules.toml")?;
//!     let gateway = Gateway::builder(document)
//!         .deployment(DeploymentVars::from_process_env())
//!         .settings(GatewaySettings::load(None)?)
//!         .build()?;
//!     server::serve(Arc::new(gateway)).await?;
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod interceptor;
pub mod router;
pub mod server;
pub mod settings;
pub mod table;
pub mod transport;

pub use dispatcher::{DispatchOutcome, DispatchRecord, DispatchSink, Dispatcher, TracingSink};
pub use error::{DispatchError, DispatchResult, LoadError};
pub use gateway::{Gateway, GatewayBuilder};
pub use settings::GatewaySettings;
pub use table::{DisabledRoute, LoadReport, RouteSummary};

// Re-export the kernel for convenience.
pub use wagi_kernel as kernel;
