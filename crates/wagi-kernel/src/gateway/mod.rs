//! Module gateway kernel contract.
//!
//! This module defines the *trait interfaces, configuration types and pure
//! policy logic* of the Wagi module gateway. Nothing here touches the network
//! or a sandbox; those live in `wagi-gateway`.
//!
//! # Architecture mapping
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              wagi-kernel  (this module)                     │
//! │  ModuleDocument  ->  RouteConfig  ->  GatewayConfig         │
//! │  EnvironmentBinder / DeploymentVars / EnvironmentSnapshot   │
//! │  AllowList + is_allowed                                     │
//! │  GatewayRouter / ModuleExecutor / OutboundHttp traits       │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │  depends on
//! ┌──────────────────────────▼──────────────────────────────────┐
//! │              wagi-gateway  (runtime crate)                  │
//! │  TrieRouter: impl GatewayRouter                             │
//! │  Gateway (module table) / Dispatcher / InvocationContext    │
//! │  OutboundInterceptor: impl OutboundHttp                     │
//! │  Native / Rhai / Wasm executors: impl ModuleExecutor        │
//! │  axum server                                                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use wagi_kernel::gateway::{DocumentFormat, GatewayConfig, ModuleDocument};
//!
//! let doc = ModuleDocument::from_str(
//!     r#"{ "Wagi": { "Modules": { "Echo": { "Module": "builtin:echo", "Route": "/test" } } } }"#,
//!     DocumentFormat::Json,
//! )
//! .expect("document parses");
//!
//! let config = GatewayConfig::from_document("local", &doc).expect("routes build");
//! config.validate().expect("gateway config is valid");
//! ```

pub mod allowlist;
pub mod document;
pub mod environment;
pub mod error;
pub mod module;
pub mod router;
pub mod validation;

// ── Flat re-exports ────────────────────────────────────────────────────────

pub use allowlist::{AllowList, AllowedHost, is_allowed};
pub use document::{DocumentFormat, ModuleDocument, ModuleEntry};
pub use environment::{DeploymentVars, EnvironmentBinder, EnvironmentSnapshot};
pub use error::GatewayError;
pub use module::{
    HttpTransport, ModuleCapabilities, ModuleExecutor, ModuleFault, ModuleInput, ModuleKind,
    ModuleOutput, OutboundError, OutboundHttp, OutboundRequest, OutboundResponse,
};
pub use router::{GatewayRouter, RouteConfig, WILDCARD_SUFFIX, validate_path_pattern};
pub use validation::{GatewayConfig, pattern_key, routes_conflict};

// types module is pub so implementors in wagi-gateway can use the structs
pub mod types;
pub use types::{GatewayRequest, GatewayResponse, HttpMethod, RouteMatch};
