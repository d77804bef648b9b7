//! `wagi-kernel`: contracts and pure logic for the Wagi module gateway.
//!
//! Nothing in this crate performs network I/O. It defines:
//!
//! - the HTTP primitives flowing through the gateway ([`gateway::types`]),
//! - the module capability traits every execution technology implements
//!   ([`gateway::module`]),
//! - route configuration and the router contract ([`gateway::router`]),
//! - the outbound allowlist matcher ([`gateway::allowlist`]),
//! - the per-module environment binder ([`gateway::environment`]),
//! - the module configuration document ([`gateway::document`]),
//! - gateway settings loading ([`config`]).
//!
//! Runtime implementations live in `wagi-gateway`.

pub mod config;
pub mod gateway;
