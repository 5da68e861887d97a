//! Core library for tailgate
//!
//! This crate contains the per-environment mesh node orchestration: the
//! process runner and CLI wrappers, container lifecycle, login flow,
//! certificate provisioning with control-plane diagnosis, serve routes,
//! device cleanup, the HTTP control API, configuration, logging, and error
//! handling.

pub mod admin;
pub mod auth;
pub mod cert;
pub mod config;
pub mod container;
pub mod diagnosis;
pub mod docker;
pub mod errors;
pub mod http;
pub mod identity;
pub mod logging;
pub mod mesh;
pub mod observability;
pub mod process;
pub mod qr;
pub mod redaction;
pub mod retry;
pub mod routes;
pub mod service;

// Re-export IndexMap for use by dependent crates (preserves insertion order for ordered maps)
pub use indexmap::IndexMap;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
