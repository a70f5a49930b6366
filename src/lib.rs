//! Rampart - a namespace-oriented HTTP reverse-proxy gateway.
//!
//! Routes are grouped into **namespaces**. Each namespace owns its mounts (host and/or path
//! prefixes), its upstream transport and an ordered pipeline of plugins. Plugins are
//! resolved by name from a [`PluginRegistry`] and may provide any of four capabilities:
//! - middlewares wrapping the downstream handler
//! - request modifiers rewriting the outbound request (the built-in `req-modifier`)
//! - transport hooks decorating the upstream transport
//! - on-request hooks running before anything else
//!
//! # Quick Example
//! ```no_run
//! use rampart::{PluginRegistry, config::loader::load_config, server};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = load_config("rampart.yaml").await?;
//! let registry = PluginRegistry::with_builtins();
//! server::run(config, registry, server::shutdown_signal()).await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (hyper, axum and rustls backed
//! implementations) while keeping pattern handling, rewriting and pipeline assembly inside
//! `core`.
//!
//! # Error Handling
//! Building the router returns a [`BuildError`]; partially built namespaces are torn down
//! before it is returned. Request-time failures are [`HandlerError`](ports::problem::HandlerError)
//! values rendered by the router's error handler.
pub mod config;
pub mod plugins;
pub mod ports;
pub mod server;
pub mod tracing_setup;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::HttpHandler,
    core::{BuildError, PluginRegistry, Router},
};
