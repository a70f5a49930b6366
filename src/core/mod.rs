pub mod chain;
pub mod error;
pub mod mux;
pub mod namespace;
pub mod pattern;
pub mod pipeline;
pub mod registry;
pub mod rewrite;
pub mod router;
pub mod teardown;

pub use error::BuildError;
pub use registry::PluginRegistry;
pub use router::Router;
