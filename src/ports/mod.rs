//! Traits and value types at the seams of the gateway.
pub mod handler;
pub mod plugin;
pub mod problem;
pub mod transport;
