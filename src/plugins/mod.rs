//! Built-in plugins.
//!
//! Only request rewriting ships with the gateway; everything else is registered by the
//! embedding application on its own [`PluginRegistry`].
pub mod req_modifier;

pub use req_modifier::ReqModifierFactory;

use crate::core::registry::PluginRegistry;

/// Register every built-in plugin factory.
pub fn register_builtins(registry: &mut PluginRegistry) {
    registry.register(ReqModifierFactory);
}
