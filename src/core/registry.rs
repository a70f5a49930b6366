//! Plugin factories and scoped plugin instances.
//!
//! [`PluginRegistry`] is an explicit value handed to the router builder; nothing is kept in
//! process-wide state, so several gateways can live in one process with different plugins.
//!
//! [`PluginCache`] creates instances for one namespace build:
//! * namespace-scope instances are created once and reused for every reference
//! * route-scope instances are created fresh for every `(mount, route)` pair
//! * each created instance registers its teardown immediately, before setup runs
use std::{collections::HashMap, sync::Arc};

use crate::{
    core::{error::BuildError, teardown::TeardownChain},
    plugins,
    ports::plugin::{Capabilities, Factory, InjectionContext, Plugin, PluginConfig, Scope},
};

/// Name to factory mapping.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: HashMap<String, Arc<dyn Factory>>,
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in plugins.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        plugins::register_builtins(&mut registry);
        registry
    }

    /// Register a factory under its own name, replacing any previous one.
    pub fn register(&mut self, factory: impl Factory) -> &mut Self {
        let factory: Arc<dyn Factory> = Arc::new(factory);
        let name = factory.name().to_string();
        if self.factories.insert(name.clone(), factory).is_some() {
            tracing::warn!("Plugin factory {} registered twice; keeping the latest", name);
        }
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Factory>, BuildError> {
        self.factories
            .get(name)
            .cloned()
            .ok_or_else(|| BuildError::PluginNotFound {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("factories", &self.names())
            .finish()
    }
}

/// A created and set-up plugin.
#[derive(Debug, Clone)]
pub struct ResolvedPlugin {
    pub name: String,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    scope: Scope,
    mount: Option<String>,
    route: Option<String>,
    name: String,
}

impl CacheKey {
    fn new(ictx: &InjectionContext, name: &str) -> Self {
        Self {
            scope: ictx.scope,
            mount: ictx.mount.clone(),
            route: ictx.route.clone(),
            name: name.to_string(),
        }
    }
}

/// Scope-keyed instance cache owned by one namespace build.
pub struct PluginCache {
    registry: Arc<PluginRegistry>,
    instances: HashMap<CacheKey, ResolvedPlugin>,
    teardown: TeardownChain,
}

impl PluginCache {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            instances: HashMap::new(),
            teardown: TeardownChain::new(),
        }
    }

    /// Return the instance for `name` in the scope of `ictx`, creating it if needed.
    ///
    /// Setup only runs for freshly created instances; a cache hit ignores `config`.
    pub async fn get_or_create(
        &mut self,
        ictx: &InjectionContext,
        name: &str,
        config: &PluginConfig,
    ) -> Result<ResolvedPlugin, BuildError> {
        let key = CacheKey::new(ictx, name);
        if let Some(existing) = self.instances.get(&key) {
            tracing::debug!(parent: &ictx.span, "Reusing plugin instance {}", name);
            return Ok(existing.clone());
        }

        let factory = self.registry.get(name)?;
        let plugin = factory
            .create(ictx)
            .await
            .map_err(|source| BuildError::PluginCreate {
                plugin: name.to_string(),
                source,
            })?;

        self.register_teardown(name, ictx, plugin.clone());

        plugin
            .setup(ictx, config)
            .await
            .map_err(|source| BuildError::PluginSetup {
                plugin: name.to_string(),
                source,
            })?;

        let resolved = ResolvedPlugin {
            name: name.to_string(),
            capabilities: plugin.capabilities(),
        };
        tracing::debug!(
            parent: &ictx.span,
            "Created plugin {} with capabilities {:?}",
            name,
            resolved.capabilities
        );
        self.instances.insert(key, resolved.clone());
        Ok(resolved)
    }

    fn register_teardown(&mut self, name: &str, ictx: &InjectionContext, plugin: Arc<dyn Plugin>) {
        let label = match (&ictx.mount, &ictx.route) {
            (Some(mount), Some(route)) => format!("plugin {name} ({mount} {route})"),
            _ => format!("plugin {name} ({} scope)", ictx.scope),
        };
        self.teardown
            .add(label, move || async move { plugin.teardown().await });
    }

    /// Number of instances created so far.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Hand over the accumulated teardown steps.
    pub fn into_teardown(self) -> TeardownChain {
        self.teardown
    }

    /// Take the accumulated teardown steps, leaving the cache with none.
    pub fn take_teardown(&mut self) -> TeardownChain {
        std::mem::take(&mut self.teardown)
    }
}
