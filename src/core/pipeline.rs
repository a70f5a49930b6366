//! Turns declared plugin references into executable pipelines.
//!
//! Execution order inside one scope is fixed:
//! 1. on-request hooks (namespace scope only)
//! 2. request modifiers
//! 3. middlewares
//!
//! Transport hooks wrap the transport built so far, in declared order. A hook that lacks a
//! capability is skipped for it, while a modifier or middleware reference lacking its
//! capability fails the build.
use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    config::models::{NamespaceConfig, PluginRef, RouteConfig},
    core::{
        chain::{Chain, Constructor},
        error::BuildError,
        registry::{PluginCache, ResolvedPlugin},
    },
    ports::{
        handler::{Handler, HandlerResult, ProxyRequest, SharedHandler},
        plugin::{Capabilities, Capability, InjectionContext, RequestModifier},
        transport::SharedTransport,
    },
};

/// Runs a request modifier, then the next handler.
struct ModifierHandler {
    modifier: Arc<dyn RequestModifier>,
    next: SharedHandler,
}

#[async_trait]
impl Handler for ModifierHandler {
    async fn serve(&self, mut req: ProxyRequest) -> HandlerResult {
        self.modifier.modify_request(&mut req).await?;
        self.next.serve(req).await
    }
}

pub struct PipelineBuilder<'a> {
    cache: &'a mut PluginCache,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(cache: &'a mut PluginCache) -> Self {
        Self { cache }
    }

    /// Wrap `transport` with every transport hook among `hooks`.
    pub async fn transport(
        &mut self,
        ictx: &InjectionContext,
        hooks: &[PluginRef],
        mut transport: SharedTransport,
    ) -> Result<SharedTransport, BuildError> {
        for plugin_ref in enabled(hooks) {
            let plugin = self.resolve(ictx, plugin_ref).await?;
            if let Some(hook) = plugin.capabilities.transport_hook {
                transport =
                    hook.hook_transport(transport)
                        .map_err(|source| BuildError::TransportHook {
                            plugin: plugin.name.clone(),
                            source,
                        })?;
                tracing::debug!(parent: &ictx.span, "Applied transport hook {}", plugin.name);
            }
        }
        Ok(transport)
    }

    /// Chain for the namespace scope.
    pub async fn namespace_chain(
        &mut self,
        ictx: &InjectionContext,
        namespace: &NamespaceConfig,
    ) -> Result<Chain, BuildError> {
        self.chain(
            ictx,
            &namespace.hooks,
            &namespace.request_modifiers,
            &namespace.middlewares,
        )
        .await
    }

    /// Chain for one route.
    pub async fn route_chain(
        &mut self,
        ictx: &InjectionContext,
        route: &RouteConfig,
    ) -> Result<Chain, BuildError> {
        self.chain(ictx, &[], &route.request_modifiers, &route.middlewares)
            .await
    }

    async fn chain(
        &mut self,
        ictx: &InjectionContext,
        hooks: &[PluginRef],
        modifiers: &[PluginRef],
        middlewares: &[PluginRef],
    ) -> Result<Chain, BuildError> {
        let mut chain = Chain::new();

        for plugin_ref in enabled(hooks) {
            let plugin = self.resolve(ictx, plugin_ref).await?;
            if let Some(hook) = plugin.capabilities.on_request_hook {
                chain.push(Constructor::new(plugin.name, move |next| hook.handler(next)));
            }
        }

        for plugin_ref in enabled(modifiers) {
            let plugin = self.resolve(ictx, plugin_ref).await?;
            let modifier = require(&plugin, Capability::RequestModifier, |caps| {
                caps.request_modifier.clone()
            })?;
            chain.push(Constructor::new(plugin.name, move |next| {
                Arc::new(ModifierHandler {
                    modifier: modifier.clone(),
                    next,
                }) as SharedHandler
            }));
        }

        for plugin_ref in enabled(middlewares) {
            let plugin = self.resolve(ictx, plugin_ref).await?;
            let middleware =
                require(&plugin, Capability::Middleware, |caps| caps.middleware.clone())?;
            chain.push(Constructor::new(plugin.name, move |next| {
                middleware.handler(next)
            }));
        }

        tracing::debug!(
            parent: &ictx.span,
            "Built {} chain: {:?}",
            ictx.scope,
            chain.names()
        );
        Ok(chain)
    }

    async fn resolve(
        &mut self,
        ictx: &InjectionContext,
        plugin_ref: &PluginRef,
    ) -> Result<ResolvedPlugin, BuildError> {
        self.cache
            .get_or_create(ictx, &plugin_ref.name, &plugin_ref.config)
            .await
    }
}

fn enabled(refs: &[PluginRef]) -> impl Iterator<Item = &PluginRef> {
    refs.iter().filter(|r| {
        if !r.enabled {
            tracing::debug!("Skipping disabled plugin {}", r.name);
        }
        r.enabled
    })
}

fn require<T>(
    plugin: &ResolvedPlugin,
    capability: Capability,
    get: impl FnOnce(&Capabilities) -> Option<T>,
) -> Result<T, BuildError> {
    get(&plugin.capabilities).ok_or_else(|| BuildError::MissingCapability {
        plugin: plugin.name.clone(),
        capability,
    })
}
