//! Plugin contract.
//!
//! A plugin is created by a [`Factory`] for one injection scope, configured through
//! [`Plugin::setup`], and released through [`Plugin::teardown`]. What it can do is declared
//! once through [`Plugin::capabilities`]:
//! - [`Middleware`]: wraps the next handler
//! - [`RequestModifier`]: mutates the request before it continues down the chain
//! - [`TransportHook`]: decorates the upstream transport (namespace scope only)
//! - [`OnRequestHook`]: wraps the next handler ahead of every modifier (namespace scope only)
//!
//! Capabilities are checked when the pipeline is built, never at request time.
use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::ports::{
    handler::{ProxyRequest, SharedHandler},
    problem::{BoxError, HandlerError},
    transport::SharedTransport,
};

/// Opaque plugin configuration as declared in the gateway config.
pub type PluginConfig = serde_json::Map<String, serde_json::Value>;

/// Decode a plugin configuration into a typed struct.
pub fn decode_config<T: DeserializeOwned>(config: &PluginConfig) -> Result<T, serde_json::Error> {
    serde_json::from_value(serde_json::Value::Object(config.clone()))
}

/// Tier a plugin instance is created and cached at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Namespace,
    Route,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Namespace => write!(f, "namespace"),
            Scope::Route => write!(f, "route"),
        }
    }
}

/// Everything a plugin learns about where it is being injected.
#[derive(Debug, Clone)]
pub struct InjectionContext {
    pub namespace: String,
    /// Route pattern as written in the config, for route-scoped plugins.
    pub route: Option<String>,
    /// Mount the route is being registered under, for route-scoped plugins.
    pub mount: Option<String>,
    pub scope: Scope,
    /// Scoped logger; emit plugin events with `tracing::info!(parent: &ictx.span, ...)`.
    pub span: tracing::Span,
}

impl InjectionContext {
    pub fn namespace(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let span = tracing::info_span!(
            "plugin",
            namespace = %namespace,
            scope = %Scope::Namespace,
        );
        Self {
            namespace,
            route: None,
            mount: None,
            scope: Scope::Namespace,
            span,
        }
    }

    pub fn route(
        namespace: impl Into<String>,
        mount: impl Into<String>,
        route: impl Into<String>,
    ) -> Self {
        let namespace = namespace.into();
        let mount = mount.into();
        let route = route.into();
        let span = tracing::info_span!(
            "plugin",
            namespace = %namespace,
            scope = %Scope::Route,
            mount = %mount,
            route = %route,
        );
        Self {
            namespace,
            route: Some(route),
            mount: Some(mount),
            scope: Scope::Route,
            span,
        }
    }
}

/// Creates plugin instances for a given name.
#[async_trait]
pub trait Factory: Send + Sync + 'static {
    /// Name the plugin is referenced by in the config.
    fn name(&self) -> &str;

    async fn create(&self, ictx: &InjectionContext) -> Result<Arc<dyn Plugin>, BoxError>;
}

#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    async fn setup(&self, ictx: &InjectionContext, config: &PluginConfig) -> Result<(), BoxError>;

    async fn teardown(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Describe what this instance implements.
    fn capabilities(self: Arc<Self>) -> Capabilities;
}

pub trait Middleware: Send + Sync + 'static {
    fn handler(&self, next: SharedHandler) -> SharedHandler;
}

#[async_trait]
pub trait RequestModifier: Send + Sync + 'static {
    async fn modify_request(&self, req: &mut ProxyRequest) -> Result<(), HandlerError>;
}

pub trait TransportHook: Send + Sync + 'static {
    fn hook_transport(&self, transport: SharedTransport) -> Result<SharedTransport, BoxError>;
}

pub trait OnRequestHook: Send + Sync + 'static {
    fn handler(&self, next: SharedHandler) -> SharedHandler;
}

/// A single plugin role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Middleware,
    RequestModifier,
    TransportHook,
    OnRequestHook,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Middleware => "middleware",
            Capability::RequestModifier => "request modifier",
            Capability::TransportHook => "transport hook",
            Capability::OnRequestHook => "on-request hook",
        };
        f.write_str(name)
    }
}

/// Capability set of one plugin instance.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub middleware: Option<Arc<dyn Middleware>>,
    pub request_modifier: Option<Arc<dyn RequestModifier>>,
    pub transport_hook: Option<Arc<dyn TransportHook>>,
    pub on_request_hook: Option<Arc<dyn OnRequestHook>>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware = Some(middleware);
        self
    }

    pub fn with_request_modifier(mut self, modifier: Arc<dyn RequestModifier>) -> Self {
        self.request_modifier = Some(modifier);
        self
    }

    pub fn with_transport_hook(mut self, hook: Arc<dyn TransportHook>) -> Self {
        self.transport_hook = Some(hook);
        self
    }

    pub fn with_on_request_hook(mut self, hook: Arc<dyn OnRequestHook>) -> Self {
        self.on_request_hook = Some(hook);
        self
    }

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Middleware => self.middleware.is_some(),
            Capability::RequestModifier => self.request_modifier.is_some(),
            Capability::TransportHook => self.transport_hook.is_some(),
            Capability::OnRequestHook => self.on_request_hook.is_some(),
        }
    }

    /// Every capability present, in a stable order.
    pub fn kinds(&self) -> Vec<Capability> {
        [
            Capability::OnRequestHook,
            Capability::RequestModifier,
            Capability::Middleware,
            Capability::TransportHook,
        ]
        .into_iter()
        .filter(|c| self.has(*c))
        .collect()
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.kinds()).finish()
    }
}
