//! `req-modifier`: rewrites the upstream path and/or host of a route.
//!
//! ```yaml
//! request_modifiers:
//!   - name: req-modifier
//!     config:
//!       path: /v2/users/{id}/{rest...}
//!       host: https://users.internal:8443
//!       retain_host_header: false
//! ```
//!
//! Path placeholders must name segments of the route pattern. The plugin is route-scoped
//! because the template is compiled against the route it is attached to.
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::{
    core::{
        pattern::Pattern,
        rewrite::{HostRewrite, PathRewrite},
    },
    ports::{
        handler::ProxyRequest,
        plugin::{
            Capabilities, Factory, InjectionContext, Plugin, PluginConfig, RequestModifier, Scope,
            decode_config,
        },
        problem::{BoxError, HandlerError},
    },
};

pub const NAME: &str = "req-modifier";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ReqModifierConfig {
    path: Option<String>,
    host: Option<String>,
    #[serde(alias = "retainHostHeader")]
    retain_host_header: bool,
}

#[derive(Debug, Default)]
struct Rewrites {
    path: Option<PathRewrite>,
    host: Option<HostRewrite>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReqModifierFactory;

#[async_trait]
impl Factory for ReqModifierFactory {
    fn name(&self) -> &str {
        NAME
    }

    async fn create(&self, ictx: &InjectionContext) -> Result<Arc<dyn Plugin>, BoxError> {
        Ok(Arc::new(ReqModifier {
            span: ictx.span.clone(),
            rewrites: OnceCell::new(),
        }))
    }
}

pub struct ReqModifier {
    span: tracing::Span,
    rewrites: OnceCell<Rewrites>,
}

#[async_trait]
impl Plugin for ReqModifier {
    async fn setup(&self, ictx: &InjectionContext, config: &PluginConfig) -> Result<(), BoxError> {
        if ictx.scope != Scope::Route {
            return Err("plugin only usable in route scope".into());
        }
        let config: ReqModifierConfig = decode_config(config)?;
        let path = config.path.filter(|p| !p.is_empty());
        let host = config.host.filter(|h| !h.is_empty());
        if path.is_none() && host.is_none() {
            return Err("at least one of path or host must be set".into());
        }

        let mut rewrites = Rewrites::default();
        if let Some(target) = path {
            let route = Pattern::decompose(ictx.route.as_deref().unwrap_or_default());
            let prefix = ictx
                .mount
                .as_deref()
                .map(|m| Pattern::decompose(m).segment_count())
                .unwrap_or_default();
            let rewrite = PathRewrite::compile(&route.path, &target, prefix)?;
            tracing::debug!(
                parent: &self.span,
                "Compiled path rewrite {} (format {})",
                target,
                rewrite.format_string()
            );
            rewrites.path = Some(rewrite);
        }
        if let Some(url) = host {
            rewrites.host = Some(HostRewrite::compile(&url, config.retain_host_header)?);
        }

        self.rewrites
            .set(rewrites)
            .map_err(|_| "plugin already set up")?;
        Ok(())
    }

    fn capabilities(self: Arc<Self>) -> Capabilities {
        Capabilities::new().with_request_modifier(self)
    }
}

#[async_trait]
impl RequestModifier for ReqModifier {
    async fn modify_request(&self, req: &mut ProxyRequest) -> Result<(), HandlerError> {
        let Some(rewrites) = self.rewrites.get() else {
            return Err(HandlerError::internal("req-modifier used before setup"));
        };

        if let Some(path) = &rewrites.path {
            let from = req.raw_path().to_string();
            path.apply(req)?;
            tracing::debug!(parent: &self.span, "Path rewritten from {} to {}", from, req.raw_path());
        }
        if let Some(host) = &rewrites.host {
            host.apply(&mut req.request)?;
        }
        Ok(())
    }
}
