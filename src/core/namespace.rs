//! Per-namespace construction.
//!
//! A [`NamespaceBuilder`] moves through
//! `Created -> TransportBuilt -> ProxyBuilt -> RoutesRegistered`. Any failure tears down
//! every plugin created so far and leaves the builder `TornDown`; the build error is
//! returned joined with any teardown failures.
//!
//! Patterns are registered through a [`Registrar`]: a single tokio task owns the
//! [`MuxBuilder`] and acknowledges each registration before the next one is sent.
use std::sync::Arc;

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    adapters::{buffer_pool::BufferPool, proxy::ProxyCore, transport::HyperTransport},
    config::models::NamespaceConfig,
    core::{
        chain::Chain,
        error::BuildError,
        mux::{MuxBuilder, RouteTarget},
        pattern::{Pattern, generate_patterns, should_skip},
        pipeline::PipelineBuilder,
        registry::{PluginCache, PluginRegistry},
        teardown::TeardownChain,
    },
    ports::{plugin::InjectionContext, transport::SharedTransport},
};

struct Registration {
    pattern: String,
    target: RouteTarget,
    ack: oneshot::Sender<Result<(), BuildError>>,
}

/// Single-writer owner of the route table under construction.
pub struct Registrar {
    tx: mpsc::Sender<Registration>,
    task: JoinHandle<MuxBuilder>,
}

impl Registrar {
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::channel::<Registration>(1);
        let task = tokio::spawn(async move {
            let mut mux = MuxBuilder::new();
            while let Some(registration) = rx.recv().await {
                let result = mux.handle(&registration.pattern, registration.target);
                // the sender may have given up waiting
                let _ = registration.ack.send(result);
            }
            mux
        });
        Self { tx, task }
    }

    pub fn handle(&self) -> RegistrarHandle {
        RegistrarHandle {
            tx: self.tx.clone(),
        }
    }

    /// Close the channel and take back the route table.
    pub async fn finish(self) -> Result<MuxBuilder, BuildError> {
        drop(self.tx);
        self.task
            .await
            .map_err(|err| BuildError::Registrar(err.to_string()))
    }
}

/// Sending side of a [`Registrar`].
#[derive(Clone)]
pub struct RegistrarHandle {
    tx: mpsc::Sender<Registration>,
}

impl RegistrarHandle {
    /// Register `pattern` and wait for the registrar's verdict.
    pub async fn register(&self, pattern: String, target: RouteTarget) -> Result<(), BuildError> {
        let (ack, verdict) = oneshot::channel();
        self.tx
            .send(Registration {
                pattern,
                target,
                ack,
            })
            .await
            .map_err(|_| BuildError::Registrar("registrar is closed".to_string()))?;
        verdict
            .await
            .map_err(|_| BuildError::Registrar("registrar stopped before acknowledging".to_string()))?
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Created,
    TransportBuilt,
    ProxyBuilt,
    RoutesRegistered,
    TornDown,
}

pub struct NamespaceBuilder<'a> {
    name: Arc<str>,
    config: &'a NamespaceConfig,
    cache: PluginCache,
    pool: Arc<BufferPool>,
    state: BuildState,
}

impl<'a> NamespaceBuilder<'a> {
    pub fn new(
        name: &str,
        config: &'a NamespaceConfig,
        registry: Arc<PluginRegistry>,
        pool: Arc<BufferPool>,
    ) -> Self {
        Self {
            name: Arc::from(name),
            config,
            cache: PluginCache::new(registry),
            pool,
            state: BuildState::Created,
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Build the namespace and register its routes.
    ///
    /// On success the returned chain tears down every plugin the namespace created.
    pub async fn build(&mut self, registrar: &RegistrarHandle) -> Result<TeardownChain, BuildError> {
        tracing::info!("Building namespace {}", self.name);
        match self.build_steps(registrar).await {
            Ok(patterns) => {
                tracing::info!("Namespace {} registered {} patterns", self.name, patterns);
                Ok(self.cache.take_teardown())
            }
            Err(err) => {
                tracing::warn!(
                    "Namespace {} failed after reaching {:?}: {}",
                    self.name,
                    self.state,
                    err
                );
                let teardown = self.cache.take_teardown().run().await;
                self.state = BuildState::TornDown;
                Err(err.with_teardown(teardown))
            }
        }
    }

    async fn build_steps(&mut self, registrar: &RegistrarHandle) -> Result<usize, BuildError> {
        let config = self.config;
        let ictx = InjectionContext::namespace(self.name.as_ref());

        let base: SharedTransport = Arc::new(HyperTransport::new(&config.transport)?);
        let transport = PipelineBuilder::new(&mut self.cache)
            .transport(&ictx, &config.hooks, base)
            .await?;
        self.state = BuildState::TransportBuilt;

        let proxy = ProxyCore::new(transport, self.pool.clone());
        self.state = BuildState::ProxyBuilt;

        let ns_chain = PipelineBuilder::new(&mut self.cache)
            .namespace_chain(&ictx, config)
            .await?;

        let root = [String::new()];
        let mounts: &[String] = if config.mounts.is_empty() {
            &root
        } else {
            &config.mounts
        };

        let mut registered = 0;
        for mount in mounts {
            let trim = Pattern::decompose(mount).path.trim_end_matches('/').to_string();
            for (route_pattern, route) in &config.routes {
                let route_ictx =
                    InjectionContext::route(self.name.as_ref(), mount.as_str(), route_pattern.as_str());
                let route_chain: Chain = PipelineBuilder::new(&mut self.cache)
                    .route_chain(&route_ictx, route)
                    .await?;
                let handler = ns_chain
                    .extend(&route_chain)
                    .then(proxy.with_path_trim(&trim));

                for pattern in generate_patterns(route_pattern, &route.methods) {
                    if should_skip(&pattern, mount) {
                        tracing::debug!("Skipping empty pattern under host mount {}", mount);
                        continue;
                    }
                    let merged = Pattern::merge(mount, &pattern)?;
                    registrar
                        .register(
                            merged.to_string(),
                            RouteTarget {
                                namespace: self.name.clone(),
                                handler: handler.clone(),
                            },
                        )
                        .await?;
                    registered += 1;
                }
            }
        }
        self.state = BuildState::RoutesRegistered;
        Ok(registered)
    }
}
