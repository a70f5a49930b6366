//! Listener management.
//!
//! [`run`] is the embedding entry point: it builds the [`Router`] from a validated config,
//! binds every configured server address and serves until `shutdown` resolves. Shutdown then
//! proceeds in order:
//! - listeners stop accepting and in-flight requests drain, bounded by
//!   `gateway.graceful_shutdown_timeout`
//! - connections still open after the bound are aborted
//! - [`Router::shutdown`] tears down every plugin
use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use eyre::{Result, WrapErr, eyre};
use tokio::{net::TcpListener, signal, sync::watch, task::JoinSet, time::timeout};

use crate::{
    adapters::http_handler::HttpHandler,
    config::models::GatewayConfig,
    core::{registry::PluginRegistry, router::Router},
};

/// Build the router, bind every listener and serve until `shutdown` resolves.
pub async fn run<F>(config: GatewayConfig, registry: PluginRegistry, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let router = Router::build(&config.namespaces, Arc::new(registry))
        .await
        .wrap_err("Failed to build router")?;
    let router = Arc::new(router);

    let mut listeners = Vec::with_capacity(config.servers.len());
    for server in &config.servers {
        match TcpListener::bind(&server.addr).await {
            Ok(listener) => listeners.push(listener),
            Err(e) => {
                if let Err(teardown) = router.shutdown().await {
                    tracing::warn!("Teardown after bind failure reported: {}", teardown);
                }
                return Err(e).wrap_err_with(|| format!("Failed to bind to {}", server.addr));
            }
        }
    }

    serve(
        listeners,
        router,
        config.gateway.graceful_shutdown_timeout,
        shutdown,
    )
    .await
}

/// Serve `router` on already bound listeners.
///
/// The router is torn down before returning, whatever the outcome of serving.
pub async fn serve<F>(
    listeners: Vec<TcpListener>,
    router: Arc<Router>,
    shutdown_timeout: Duration,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let app = HttpHandler::new(router.clone()).into_app();
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut servers = JoinSet::new();

    for listener in listeners {
        let addr = listener
            .local_addr()
            .wrap_err("Failed to get listener address")?;
        tracing::info!("Rampart listening on {}", addr);

        let app = app.clone();
        let mut stop_rx = stop_rx.clone();
        servers.spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = stop_rx.wait_for(|stop| *stop).await;
            })
            .await
            .wrap_err_with(|| format!("Server on {addr} failed"))
        });
    }

    let mut failure = None;
    tokio::select! {
        _ = shutdown => {
            tracing::info!("Shutdown signal received, draining connections");
        }
        Some(joined) = servers.join_next() => {
            let err = flatten(joined)
                .err()
                .unwrap_or_else(|| eyre!("Server stopped unexpectedly"));
            tracing::error!("Listener exited early: {:?}", err);
            failure = Some(err);
        }
    }

    let _ = stop_tx.send(true);
    let drained = timeout(shutdown_timeout, async {
        while let Some(joined) = servers.join_next().await {
            if let Err(e) = flatten(joined) {
                tracing::error!("Server error while draining: {:?}", e);
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            "Graceful shutdown timeout exceeded ({:?}), aborting open connections",
            shutdown_timeout
        );
        servers.abort_all();
    }

    router
        .shutdown()
        .await
        .wrap_err("Plugin teardown reported errors")?;
    tracing::info!("Graceful shutdown completed");

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn flatten(joined: Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    joined.wrap_err("Server task panicked")?
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM.
pub async fn shutdown_signal() {
    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown..."),
            Err(e) => {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        },
        _ = wait_for_sigterm() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // On non-Unix systems, we only have Ctrl+C
    std::future::pending::<()>().await;
}
