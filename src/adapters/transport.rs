use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use http::{Request, Response, Version, header};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::{TokioExecutor, TokioTimer},
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;

use crate::{
    config::models::TransportConfig,
    core::error::BuildError,
    ports::transport::{Transport, TransportError, TransportResult},
};

/// Upstream transport built on the hyper legacy client with rustls.
///
/// Responsibilities:
/// * Dials plain HTTP and HTTPS upstreams (ALPN may negotiate h2)
/// * Applies the namespace's dialer and connection pool tuning
/// * Bounds the wait for response headers when configured
///
/// Retries and circuit breaking belong in transport hooks, not here.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    response_header_timeout: Option<Duration>,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("response_header_timeout", &self.response_header_timeout)
            .finish_non_exhaustive()
    }
}

impl HyperTransport {
    /// Build a transport from the namespace transport settings.
    pub fn new(config: &TransportConfig) -> Result<Self, BuildError> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(config.dialer.timeout);
        http_connector.set_keepalive(config.dialer.keep_alive);
        if let Some(delay) = config.dialer.fallback_delay {
            http_connector.set_happy_eyeballs_timeout(Some(delay));
        }

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();
        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("Failed to add native certificate to rustls RootCertStore");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }
        tracing::debug!("Loaded {} native root certificates", root_cert_store.len());

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let mut builder = Client::builder(TokioExecutor::new());
        builder.pool_timer(TokioTimer::new());
        if config.disable_keep_alives {
            builder.pool_max_idle_per_host(0);
        } else if let Some(max_idle) = config.max_idle_conns_per_host {
            builder.pool_max_idle_per_host(max_idle);
        }
        if let Some(idle) = config.idle_conn_timeout {
            builder.pool_idle_timeout(idle);
        }
        let client = builder.build(https_connector);

        Ok(Self {
            client,
            response_header_timeout: config.response_header_timeout,
        })
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn round_trip(&self, req: Request<Body>) -> TransportResult<Response<Body>> {
        if req.uri().authority().is_none() {
            return Err(TransportError::InvalidRequest(format!(
                "outgoing URI {} has no host",
                req.uri()
            )));
        }

        let (mut parts, body) = req.into_parts();
        parts.version = Version::HTTP_11;
        let uri = parts.uri.clone();
        tracing::debug!("Sending upstream request: {} {}", parts.method, uri);

        let pending = self.client.request(Request::from_parts(parts, body));
        let result = match self.response_header_timeout {
            Some(limit) => timeout(limit, pending)
                .await
                .map_err(|_| TransportError::Timeout(limit))?,
            None => pending.await,
        };

        match result {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                // the downstream server frames the body itself
                parts.headers.remove(header::TRANSFER_ENCODING);
                Ok(Response::from_parts(parts, Body::new(body)))
            }
            Err(err) => {
                tracing::debug!("Upstream request to {} failed: {}", uri, err);
                Err(TransportError::Connection {
                    uri: uri.to_string(),
                    source: Box::new(err),
                })
            }
        }
    }
}
