use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router as AxumRouter,
    body::Body,
    extract::{ConnectInfo, Request},
    response::Response,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::{core::router::Router, tracing_setup::create_request_span};

/// Bridges axum to the gateway [`Router`].
///
/// Every request, whatever its method or path, lands in a single fallback that hands it to
/// [`Router::serve`] together with the peer address (when the app is served with connect
/// info).
#[derive(Debug, Clone)]
pub struct HttpHandler {
    router: Arc<Router>,
}

impl HttpHandler {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Dispatch one request through the gateway.
    pub async fn handle_request(&self, req: Request) -> Response {
        let client_addr = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        self.router.serve(req, client_addr).await
    }

    /// The axum application: a catch-all fallback wrapped in a request trace layer.
    pub fn into_app(self) -> AxumRouter {
        AxumRouter::new()
            .fallback(move |req: Request| {
                let handler = self.clone();
                async move { handler.handle_request(req).await }
            })
            .layer(
                ServiceBuilder::new().layer(
                    TraceLayer::new_for_http()
                        .make_span_with(|req: &Request<Body>| {
                            create_request_span(req.method().as_str(), req.uri().path())
                        })
                        .on_response(
                            |response: &Response<Body>, latency: Duration, span: &tracing::Span| {
                                span.record("http.status_code", response.status().as_u16());
                                tracing::debug!(
                                    "Finished request with {} in {:?}",
                                    response.status(),
                                    latency
                                );
                            },
                        ),
                ),
            )
    }
}
