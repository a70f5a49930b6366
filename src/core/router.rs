//! The gateway router.
//!
//! [`Router::build`] constructs every namespace in name order through one shared
//! [`Registrar`], then freezes the route table. A failing namespace aborts the build and
//! tears down everything built before it.
//!
//! [`Router::serve`] dispatches one inbound request:
//! - `404` when nothing matches, `405` with `Allow` when only other methods match
//! - `301` to the slash-terminated path when only a subtree pattern matches
//! - otherwise the route pipeline runs; its errors are logged and rendered by the
//!   [`ErrorHandler`]
use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};

use axum::body::Body;
use http::{
    HeaderValue, Method, Request, Response, StatusCode, Uri,
    header::{ACCEPT, ALLOW, CONTENT_TYPE, HOST, LOCATION},
};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::{
    adapters::buffer_pool::BufferPool,
    config::models::NamespaceConfig,
    core::{
        error::BuildError,
        mux::{Mux, Resolution},
        namespace::{NamespaceBuilder, Registrar},
        registry::PluginRegistry,
        teardown::{TeardownChain, TeardownError},
    },
    ports::{
        handler::{ProxyRequest, RequestContext},
        problem::HandlerError,
    },
};

const GENERIC_ERROR_MESSAGE: &str = "An error occurred while processing the request";

/// What the error handler learns about the failed request.
#[derive(Debug, Clone, Copy)]
pub struct FailedRequest<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub accept: Option<&'a HeaderValue>,
    pub pattern: &'a str,
    pub namespace: &'a str,
}

/// Turns a handler error into the response sent to the client.
pub type ErrorHandler =
    Arc<dyn Fn(&FailedRequest<'_>, &HandlerError) -> Response<Body> + Send + Sync>;

#[derive(Serialize)]
struct ProblemBody {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    type_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    status: u16,
}

/// Render `err` as JSON when the client accepts it, as plain text otherwise.
pub fn default_error_handler(req: &FailedRequest<'_>, err: &HandlerError) -> Response<Body> {
    let status = err.status();
    let wants_json = req
        .accept
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"));

    let (content_type, body) = if wants_json {
        let problem = ProblemBody {
            type_uri: err.type_uri(),
            title: err.title(),
            detail: err.detail(),
            status: status.as_u16(),
        };
        match serde_json::to_string(&problem) {
            Ok(json) => ("application/json", format!("{json}\n")),
            Err(_) => ("text/plain; charset=utf-8", GENERIC_ERROR_MESSAGE.to_string()),
        }
    } else {
        let text = err
            .detail()
            .or_else(|| err.title())
            .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string());
        ("text/plain; charset=utf-8", text)
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

pub struct Router {
    mux: Arc<Mux>,
    teardown: Mutex<TeardownChain>,
    error_handler: ErrorHandler,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("patterns", &self.mux.len())
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Build every namespace and freeze the resulting route table.
    pub async fn build(
        namespaces: &BTreeMap<String, NamespaceConfig>,
        registry: Arc<PluginRegistry>,
    ) -> Result<Self, BuildError> {
        tracing::info!("Building router with {} namespaces", namespaces.len());
        let registrar = Registrar::spawn();
        let pool = Arc::new(BufferPool::default());
        let mut teardown = TeardownChain::new();

        for (name, config) in namespaces {
            let mut builder = NamespaceBuilder::new(name, config, registry.clone(), pool.clone());
            match builder.build(&registrar.handle()).await {
                Ok(chain) => teardown.append(chain),
                Err(err) => {
                    let err = err.in_namespace(name);
                    if let Err(registrar_err) = registrar.finish().await {
                        tracing::warn!("Registrar failed while aborting: {}", registrar_err);
                    }
                    return Err(err.with_teardown(teardown.run().await));
                }
            }
        }

        let mux = match registrar.finish().await {
            Ok(builder) => builder.build(),
            Err(err) => return Err(err.with_teardown(teardown.run().await)),
        };
        tracing::info!("Router ready with {} patterns", mux.len());

        Ok(Self {
            mux: Arc::new(mux),
            teardown: Mutex::new(teardown),
            error_handler: Arc::new(default_error_handler),
        })
    }

    /// Replace the error handler.
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&FailedRequest<'_>, &HandlerError) -> Response<Body> + Send + Sync + 'static,
    {
        self.error_handler = Arc::new(handler);
        self
    }

    pub fn mux(&self) -> &Mux {
        &self.mux
    }

    /// Dispatch one inbound request.
    pub async fn serve(&self, req: Request<Body>, client_addr: Option<SocketAddr>) -> Response<Body> {
        let mut req = req;
        let host = req
            .headers()
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| req.uri().authority().map(|a| a.to_string()));

        // only the path and query of an absolute-form target are honoured
        if req.uri().scheme().is_some() || req.uri().authority().is_some() {
            let origin = req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string());
            match origin.parse::<Uri>() {
                Ok(uri) => *req.uri_mut() = uri,
                Err(_) => return plain(StatusCode::BAD_REQUEST, "400 Bad Request\n"),
            }
        }

        let method = req.method().clone();
        let path = req.uri().path().to_string();

        match self.mux.resolve(&method, host.as_deref(), &path) {
            Resolution::Matched(matched) => {
                let pattern = matched.pattern.clone();
                let namespace = matched.target.namespace.clone();
                let handler = matched.target.handler.clone();
                let accept = req.headers().get(ACCEPT).cloned();
                let context = RequestContext {
                    namespace: Some(namespace.clone()),
                    pattern: Some(pattern.clone()),
                    path_values: matched.path_values,
                    client_addr,
                    host,
                    path_rewritten: false,
                };

                match handler.serve(ProxyRequest::with_context(req, context)).await {
                    Ok(response) => response,
                    Err(err) => {
                        tracing::error!(
                            http.method = %method,
                            http.path = %path,
                            route.pattern = %pattern,
                            route.namespace = %namespace,
                            "Error handling request: {}",
                            err
                        );
                        let failed = FailedRequest {
                            method: &method,
                            path: &path,
                            accept: accept.as_ref(),
                            pattern: &pattern,
                            namespace: &namespace,
                        };
                        (self.error_handler)(&failed, &err)
                    }
                }
            }
            Resolution::Redirect(target) => {
                let location = match req.uri().query() {
                    Some(query) => format!("{target}?{query}"),
                    None => target,
                };
                let mut response = plain(StatusCode::MOVED_PERMANENTLY, "");
                if let Ok(value) = HeaderValue::from_str(&location) {
                    response.headers_mut().insert(LOCATION, value);
                }
                response
            }
            Resolution::MethodNotAllowed(allowed) => {
                let allow = allowed
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut response = plain(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed\n");
                if let Ok(value) = HeaderValue::from_str(&allow) {
                    response.headers_mut().insert(ALLOW, value);
                }
                response
            }
            Resolution::NotFound => plain(StatusCode::NOT_FOUND, "404 page not found\n"),
        }
    }

    /// Tear down every plugin created by the build. Later calls are no-ops.
    pub async fn shutdown(&self) -> Result<(), TeardownError> {
        tracing::info!("Tearing down router");
        self.teardown.lock().await.run().await
    }
}

fn plain(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    if !body.is_empty() {
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
    }
    response
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;
    use crate::ports::problem::HttpError;

    async fn body_text(response: Response<Body>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn failed<'a>(method: &'a Method, accept: Option<&'a HeaderValue>) -> FailedRequest<'a> {
        FailedRequest {
            method,
            path: "/",
            accept,
            pattern: "/",
            namespace: "ns",
        }
    }

    #[tokio::test]
    async fn test_default_error_handler_plain_text() {
        let cases = [
            (
                HandlerError::from(
                    HttpError::new(StatusCode::INTERNAL_SERVER_ERROR).with_detail("internal error"),
                ),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error",
            ),
            (
                HandlerError::from(HttpError::new(StatusCode::INTERNAL_SERVER_ERROR)),
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error",
            ),
            (
                HandlerError::from(HttpError::new(StatusCode::from_u16(666).unwrap())),
                StatusCode::from_u16(666).unwrap(),
                GENERIC_ERROR_MESSAGE,
            ),
            (
                HandlerError::from(HttpError::new(StatusCode::TOO_MANY_REQUESTS)),
                StatusCode::TOO_MANY_REQUESTS,
                "Too Many Requests",
            ),
        ];

        let accept = HeaderValue::from_static("text/plain");
        for (err, status, body) in cases {
            let response = default_error_handler(&failed(&Method::GET, Some(&accept)), &err);
            assert_eq!(response.status(), status);
            assert_eq!(body_text(response).await, body);
        }
    }

    #[tokio::test]
    async fn test_default_error_handler_json() {
        let err = HandlerError::from(
            HttpError::new(StatusCode::from_u16(666).unwrap())
                .with_type_uri("type")
                .with_title("title")
                .with_detail("detail"),
        );
        let accept = HeaderValue::from_static("application/json;q=1.0");
        let response = default_error_handler(&failed(&Method::POST, Some(&accept)), &err);
        assert_eq!(response.status().as_u16(), 666);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(
            body_text(response).await,
            "{\"type\":\"type\",\"title\":\"title\",\"detail\":\"detail\",\"status\":666}\n"
        );
    }

    #[tokio::test]
    async fn test_empty_router() {
        let router = Router::build(&BTreeMap::new(), Arc::new(PluginRegistry::new()))
            .await
            .unwrap();
        assert!(router.mux().is_empty());

        let response = router
            .serve(Request::builder().uri("/").body(Body::empty()).unwrap(), None)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        router.shutdown().await.unwrap();
    }
}
