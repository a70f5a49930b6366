//! The pipeline's unit of composition.
//!
//! A [`Handler`] receives a [`ProxyRequest`] and either produces a response or returns a
//! [`HandlerError`]; it never writes error responses itself. Per-request routing state
//! travels in the typed [`RequestContext`] carried next to the HTTP request.
use std::{borrow::Cow, future::Future, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use axum::body::Body;
use http::{Request, Response, Uri, uri::PathAndQuery};

use crate::ports::problem::HandlerError;

/// Result of serving one request.
pub type HandlerResult = Result<Response<Body>, HandlerError>;

/// Shared, type-erased handler.
pub type SharedHandler = Arc<dyn Handler>;

/// Request-scoped routing state.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Namespace owning the matched route.
    pub namespace: Option<Arc<str>>,
    /// Multiplexer pattern that matched the request.
    pub pattern: Option<Arc<str>>,
    /// Values captured by `{name}` and `{name...}` segments, in pattern order.
    pub path_values: Vec<(String, String)>,
    /// Peer address of the inbound connection, when known.
    pub client_addr: Option<SocketAddr>,
    /// Host the client addressed, before any rewrite.
    pub host: Option<String>,
    /// Set once a modifier has produced the final upstream path.
    pub path_rewritten: bool,
}

impl RequestContext {
    /// Value captured for the named wildcard.
    pub fn path_value(&self, name: &str) -> Option<&str> {
        self.path_values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// An inbound request plus its routing context.
pub struct ProxyRequest {
    pub request: Request<Body>,
    pub context: RequestContext,
}

impl std::fmt::Debug for ProxyRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyRequest")
            .field("method", self.request.method())
            .field("uri", self.request.uri())
            .field("context", &self.context)
            .finish()
    }
}

impl ProxyRequest {
    pub fn new(request: Request<Body>) -> Self {
        Self {
            request,
            context: RequestContext::default(),
        }
    }

    pub fn with_context(request: Request<Body>, context: RequestContext) -> Self {
        Self { request, context }
    }

    /// The raw, still percent-encoded path.
    pub fn raw_path(&self) -> &str {
        self.request.uri().path()
    }

    /// The percent-decoded path.
    pub fn decoded_path(&self) -> Result<Cow<'_, str>, std::string::FromUtf8Error> {
        urlencoding::decode(self.raw_path())
    }

    /// Replace the raw path while keeping scheme, authority and query untouched.
    pub fn set_raw_path(&mut self, path: &str) -> Result<(), http::Error> {
        let uri = replace_path(self.request.uri(), path)?;
        *self.request.uri_mut() = uri;
        Ok(())
    }
}

/// Build a copy of `uri` whose path is `path`; the original query is carried over verbatim.
pub(crate) fn replace_path(uri: &Uri, path: &str) -> Result<Uri, http::Error> {
    let path = if path.is_empty() { "/" } else { path };
    let path_and_query = match uri.query() {
        Some(query) => PathAndQuery::try_from(format!("{path}?{query}"))?,
        None => PathAndQuery::try_from(path)?,
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    Ok(Uri::from_parts(parts)?)
}

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn serve(&self, req: ProxyRequest) -> HandlerResult;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct HandlerFn<F>(F);

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(ProxyRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn serve(&self, req: ProxyRequest) -> HandlerResult {
        (self.0)(req).await
    }
}

/// Wrap an async closure as a shared handler.
pub fn handler_fn<F, Fut>(f: F) -> SharedHandler
where
    F: Fn(ProxyRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(HandlerFn(f))
}
