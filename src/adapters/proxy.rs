//! Reverse-proxy terminal handler.
//!
//! [`ProxyCore`] forwards a fully prepared [`ProxyRequest`] through the namespace transport.
//! The upstream scheme and authority must already be on the request URI (set by a host
//! rewrite); the inbound query is always forwarded verbatim.
//!
//! Transport failures are returned as [`HandlerError`]s so the router's error handler picks
//! the final status and body; the proxy never writes an error response itself.
use std::sync::Arc;

use async_trait::async_trait;
use http::{
    HeaderMap, HeaderName, HeaderValue,
    header::{self, HOST},
};

use crate::{
    adapters::buffer_pool::BufferPool,
    ports::{
        handler::{Handler, HandlerResult, ProxyRequest, SharedHandler},
        problem::HandlerError,
        transport::{SharedTransport, TransportError},
    },
};

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Headers that only apply to a single connection.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "upgrade",
];

pub struct ProxyCore {
    transport: SharedTransport,
    pool: Arc<BufferPool>,
}

impl std::fmt::Debug for ProxyCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCore")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl ProxyCore {
    pub fn new(transport: SharedTransport, pool: Arc<BufferPool>) -> Arc<Self> {
        Arc::new(Self { transport, pool })
    }

    /// Terminal handler stripping the mount `prefix` from the raw path before forwarding.
    ///
    /// Drops as many leading raw segments as `prefix` has; the mount may arrive
    /// percent-encoded. Skipped once a modifier has rewritten the path.
    pub fn with_path_trim(self: &Arc<Self>, prefix: impl AsRef<str>) -> SharedHandler {
        Arc::new(TrimmedProxy {
            core: self.clone(),
            segments: prefix
                .as_ref()
                .split('/')
                .filter(|s| !s.is_empty())
                .count(),
        })
    }

    async fn forward(&self, req: ProxyRequest) -> HandlerResult {
        let ProxyRequest {
            mut request,
            context,
        } = req;

        if request.uri().authority().is_none() {
            return Err(TransportError::InvalidRequest(format!(
                "no upstream host for {}",
                request.uri()
            ))
            .into());
        }

        let headers = request.headers_mut();
        remove_hop_by_hop(headers);

        if let Some(addr) = context.client_addr {
            let ip = addr.ip().to_string();
            let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(prior) => format!("{prior}, {ip}"),
                None => ip,
            };
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(X_FORWARDED_FOR.clone(), value);
            }
        }
        let inbound_host = context
            .host
            .as_deref()
            .and_then(|h| HeaderValue::from_str(h).ok())
            .or_else(|| headers.get(HOST).cloned());
        if let Some(host) = inbound_host {
            headers.insert(X_FORWARDED_HOST.clone(), host);
        }
        headers.insert(X_FORWARDED_PROTO.clone(), HeaderValue::from_static("http"));

        let response = self
            .transport
            .round_trip(request)
            .await
            .map_err(HandlerError::from)?;

        let (mut parts, body) = response.into_parts();
        remove_hop_by_hop(&mut parts.headers);
        Ok(http::Response::from_parts(parts, self.pool.wrap(body)))
    }
}

#[async_trait]
impl Handler for ProxyCore {
    async fn serve(&self, req: ProxyRequest) -> HandlerResult {
        self.forward(req).await
    }
}

struct TrimmedProxy {
    core: Arc<ProxyCore>,
    segments: usize,
}

#[async_trait]
impl Handler for TrimmedProxy {
    async fn serve(&self, mut req: ProxyRequest) -> HandlerResult {
        if !req.context.path_rewritten && self.segments > 0 {
            if let Some(rest) = strip_segments(req.raw_path(), self.segments) {
                let rest = rest.to_string();
                req.set_raw_path(&rest).map_err(HandlerError::internal)?;
            }
        }
        self.core.forward(req).await
    }
}

/// `path` without its first `count` segments; `None` when it has fewer.
fn strip_segments(path: &str, count: usize) -> Option<&str> {
    match path.match_indices('/').nth(count) {
        Some((at, _)) => Some(&path[at..]),
        None if path.matches('/').count() == count && !path.ends_with('/') => Some(""),
        None => None,
    }
}

/// Drop hop-by-hop headers, including any named by `Connection`.
fn remove_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }

    // `te: trailers` is the one TE value allowed through
    let keep_te = headers
        .get(header::TE)
        .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"trailers"));
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    if keep_te {
        headers.insert(header::TE, HeaderValue::from_static("trailers"));
    }
    headers.remove(header::TRANSFER_ENCODING);
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use axum::body::Body;
    use http::{Request, Response, StatusCode};
    use http_body_util::BodyExt;

    use super::*;
    use crate::ports::{
        handler::RequestContext,
        transport::{Transport, TransportResult},
    };

    /// Records the outbound request and answers with a canned response.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Option<(String, HeaderMap)>>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn round_trip(&self, req: Request<Body>) -> TransportResult<Response<Body>> {
            *self.seen.lock().unwrap() = Some((req.uri().to_string(), req.headers().clone()));
            if self.fail {
                return Err(TransportError::Connection {
                    uri: req.uri().to_string(),
                    source: "connection refused".into(),
                });
            }
            Ok(Response::builder()
                .header("connection", "close, x-internal")
                .header("x-internal", "secret")
                .header("x-upstream", "yes")
                .body(Body::from("upstream body"))
                .unwrap())
        }
    }

    fn proxy(recorder: Arc<Recorder>) -> Arc<ProxyCore> {
        ProxyCore::new(recorder, Arc::new(BufferPool::default()))
    }

    fn request(uri: &str, context: RequestContext) -> ProxyRequest {
        ProxyRequest::with_context(
            Request::builder()
                .uri(uri)
                .header("host", "gateway.local")
                .header("connection", "keep-alive")
                .header("keep-alive", "timeout=5")
                .header("te", "trailers")
                .body(Body::empty())
                .unwrap(),
            context,
        )
    }

    #[tokio::test]
    async fn test_trim_and_forward() {
        let recorder = Arc::new(Recorder::default());
        let handler = proxy(recorder.clone()).with_path_trim("/users");
        let context = RequestContext {
            client_addr: Some("10.0.0.7:5555".parse().unwrap()),
            ..Default::default()
        };

        let response = handler
            .serve(request("http://backend:8080/users/a%2Fb?x=1&y", context))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-internal").is_none());
        assert!(response.headers().get("connection").is_none());
        assert_eq!(response.headers()["x-upstream"], "yes");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "upstream body");

        let (uri, headers) = recorder.seen.lock().unwrap().take().unwrap();
        assert_eq!(uri, "http://backend:8080/a%2Fb?x=1&y");
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get("connection").is_none());
        assert_eq!(headers["te"], "trailers");
        assert_eq!(headers["x-forwarded-for"], "10.0.0.7");
        assert_eq!(headers["x-forwarded-host"], "gateway.local");
        assert_eq!(headers["x-forwarded-proto"], "http");
    }

    #[tokio::test]
    async fn test_trim_counts_encoded_mount_segments() {
        let recorder = Arc::new(Recorder::default());
        let handler = proxy(recorder.clone()).with_path_trim("/ns");

        handler
            .serve(request("http://backend/n%73/foo", RequestContext::default()))
            .await
            .unwrap();
        let (uri, _) = recorder.seen.lock().unwrap().take().unwrap();
        assert_eq!(uri, "http://backend/foo");

        handler
            .serve(request("http://backend/ns?q=1", RequestContext::default()))
            .await
            .unwrap();
        let (uri, _) = recorder.seen.lock().unwrap().take().unwrap();
        assert_eq!(uri, "http://backend/?q=1");
    }

    #[test]
    fn test_strip_segments() {
        assert_eq!(strip_segments("/a/b/c", 1), Some("/b/c"));
        assert_eq!(strip_segments("/a/b/c", 2), Some("/c"));
        assert_eq!(strip_segments("/a%2Fx/b", 1), Some("/b"));
        assert_eq!(strip_segments("/a/", 1), Some("/"));
        assert_eq!(strip_segments("/a", 1), Some(""));
        assert_eq!(strip_segments("/a", 2), None);
        assert_eq!(strip_segments("/", 1), None);
    }

    #[tokio::test]
    async fn test_rewritten_path_is_not_trimmed() {
        let recorder = Arc::new(Recorder::default());
        let handler = proxy(recorder.clone()).with_path_trim("/users");
        let context = RequestContext {
            path_rewritten: true,
            host: Some("api.example.com".into()),
            ..Default::default()
        };

        handler
            .serve(request("http://backend/users/42", context))
            .await
            .unwrap();
        let (uri, headers) = recorder.seen.lock().unwrap().take().unwrap();
        assert_eq!(uri, "http://backend/users/42");
        assert_eq!(headers["x-forwarded-host"], "api.example.com");
    }

    #[tokio::test]
    async fn test_forwarded_for_is_appended() {
        let recorder = Arc::new(Recorder::default());
        let handler = proxy(recorder.clone()).with_path_trim("");
        let mut req = request(
            "http://backend/",
            RequestContext {
                client_addr: Some("192.0.2.1:1000".parse().unwrap()),
                ..Default::default()
            },
        );
        req.request
            .headers_mut()
            .insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));

        handler.serve(req).await.unwrap();
        let (_, headers) = recorder.seen.lock().unwrap().take().unwrap();
        assert_eq!(headers["x-forwarded-for"], "203.0.113.9, 192.0.2.1");
    }

    #[tokio::test]
    async fn test_missing_upstream_host() {
        let recorder = Arc::new(Recorder::default());
        let handler = proxy(recorder.clone()).with_path_trim("/users");
        let err = handler
            .serve(request("/users/1", RequestContext::default()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(recorder.seen.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transport_error_becomes_bad_gateway() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let err = proxy(recorder)
            .serve(request("http://backend/", RequestContext::default()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.title().as_deref(), Some("Bad Gateway"));
    }
}
