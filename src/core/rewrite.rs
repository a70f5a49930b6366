//! Template based path and host rewriting.
//!
//! A [`PathRewrite`] is compiled once from a static route pattern and a target template:
//! every `{token}` of the target is located among the route's `/`-separated segments and
//! its position is recorded. At request time the raw, still percent-encoded request path is
//! split the same way and the recorded positions are substituted into the template, so the
//! client's encoding (e.g. an escaped `/` inside a wildcard) survives untouched.
//!
//! [`HostRewrite`] independently swaps the upstream scheme and authority.
use axum::body::Body;
use http::{
    HeaderValue, Request, StatusCode, Uri,
    header::HOST,
    uri::{Authority, PathAndQuery, Scheme},
};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::ports::{handler::ProxyRequest, problem::Problem};

static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}]*)\}").expect("valid regex"));

/// Marker matching the end of a path; never captures a segment.
const END_MARKER: &str = "{$}";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RewriteError {
    #[error("path pattern is required")]
    MissingRoutePattern,

    #[error("token {token} of target {target:?} does not appear in route pattern {route:?}")]
    UnknownToken {
        token: String,
        target: String,
        route: String,
    },

    #[error("wildcard {token} must be the last placeholder of target {target:?}")]
    WildcardNotLast { token: String, target: String },

    #[error("invalid target host {url:?}: {reason}")]
    InvalidHost { url: String, reason: String },

    #[error("rewritten path {path:?} contains invalid percent-encoding")]
    InvalidEncoding { path: String },

    #[error("rewritten request is invalid: {0}")]
    InvalidRequest(String),
}

impl Problem for RewriteError {
    fn status(&self) -> StatusCode {
        match self {
            RewriteError::InvalidEncoding { .. } | RewriteError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> Option<String> {
        Some(self.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Capture {
    index: usize,
    token: String,
    wildcard: bool,
}

/// Compiled path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRewrite {
    captures: Vec<Capture>,
    /// Literal text around the placeholders; always one more entry than `captures`.
    pieces: Vec<String>,
}

impl PathRewrite {
    /// Compile `target` against the path of a route pattern.
    ///
    /// `prefix_segments` is the number of path segments the mount adds in front of the
    /// route; a route mounted under `/ns` uses `1`.
    pub fn compile(
        route_path: &str,
        target: &str,
        prefix_segments: usize,
    ) -> Result<Self, RewriteError> {
        if route_path.is_empty() {
            return Err(RewriteError::MissingRoutePattern);
        }

        let route_segments: Vec<&str> = route_path.split('/').collect();
        let mut captures: Vec<Capture> = Vec::new();
        let mut pieces = Vec::new();
        let mut current = String::new();
        let mut last = 0;

        for m in TOKEN_PATTERN.find_iter(target) {
            current.push_str(&target[last..m.start()]);
            last = m.end();

            let token = m.as_str();
            if token == END_MARKER {
                continue;
            }
            if let Some(previous) = captures.last().filter(|c| c.wildcard) {
                return Err(RewriteError::WildcardNotLast {
                    token: previous.token.clone(),
                    target: target.to_string(),
                });
            }

            let index = route_segments
                .iter()
                .position(|segment| *segment == token)
                .ok_or_else(|| RewriteError::UnknownToken {
                    token: token.to_string(),
                    target: target.to_string(),
                    route: route_path.to_string(),
                })?;

            pieces.push(std::mem::take(&mut current));
            captures.push(Capture {
                index: index + prefix_segments,
                token: token.to_string(),
                wildcard: token.ends_with("...}"),
            });
        }
        current.push_str(&target[last..]);
        pieces.push(current);

        Ok(Self { captures, pieces })
    }

    /// The template in `%s` form, as used in logs.
    pub fn format_string(&self) -> String {
        self.pieces.join("%s")
    }

    /// Substitute the captured segments of `raw_path` into the template.
    pub fn rewrite(&self, raw_path: &str) -> String {
        let segments: Vec<&str> = raw_path.split('/').collect();
        let mut out = String::with_capacity(raw_path.len() + self.pieces.len() * 8);

        for (piece, capture) in self.pieces.iter().zip(&self.captures) {
            out.push_str(piece);
            if capture.wildcard {
                if let Some(rest) = segments.get(capture.index..) {
                    out.push_str(&rest.join("/"));
                }
            } else if let Some(segment) = segments.get(capture.index) {
                out.push_str(segment);
            }
        }
        if let Some(tail) = self.pieces.last() {
            out.push_str(tail);
        }

        if let Some(idx) = out.find('?') {
            out.truncate(idx);
        }
        out
    }

    /// Rewrite the request path in place and mark it final.
    pub fn apply(&self, req: &mut ProxyRequest) -> Result<(), RewriteError> {
        let path = self.rewrite(req.raw_path());
        if !is_valid_escaping(&path) {
            return Err(RewriteError::InvalidEncoding { path });
        }
        req.set_raw_path(&path)
            .map_err(|e| RewriteError::InvalidRequest(e.to_string()))?;
        req.context.path_rewritten = true;
        Ok(())
    }
}

/// Every `%` must introduce two hex digits.
fn is_valid_escaping(path: &str) -> bool {
    let bytes = path.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
            if !valid {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}

/// Upstream scheme and authority override.
#[derive(Debug, Clone)]
pub struct HostRewrite {
    scheme: Scheme,
    authority: Authority,
    retain_host_header: bool,
}

impl HostRewrite {
    /// Parse `target` (e.g. `https://backend.internal:8443`).
    pub fn compile(target: &str, retain_host_header: bool) -> Result<Self, RewriteError> {
        let invalid = |reason: String| RewriteError::InvalidHost {
            url: target.to_string(),
            reason,
        };

        let url = Url::parse(target).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
        }
        let host = url
            .host_str()
            .ok_or_else(|| invalid("missing host".to_string()))?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        Ok(Self {
            scheme: Scheme::try_from(url.scheme()).map_err(|e| invalid(e.to_string()))?,
            authority: Authority::try_from(authority.as_str())
                .map_err(|e| invalid(e.to_string()))?,
            retain_host_header,
        })
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn apply(&self, req: &mut Request<Body>) -> Result<(), RewriteError> {
        let mut parts = req.uri().clone().into_parts();
        parts.scheme = Some(self.scheme.clone());
        parts.authority = Some(self.authority.clone());
        if parts.path_and_query.is_none() {
            parts.path_and_query = Some(PathAndQuery::from_static("/"));
        }
        *req.uri_mut() =
            Uri::from_parts(parts).map_err(|e| RewriteError::InvalidRequest(e.to_string()))?;

        if !self.retain_host_header {
            let value = HeaderValue::from_str(self.authority.as_str())
                .map_err(|e| RewriteError::InvalidRequest(e.to_string()))?;
            req.headers_mut().insert(HOST, value);
        }
        Ok(())
    }
}
