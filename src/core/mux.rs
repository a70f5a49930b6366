//! Request multiplexer.
//!
//! Patterns have the form `[METHOD ][HOST]/path` where path segments are either literals,
//! `{name}` (one non-empty segment), or a final `{name...}` (the remainder, possibly empty).
//! A trailing `/` matches the whole subtree while a trailing `{$}` matches only the path
//! ending in `/`.
//!
//! Matching rules:
//! - patterns naming a host win over host-less ones
//! - among matching patterns the most specific path wins (literal beats `{name}` beats
//!   `{name...}` and subtrees), then a method-specific pattern beats a method-less one
//! - `GET` patterns also serve `HEAD`
//! - a path matching only under a different method yields `405` with the allowed methods
//! - a request for `/dir` redirects to `/dir/` when only the subtree pattern would match
//!
//! Registration validates every pattern up front and rejects duplicates as well as overlapping
//! patterns where neither is more specific; it never panics.
//! [`MuxBuilder::build`] freezes the routes into an immutable [`Mux`] that is shared across
//! request tasks.
use std::{borrow::Cow, collections::HashMap, fmt, sync::Arc};

use http::Method;

use crate::{
    core::{error::BuildError, pattern::Pattern},
    ports::handler::SharedHandler,
};

/// Where a registered pattern dispatches to.
#[derive(Clone)]
pub struct RouteTarget {
    pub namespace: Arc<str>,
    pub handler: SharedHandler,
}

impl fmt::Debug for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTarget")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Rest(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathEnd {
    /// No more segments.
    Exact,
    /// Exactly one more, empty, segment (`{$}`).
    ExactSlash,
    /// At least one more segment (trailing `/`).
    Subtree,
}

/// A syntactically valid multiplexer pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPattern {
    method: Option<Method>,
    host: Option<String>,
    segments: Vec<Segment>,
    end: PathEnd,
}

impl ParsedPattern {
    /// Validate and parse a pattern string.
    pub fn parse(pattern: &str) -> Result<Self, String> {
        let Pattern { method, host, path } = Pattern::decompose(pattern);

        let method = method
            .map(|m| Method::from_bytes(m.as_bytes()).map_err(|_| format!("invalid method {m:?}")))
            .transpose()?;
        if host
            .as_deref()
            .is_some_and(|h| h.contains(|c: char| c.is_whitespace() || c == '{' || c == '}'))
        {
            return Err("invalid host".to_string());
        }

        let Some(body) = path.strip_prefix('/') else {
            return Err("path must begin with '/'".to_string());
        };

        let mut segments = Vec::new();
        let mut end = PathEnd::Exact;
        let mut names: Vec<&str> = Vec::new();

        if body.is_empty() {
            end = PathEnd::Subtree;
        } else {
            let parts: Vec<&str> = body.split('/').collect();
            let last = parts.len() - 1;
            for (i, part) in parts.iter().enumerate() {
                if part.is_empty() {
                    if i != last {
                        return Err("empty path segment".to_string());
                    }
                    end = PathEnd::Subtree;
                    continue;
                }

                let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) else {
                    if part.contains(['{', '}']) {
                        return Err(format!(
                            "wildcard {part:?} must occupy a whole segment"
                        ));
                    }
                    segments.push(Segment::Literal(decode(part).into_owned()));
                    continue;
                };

                if inner == "$" {
                    if i != last {
                        return Err("{$} must be the last segment".to_string());
                    }
                    end = PathEnd::ExactSlash;
                    continue;
                }

                let (name, rest) = match inner.strip_suffix("...") {
                    Some(name) => (name, true),
                    None => (inner, false),
                };
                if !is_valid_name(name) {
                    return Err(format!("invalid wildcard name {name:?}"));
                }
                if names.contains(&name) {
                    return Err(format!("duplicate wildcard name {name:?}"));
                }
                names.push(name);

                if rest {
                    if i != last {
                        return Err(format!("{{{name}...}} must be the last segment"));
                    }
                    segments.push(Segment::Rest(name.to_string()));
                } else {
                    segments.push(Segment::Param(name.to_string()));
                }
            }
        }

        Ok(Self {
            method,
            host: host.map(|h| h.to_ascii_lowercase()),
            segments,
            end,
        })
    }

    /// Specificity, compared lexicographically; larger is more specific.
    fn rank(&self) -> Vec<u8> {
        let mut rank: Vec<u8> = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Literal(_) => 3,
                Segment::Param(_) => 2,
                Segment::Rest(_) => 1,
            })
            .collect();
        match self.end {
            PathEnd::Exact => {}
            PathEnd::ExactSlash => rank.push(3),
            PathEnd::Subtree => rank.push(1),
        }
        rank
    }

    /// Per-segment constraints; `open` when any number of further segments may follow.
    fn slots(&self) -> (Vec<Slot<'_>>, bool) {
        let mut slots = Vec::with_capacity(self.segments.len() + 1);
        let mut open = false;
        for segment in &self.segments {
            match segment {
                Segment::Literal(lit) => slots.push(Slot::Literal(lit.as_str())),
                Segment::Param(_) => slots.push(Slot::NonEmpty),
                Segment::Rest(_) => {
                    slots.push(Slot::Any);
                    open = true;
                }
            }
        }
        match self.end {
            PathEnd::Exact => {}
            PathEnd::ExactSlash => slots.push(Slot::Empty),
            PathEnd::Subtree => {
                slots.push(Slot::Any);
                open = true;
            }
        }
        (slots, open)
    }

    /// How the requests matched by `self` relate to those matched by `other`.
    ///
    /// Patterns for different hosts never compete: a host pattern always wins over a
    /// host-less one and distinct hosts see distinct requests.
    fn relation(&self, other: &ParsedPattern) -> Relation {
        if self.host != other.host {
            return Relation::Disjoint;
        }
        method_relation(self.method.as_ref(), other.method.as_ref())
            .combine(path_relation(&self.slots(), &other.slots()))
    }
}

/// What a single path segment may be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot<'a> {
    Literal(&'a str),
    /// `{name}`
    NonEmpty,
    /// The empty segment after a `{$}` slash.
    Empty,
    /// Anything, including nothing.
    Any,
}

impl Slot<'_> {
    fn intersects(self, other: Slot<'_>) -> bool {
        match (self, other) {
            (Slot::Any, _) | (_, Slot::Any) => true,
            (Slot::Literal(a), Slot::Literal(b)) => a == b,
            (Slot::Literal(_), Slot::NonEmpty) | (Slot::NonEmpty, Slot::Literal(_)) => true,
            (Slot::NonEmpty, Slot::NonEmpty) | (Slot::Empty, Slot::Empty) => true,
            (Slot::Empty, _) | (_, Slot::Empty) => false,
        }
    }

    fn within(self, other: Slot<'_>) -> bool {
        match (self, other) {
            (_, Slot::Any) => true,
            (Slot::Literal(a), Slot::Literal(b)) => a == b,
            (Slot::Literal(_), Slot::NonEmpty) | (Slot::NonEmpty, Slot::NonEmpty) => true,
            (Slot::Empty, Slot::Empty) => true,
            _ => false,
        }
    }
}

/// Relationship between the request sets of two patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    /// No request matches both.
    Disjoint,
    /// Exactly the same requests match both.
    Equivalent,
    /// The first matches a strict subset of the second.
    MoreSpecific,
    /// The first matches a strict superset of the second.
    MoreGeneral,
    /// Some requests match both but neither contains the other.
    Overlaps,
}

impl Relation {
    fn combine(self, other: Relation) -> Relation {
        match (self, other) {
            (Relation::Disjoint, _) | (_, Relation::Disjoint) => Relation::Disjoint,
            (Relation::Equivalent, r) | (r, Relation::Equivalent) => r,
            (a, b) if a == b => a,
            _ => Relation::Overlaps,
        }
    }

    /// Whether two patterns with this relation cannot both be registered.
    fn conflicts(self) -> bool {
        matches!(self, Relation::Equivalent | Relation::Overlaps)
    }
}

fn method_relation(a: Option<&Method>, b: Option<&Method>) -> Relation {
    match (a, b) {
        (None, None) => Relation::Equivalent,
        (Some(_), None) => Relation::MoreSpecific,
        (None, Some(_)) => Relation::MoreGeneral,
        (Some(a), Some(b)) if a == b => Relation::Equivalent,
        // GET also serves HEAD
        (Some(a), Some(b)) if *a == Method::HEAD && *b == Method::GET => Relation::MoreSpecific,
        (Some(a), Some(b)) if *a == Method::GET && *b == Method::HEAD => Relation::MoreGeneral,
        _ => Relation::Disjoint,
    }
}

fn path_relation(a: &(Vec<Slot<'_>>, bool), b: &(Vec<Slot<'_>>, bool)) -> Relation {
    if !paths_intersect(a, b) {
        return Relation::Disjoint;
    }
    match (path_within(a, b), path_within(b, a)) {
        (true, true) => Relation::Equivalent,
        (true, false) => Relation::MoreSpecific,
        (false, true) => Relation::MoreGeneral,
        (false, false) => Relation::Overlaps,
    }
}

/// The slot at `i`, or [`Slot::Any`] past the end of an open pattern.
fn slot_at<'a>((slots, _): &(Vec<Slot<'a>>, bool), i: usize) -> Slot<'a> {
    slots.get(i).copied().unwrap_or(Slot::Any)
}

fn paths_intersect(a: &(Vec<Slot<'_>>, bool), b: &(Vec<Slot<'_>>, bool)) -> bool {
    let (na, open_a) = (a.0.len(), a.1);
    let (nb, open_b) = (b.0.len(), b.1);
    let lengths = match (open_a, open_b) {
        (false, false) => na == nb,
        (false, true) => na >= nb,
        (true, false) => nb >= na,
        (true, true) => true,
    };
    lengths && (0..na.max(nb)).all(|i| slot_at(a, i).intersects(slot_at(b, i)))
}

/// Whether every path matched by `a` is also matched by `b`.
fn path_within(a: &(Vec<Slot<'_>>, bool), b: &(Vec<Slot<'_>>, bool)) -> bool {
    let (na, open_a) = (a.0.len(), a.1);
    let (nb, open_b) = (b.0.len(), b.1);
    let lengths = match (open_a, open_b) {
        (false, false) => na == nb,
        (_, true) => na >= nb,
        (true, false) => false,
    };
    lengths && (0..na.max(nb)).all(|i| slot_at(a, i).within(slot_at(b, i)))
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

fn decode(segment: &str) -> Cow<'_, str> {
    urlencoding::decode(segment).unwrap_or(Cow::Borrowed(segment))
}

struct CompiledRoute {
    pattern: Arc<str>,
    parsed: ParsedPattern,
    rank: Vec<u8>,
    target: RouteTarget,
}

impl CompiledRoute {
    fn match_path(&self, segs: &[&str]) -> Option<Vec<(String, String)>> {
        let mut values = Vec::new();
        for (i, segment) in self.parsed.segments.iter().enumerate() {
            match segment {
                Segment::Literal(lit) => {
                    if decode(segs.get(i)?) != lit.as_str() {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let s = segs.get(i)?;
                    if s.is_empty() {
                        return None;
                    }
                    values.push((name.clone(), decode(s).into_owned()));
                }
                Segment::Rest(name) => {
                    let rest = segs.get(i..).filter(|rest| !rest.is_empty())?;
                    values.push((name.clone(), decode(&rest.join("/")).into_owned()));
                    return Some(values);
                }
            }
        }

        let k = self.parsed.segments.len();
        let matched = match self.parsed.end {
            PathEnd::Exact => segs.len() == k,
            PathEnd::ExactSlash => segs.len() == k + 1 && segs[k].is_empty(),
            PathEnd::Subtree => segs.len() > k,
        };
        matched.then_some(values)
    }

    /// Whether `path` matched only through the trailing slash of a subtree pattern.
    fn is_subtree_root(&self, path: &str) -> bool {
        let segments = &self.parsed.segments;
        let fixed = segments
            .iter()
            .filter(|s| !matches!(s, Segment::Rest(_)))
            .count();
        let subtree = self.parsed.end == PathEnd::Subtree
            || matches!(segments.last(), Some(Segment::Rest(_)));
        let depth = path.strip_prefix('/').unwrap_or(path).split('/').count();
        subtree && depth == fixed + 1
    }

    /// How well the route's method fits; `None` when it does not apply.
    fn method_score(&self, method: &Method) -> Option<u8> {
        match &self.parsed.method {
            None => Some(0),
            Some(m) if m == method => Some(2),
            Some(m) if *m == Method::GET && *method == Method::HEAD => Some(1),
            Some(_) => None,
        }
    }
}

/// Mutable route table used while building.
#[derive(Default)]
pub struct MuxBuilder {
    routes: Vec<CompiledRoute>,
}

impl MuxBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `pattern` and register it.
    ///
    /// A pattern conflicts with a registered one when some request matches both and neither
    /// is strictly more specific than the other.
    pub fn handle(&mut self, pattern: &str, target: RouteTarget) -> Result<(), BuildError> {
        let parsed = ParsedPattern::parse(pattern).map_err(|reason| BuildError::InvalidPattern {
            pattern: pattern.to_string(),
            reason,
        })?;
        if let Some(existing) = self
            .routes
            .iter()
            .find(|r| parsed.relation(&r.parsed).conflicts())
        {
            return Err(BuildError::PatternConflict {
                pattern: pattern.to_string(),
                existing: existing.pattern.to_string(),
            });
        }

        tracing::debug!("Registered pattern {} for namespace {}", pattern, target.namespace);
        self.routes.push(CompiledRoute {
            pattern: Arc::from(pattern),
            rank: parsed.rank(),
            parsed,
            target,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Freeze the table.
    pub fn build(self) -> Mux {
        let mut hosts: HashMap<String, Vec<CompiledRoute>> = HashMap::new();
        let mut any_host = Vec::new();
        for route in self.routes {
            match route.parsed.host.clone() {
                Some(host) => hosts.entry(host).or_default().push(route),
                None => any_host.push(route),
            }
        }
        Mux { hosts, any_host }
    }
}

/// Outcome of resolving a request.
pub enum Resolution<'a> {
    Matched(Matched<'a>),
    /// Redirect to the given path (a trailing slash was added).
    Redirect(String),
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

pub struct Matched<'a> {
    pub pattern: &'a Arc<str>,
    pub target: &'a RouteTarget,
    pub path_values: Vec<(String, String)>,
    route: &'a CompiledRoute,
}

/// Immutable route table.
pub struct Mux {
    hosts: HashMap<String, Vec<CompiledRoute>>,
    any_host: Vec<CompiledRoute>,
}

impl Mux {
    /// Resolve a request by method, `Host` (port allowed) and raw path.
    pub fn resolve(&self, method: &Method, host: Option<&str>, path: &str) -> Resolution<'_> {
        let host = host.map(normalize_host);
        let mut allowed = Vec::new();

        if let Some(matched) = self.find(method, host.as_deref(), path, &mut allowed) {
            return Resolution::Matched(matched);
        }

        if !path.ends_with('/') {
            let with_slash = format!("{path}/");
            let mut ignored = Vec::new();
            let redirect = self
                .find(method, host.as_deref(), &with_slash, &mut ignored)
                .is_some_and(|matched| matched.route.is_subtree_root(&with_slash));
            if redirect {
                return Resolution::Redirect(with_slash);
            }
        }

        if !allowed.is_empty() {
            if allowed.contains(&Method::GET) {
                allowed.push(Method::HEAD);
            }
            allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
            allowed.dedup();
            return Resolution::MethodNotAllowed(allowed);
        }
        Resolution::NotFound
    }

    fn find<'a>(
        &'a self,
        method: &Method,
        host: Option<&str>,
        path: &str,
        allowed: &mut Vec<Method>,
    ) -> Option<Matched<'a>> {
        let segs: Vec<&str> = path.strip_prefix('/').unwrap_or(path).split('/').collect();

        if let Some(routes) = host.and_then(|h| self.hosts.get(h)) {
            if let Some(matched) = best_match(routes, method, &segs, allowed) {
                return Some(matched);
            }
        }
        best_match(&self.any_host, method, &segs, allowed)
    }

    /// Every registered pattern.
    pub fn patterns(&self) -> Vec<&str> {
        self.hosts
            .values()
            .flatten()
            .chain(&self.any_host)
            .map(|r| r.pattern.as_ref())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.any_host.len() + self.hosts.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn best_match<'a>(
    routes: &'a [CompiledRoute],
    method: &Method,
    segs: &[&str],
    allowed: &mut Vec<Method>,
) -> Option<Matched<'a>> {
    let mut best: Option<(&CompiledRoute, u8, Vec<(String, String)>)> = None;

    for route in routes {
        let Some(values) = route.match_path(segs) else {
            continue;
        };
        let Some(score) = route.method_score(method) else {
            if let Some(m) = &route.parsed.method {
                allowed.push(m.clone());
            }
            continue;
        };
        let better = best.as_ref().is_none_or(|(current, current_score, _)| {
            (route.rank.as_slice(), score) > (current.rank.as_slice(), *current_score)
        });
        if better {
            best = Some((route, score, values));
        }
    }

    best.map(|(route, _, path_values)| Matched {
        pattern: &route.pattern,
        target: &route.target,
        path_values,
        route,
    })
}

/// Lowercase and drop any port.
fn normalize_host(host: &str) -> String {
    let host = if host.starts_with('[') {
        host.find(']').map_or(host, |end| &host[..=end])
    } else {
        host.split_once(':').map_or(host, |(name, _)| name)
    };
    host.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use http::Response;

    use super::*;
    use crate::ports::handler::{ProxyRequest, handler_fn};

    fn target(namespace: &str) -> RouteTarget {
        RouteTarget {
            namespace: Arc::from(namespace),
            handler: handler_fn(|_req: ProxyRequest| async { Ok(Response::new(Body::empty())) }),
        }
    }

    fn mux(patterns: &[&str]) -> Mux {
        let mut builder = MuxBuilder::new();
        for pattern in patterns {
            builder.handle(pattern, target(pattern)).unwrap();
        }
        builder.build()
    }

    fn matched(mux: &Mux, method: Method, host: Option<&str>, path: &str) -> Option<String> {
        match mux.resolve(&method, host, path) {
            Resolution::Matched(m) => Some(m.pattern.to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_parse_rejects_invalid_patterns() {
        for bad in [
            "",
            "example.com",
            "/a//b",
            "/{x...}/b",
            "/{$}/b",
            "/a{b}",
            "/{}",
            "/{x}/{x}",
            "BAD METHOD /x",
        ] {
            assert!(ParsedPattern::parse(bad).is_err(), "{bad:?} should be invalid");
        }
        for good in ["/", "/{$}", "GET /a/{id}", "example.com/", "/files/{path...}"] {
            assert!(ParsedPattern::parse(good).is_ok(), "{good:?} should be valid");
        }
    }

    #[test]
    fn test_most_specific_wins() {
        let mux = mux(&["/", "/users/", "/users/{id}", "/users/me", "/users/{id}/{rest...}"]);
        let get = |p| matched(&mux, Method::GET, None, p);
        assert_eq!(get("/users/me").as_deref(), Some("/users/me"));
        assert_eq!(get("/users/42").as_deref(), Some("/users/{id}"));
        assert_eq!(get("/users/42/posts/1").as_deref(), Some("/users/{id}/{rest...}"));
        assert_eq!(get("/users/").as_deref(), Some("/users/"));
        assert_eq!(get("/other").as_deref(), Some("/"));
    }

    #[test]
    fn test_path_values() {
        let mux = mux(&["/users/{id}/files/{path...}"]);
        let Resolution::Matched(m) = mux.resolve(&Method::GET, None, "/users/a%20b/files/x/y%2Fz")
        else {
            panic!("expected a match");
        };
        assert_eq!(
            m.path_values,
            vec![
                ("id".to_string(), "a b".to_string()),
                ("path".to_string(), "x/y/z".to_string())
            ]
        );
        assert_eq!(&*m.target.namespace, "/users/{id}/files/{path...}");
    }

    #[test]
    fn test_end_marker() {
        let mux = mux(&["/{$}", "/a/{$}", "/a/"]);
        assert_eq!(matched(&mux, Method::GET, None, "/").as_deref(), Some("/{$}"));
        assert_eq!(matched(&mux, Method::GET, None, "/a/").as_deref(), Some("/a/{$}"));
        assert_eq!(matched(&mux, Method::GET, None, "/a/b").as_deref(), Some("/a/"));
        assert!(matched(&mux, Method::GET, None, "/b").is_none());
    }

    #[test]
    fn test_host_patterns_take_precedence() {
        let mux = mux(&["/api/", "api.example.com/api/"]);
        assert_eq!(
            matched(&mux, Method::GET, Some("API.example.com:8443"), "/api/x").as_deref(),
            Some("api.example.com/api/")
        );
        assert_eq!(
            matched(&mux, Method::GET, Some("other.example.com"), "/api/x").as_deref(),
            Some("/api/")
        );
        assert_eq!(
            matched(&mux, Method::GET, None, "/api/x").as_deref(),
            Some("/api/")
        );
    }

    #[test]
    fn test_methods() {
        let mux = mux(&["GET /items", "POST /items", "/any"]);
        assert_eq!(
            matched(&mux, Method::HEAD, None, "/items").as_deref(),
            Some("GET /items")
        );
        assert_eq!(
            matched(&mux, Method::POST, None, "/items").as_deref(),
            Some("POST /items")
        );
        assert_eq!(
            matched(&mux, Method::DELETE, None, "/any").as_deref(),
            Some("/any")
        );
        match mux.resolve(&Method::DELETE, None, "/items") {
            Resolution::MethodNotAllowed(allowed) => {
                assert_eq!(allowed, vec![Method::GET, Method::HEAD, Method::POST]);
            }
            _ => panic!("expected 405"),
        }
    }

    #[test]
    fn test_method_specific_beats_any_on_same_path() {
        let mux = mux(&["/items", "GET /items"]);
        assert_eq!(
            matched(&mux, Method::GET, None, "/items").as_deref(),
            Some("GET /items")
        );
        assert_eq!(
            matched(&mux, Method::PUT, None, "/items").as_deref(),
            Some("/items")
        );
    }

    #[test]
    fn test_trailing_slash_redirect() {
        let mux = mux(&["/docs/"]);
        match mux.resolve(&Method::GET, None, "/docs") {
            Resolution::Redirect(location) => assert_eq!(location, "/docs/"),
            _ => panic!("expected redirect"),
        }
        assert!(matches!(
            mux.resolve(&Method::GET, None, "/nothing"),
            Resolution::NotFound
        ));
    }

    #[test]
    fn test_conflicts_are_errors() {
        let mut builder = MuxBuilder::new();
        builder.handle("/a/{id}", target("x")).unwrap();
        let err = builder.handle("/a/{name}", target("y")).unwrap_err();
        assert!(matches!(err, BuildError::PatternConflict { existing, .. } if existing == "/a/{id}"));

        builder.handle("/b/", target("x")).unwrap();
        assert!(builder.handle("/b/{rest...}", target("y")).is_err());

        builder.handle("GET /a/{id}", target("z")).unwrap();
        assert!(matches!(
            builder.handle("/a/{oops", target("z")),
            Err(BuildError::InvalidPattern { .. })
        ));
        assert_eq!(builder.len(), 3);
        assert_eq!(builder.build().len(), 3);
    }

    #[test]
    fn test_overlapping_wildcards_conflict() {
        let mut builder = MuxBuilder::new();
        builder.handle("/a/{x}", target("ns1")).unwrap();
        let err = builder.handle("/{y}/b", target("ns2")).unwrap_err();
        assert!(matches!(err, BuildError::PatternConflict { existing, .. } if existing == "/a/{x}"));

        // a method-specific pattern cannot be less specific on the path
        builder.handle("/c/d", target("ns1")).unwrap();
        assert!(builder.handle("GET /c/{x}", target("ns2")).is_err());

        // a subtree and a closed pattern under it are ordered
        assert!(builder.handle("/c/", target("ns2")).is_ok());
        assert!(builder.handle("/c/{$}", target("ns2")).is_ok());
        assert!(builder.handle("/e/{rest...}", target("ns2")).is_ok());
        assert!(builder.handle("/{x}/f/", target("ns2")).is_err());
        assert_eq!(builder.len(), 5);
    }

    #[test]
    fn test_non_overlapping_patterns_coexist() {
        let mut builder = MuxBuilder::new();
        for pattern in [
            "/a/{x}",
            "/a/b",
            "/{y}/c/d",
            "GET /items",
            "HEAD /items",
            "POST /items",
            "/items/{id}",
            "example.com/{y}/b",
            "/{$}",
            "/a/b/{rest...}",
        ] {
            builder.handle(pattern, target(pattern)).unwrap();
        }
        assert_eq!(builder.len(), 10);
    }

    #[test]
    fn test_redirect_for_wildcard_subtree() {
        let mux = mux(&["/users/{id}/", "/files/{path...}"]);
        match mux.resolve(&Method::GET, None, "/users/42") {
            Resolution::Redirect(location) => assert_eq!(location, "/users/42/"),
            _ => panic!("expected redirect"),
        }
        match mux.resolve(&Method::GET, None, "/files") {
            Resolution::Redirect(location) => assert_eq!(location, "/files/"),
            _ => panic!("expected redirect"),
        }
        assert_eq!(
            matched(&mux, Method::GET, None, "/users/42/x").as_deref(),
            Some("/users/{id}/")
        );
        assert!(matches!(
            mux.resolve(&Method::GET, None, "/users"),
            Resolution::NotFound
        ));
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("Example.COM:80"), "example.com");
        assert_eq!(normalize_host("[::1]:8080"), "[::1]");
        assert_eq!(normalize_host("plain"), "plain");
    }
}
