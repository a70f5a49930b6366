//! Pattern decomposition and merging.
//!
//! Route strings have the shape `[METHOD ][HOST]/path`. A namespace mount is merged with a
//! route pattern to obtain the pattern registered with the multiplexer:
//! * method and host are taken from whichever side declares them
//! * declaring different values on both sides is an impossible route
//! * the mount path is prefixed to the route path
use std::fmt;

use thiserror::Error;

/// Reasons a mount and a route pattern cannot be combined.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PatternError {
    #[error("method mismatch (mount != route): {mount:?} != {route:?}")]
    MethodMismatch { mount: String, route: String },

    #[error("host mismatch (mount != route): {mount:?} != {route:?}")]
    HostMismatch { mount: String, route: String },

    #[error("mount {0:?} contains path variables")]
    MountVariables(String),
}

/// A decomposed `(method, host, path)` triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Pattern {
    pub method: Option<String>,
    pub host: Option<String>,
    pub path: String,
}

impl Pattern {
    /// Split `s` into method, host and path.
    ///
    /// Without any `/` the remainder is taken as a bare host with an empty path, which lets a
    /// mount select a virtual host.
    pub fn decompose(s: &str) -> Self {
        let s = s.replace('\t', " ");
        let s = s.trim_start();

        let (method, rest) = match s.split_once(' ') {
            Some((method, rest)) => (Some(method.to_string()), rest.trim_start()),
            None => (None, s),
        };

        let (host, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };

        Self {
            method,
            host: (!host.is_empty()).then(|| host.to_string()),
            path: path.to_string(),
        }
    }

    /// Merge a namespace mount with a route pattern.
    pub fn merge(mount: &str, route: &str) -> Result<Self, PatternError> {
        if mount.contains('{') {
            return Err(PatternError::MountVariables(mount.to_string()));
        }

        let ns = Self::decompose(mount);
        let rt = Self::decompose(route);

        let method = pick(ns.method, rt.method, |mount, route| {
            PatternError::MethodMismatch { mount, route }
        })?;
        let host = pick(ns.host, rt.host, |mount, route| PatternError::HostMismatch {
            mount,
            route,
        })?;

        let ns_path = if rt.path.starts_with('/') {
            ns.path.trim_end_matches('/')
        } else {
            ns.path.as_str()
        };

        Ok(Self {
            method,
            host,
            path: format!("{ns_path}{}", rt.path),
        })
    }

    /// Number of path segments contributed by this pattern when used as a mount.
    pub fn segment_count(&self) -> usize {
        self.path.split('/').filter(|s| !s.is_empty()).count()
    }
}

fn pick(
    mount: Option<String>,
    route: Option<String>,
    mismatch: impl FnOnce(String, String) -> PatternError,
) -> Result<Option<String>, PatternError> {
    match (mount, route) {
        (Some(m), Some(r)) if m != r => Err(mismatch(m, r)),
        (Some(m), _) => Ok(Some(m)),
        (None, r) => Ok(r),
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(method) = &self.method {
            write!(f, "{method} ")?;
        }
        if let Some(host) = &self.host {
            f.write_str(host)?;
        }
        f.write_str(&self.path)
    }
}

/// One pattern per method, or the pattern itself when no methods are declared.
pub fn generate_patterns<M: AsRef<str>>(pattern: &str, methods: &[M]) -> Vec<String> {
    if methods.is_empty() {
        return vec![pattern.to_string()];
    }
    methods
        .iter()
        .map(|m| format!("{} {pattern}", m.as_ref()))
        .collect()
}

/// An empty route under a host-only mount would register a pathless pattern.
pub fn should_skip(pattern: &str, mount: &str) -> bool {
    pattern.is_empty() && !mount.contains('/')
}
