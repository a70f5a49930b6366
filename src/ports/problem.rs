//! Error-to-HTTP mapping exposed to handlers and plugins.
//!
//! Any error that travels back through the handler chain is converted into an HTTP
//! response by the router's error handler. Errors opt into richer responses by
//! implementing [`Problem`]:
//! * `status` defaults to `500 Internal Server Error`
//! * `title` falls back to the canonical reason phrase of the status
//! * `detail` and `type_uri` are optional
//!
//! [`HandlerError`] is the type-erased carrier used by [`crate::ports::handler::Handler`].
use std::fmt;

use http::StatusCode;
use thiserror::Error;

/// Boxed error used at plugin and transport seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An error that knows how it should be presented over HTTP.
pub trait Problem: std::error::Error + Send + Sync + 'static {
    fn status(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn title(&self) -> Option<String> {
        None
    }

    fn detail(&self) -> Option<String> {
        None
    }

    fn type_uri(&self) -> Option<String> {
        None
    }
}

/// Type-erased request error returned by handlers.
///
/// Every [`Problem`] converts into a `HandlerError` with `?`. Plain errors that do not
/// implement `Problem` can be wrapped with [`HandlerError::internal`].
pub struct HandlerError {
    inner: Box<dyn Problem>,
}

impl HandlerError {
    /// Wrap an arbitrary error as a 500 response.
    pub fn internal(err: impl Into<BoxError>) -> Self {
        HttpError::new(StatusCode::INTERNAL_SERVER_ERROR)
            .with_source(err)
            .into()
    }

    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    /// Explicit title, or the canonical reason phrase of the status.
    pub fn title(&self) -> Option<String> {
        self.inner
            .title()
            .or_else(|| self.status().canonical_reason().map(str::to_string))
    }

    pub fn detail(&self) -> Option<String> {
        self.inner.detail()
    }

    pub fn type_uri(&self) -> Option<String> {
        self.inner.type_uri()
    }

    /// The wrapped problem.
    pub fn problem(&self) -> &dyn Problem {
        self.inner.as_ref()
    }
}

impl<E: Problem> From<E> for HandlerError {
    fn from(err: E) -> Self {
        Self {
            inner: Box::new(err),
        }
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerError")
            .field("status", &self.status())
            .field("error", &self.inner.to_string())
            .finish()
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

/// A concrete [`Problem`] built field by field.
///
/// ```
/// use http::StatusCode;
/// use rampart::ports::problem::{HandlerError, HttpError};
///
/// let err: HandlerError = HttpError::new(StatusCode::TOO_MANY_REQUESTS)
///     .with_detail("slow down")
///     .into();
/// assert_eq!(err.title().as_deref(), Some("Too Many Requests"));
/// ```
#[derive(Error, Debug)]
#[error(
    "{} {}{}",
    .status.as_u16(),
    display_title(.title, .status),
    display_tail(.detail, .source)
)]
pub struct HttpError {
    status: StatusCode,
    title: Option<String>,
    detail: Option<String>,
    type_uri: Option<String>,
    #[source]
    source: Option<BoxError>,
}

impl HttpError {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            title: None,
            detail: None,
            type_uri: None,
            source: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_type_uri(mut self, type_uri: impl Into<String>) -> Self {
        self.type_uri = Some(type_uri.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}

fn display_title<'a>(title: &'a Option<String>, status: &StatusCode) -> &'a str {
    title
        .as_deref()
        .or_else(|| status.canonical_reason())
        .unwrap_or("error")
}

fn display_tail(detail: &Option<String>, source: &Option<BoxError>) -> String {
    let mut tail = String::new();
    if let Some(detail) = detail {
        tail.push_str(": ");
        tail.push_str(detail);
    }
    if let Some(source) = source {
        tail.push_str(&format!(": {source}"));
    }
    tail
}

impl Problem for HttpError {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn title(&self) -> Option<String> {
        self.title.clone()
    }

    fn detail(&self) -> Option<String> {
        self.detail.clone()
    }

    fn type_uri(&self) -> Option<String> {
        self.type_uri.clone()
    }
}
