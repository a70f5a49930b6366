use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::body::Body;
use http::{Request, Response, StatusCode};
use thiserror::Error;

use crate::ports::problem::{BoxError, Problem};

/// Errors raised while executing an upstream round trip.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransportError {
    /// Connecting to or talking with the upstream failed
    #[error("upstream request to {uri} failed: {source}")]
    Connection {
        uri: String,
        #[source]
        source: BoxError,
    },

    /// The upstream did not send response headers in time
    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    /// The outbound request cannot be sent as is
    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),

    /// A transport hook rejected the request
    #[error("transport hook failed: {0}")]
    Hook(#[source] BoxError),
}

impl Problem for TransportError {
    fn status(&self) -> StatusCode {
        match self {
            TransportError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            TransportError::InvalidRequest(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Shared, type-erased transport.
pub type SharedTransport = Arc<dyn Transport>;

/// Transport defines the port used by the proxy to reach upstream servers.
///
/// Transport hooks decorate a `SharedTransport` and return a new one, so implementations
/// must be cheap to share.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send an outbound request and resolve once the response head has arrived.
    async fn round_trip(&self, req: Request<Body>) -> TransportResult<Response<Body>>;
}
