pub mod buffer_pool;
pub mod http_handler;
pub mod proxy;
pub mod transport;

/// Re-export commonly used types from adapters
pub use buffer_pool::BufferPool;
pub use http_handler::HttpHandler;
pub use proxy::ProxyCore;
pub use transport::HyperTransport;
