//! Reusable copy buffers for proxied response bodies.
//!
//! [`BufferPool`] keeps a bounded free list of [`BytesMut`] buffers. [`PooledBody`] streams an
//! upstream body to the client frame by frame, copying each data frame through a pooled buffer
//! in chunks of at most the buffer size. Trailers are forwarded untouched. The buffer goes
//! back to the pool when the body is dropped.
use std::{
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll, ready},
};

use axum::body::Body;
use bytes::{Buf, Bytes, BytesMut};
use hyper::body::{Body as HttpBody, Frame, SizeHint};

/// Size of every pooled buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Idle buffers kept around before extra ones are released.
const DEFAULT_MAX_IDLE: usize = 256;

/// Mutex-guarded free list of equally sized buffers.
#[derive(Debug)]
pub struct BufferPool {
    buffer_size: usize,
    max_idle: usize,
    free: Mutex<Vec<BytesMut>>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl BufferPool {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            max_idle: DEFAULT_MAX_IDLE,
            free: Mutex::new(Vec::new()),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Take a cleared buffer from the pool, allocating when the pool is empty.
    pub fn get(&self) -> BytesMut {
        let reused = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        match reused {
            Some(mut buf) => {
                buf.clear();
                buf.reserve(self.buffer_size);
                buf
            }
            None => BytesMut::with_capacity(self.buffer_size),
        }
    }

    /// Return a buffer. Buffers beyond the idle limit are dropped.
    pub fn put(&self, mut buf: BytesMut) {
        buf.clear();
        let mut free = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if free.len() < self.max_idle {
            free.push(buf);
        }
    }

    /// Number of idle buffers.
    pub fn idle(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Wrap `body` so its data frames are copied through a pooled buffer.
    pub fn wrap(self: &Arc<Self>, body: Body) -> Body {
        Body::new(PooledBody::new(body, self.clone()))
    }
}

/// Response body streamed through a pooled buffer.
pub struct PooledBody {
    inner: Body,
    pending: Bytes,
    buf: Option<BytesMut>,
    pool: Arc<BufferPool>,
}

impl PooledBody {
    pub fn new(inner: Body, pool: Arc<BufferPool>) -> Self {
        let buf = pool.get();
        Self {
            inner,
            pending: Bytes::new(),
            buf: Some(buf),
            pool,
        }
    }

    fn next_chunk(&mut self) -> Bytes {
        let n = self.pending.len().min(self.pool.buffer_size());
        match self.buf.as_mut() {
            Some(buf) => {
                buf.clear();
                buf.reserve(n);
                buf.extend_from_slice(&self.pending[..n]);
                self.pending.advance(n);
                buf.split().freeze()
            }
            None => self.pending.split_to(n),
        }
    }
}

impl HttpBody for PooledBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        loop {
            if !this.pending.is_empty() {
                return Poll::Ready(Some(Ok(Frame::data(this.next_chunk()))));
            }
            match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => {
                        // empty data frames carry nothing worth forwarding
                        this.pending = data;
                    }
                    Err(trailers) => return Poll::Ready(Some(Ok(trailers))),
                },
                Some(Err(err)) => return Poll::Ready(Some(Err(err))),
                None => return Poll::Ready(None),
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.pending.is_empty() && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        let mut hint = self.inner.size_hint();
        let pending = self.pending.len() as u64;
        if pending > 0 {
            if let Some(upper) = hint.upper() {
                hint.set_upper(upper + pending);
            }
            hint.set_lower(hint.lower() + pending);
        }
        hint
    }
}

impl Drop for PooledBody {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use http::{HeaderMap, HeaderValue};
    use http_body_util::BodyExt;

    use super::*;

    #[tokio::test]
    async fn test_large_body_is_chunked() {
        let pool = Arc::new(BufferPool::new(4));
        let body = pool.wrap(Body::from("abcdefghij"));

        let mut chunks = Vec::new();
        let mut body = body;
        while let Some(frame) = body.frame().await {
            chunks.push(frame.unwrap().into_data().unwrap());
        }
        assert_eq!(chunks, ["abcd", "efgh", "ij"]);
    }

    #[tokio::test]
    async fn test_buffer_returns_to_pool() {
        let pool = Arc::new(BufferPool::default());
        assert_eq!(pool.idle(), 0);

        let collected = pool
            .wrap(Body::from("hello"))
            .collect()
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(collected, "hello");
        assert_eq!(pool.idle(), 1);

        // the released buffer is handed out again
        let body = PooledBody::new(Body::empty(), pool.clone());
        assert_eq!(pool.idle(), 0);
        drop(body);
        assert_eq!(pool.idle(), 1);
    }

    #[tokio::test]
    async fn test_trailers_pass_through() {
        let mut trailers = HeaderMap::new();
        trailers.insert("grpc-status", HeaderValue::from_static("0"));
        let frames = vec![
            Ok::<_, std::convert::Infallible>(Frame::data(Bytes::from_static(b"payload"))),
            Ok(Frame::trailers(trailers)),
        ];
        let inner = Body::new(http_body_util::StreamBody::new(futures_util::stream::iter(
            frames,
        )));

        let pool = Arc::new(BufferPool::default());
        let collected = PooledBody::new(inner, pool).collect().await.unwrap();
        assert_eq!(
            collected.trailers().unwrap().get("grpc-status").unwrap(),
            "0"
        );
        assert_eq!(collected.to_bytes(), "payload");
    }
}
