// ABOUTME: Metering-aware stream reader wrapping upstream byte sources
// ABOUTME: Counts bytes and chunks, retains the last chunk, optionally accumulates full data
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

//! Byte-tracking passthrough for streaming responses. The wrapper records
//! totals on every chunk that flows through it; the pipeline holds a
//! [`MeterHandle`] and reads the metrics after the stream ends.

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use crate::errors::GatewayResult;
use crate::models::ByteStream;

/// Point-in-time snapshot of stream metrics
#[derive(Debug, Clone, Default)]
pub struct StreamMetrics {
    /// Total bytes observed
    pub total_bytes: u64,
    /// Number of chunks observed
    pub chunk_count: u64,
    /// Most recent chunk
    pub last_chunk: Bytes,
    /// Full accumulated data, present only when accumulation was requested
    pub all_data: Option<Bytes>,
}

struct MeterShared {
    last_chunk: Bytes,
    buffer: BytesMut,
}

struct MeterInner {
    total_bytes: AtomicU64,
    chunk_count: AtomicU64,
    accumulate: bool,
    shared: Mutex<MeterShared>,
}

/// Shared handle onto a stream's metrics, valid after the stream is gone
#[derive(Clone)]
pub struct MeterHandle {
    inner: Arc<MeterInner>,
}

impl MeterHandle {
    fn new(accumulate: bool) -> Self {
        Self {
            inner: Arc::new(MeterInner {
                total_bytes: AtomicU64::new(0),
                chunk_count: AtomicU64::new(0),
                accumulate,
                shared: Mutex::new(MeterShared {
                    last_chunk: Bytes::new(),
                    buffer: BytesMut::new(),
                }),
            }),
        }
    }

    fn record(&self, chunk: &Bytes) {
        self.inner
            .total_bytes
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);
        self.inner.chunk_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut shared) = self.inner.shared.lock() {
            shared.last_chunk = chunk.clone();
            if self.inner.accumulate {
                shared.buffer.extend_from_slice(chunk);
            }
        }
    }

    /// Whether this stream retains its full body for metering
    #[must_use]
    pub fn accumulates(&self) -> bool {
        self.inner.accumulate
    }

    /// Snapshot the metrics observed so far
    #[must_use]
    pub fn metrics(&self) -> StreamMetrics {
        let (last_chunk, all_data) = match self.inner.shared.lock() {
            Ok(shared) => {
                let all_data = if self.inner.accumulate {
                    Some(Bytes::copy_from_slice(&shared.buffer))
                } else {
                    None
                };
                (shared.last_chunk.clone(), all_data)
            }
            Err(_) => (Bytes::new(), None),
        };

        StreamMetrics {
            total_bytes: self.inner.total_bytes.load(Ordering::Relaxed),
            chunk_count: self.inner.chunk_count.load(Ordering::Relaxed),
            last_chunk,
            all_data,
        }
    }
}

type CloseHandle = Box<dyn FnOnce() + Send>;

/// Byte source wrapper that meters everything flowing through it
///
/// Closing is idempotent and delegates to the underlying close handle;
/// dropping the stream closes it.
pub struct MeteredStream {
    inner: ByteStream,
    meter: MeterHandle,
    close: Option<CloseHandle>,
}

impl MeteredStream {
    /// Wrap a byte source. When `accumulate` is set, every chunk is also
    /// appended to an internal buffer for metering expressions that need
    /// the full body.
    #[must_use]
    pub fn new(inner: ByteStream, accumulate: bool) -> Self {
        Self {
            inner,
            meter: MeterHandle::new(accumulate),
            close: None,
        }
    }

    /// Attach a close handle invoked exactly once on close or drop
    #[must_use]
    pub fn with_close_handle(mut self, close: impl FnOnce() + Send + 'static) -> Self {
        self.close = Some(Box::new(close));
        self
    }

    /// Handle for reading metrics while or after the stream is consumed
    #[must_use]
    pub fn meter(&self) -> MeterHandle {
        self.meter.clone()
    }

    /// Close the underlying source. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(close) = self.close.take() {
            close();
        }
    }
}

impl Stream for MeteredStream {
    type Item = GatewayResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.meter.record(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => {
                this.close();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for MeteredStream {
    fn drop(&mut self) {
        self.close();
    }
}
