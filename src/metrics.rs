// ABOUTME: Process-wide gateway counters with a plain-text exposition
// ABOUTME: Lock-free atomics recorded by the pipeline and rendered at /metrics
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

use std::sync::atomic::{AtomicU64, Ordering};

/// Gateway counters. All methods are safe for concurrent use and never
/// block the request path.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    requests_total: AtomicU64,
    requests_denied: AtomicU64,
    upstream_errors: AtomicU64,
    streams_opened: AtomicU64,
    response_bytes_total: AtomicU64,
}

impl GatewayMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denial(&self) {
        self.requests_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_error(&self) {
        self.upstream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_opened(&self) {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response_bytes(&self, bytes: u64) {
        self.response_bytes_total.fetch_add(bytes, Ordering::Relaxed);
    }

    #[must_use]
    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn requests_denied(&self) -> u64 {
        self.requests_denied.load(Ordering::Relaxed)
    }

    /// Render the counters in text exposition format. The usage-drop
    /// counter lives in the recorder and is passed in by the caller.
    #[must_use]
    pub fn render(&self, usage_events_dropped: u64) -> String {
        format!(
            "apigate_requests_total {}\n\
             apigate_requests_denied {}\n\
             apigate_upstream_errors {}\n\
             apigate_streams_opened {}\n\
             apigate_response_bytes_total {}\n\
             apigate_usage_events_dropped {}\n",
            self.requests_total.load(Ordering::Relaxed),
            self.requests_denied.load(Ordering::Relaxed),
            self.upstream_errors.load(Ordering::Relaxed),
            self.streams_opened.load(Ordering::Relaxed),
            self.response_bytes_total.load(Ordering::Relaxed),
            usage_events_dropped,
        )
    }
}
