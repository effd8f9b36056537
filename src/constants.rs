// ABOUTME: Constants module with domain-separated organization
// ABOUTME: Groups gateway limits, header names, key format, and reserved paths by domain
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

//! Constants module
//!
//! Application constants grouped by domain rather than collected in a
//! single flat list.

/// Service identity
pub mod service_names {
    /// Gateway service name, reported by `/version`
    pub const APIGATE: &str = "apigate";
}

/// `HTTP` status codes used across the gateway
pub mod http_status {
    pub const OK: u16 = 200;
    pub const ACCEPTED: u16 = 202;
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const PAYMENT_REQUIRED: u16 = 402;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const TOO_MANY_REQUESTS: u16 = 429;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const BAD_GATEWAY: u16 = 502;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
    pub const GATEWAY_TIMEOUT: u16 = 504;
}

/// Header names the gateway reads or writes
pub mod headers {
    /// Client credential header carrying a raw `API` key
    pub const X_API_KEY: &str = "x-api-key";
    /// Trace id propagated to clients and upstreams
    pub const X_REQUEST_ID: &str = "x-request-id";
    /// Per-window request ceiling for the authenticated identity
    pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
    /// Requests left in the current window
    pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
    /// Unix time at which the current window resets
    pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";
    /// Client chain appended on forward
    pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
    /// Original scheme presented to the client
    pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
    /// Real client address set by trusted edge proxies
    pub const X_REAL_IP: &str = "x-real-ip";
    /// Reverse-proxy buffering control, disabled on streams
    pub const X_ACCEL_BUFFERING: &str = "x-accel-buffering";
}

/// Request and response size limits, stream tuning, deadlines
pub mod limits {
    /// Maximum inbound request body the front door will read
    pub const MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;
    /// Maximum buffered upstream response body
    pub const MAX_RESPONSE_BODY_BYTES: usize = 50 * 1024 * 1024;
    /// Streaming copy slice; cancellation propagates within one slice
    pub const STREAM_CHUNK_BYTES: usize = 4096;
    /// Deadline for producing response headers on the buffered path
    pub const REQUEST_DEADLINE_SECS: u64 = 60;
    /// Default idle connections kept per upstream host
    pub const DEFAULT_POOL_MAX_IDLE: usize = 100;
    /// Default idle connection timeout in seconds
    pub const DEFAULT_POOL_IDLE_TIMEOUT_SECS: u64 = 90;
    /// Default rate-limit window length in seconds
    pub const DEFAULT_WINDOW_SECONDS: u64 = 60;
    /// Default burst allowance applied after the window limit
    pub const DEFAULT_BURST_TOKENS: u32 = 2;
    /// Default bounded usage queue capacity
    pub const DEFAULT_USAGE_QUEUE_CAPACITY: usize = 4096;
}

/// `API` key wire format
pub mod key_format {
    /// Prefix carried by every gateway-issued key
    pub const KEY_PREFIX: &str = "ak_";
    /// Total key length including the prefix
    pub const KEY_LENGTH: usize = 64;
    /// Leading characters used for repository lookup
    pub const LOOKUP_PREFIX_LENGTH: usize = 12;
}

/// Gateway-owned `URL` prefixes that dynamic routes may never claim
pub mod reserved_paths {
    /// Built-in reserved prefixes; the configured admin, portal, and docs
    /// base paths are appended at startup.
    pub const BUILTIN: &[&str] = &[
        "/health",
        "/metrics",
        "/version",
        "/admin",
        "/portal",
        "/docs",
        "/mod",
        "/api/v1/meter",
        "/payment-webhooks",
        "/api/portal/auth",
    ];
}

/// Known external usage event types accepted at the metering boundary
pub mod event_types {
    pub const KNOWN: &[&str] = &[
        "api.request",
        "deployment.created",
        "deployment.started",
        "deployment.stopped",
        "deployment.deleted",
        "compute.minutes",
        "storage.gb_hours",
        "bandwidth.gb",
    ];
    /// Prefix that admits caller-defined event types
    pub const CUSTOM_PREFIX: &str = "custom.";
}
