// ABOUTME: Core value types shared across the gateway pipeline
// ABOUTME: Requests, responses, routes, upstreams, plans, users, and resolved identities
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

//! # Data Models
//!
//! Value types that flow through the request pipeline. A [`ProxyRequest`]
//! is read-only after construction; route matching produces a derived
//! request with a rewritten path rather than mutating the original.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::GatewayResult;

/// Owned byte stream flowing from an upstream body to the client
pub type ByteStream = BoxStream<'static, GatewayResult<Bytes>>;

/// Immutable snapshot of one inbound request
///
/// Hop-by-hop headers are stripped at construction by the front door and
/// the `Host` header is carried explicitly. Header keys are lowercase and
/// map to the first value seen.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// Raw `API` key, when one was presented
    pub api_key: Option<String>,
    /// Raw session token from the `token` cookie, when present
    pub session_token: Option<String>,
    /// `HTTP` method, uppercase
    pub method: String,
    /// Request path, always starting with `/`
    pub path: String,
    /// Raw query string without the leading `?`
    pub raw_query: Option<String>,
    /// Lowercase header name to first value
    pub headers: HashMap<String, String>,
    /// Client-supplied `Host` header
    pub host: Option<String>,
    /// Request body, bounded by the front door
    pub body: Bytes,
    /// Resolved client address
    pub remote_ip: String,
    /// Client `User-Agent`, when present
    pub user_agent: Option<String>,
    /// Trace id assigned at ingress
    pub trace_id: String,
}

impl ProxyRequest {
    /// Derive a request with a rewritten path. The original is untouched.
    #[must_use]
    pub fn with_path(&self, path: String) -> Self {
        Self {
            path,
            ..self.clone()
        }
    }

    /// Request body length in bytes
    #[must_use]
    pub fn body_len(&self) -> u64 {
        self.body.len() as u64
    }
}

/// Buffered upstream response
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    /// Upstream status code
    pub status: u16,
    /// Lowercase header name to first value, hop-by-hop stripped
    pub headers: HashMap<String, String>,
    /// Full response body, bounded at the upstream client
    pub body: Bytes,
    /// Wall-clock latency from send to final byte
    pub latency_ms: u64,
    /// Host label of the upstream that served the request
    pub upstream_host: String,
}

/// Streaming upstream response; the caller owns and must drain or drop the
/// body stream.
pub struct StreamingResponse {
    /// Upstream status code
    pub status: u16,
    /// Lowercase header name to first value, hop-by-hop stripped
    pub headers: HashMap<String, String>,
    /// Caller-owned byte stream
    pub body: ByteStream,
    /// Declared content type
    pub content_type: String,
    /// Latency from send to response headers
    pub first_byte_ms: u64,
    /// Host label of the upstream that served the request
    pub upstream_host: String,
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("first_byte_ms", &self.first_byte_ms)
            .field("upstream_host", &self.upstream_host)
            .finish_non_exhaustive()
    }
}

/// Resolved caller identity. Constructed once when authentication
/// succeeds; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// `API` key record id, absent for session and anonymous callers
    pub key_id: Option<String>,
    /// Owning user, absent for anonymous callers
    pub user_id: Option<Uuid>,
    /// Effective plan
    pub plan_id: String,
    /// Effective per-minute rate limit
    pub rate_limit_per_minute: u32,
    /// Monthly request quota from the plan
    pub monthly_quota: u64,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Rate key for anonymous callers, keyed per client address
    pub anonymous_key: Option<String>,
}

impl AuthContext {
    /// Stable identity string used to key rate-limit windows and usage
    /// counters.
    #[must_use]
    pub fn rate_identity(&self) -> String {
        if let Some(user_id) = self.user_id {
            user_id.to_string()
        } else {
            self.anonymous_key.clone().unwrap_or_else(|| "anon".into())
        }
    }
}

/// Named tier defining rate limit and monthly quota
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    /// Requests per minute
    pub rate_limit_per_minute: u32,
    /// Requests per calendar month
    pub requests_per_month: u64,
    /// Optional monthly byte allowance
    pub byte_allowance: Option<u64>,
}

/// User account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Suspended,
    Pending,
}

impl UserStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Pending => "pending",
        }
    }
}

/// Gateway user account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub status: UserStatus,
    pub plan_id: String,
    pub created_at: DateTime<Utc>,
}

/// Stored `API` key record; the full key is never persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: String,
    pub user_id: Uuid,
    pub name: String,
    /// First characters of the full key, used for lookup
    pub key_prefix: String,
    /// SHA-256 hex digest of the full key
    pub key_hash: String,
    /// Scopes granted to callers presenting this key
    pub scopes: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Server-side session resolved from a validated session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Token id (`jti` claim)
    pub token_id: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Wire protocol a route speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Sse,
    #[serde(rename = "http-stream")]
    HttpStream,
    WebSocket,
}

impl Protocol {
    /// Whether responses on this protocol are forwarded as streams
    #[must_use]
    pub const fn is_streaming(self) -> bool {
        matches!(self, Self::Sse | Self::HttpStream | Self::WebSocket)
    }
}

/// Declarative binding from (host, method, path) to an upstream and policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    /// Higher wins; ties broken by specificity
    pub priority: i32,
    /// Literal host, `*.suffix` wildcard, or `*`
    pub host_pattern: String,
    /// Uppercase method names; empty means all methods
    pub methods: Vec<String>,
    /// Literal segments, `:param` captures, optional trailing `*`
    pub path_pattern: String,
    /// Optional rewrite template with `:param` and `*` substitution
    pub rewrite: Option<String>,
    /// Target upstream; absent means the default upstream
    pub upstream_id: Option<String>,
    pub protocol: Protocol,
    pub auth_required: bool,
    /// Billable-unit expression, empty for per-call metering
    pub metering_expression: String,
    /// Plan synthesized for anonymous callers on this route
    pub default_plan_id: Option<String>,
}

/// A configured external `HTTP` service the gateway forwards to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upstream {
    pub id: String,
    pub name: String,
    pub base_url: String,
    /// Per-upstream request timeout override for buffered forwards
    pub timeout: Option<Duration>,
    /// Headers forced onto every outbound request to this upstream
    pub header_overrides: HashMap<String, String>,
}
