// ABOUTME: Environment-based configuration loading for the gateway
// ABOUTME: Single source of truth for ports, timeouts, pool tuning, and policy defaults
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

//! Environment-only configuration. The gateway reads everything from the
//! process environment at startup; there is no configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::constants::limits;

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen port
    pub http_port: u16,
    /// Front door behavior
    pub http: HttpConfig,
    /// Default upstream and connection pool tuning
    pub upstream: UpstreamSettings,
    /// Rate limiting defaults
    pub rate_limit: RateLimitSettings,
    /// Credential validation settings
    pub auth: AuthSettings,
    /// Usage recording settings
    pub usage: UsageSettings,
    /// Additional gateway-owned path prefixes
    pub reserved: ReservedPathSettings,
}

/// Front door limits and deadlines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Deadline for producing response headers, seconds
    pub request_deadline_secs: u64,
    /// Inbound body cap, bytes
    pub max_request_body_bytes: usize,
    /// Buffered upstream response cap, bytes
    pub max_response_body_bytes: usize,
}

/// Default upstream target and shared pool tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamSettings {
    /// Base URL requests fall through to when no route matches
    pub default_base_url: String,
    /// Buffered request timeout, seconds
    pub request_timeout_secs: u64,
    /// Idle connections kept per host
    pub pool_max_idle_per_host: usize,
    /// Idle connection timeout, seconds
    pub pool_idle_timeout_secs: u64,
}

impl UpstreamSettings {
    /// Buffered request timeout as a [`Duration`]
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Pool idle timeout as a [`Duration`]
    #[must_use]
    pub const fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }
}

/// Gateway-wide rate limiting defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Window length, seconds
    pub window_seconds: u64,
    /// Burst tokens granted after the window limit
    pub burst_tokens: u32,
    /// Plan synthesized for anonymous callers when the route names none
    pub anonymous_plan_id: String,
}

/// Credential validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// HS256 secret for session tokens
    pub session_secret: String,
    /// Cookie carrying the session token
    pub session_cookie: String,
}

/// Usage recording settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSettings {
    /// Bounded queue capacity; overflow drops the oldest event
    pub queue_capacity: usize,
    /// Background flush interval, seconds
    pub flush_interval_secs: u64,
}

/// Extra gateway-owned path prefixes mounted ahead of dynamic routes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReservedPathSettings {
    /// Prefixes appended to the built-in reserved set
    pub extra_prefixes: Vec<String>,
}

impl ServerConfig {
    /// Load configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns an error if a present variable fails to parse or if the
    /// session secret is missing outside of development.
    pub fn from_env() -> Result<Self> {
        let http_port = parse_env("HTTP_PORT", 8080)?;

        let http = HttpConfig {
            request_deadline_secs: parse_env(
                "REQUEST_DEADLINE_SECS",
                limits::REQUEST_DEADLINE_SECS,
            )?,
            max_request_body_bytes: parse_env(
                "MAX_REQUEST_BODY_BYTES",
                limits::MAX_REQUEST_BODY_BYTES,
            )?,
            max_response_body_bytes: parse_env(
                "MAX_RESPONSE_BODY_BYTES",
                limits::MAX_RESPONSE_BODY_BYTES,
            )?,
        };

        let upstream = UpstreamSettings {
            default_base_url: env::var("UPSTREAM_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            request_timeout_secs: parse_env("UPSTREAM_TIMEOUT_SECS", 30)?,
            pool_max_idle_per_host: parse_env("POOL_MAX_IDLE", limits::DEFAULT_POOL_MAX_IDLE)?,
            pool_idle_timeout_secs: parse_env(
                "POOL_IDLE_TIMEOUT_SECS",
                limits::DEFAULT_POOL_IDLE_TIMEOUT_SECS,
            )?,
        };

        let rate_limit = RateLimitSettings {
            // A zero-length window is never valid.
            window_seconds: parse_env("RATE_LIMIT_WINDOW_SECS", limits::DEFAULT_WINDOW_SECONDS)?
                .max(1),
            burst_tokens: parse_env("RATE_LIMIT_BURST_TOKENS", limits::DEFAULT_BURST_TOKENS)?,
            anonymous_plan_id: env::var("ANONYMOUS_PLAN_ID").unwrap_or_else(|_| "free".into()),
        };

        let auth = AuthSettings {
            session_secret: env::var("SESSION_SECRET").unwrap_or_else(|_| {
                tracing::warn!("SESSION_SECRET not set; using development default");
                "apigate-development-secret".into()
            }),
            session_cookie: env::var("SESSION_COOKIE").unwrap_or_else(|_| "token".into()),
        };

        let usage = UsageSettings {
            queue_capacity: parse_env(
                "USAGE_QUEUE_CAPACITY",
                limits::DEFAULT_USAGE_QUEUE_CAPACITY,
            )?,
            flush_interval_secs: parse_env("USAGE_FLUSH_INTERVAL_SECS", 10)?,
        };

        let reserved = ReservedPathSettings {
            extra_prefixes: env::var("RESERVED_PATH_PREFIXES")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        };

        Ok(Self {
            http_port,
            http,
            upstream,
            rate_limit,
            auth,
            usage,
            reserved,
        })
    }

    /// One-line startup summary for the log
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "port={} default_upstream={} window={}s burst={} usage_queue={}",
            self.http_port,
            self.upstream.default_base_url,
            self.rate_limit.window_seconds,
            self.rate_limit.burst_tokens,
            self.usage.queue_capacity,
        )
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            http: HttpConfig {
                request_deadline_secs: limits::REQUEST_DEADLINE_SECS,
                max_request_body_bytes: limits::MAX_REQUEST_BODY_BYTES,
                max_response_body_bytes: limits::MAX_RESPONSE_BODY_BYTES,
            },
            upstream: UpstreamSettings {
                default_base_url: "http://localhost:3000".into(),
                request_timeout_secs: 30,
                pool_max_idle_per_host: limits::DEFAULT_POOL_MAX_IDLE,
                pool_idle_timeout_secs: limits::DEFAULT_POOL_IDLE_TIMEOUT_SECS,
            },
            rate_limit: RateLimitSettings {
                window_seconds: limits::DEFAULT_WINDOW_SECONDS,
                burst_tokens: limits::DEFAULT_BURST_TOKENS,
                anonymous_plan_id: "free".into(),
            },
            auth: AuthSettings {
                session_secret: "apigate-development-secret".into(),
                session_cookie: "token".into(),
            },
            usage: UsageSettings {
                queue_capacity: limits::DEFAULT_USAGE_QUEUE_CAPACITY,
                flush_interval_secs: 10,
            },
            reserved: ReservedPathSettings::default(),
        }
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid value for {name}: {raw}")),
        Err(_) => Ok(default),
    }
}
