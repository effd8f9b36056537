// ABOUTME: Main library entry point for the apigate API gateway core
// ABOUTME: Exposes the request pipeline, route matcher, rate limiter, and usage metering subsystems
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

#![deny(unsafe_code)]

//! # Apigate
//!
//! An API gateway core that sits in front of one or more upstream HTTP
//! services. For every incoming request the gateway authenticates the
//! caller, resolves the matching upstream route, enforces per-identity rate
//! limits and monthly quotas, forwards the request (buffered or streaming),
//! records a usage event, and returns the upstream response to the client.
//!
//! ## Architecture
//!
//! The gateway is organized around a short, well-ordered request pipeline:
//! - **Routing**: priority-ordered host/method/path dispatch with path
//!   parameter extraction and rewriting
//! - **Auth**: API key and session token resolution to an identity and plan
//! - **Rate limiting**: a pure fixed-window algorithm with burst tokens
//! - **Upstream**: buffered and streaming forwarders with header hygiene
//! - **Usage**: a non-blocking event sink for downstream metering
//!
//! Persistence, payment, email, and similar collaborators are reached
//! through trait contracts and the [`capabilities`] container; the core
//! never depends on a concrete backend.

// ── Public API ──────────────────────────────────────────────────────────
// These modules are used by the server binary (src/bin/) and integration
// tests (tests/). They must remain `pub` so external consumers can access
// them.

/// `API` key generation, format validation, and hashing
pub mod api_keys;

/// Credential extraction and identity resolution
pub mod auth;

/// Name-keyed capability container and built-in providers
pub mod capabilities;

/// Environment-based server configuration
pub mod config;

/// Domain-grouped constants (limits, headers, reserved paths)
pub mod constants;

/// Shared resource container for dependency injection
pub mod context;

/// Centralized error types and `HTTP` error envelopes
pub mod errors;

/// Health and readiness checks
pub mod health;

/// Structured logging configuration
pub mod logging;

/// Billable-unit expression evaluation over stream metrics
pub mod metering;

/// Process-wide gateway counters and text exposition
pub mod metrics;

/// Core value types (requests, responses, routes, plans, identities)
pub mod models;

/// The request pipeline state machine
pub mod pipeline;

/// Fixed-window rate limiting core and keyed window store
pub mod rate_limiting;

/// Priority-ordered route matching and path rewriting
pub mod routing;

/// `HTTP` front door: ingress adapter, reserved endpoints, middleware
pub mod server;

/// Server-Sent Events parsing and metered stream reading
pub mod sse;

/// Repository trait contracts and in-memory implementations
pub mod storage;

/// Upstream `HTTP` clients (buffered and streaming)
pub mod upstream;

/// Usage event recording and quota tracking
pub mod usage;
