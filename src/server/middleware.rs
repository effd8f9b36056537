// ABOUTME: Front door middleware: request ids, real client IP extraction, access logging
// ABOUTME: Priority-route pre-emption consults the route service through its narrow match surface
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;
use std::time::Instant;
use uuid::Uuid;

use crate::constants::headers;

use super::ServerState;

/// Assign or propagate the request trace id. The id is written onto the
/// request for downstream handlers and echoed on the response.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(headers::X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(
            || format!("req_{}", Uuid::new_v4().simple()),
            ToOwned::to_owned,
        );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request
            .headers_mut()
            .insert(headers::X_REQUEST_ID, value.clone());
        let mut response = next.run(request).await;
        response
            .headers_mut()
            .entry(headers::X_REQUEST_ID)
            .or_insert(value);
        response
    } else {
        next.run(request).await
    }
}

/// Structured access log for every request
pub async fn access_log_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let request_id = request
        .headers()
        .get(headers::X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_owned();

    let started = Instant::now();
    let response = next.run(request).await;

    tracing::info!(
        %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = started.elapsed().as_millis() as u64,
        request_id = %request_id,
        "request"
    );
    response
}

/// Routes with priority above zero pre-empt built-in handler mounts for
/// paths outside the reserved set: if such a route matches, the request
/// goes to the proxy pipeline even when a local handler would otherwise
/// serve it.
pub async fn priority_route_middleware(
    State(state): State<ServerState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if !state.resources.routes.reserved().is_reserved(path) {
        let host = request
            .headers()
            .get(axum::http::header::HOST)
            .and_then(|v| v.to_str().ok());
        if state
            .resources
            .routes
            .match_priority(request.method().as_str(), path, host)
            .is_some()
        {
            return super::dispatch_to_pipeline(state, request).await;
        }
    }
    next.run(request).await
}

/// Resolve the client address: first non-empty `X-Forwarded-For` segment,
/// else `X-Real-IP`, else the peer address minus port with IPv6 brackets
/// preserved.
#[must_use]
pub fn real_ip(request_headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(forwarded) = request_headers
        .get(headers::X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_owned();
        }
    }

    if let Some(real_ip) = request_headers
        .get(headers::X_REAL_IP)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return real_ip.to_owned();
    }

    match peer {
        SocketAddr::V4(addr) => addr.ip().to_string(),
        SocketAddr::V6(addr) => format!("[{}]", addr.ip()),
    }
}
