// ABOUTME: Upstream HTTP clients for buffered and streaming forwarding
// ABOUTME: Enforces header hygiene, Host preservation, forwarded headers, and response size caps
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

//! # Upstream Client
//!
//! Two clients share connection-pool tuning: a buffered client with the
//! configured request timeout and compression enabled, and a streaming
//! client with no timeout and compression disabled (compression
//! mid-stream breaks SSE semantics). Hop-by-hop headers and client
//! credentials never cross to the upstream; the client-supplied `Host`
//! is assigned explicitly for virtual hosting.

use bytes::BytesMut;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use url::Url;

use crate::config::environment::UpstreamSettings;
use crate::constants::headers;
use crate::errors::{GatewayError, GatewayResult};
use crate::models::{Protocol, ProxyRequest, ProxyResponse, StreamingResponse, Upstream};

/// Transport-scoped headers that must not be forwarded in either direction
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Client credentials consumed by the gateway, never forwarded
const CREDENTIAL_HEADERS: &[&str] = &["authorization", "x-api-key"];

/// Whether a header name is hop-by-hop
#[must_use]
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Buffered and streaming forwarders sharing pool tuning
#[derive(Clone)]
pub struct UpstreamClient {
    buffered: reqwest::Client,
    streaming: reqwest::Client,
    default_base: Url,
    default_timeout: Duration,
    max_response_bytes: usize,
}

impl UpstreamClient {
    /// Build both clients from upstream settings
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the default base URL is invalid
    /// or client construction fails.
    pub fn new(settings: &UpstreamSettings, max_response_bytes: usize) -> GatewayResult<Self> {
        let default_base = Url::parse(&settings.default_base_url)
            .map_err(|e| GatewayError::config(format!("invalid upstream base URL: {e}")))?;

        let buffered = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .pool_idle_timeout(settings.pool_idle_timeout())
            .gzip(true)
            .build()
            .map_err(|e| GatewayError::config(format!("buffered client build failed: {e}")))?;

        // No aggregate timeout and no compression on the streaming client.
        let streaming = reqwest::Client::builder()
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .pool_idle_timeout(settings.pool_idle_timeout())
            .no_gzip()
            .build()
            .map_err(|e| GatewayError::config(format!("streaming client build failed: {e}")))?;

        Ok(Self {
            buffered,
            streaming,
            default_base,
            default_timeout: settings.request_timeout(),
            max_response_bytes,
        })
    }

    /// Forward a buffered request to the default upstream
    ///
    /// # Errors
    ///
    /// Upstream I/O failures map to `upstream_error`; deadline and
    /// cancellation map to `upstream_timeout`.
    pub async fn forward(&self, request: &ProxyRequest) -> GatewayResult<ProxyResponse> {
        self.forward_inner(request, &self.default_base, None, &HashMap::new())
            .await
    }

    /// Forward a buffered request to a route-specified upstream. A
    /// per-upstream timeout applies to this call only; the connection
    /// pool is shared.
    ///
    /// # Errors
    ///
    /// Same as [`UpstreamClient::forward`], plus a configuration error on
    /// an invalid upstream base URL.
    pub async fn forward_to(
        &self,
        request: &ProxyRequest,
        upstream: &Upstream,
    ) -> GatewayResult<ProxyResponse> {
        let base = Url::parse(&upstream.base_url)
            .map_err(|e| GatewayError::config(format!("invalid upstream base URL: {e}")))?;
        self.forward_inner(request, &base, upstream.timeout, &upstream.header_overrides)
            .await
    }

    async fn forward_inner(
        &self,
        request: &ProxyRequest,
        base: &Url,
        timeout_override: Option<Duration>,
        header_overrides: &HashMap<String, String>,
    ) -> GatewayResult<ProxyResponse> {
        let url = build_target_url(base, &request.path, request.raw_query.as_deref())?;
        let upstream_host = url.host_str().unwrap_or_default().to_owned();
        let method = parse_method(&request.method)?;
        let outbound = outbound_headers(request, header_overrides)?;

        let mut builder = self
            .buffered
            .request(method, url)
            .headers(outbound)
            .body(request.body.clone());
        if let Some(timeout) = timeout_override {
            builder = builder.timeout(timeout);
        }

        let start = Instant::now();
        let response = builder.send().await?;

        let status = response.status().as_u16();
        let response_headers = collect_headers(response.headers());

        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if body.len() + chunk.len() > self.max_response_bytes {
                return Err(GatewayError::upstream_error(
                    "upstream response exceeds size limit",
                ));
            }
            body.extend_from_slice(&chunk);
        }
        let latency_ms = start.elapsed().as_millis() as u64;

        Ok(ProxyResponse {
            status,
            headers: response_headers,
            body: body.freeze(),
            latency_ms,
            upstream_host,
        })
    }

    /// Open a streaming forward to the default upstream. The caller owns
    /// the returned body stream and must drain or drop it.
    ///
    /// # Errors
    ///
    /// Same mapping as the buffered path, applied to connection setup.
    pub async fn forward_streaming(
        &self,
        request: &ProxyRequest,
    ) -> GatewayResult<StreamingResponse> {
        self.forward_streaming_inner(request, &self.default_base, &HashMap::new())
            .await
    }

    /// Open a streaming forward to a route-specified upstream
    ///
    /// # Errors
    ///
    /// Same as [`UpstreamClient::forward_streaming`].
    pub async fn forward_streaming_to(
        &self,
        request: &ProxyRequest,
        upstream: &Upstream,
    ) -> GatewayResult<StreamingResponse> {
        let base = Url::parse(&upstream.base_url)
            .map_err(|e| GatewayError::config(format!("invalid upstream base URL: {e}")))?;
        self.forward_streaming_inner(request, &base, &upstream.header_overrides)
            .await
    }

    async fn forward_streaming_inner(
        &self,
        request: &ProxyRequest,
        base: &Url,
        header_overrides: &HashMap<String, String>,
    ) -> GatewayResult<StreamingResponse> {
        let url = build_target_url(base, &request.path, request.raw_query.as_deref())?;
        let upstream_host = url.host_str().unwrap_or_default().to_owned();
        let method = parse_method(&request.method)?;
        let outbound = outbound_headers(request, header_overrides)?;

        let start = Instant::now();
        let response = self
            .streaming
            .request(method, url)
            .headers(outbound)
            .body(request.body.clone())
            .send()
            .await?;
        let first_byte_ms = start.elapsed().as_millis() as u64;

        let status = response.status().as_u16();
        let response_headers = collect_headers(response.headers());
        let content_type = response_headers
            .get("content-type")
            .cloned()
            .unwrap_or_default();

        let body = response.bytes_stream().map_err(GatewayError::from).boxed();

        Ok(StreamingResponse {
            status,
            headers: response_headers,
            body,
            content_type,
            first_byte_ms,
            upstream_host,
        })
    }

    /// Probe the default upstream with a `HEAD` request. Any received
    /// response, including 4xx and 5xx, indicates reachability.
    pub async fn health_check(&self) -> bool {
        self.buffered
            .head(self.default_base.clone())
            .timeout(self.default_timeout.min(Duration::from_secs(5)))
            .send()
            .await
            .is_ok()
    }

    /// Whether a request should take the streaming path
    #[must_use]
    pub fn should_stream(request: &ProxyRequest, protocol: Protocol) -> bool {
        if protocol.is_streaming() {
            return true;
        }
        request
            .headers
            .get("accept")
            .is_some_and(|accept| accept.contains("text/event-stream"))
    }
}

fn parse_method(method: &str) -> GatewayResult<reqwest::Method> {
    reqwest::Method::from_bytes(method.as_bytes())
        .map_err(|_| GatewayError::bad_request(format!("invalid method: {method}")))
}

/// Compose the target URL from the upstream base, request path, and query.
/// The composed path can never move above the upstream base root.
fn build_target_url(base: &Url, path: &str, query: Option<&str>) -> GatewayResult<Url> {
    if path.split('/').any(|segment| segment == "..") {
        return Err(GatewayError::bad_request("path traversal rejected"));
    }

    let mut url = base.clone();
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url.set_query(query);
    Ok(url)
}

/// Build outbound headers: copy minus hop-by-hop and credentials, assign
/// `Host` explicitly, append forwarding metadata, then apply per-upstream
/// overrides.
fn outbound_headers(
    request: &ProxyRequest,
    header_overrides: &HashMap<String, String>,
) -> GatewayResult<HeaderMap> {
    let mut outbound = HeaderMap::new();

    for (name, value) in &request.headers {
        if is_hop_by_hop(name)
            || CREDENTIAL_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
            || name.eq_ignore_ascii_case("host")
            || name.eq_ignore_ascii_case("content-length")
        {
            continue;
        }
        insert_header(&mut outbound, name, value)?;
    }

    if let Some(host) = request.host.as_deref() {
        if !host.is_empty() {
            outbound.insert(
                HOST,
                HeaderValue::from_str(host)
                    .map_err(|_| GatewayError::bad_request("invalid Host header"))?,
            );
        }
    }

    insert_header(&mut outbound, headers::X_FORWARDED_FOR, &request.remote_ip)?;
    insert_header(&mut outbound, headers::X_FORWARDED_PROTO, "https")?;
    insert_header(&mut outbound, headers::X_REQUEST_ID, &request.trace_id)?;

    for (name, value) in header_overrides {
        insert_header(&mut outbound, name, value)?;
    }

    Ok(outbound)
}

fn insert_header(map: &mut HeaderMap, name: &str, value: &str) -> GatewayResult<()> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| GatewayError::bad_request(format!("invalid header name: {name}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|_| GatewayError::bad_request(format!("invalid header value for {name}")))?;
    map.insert(name, value);
    Ok(())
}

/// Flatten a response header map to lowercase first values, dropping
/// hop-by-hop headers.
fn collect_headers(header_map: &HeaderMap) -> HashMap<String, String> {
    let mut collected = HashMap::new();
    for (name, value) in header_map {
        let name = name.as_str().to_ascii_lowercase();
        if is_hop_by_hop(&name) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            collected.entry(name).or_insert_with(|| value.to_owned());
        }
    }
    collected
}
