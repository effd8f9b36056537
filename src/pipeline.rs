// ABOUTME: The request pipeline state machine from route match through usage recording
// ABOUTME: Orchestrates matching, auth, rate and quota checks, forwarding, and the streaming subflow
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

//! # Request Pipeline
//!
//! ```text
//!   RECEIVED → MATCHED → AUTHENTICATED → RATE_CHECKED → FORWARDED → RECORDED → RESPONDED
//!                  ↘          ↘              ↘            ↘           ↘
//!                 DENIED    DENIED         DENIED       UPSTREAM_ERR  (record on all exits)
//! ```
//!
//! Every exit records exactly one usage event: buffered responses and
//! denials record before responding, streaming responses record when the
//! stream ends or the client disconnects. Errors never cross the ingress
//! boundary raw; each one becomes an error response with rate-limit and
//! trace headers applied.

use bytes::Bytes;
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use crate::auth::Credentials;
use crate::constants::{headers, limits};
use crate::context::GatewayResources;
use crate::errors::{ErrorCode, ErrorEnvelope, GatewayError};
use crate::metering::{MeterContext, MeterExpr};
use crate::models::{
    AuthContext, Protocol, ProxyRequest, ProxyResponse, StreamingResponse, Upstream,
};
use crate::rate_limiting::{RateLimitDecision, RateLimitQuota};
use crate::routing::RouteMatch;
use crate::sse::{MeterHandle, MeteredStream};
use crate::upstream::UpstreamClient;
use crate::usage::{UsageEvent, UsageRecorder};

/// Terminal pipeline output handed back to the front door
pub enum PipelineResponse {
    Buffered(ProxyResponse),
    Streaming(StreamingResponse),
}

/// The request pipeline
#[derive(Clone)]
pub struct RequestPipeline {
    resources: Arc<GatewayResources>,
}

impl RequestPipeline {
    #[must_use]
    pub fn new(resources: Arc<GatewayResources>) -> Self {
        Self { resources }
    }

    /// Drive one request through the state machine. Never returns an
    /// error: every failure is converted into an error response and
    /// recorded.
    pub async fn handle(&self, request: ProxyRequest) -> PipelineResponse {
        self.resources.metrics.record_request();
        let received_at = Instant::now();

        // RECEIVED → MATCHED. No match means auth required, no rewrite,
        // default upstream.
        let route_match = self.resources.routes.match_route(
            &request.method,
            &request.path,
            request.host.as_deref(),
        );

        // MATCHED → AUTHENTICATED
        let auth = match self.authenticate(&request, route_match.as_ref()).await {
            Ok(auth) => auth,
            Err(e) => return self.deny(&request, None, None, e, received_at),
        };

        // AUTHENTICATED → RATE_CHECKED
        let quota = RateLimitQuota {
            limit: auth.rate_limit_per_minute,
            window_seconds: self.resources.config.rate_limit.window_seconds as i64,
            burst_tokens: self.resources.config.rate_limit.burst_tokens,
        };
        let decision = self.resources.windows.check(
            &auth.rate_identity(),
            &auth.plan_id,
            &quota,
            Utc::now().timestamp(),
        );
        if !decision.allowed {
            let error = GatewayError::rate_limit_exceeded(quota.limit)
                .with_request_id(request.trace_id.clone());
            return self.deny(&request, Some(&auth), Some(decision), error, received_at);
        }

        if auth.monthly_quota > 0
            && self
                .resources
                .recorder
                .monthly_count(&auth.rate_identity())
                >= auth.monthly_quota
        {
            let error = GatewayError::quota_exceeded(auth.monthly_quota)
                .with_request_id(request.trace_id.clone());
            return self.deny(&request, Some(&auth), Some(decision), error, received_at);
        }

        // RATE_CHECKED → FORWARDED
        let derived = match derive_request(&request, route_match.as_ref()) {
            Ok(derived) => derived,
            Err(e) => return self.deny(&request, Some(&auth), Some(decision), e, received_at),
        };
        let upstream = match self.resolve_upstream(route_match.as_ref()).await {
            Ok(upstream) => upstream,
            Err(e) => return self.deny(&request, Some(&auth), Some(decision), e, received_at),
        };

        let protocol = route_match
            .as_ref()
            .map_or(Protocol::Http, |m| m.route.route.protocol);

        if UpstreamClient::should_stream(&derived, protocol) {
            self.forward_streaming(
                &request,
                &derived,
                upstream.as_ref(),
                route_match.as_ref(),
                &auth,
                decision,
                received_at,
            )
            .await
        } else {
            self.forward_buffered(
                &request,
                &derived,
                upstream.as_ref(),
                &auth,
                decision,
                received_at,
            )
            .await
        }
    }

    async fn authenticate(
        &self,
        request: &ProxyRequest,
        route_match: Option<&RouteMatch>,
    ) -> Result<AuthContext, GatewayError> {
        let auth_required = route_match.map_or(true, |m| m.route.route.auth_required);
        let credentials = Credentials {
            api_key: request.api_key.clone(),
            session_token: request.session_token.clone(),
        };

        if !credentials.is_empty() {
            return self
                .resources
                .authenticator
                .authenticate(&credentials)
                .await
                .map_err(|e| e.with_request_id(request.trace_id.clone()));
        }
        if auth_required {
            return Err(
                GatewayError::missing_api_key().with_request_id(request.trace_id.clone())
            );
        }

        let plan_id = route_match
            .and_then(|m| m.route.route.default_plan_id.clone())
            .unwrap_or_else(|| self.resources.config.rate_limit.anonymous_plan_id.clone());
        self.resources
            .authenticator
            .anonymous(&plan_id, &request.remote_ip)
            .await
            .map_err(|e| e.with_request_id(request.trace_id.clone()))
    }

    async fn resolve_upstream(
        &self,
        route_match: Option<&RouteMatch>,
    ) -> Result<Option<Upstream>, GatewayError> {
        let Some(upstream_id) = route_match.and_then(|m| m.route.route.upstream_id.as_deref())
        else {
            return Ok(None);
        };
        self.resources
            .upstreams
            .find_by_id(upstream_id)
            .await?
            .map(Some)
            .ok_or_else(|| GatewayError::upstream_error(format!("unknown upstream: {upstream_id}")))
    }

    async fn forward_buffered(
        &self,
        original: &ProxyRequest,
        derived: &ProxyRequest,
        upstream: Option<&Upstream>,
        auth: &AuthContext,
        decision: RateLimitDecision,
        received_at: Instant,
    ) -> PipelineResponse {
        let result = match upstream {
            Some(upstream) => {
                self.resources
                    .upstream_client
                    .forward_to(derived, upstream)
                    .await
            }
            None => self.resources.upstream_client.forward(derived).await,
        };

        let mut response = match result {
            Ok(response) => response,
            Err(e) => {
                return self.deny(
                    original,
                    Some(auth),
                    Some(decision),
                    e.with_request_id(original.trace_id.clone()),
                    received_at,
                )
            }
        };

        // FORWARDED → RECORDED
        let mut event = self.base_event(original, Some(auth), response.status);
        event.latency_ms = response.latency_ms;
        event.response_bytes = response.body.len() as u64;
        self.resources.recorder.record(event);
        self.resources
            .metrics
            .record_response_bytes(response.body.len() as u64);

        // RECORDED → RESPONDED: upstream headers first, pipeline headers
        // override.
        apply_rate_limit_headers(&mut response.headers, &decision);
        response
            .headers
            .insert(headers::X_REQUEST_ID.into(), original.trace_id.clone());

        PipelineResponse::Buffered(response)
    }

    #[allow(clippy::too_many_arguments)]
    async fn forward_streaming(
        &self,
        original: &ProxyRequest,
        derived: &ProxyRequest,
        upstream: Option<&Upstream>,
        route_match: Option<&RouteMatch>,
        auth: &AuthContext,
        decision: RateLimitDecision,
        received_at: Instant,
    ) -> PipelineResponse {
        let result = match upstream {
            Some(upstream) => {
                self.resources
                    .upstream_client
                    .forward_streaming_to(derived, upstream)
                    .await
            }
            None => self.resources.upstream_client.forward_streaming(derived).await,
        };

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                return self.deny(
                    original,
                    Some(auth),
                    Some(decision),
                    e.with_request_id(original.trace_id.clone()),
                    received_at,
                )
            }
        };
        self.resources.metrics.record_stream_opened();

        let meter = route_match.map_or_else(MeterExpr::unit, |m| m.route.meter.clone());
        let metered = MeteredStream::new(response.body, meter.needs_accumulation());
        let handle = metered.meter();

        let finalizer = StreamFinalizer {
            recorder: Arc::clone(&self.resources.recorder),
            metrics: Arc::clone(&self.resources.metrics),
            meter,
            handle,
            event: self.base_event(original, Some(auth), response.status),
            started: Instant::now(),
        };
        let body = FinalizedStream::new(ChunkCapped::new(metered), finalizer).boxed();

        // Streaming header ordering: upstream headers first, then the
        // pipeline's streaming and rate-limit headers, which override.
        let mut response_headers = response.headers;
        response_headers.insert(headers::X_ACCEL_BUFFERING.into(), "no".into());
        response_headers.insert("cache-control".into(), "no-cache".into());
        apply_rate_limit_headers(&mut response_headers, &decision);
        response_headers.insert(headers::X_REQUEST_ID.into(), original.trace_id.clone());

        PipelineResponse::Streaming(StreamingResponse {
            status: response.status,
            headers: response_headers,
            body,
            content_type: response.content_type,
            first_byte_ms: response.first_byte_ms,
            upstream_host: response.upstream_host,
        })
    }

    /// Terminal denial: record exactly one usage event with the error
    /// status and build the error response, rate-limit headers included.
    fn deny(
        &self,
        request: &ProxyRequest,
        auth: Option<&AuthContext>,
        decision: Option<RateLimitDecision>,
        error: GatewayError,
        received_at: Instant,
    ) -> PipelineResponse {
        let status = error.http_status();
        self.resources.metrics.record_denial();
        if matches!(error.code, ErrorCode::UpstreamError | ErrorCode::UpstreamTimeout) {
            self.resources.metrics.record_upstream_error();
        }

        let mut event = self.base_event(request, auth, status);
        event.latency_ms = received_at.elapsed().as_millis() as u64;
        self.resources.recorder.record(event);

        let envelope = ErrorEnvelope::from(&error);
        let body = serde_json::to_vec(&envelope).unwrap_or_else(|_| b"{\"errors\":[]}".to_vec());

        let mut response_headers = HashMap::new();
        response_headers.insert("content-type".into(), "application/json".into());
        if let Some(decision) = decision {
            apply_rate_limit_headers(&mut response_headers, &decision);
        }
        response_headers.insert(headers::X_REQUEST_ID.into(), request.trace_id.clone());

        tracing::debug!(
            trace_id = %request.trace_id,
            status,
            code = error.code.machine_code(),
            "request denied"
        );

        PipelineResponse::Buffered(ProxyResponse {
            status,
            headers: response_headers,
            body: Bytes::from(body),
            latency_ms: received_at.elapsed().as_millis() as u64,
            upstream_host: String::new(),
        })
    }

    fn base_event(
        &self,
        request: &ProxyRequest,
        auth: Option<&AuthContext>,
        status: u16,
    ) -> UsageEvent {
        let mut event = UsageEvent::proxy(request.method.clone(), request.path.clone(), status);
        if let Some(auth) = auth {
            event.key_id = auth.key_id.clone();
            event.user_id = auth.user_id;
            event.plan_id = Some(auth.plan_id.clone());
        }
        event.request_bytes = request.body_len();
        event.ip = Some(request.remote_ip.clone());
        event.user_agent = request.user_agent.clone();
        event
    }
}

/// Apply a rewrite template when the matched route defines one, deriving a
/// new request and leaving the original untouched.
fn derive_request(
    request: &ProxyRequest,
    route_match: Option<&RouteMatch>,
) -> Result<ProxyRequest, GatewayError> {
    let Some(route_match) = route_match else {
        return Ok(request.clone());
    };
    match route_match.rewritten_path()? {
        Some(path) => Ok(request.with_path(path)),
        None => Ok(request.clone()),
    }
}

fn apply_rate_limit_headers(
    response_headers: &mut HashMap<String, String>,
    decision: &RateLimitDecision,
) {
    response_headers.insert(headers::X_RATELIMIT_LIMIT.into(), decision.limit.to_string());
    response_headers.insert(
        headers::X_RATELIMIT_REMAINING.into(),
        decision.remaining.to_string(),
    );
    response_headers.insert(
        headers::X_RATELIMIT_RESET.into(),
        decision.reset_at.to_string(),
    );
}

/// Splits oversized chunks so the client copy proceeds in bounded slices;
/// cancellation propagates within one slice.
struct ChunkCapped {
    inner: MeteredStream,
    pending: Bytes,
}

impl ChunkCapped {
    fn new(inner: MeteredStream) -> Self {
        Self {
            inner,
            pending: Bytes::new(),
        }
    }
}

impl Stream for ChunkCapped {
    type Item = Result<Bytes, GatewayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if !this.pending.is_empty() {
            let take = this.pending.len().min(limits::STREAM_CHUNK_BYTES);
            return Poll::Ready(Some(Ok(this.pending.split_to(take))));
        }

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.pending = chunk;
                let take = this.pending.len().min(limits::STREAM_CHUNK_BYTES);
                Poll::Ready(Some(Ok(this.pending.split_to(take))))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Records the streaming usage event exactly once, at clean end of
/// stream, on upstream error, or on client disconnect (drop). Partial
/// usage still records.
struct StreamFinalizer {
    recorder: Arc<crate::usage::BufferedUsageRecorder>,
    metrics: Arc<crate::metrics::GatewayMetrics>,
    meter: MeterExpr,
    handle: MeterHandle,
    event: UsageEvent,
    started: Instant,
}

impl StreamFinalizer {
    fn finish(self) {
        let metrics = self.handle.metrics();
        let ctx = MeterContext {
            status: self.event.status,
            request_bytes: self.event.request_bytes,
            response_bytes: metrics.total_bytes,
            chunk_count: metrics.chunk_count,
            all_data: metrics.all_data.as_deref(),
        };
        let quantity = self.meter.evaluate(&ctx);

        let mut event = self.event;
        event.latency_ms = self.started.elapsed().as_millis() as u64;
        event.response_bytes = metrics.total_bytes;
        event.quantity = quantity;

        self.metrics.record_response_bytes(metrics.total_bytes);
        self.recorder.record(event);
    }
}

struct FinalizedStream {
    inner: ChunkCapped,
    finalizer: Option<StreamFinalizer>,
}

impl FinalizedStream {
    fn new(inner: ChunkCapped, finalizer: StreamFinalizer) -> Self {
        Self {
            inner,
            finalizer: Some(finalizer),
        }
    }

    fn finish(&mut self) {
        if let Some(finalizer) = self.finalizer.take() {
            finalizer.finish();
        }
    }
}

impl Stream for FinalizedStream {
    type Item = Result<Bytes, GatewayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish();
                Poll::Ready(Some(Err(e)))
            }
            other => other,
        }
    }
}

impl Drop for FinalizedStream {
    fn drop(&mut self) {
        self.finish();
    }
}
