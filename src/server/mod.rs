// ABOUTME: HTTP front door translating between the wire protocol and pipeline value types
// ABOUTME: Serves reserved endpoints locally and falls everything else through to the pipeline
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

//! # Front Door
//!
//! The ingress adapter extracts credentials, reads the body under the
//! configured cap, builds the immutable [`ProxyRequest`], invokes the
//! pipeline, and writes the result. Health, version, and metrics are
//! served locally and bypass the pipeline entirely; all other paths fall
//! through to the pipeline's catch-all.

/// Metering endpoint for externally submitted usage events
pub mod meter;
/// Request id, real IP, access log, and priority-route middleware
pub mod middleware;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::HOST;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use http_body_util::Full;
use serde_json::json;
use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::info;
use uuid::Uuid;

use crate::auth::extract_credentials;
use crate::constants::{headers, service_names};
use crate::context::GatewayResources;
use crate::errors::{ErrorEnvelope, GatewayError};
use crate::health::HealthStatus;
use crate::models::{ProxyRequest, ProxyResponse, StreamingResponse};
use crate::pipeline::{PipelineResponse, RequestPipeline};
use crate::upstream::is_hop_by_hop;
use crate::usage::{UsageEvent, UsageRecorder};

use self::middleware::{
    access_log_middleware, priority_route_middleware, real_ip, request_id_middleware,
};

/// Shared front door state
#[derive(Clone)]
pub struct ServerState {
    pub resources: Arc<GatewayResources>,
    pub pipeline: RequestPipeline,
}

/// Build the gateway router with all layers applied
#[must_use]
pub fn router(resources: Arc<GatewayResources>) -> Router {
    let deadline = Duration::from_secs(resources.config.http.request_deadline_secs);
    let state = ServerState {
        pipeline: RequestPipeline::new(Arc::clone(&resources)),
        resources,
    };

    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(health))
        .route("/health/ready", get(health_ready))
        .route("/version", get(version))
        .route("/metrics", get(metrics_handler))
        .route("/api/v1/meter/events", post(meter::submit_event))
        .fallback(proxy_handler)
        .layer(
            // ServiceBuilder applies top-down: panic recovery outermost,
            // then the header deadline, then request ids ahead of the
            // access log.
            ServiceBuilder::new()
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(TimeoutLayer::new(deadline))
                .layer(axum::middleware::from_fn(request_id_middleware))
                .layer(axum::middleware::from_fn(access_log_middleware))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    priority_route_middleware,
                )),
        )
        .with_state(state)
}

/// Bind and serve until the listener fails
///
/// # Errors
///
/// Returns an error if the port cannot be bound or the accept loop fails;
/// the binary exits non-zero on either.
pub async fn serve(resources: Arc<GatewayResources>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], resources.config.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("gateway listening on {addr}");

    let app = router(resources);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn health_ready(State(state): State<ServerState>) -> Response {
    let report = state.resources.health.ready().await;
    let status = if report.status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(report)).into_response()
}

async fn version() -> Json<serde_json::Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "service": service_names::APIGATE,
    }))
}

async fn metrics_handler(State(state): State<ServerState>) -> String {
    state
        .resources
        .metrics
        .render(state.resources.recorder.dropped())
}

async fn proxy_handler(State(state): State<ServerState>, request: Request) -> Response {
    dispatch_to_pipeline(state, request).await
}

/// Translate a wire request into a [`ProxyRequest`], run the pipeline,
/// and translate the outcome back.
pub(crate) async fn dispatch_to_pipeline(state: ServerState, request: Request) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)), |info| info.0);

    let (parts, body) = request.into_parts();
    let trace_id = parts
        .headers
        .get(headers::X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(
            || format!("req_{}", Uuid::new_v4().simple()),
            ToOwned::to_owned,
        );
    let remote_ip = real_ip(&parts.headers, peer);

    let max_body = state.resources.config.http.max_request_body_bytes;
    let body_bytes = match axum::body::to_bytes(body, max_body).await {
        Ok(bytes) => bytes,
        Err(_) => {
            // Oversize or unreadable body: denied requests still record
            // exactly one usage event.
            let mut event =
                UsageEvent::proxy(parts.method.as_str(), parts.uri.path(), 400);
            event.ip = Some(remote_ip);
            state.resources.recorder.record(event);
            state.resources.metrics.record_denial();
            return GatewayError::bad_request("request body exceeds limit")
                .with_request_id(trace_id)
                .into_response();
        }
    };

    let flattened = flatten_headers(&parts.headers);
    let host = parts
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()));
    let credentials = extract_credentials(
        &flattened,
        parts.uri.query(),
        &state.resources.config.auth.session_cookie,
    );
    let user_agent = flattened.get("user-agent").cloned();

    let proxy_request = ProxyRequest {
        api_key: credentials.api_key,
        session_token: credentials.session_token,
        method: parts.method.as_str().to_owned(),
        path: parts.uri.path().to_owned(),
        raw_query: parts.uri.query().map(ToOwned::to_owned),
        headers: flattened,
        host,
        body: body_bytes,
        remote_ip,
        user_agent,
        trace_id,
    };

    match state.pipeline.handle(proxy_request).await {
        PipelineResponse::Buffered(response) => buffered_response(response),
        PipelineResponse::Streaming(response) => streaming_response(response),
    }
}

fn buffered_response(response: ProxyResponse) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY));
    for (name, value) in &response.headers {
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|_| internal_error_response())
}

fn streaming_response(response: StreamingResponse) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY));
    for (name, value) in &response.headers {
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from_stream(response.body))
        .unwrap_or_else(|_| internal_error_response())
}

fn internal_error_response() -> Response {
    GatewayError::internal("response construction failed").into_response()
}

/// Flatten a wire header map to lowercase first values. Hop-by-hop
/// headers are stripped here, and `Host` is carried separately.
#[must_use]
pub fn flatten_headers(header_map: &HeaderMap) -> HashMap<String, String> {
    let mut flattened = HashMap::new();
    for (name, value) in header_map {
        let name = name.as_str().to_ascii_lowercase();
        if is_hop_by_hop(&name) || name == "host" {
            continue;
        }
        if let Ok(value) = value.to_str() {
            flattened.entry(name).or_insert_with(|| value.to_owned());
        }
    }
    flattened
}

/// Panic recovery: a panic in any handler becomes a 500 with a trace id;
/// the process does not exit.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> axum::http::Response<Full<Bytes>> {
    let detail = err.downcast_ref::<String>().map_or_else(
        || {
            err.downcast_ref::<&str>()
                .map_or("handler panicked", |s| *s)
        },
        String::as_str,
    );
    let trace_id = format!("req_{}", Uuid::new_v4().simple());
    tracing::error!(trace_id = %trace_id, "panic recovered: {detail}");

    let error = GatewayError::internal("request handler panicked").with_request_id(trace_id.clone());
    let body = serde_json::to_vec(&ErrorEnvelope::from(&error))
        .unwrap_or_else(|_| b"{\"errors\":[]}".to_vec());

    axum::http::Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header("content-type", "application/json")
        .header(headers::X_REQUEST_ID, trace_id)
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_default()
}
