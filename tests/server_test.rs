// ABOUTME: Front door tests over a fully served gateway instance
// ABOUTME: Covers reserved endpoints, proxying through the wire, body caps, and the meter endpoint
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use axum::Json;
use axum::Router;
use serde_json::{json, Value};
use std::net::SocketAddr;

use apigate::server;
use apigate::usage::UsageRecorder;
use common::{fixtures_with, plan, spawn_upstream, Fixtures};

/// Serve the gateway router on an ephemeral port
async fn spawn_gateway(f: &Fixtures) -> SocketAddr {
    let app = server::router(f.resources.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });
    addr
}

fn upstream_ok() -> Router {
    Router::new().fallback(|| async { Json(json!({ "ok": true })) })
}

#[tokio::test]
async fn health_version_and_metrics_bypass_the_pipeline() {
    let upstream = spawn_upstream(upstream_ok()).await;
    let f = fixtures_with(&format!("http://{upstream}"), Vec::new());
    let gateway = spawn_gateway(&f).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{gateway}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let response = client
        .get(format!("http://{gateway}/health/live"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client
        .get(format!("http://{gateway}/health/ready"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client
        .get(format!("http://{gateway}/version"))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["service"], "apigate");
    assert!(body["version"].is_string());

    let response = client
        .get(format!("http://{gateway}/metrics"))
        .send()
        .await
        .unwrap();
    let text = response.text().await.unwrap();
    assert!(text.contains("apigate_requests_total"));

    // Reserved endpoints never produce usage events.
    f.resources.recorder.flush().await.unwrap();
    assert!(f.sink.events().is_empty());
}

#[tokio::test]
async fn proxying_through_the_wire_works_end_to_end() {
    let upstream = spawn_upstream(upstream_ok()).await;
    let f = fixtures_with(&format!("http://{upstream}"), Vec::new());
    let (_, full_key) = f.seed_identity(plan("free", 60, 100_000));
    let gateway = spawn_gateway(&f).await;

    let response = reqwest::Client::new()
        .get(format!("http://{gateway}/api/data"))
        .header("x-api-key", &full_key)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok()),
        Some("59")
    );
    assert!(response.headers().contains_key("x-request-id"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn missing_credentials_yield_the_error_envelope() {
    let upstream = spawn_upstream(upstream_ok()).await;
    let f = fixtures_with(&format!("http://{upstream}"), Vec::new());
    let gateway = spawn_gateway(&f).await;

    let response = reqwest::Client::new()
        .get(format!("http://{gateway}/api/data"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let body: Value = response.json().await.unwrap();
    let first = &body["errors"][0];
    assert_eq!(first["code"], "missing_api_key");
    assert_eq!(first["title"], "missing_api_key");
    assert_eq!(first["status"], "401");
    assert!(first["detail"].is_string());
}

#[tokio::test]
async fn oversized_body_is_rejected_as_bad_request() {
    let upstream = spawn_upstream(upstream_ok()).await;
    let mut config = apigate::config::ServerConfig::default();
    config.upstream.default_base_url = format!("http://{upstream}");
    config.http.max_request_body_bytes = 1024;
    let f = common::fixtures_with_config(config, Vec::new());
    let (_, full_key) = f.seed_identity(plan("free", 60, 100_000));
    let gateway = spawn_gateway(&f).await;

    let client = reqwest::Client::new();

    // At the cap: accepted.
    let response = client
        .post(format!("http://{gateway}/api/upload"))
        .header("x-api-key", &full_key)
        .body(vec![0_u8; 1024])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // One byte over: rejected as bad_request.
    let response = client
        .post(format!("http://{gateway}/api/upload"))
        .header("x-api-key", &full_key)
        .body(vec![0_u8; 1025])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["errors"][0]["code"], "bad_request");
}

#[tokio::test]
async fn meter_endpoint_accepts_external_events() {
    let upstream = spawn_upstream(upstream_ok()).await;
    let f = fixtures_with(&format!("http://{upstream}"), Vec::new());
    let (user, full_key) = f.seed_identity(plan("free", 60, 100_000));
    let gateway = spawn_gateway(&f).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{gateway}/api/v1/meter/events"))
        .header("x-api-key", &full_key)
        .json(&json!({
            "event_type": "compute.minutes",
            "quantity": 12.5,
            "resource_id": "vm-1",
            "source_name": "scheduler"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "accepted");

    f.resources.recorder.flush().await.unwrap();
    let events = f.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "compute.minutes");
    assert_eq!(events[0].user_id, Some(user.id));
    assert!((events[0].quantity - 12.5).abs() < f64::EPSILON);

    // Unknown event types are rejected at the boundary.
    let response = client
        .post(format!("http://{gateway}/api/v1/meter/events"))
        .header("x-api-key", &full_key)
        .json(&json!({ "event_type": "deployment.paused" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // And the endpoint requires authentication.
    let response = client
        .post(format!("http://{gateway}/api/v1/meter/events"))
        .json(&json!({ "event_type": "compute.minutes" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn streaming_reaches_the_client_through_the_wire() {
    let sse = Router::new().route(
        "/chat",
        axum::routing::post(|| async {
            (
                [("content-type", "text/event-stream")],
                "data: hello\n\ndata: world\n\n",
            )
        }),
    );
    let upstream = spawn_upstream(sse).await;
    let f = fixtures_with(&format!("http://{upstream}"), Vec::new());
    let (_, full_key) = f.seed_identity(plan("free", 60, 100_000));
    let gateway = spawn_gateway(&f).await;

    let response = reqwest::Client::new()
        .post(format!("http://{gateway}/chat"))
        .header("x-api-key", &full_key)
        .header("accept", "text/event-stream")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("x-accel-buffering")
            .and_then(|v| v.to_str().ok()),
        Some("no")
    );
    let body = response.text().await.unwrap();
    assert_eq!(body, "data: hello\n\ndata: world\n\n");
}

#[test]
fn real_ip_prefers_forwarded_headers_and_keeps_ipv6_brackets() {
    use apigate::server::middleware::real_ip;
    use axum::http::HeaderMap;

    let peer: SocketAddr = "[::1]:8080".parse().unwrap();
    let mut headers = HeaderMap::new();
    assert_eq!(real_ip(&headers, peer), "[::1]");

    headers.insert("x-real-ip", "10.0.0.9".parse().unwrap());
    assert_eq!(real_ip(&headers, peer), "10.0.0.9");

    headers.insert(
        "x-forwarded-for",
        " 203.0.113.9 , 10.0.0.1".parse().unwrap(),
    );
    assert_eq!(real_ip(&headers, peer), "203.0.113.9");

    let v4_peer: SocketAddr = "192.0.2.5:443".parse().unwrap();
    assert_eq!(real_ip(&HeaderMap::new(), v4_peer), "192.0.2.5");
}
