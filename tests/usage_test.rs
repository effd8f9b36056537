// ABOUTME: Usage recorder tests for buffering, overflow, validation, and cost computation
// ABOUTME: Covers drop-oldest semantics, monthly counting, and external event type rules
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use std::sync::Arc;
use uuid::Uuid;

use apigate::usage::{
    effective_cost, effective_quantity, is_known_event_type, BufferedUsageRecorder,
    InMemoryUsageSink, UsageEvent, UsageRecorder, UsageSource,
};

#[test]
fn known_event_types_are_accepted() {
    for event_type in [
        "api.request",
        "deployment.created",
        "deployment.started",
        "deployment.stopped",
        "deployment.deleted",
        "compute.minutes",
        "storage.gb_hours",
        "bandwidth.gb",
        "custom.anything",
    ] {
        assert!(is_known_event_type(event_type), "{event_type}");
    }
}

#[test]
fn unknown_event_types_are_rejected() {
    for event_type in ["", "api.requests", "deployment.paused", "custom.", "tokens"] {
        assert!(!is_known_event_type(event_type), "{event_type}");
    }
    assert!(UsageEvent::external("deployment.paused", 1.0).is_err());
}

#[test]
fn external_events_default_non_positive_quantity() {
    let event = UsageEvent::external("compute.minutes", -3.0).unwrap();
    assert!((event.quantity - 1.0).abs() < f64::EPSILON);
    assert_eq!(event.source, UsageSource::External);

    let event = UsageEvent::external("compute.minutes", 42.5).unwrap();
    assert!((event.quantity - 42.5).abs() < f64::EPSILON);
}

#[test]
fn effective_cost_floors_the_multiplier() {
    let mut event = UsageEvent::proxy("GET", "/x", 200);
    event.quantity = 10.0;
    event.cost_multiplier = 0.5;
    assert!((effective_quantity(&event) - 10.0).abs() < f64::EPSILON);
    assert!((effective_cost(&event) - 10.0).abs() < f64::EPSILON);

    event.cost_multiplier = 2.0;
    assert!((effective_cost(&event) - 20.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn record_buffers_and_flush_drains() {
    let sink = Arc::new(InMemoryUsageSink::new());
    let recorder = BufferedUsageRecorder::new(16, sink.clone());

    recorder.record(UsageEvent::proxy("GET", "/a", 200));
    recorder.record(UsageEvent::proxy("GET", "/b", 401));
    assert_eq!(recorder.queue_depth(), 2);

    recorder.flush().await.unwrap();
    assert_eq!(recorder.queue_depth(), 0);

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].path, "/a");
    assert_eq!(events[1].status, 401);
}

#[tokio::test]
async fn overflow_drops_oldest_and_counts() {
    let sink = Arc::new(InMemoryUsageSink::new());
    let recorder = BufferedUsageRecorder::new(3, sink.clone());

    for path in ["/1", "/2", "/3", "/4", "/5"] {
        recorder.record(UsageEvent::proxy("GET", path, 200));
    }
    assert_eq!(recorder.queue_depth(), 3);
    assert_eq!(recorder.dropped(), 2);

    recorder.flush().await.unwrap();
    let paths: Vec<_> = sink.events().into_iter().map(|e| e.path).collect();
    assert_eq!(paths, vec!["/3", "/4", "/5"]);
}

#[tokio::test]
async fn monthly_counter_tracks_proxy_events_per_identity() {
    let sink = Arc::new(InMemoryUsageSink::new());
    let recorder = BufferedUsageRecorder::new(16, sink);
    let user = Uuid::new_v4();

    let mut event = UsageEvent::proxy("GET", "/a", 200);
    event.user_id = Some(user);
    recorder.record(event.clone());
    recorder.record(event);

    let external = UsageEvent::external("compute.minutes", 5.0).unwrap();
    recorder.record(external);

    assert_eq!(recorder.monthly_count(&user.to_string()), 2);
    assert_eq!(recorder.monthly_count("someone-else"), 0);
}

#[tokio::test]
async fn close_flushes_remaining_events() {
    let sink = Arc::new(InMemoryUsageSink::new());
    let recorder = BufferedUsageRecorder::new(16, sink.clone());
    recorder.record(UsageEvent::proxy("GET", "/late", 200));
    recorder.close().await.unwrap();
    assert_eq!(sink.events().len(), 1);
}
