// ABOUTME: SSE parser and metered stream reader tests
// ABOUTME: Covers field rules, event commits, byte counting, accumulation, and close idempotence
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use bytes::Bytes;
use futures_util::{stream, StreamExt};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use apigate::errors::GatewayResult;
use apigate::sse::{last_data, last_event, parse_events, MeteredStream};

#[test]
fn parses_all_recognized_fields() {
    let input = b"event: update\nid: 42\nretry: 3000\ndata: payload\n\n";
    let events = parse_events(input);
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.event.as_deref(), Some("update"));
    assert_eq!(event.id.as_deref(), Some("42"));
    assert_eq!(event.retry, Some(3000));
    assert_eq!(event.data.as_deref(), Some("payload"));
}

#[test]
fn blank_line_between_events_separates_them() {
    let events = parse_events(b"data: hello\n\ndata: world\n\n");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].data.as_deref(), Some("hello"));
    assert_eq!(events[1].data.as_deref(), Some("world"));
}

#[test]
fn retry_only_does_not_commit() {
    let events = parse_events(b"retry: 100\n\n");
    assert!(events.is_empty());
}

#[test]
fn field_without_colon_has_empty_value() {
    let events = parse_events(b"data\n\n");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].data.as_deref(), Some(""));
}

#[test]
fn invalid_retry_is_ignored() {
    let events = parse_events(b"retry: soon\ndata: x\n\n");
    assert_eq!(events[0].retry, None);
}

#[test]
fn last_event_and_last_data() {
    let input = b"data: first\n\nevent: done\ndata: {\"tokens\": 7}\n\n";
    let event = last_event(input).unwrap();
    assert_eq!(event.event.as_deref(), Some("done"));
    assert_eq!(last_data(input).as_deref(), Some("{\"tokens\": 7}"));
}

#[test]
fn last_data_of_empty_input_is_none() {
    assert!(last_data(b"").is_none());
    assert!(last_data(b": just a comment\n").is_none());
}

fn chunk_stream(chunks: Vec<&'static [u8]>) -> apigate::models::ByteStream {
    stream::iter(
        chunks
            .into_iter()
            .map(|c| GatewayResult::Ok(Bytes::from_static(c))),
    )
    .boxed()
}

#[tokio::test]
async fn reader_counts_bytes_and_chunks() {
    let metered = MeteredStream::new(chunk_stream(vec![b"data: hello\n\n", b"data: world\n\n"]), false);
    let meter = metered.meter();

    let collected: Vec<_> = metered.collect().await;
    assert_eq!(collected.len(), 2);

    let metrics = meter.metrics();
    assert_eq!(metrics.total_bytes, 26);
    assert_eq!(metrics.chunk_count, 2);
    assert_eq!(metrics.last_chunk.as_ref(), b"data: world\n\n");
    assert!(metrics.all_data.is_none());
}

#[tokio::test]
async fn reader_accumulates_when_asked() {
    let metered = MeteredStream::new(chunk_stream(vec![b"one", b"two", b"three"]), true);
    let meter = metered.meter();

    let _: Vec<_> = metered.collect().await;

    let metrics = meter.metrics();
    assert_eq!(metrics.total_bytes, 11);
    assert_eq!(metrics.chunk_count, 3);
    assert_eq!(metrics.all_data.unwrap().as_ref(), b"onetwothree");
}

#[tokio::test]
async fn close_handle_fires_exactly_once() {
    let closes = Arc::new(AtomicU32::new(0));
    let counter = closes.clone();

    let mut metered = MeteredStream::new(chunk_stream(vec![b"x"]), false)
        .with_close_handle(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

    metered.close();
    metered.close();
    drop(metered);

    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dropping_unconsumed_stream_closes_it() {
    let closes = Arc::new(AtomicU32::new(0));
    let counter = closes.clone();

    let metered = MeteredStream::new(chunk_stream(vec![b"x", b"y"]), false)
        .with_close_handle(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    drop(metered);

    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn metrics_survive_the_stream() {
    let metered = MeteredStream::new(chunk_stream(vec![b"abc"]), false);
    let meter = metered.meter();
    let _: Vec<_> = metered.collect().await;
    // The stream is gone; the handle still reads final totals.
    assert_eq!(meter.metrics().total_bytes, 3);
}
