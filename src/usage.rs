// ABOUTME: Usage event recording for downstream metering and billing
// ABOUTME: Non-blocking bounded buffer with drop-oldest overflow and monthly quota counters
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

//! # Usage Recording
//!
//! Every proxied or denied request produces exactly one [`UsageEvent`];
//! external events arrive through the metering endpoint. Recording never
//! blocks and never fails the request pipeline: the buffer is bounded and
//! overflow drops the oldest event while incrementing a counter that
//! metrics expose.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::constants::event_types;
use crate::errors::{GatewayError, GatewayResult};

/// Where an event originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageSource {
    Proxy,
    External,
}

impl UsageSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Proxy => "proxy",
            Self::External => "external",
        }
    }
}

/// One metering event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: Uuid,
    pub key_id: Option<String>,
    pub user_id: Option<Uuid>,
    pub plan_id: Option<String>,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub latency_ms: u64,
    pub request_bytes: u64,
    pub response_bytes: u64,
    /// Multiplier applied to the quantity; floored at 1.0 for billing
    pub cost_multiplier: f64,
    /// Billable quantity; non-positive values bill as one unit
    pub quantity: f64,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub resource_id: Option<String>,
    pub resource_type: Option<String>,
    pub source: UsageSource,
    pub source_name: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl UsageEvent {
    /// Construct a proxy event for one completed or denied request
    #[must_use]
    pub fn proxy(method: impl Into<String>, path: impl Into<String>, status: u16) -> Self {
        Self {
            id: Uuid::new_v4(),
            key_id: None,
            user_id: None,
            plan_id: None,
            method: method.into(),
            path: path.into(),
            status,
            latency_ms: 0,
            request_bytes: 0,
            response_bytes: 0,
            cost_multiplier: 1.0,
            quantity: 1.0,
            ip: None,
            user_agent: None,
            timestamp: Utc::now(),
            event_type: "api.request".into(),
            resource_id: None,
            resource_type: None,
            source: UsageSource::Proxy,
            source_name: None,
            metadata: HashMap::new(),
        }
    }

    /// Construct an externally submitted event
    ///
    /// # Errors
    ///
    /// Returns `bad_request` when the event type is neither a known type
    /// nor `custom.`-prefixed.
    pub fn external(event_type: impl Into<String>, quantity: f64) -> GatewayResult<Self> {
        let event_type = event_type.into();
        if !is_known_event_type(&event_type) {
            return Err(GatewayError::bad_request(format!(
                "unknown event type: {event_type}"
            )));
        }

        let mut event = Self::proxy(String::new(), String::new(), 0);
        event.event_type = event_type;
        event.source = UsageSource::External;
        event.quantity = if quantity > 0.0 { quantity } else { 1.0 };
        Ok(event)
    }

    /// Identity string used for monthly quota counting
    #[must_use]
    pub fn identity(&self) -> String {
        self.user_id.map_or_else(
            || format!("anon:{}", self.ip.as_deref().unwrap_or("-")),
            |user_id| user_id.to_string(),
        )
    }
}

/// Whether an event type is accepted at the metering boundary
#[must_use]
pub fn is_known_event_type(event_type: &str) -> bool {
    event_types::KNOWN.contains(&event_type)
        || event_type
            .strip_prefix(event_types::CUSTOM_PREFIX)
            .is_some_and(|rest| !rest.is_empty())
}

/// Billable quantity: the submitted quantity, defaulted to one unit
#[must_use]
pub fn effective_quantity(event: &UsageEvent) -> f64 {
    if event.quantity > 0.0 {
        event.quantity
    } else {
        1.0
    }
}

/// Billable cost: quantity times the multiplier, floored at 1.0
#[must_use]
pub fn effective_cost(event: &UsageEvent) -> f64 {
    effective_quantity(event) * event.cost_multiplier.max(1.0)
}

/// Destination for drained usage events
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Persist a batch of events
    async fn submit(&self, events: Vec<UsageEvent>) -> GatewayResult<()>;
}

/// Sink that emits events to the structured log
#[derive(Debug, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn submit(&self, events: Vec<UsageEvent>) -> GatewayResult<()> {
        for event in events {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                status = event.status,
                quantity = event.quantity,
                cost = effective_cost(&event),
                source = event.source.as_str(),
                "usage event"
            );
        }
        Ok(())
    }
}

/// Sink that collects events in memory, for tests and single-process use
#[derive(Debug, Default)]
pub struct InMemoryUsageSink {
    events: Mutex<Vec<UsageEvent>>,
}

impl InMemoryUsageSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events submitted so far
    #[must_use]
    pub fn events(&self) -> Vec<UsageEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl UsageSink for InMemoryUsageSink {
    async fn submit(&self, mut events: Vec<UsageEvent>) -> GatewayResult<()> {
        if let Ok(mut guard) = self.events.lock() {
            guard.append(&mut events);
        }
        Ok(())
    }
}

/// Non-blocking event recorder contract
#[async_trait]
pub trait UsageRecorder: Send + Sync {
    /// Accept an event without blocking. Must never fail the pipeline.
    fn record(&self, event: UsageEvent);

    /// Drain buffered events to durable storage
    async fn flush(&self) -> GatewayResult<()>;

    /// Flush and release resources
    async fn close(&self) -> GatewayResult<()>;
}

/// Bounded buffering recorder with drop-oldest overflow
pub struct BufferedUsageRecorder {
    queue: Mutex<VecDeque<UsageEvent>>,
    capacity: usize,
    dropped: AtomicU64,
    /// `identity:YYYY-MM` to proxied request count
    monthly: DashMap<String, u64>,
    sink: Arc<dyn UsageSink>,
}

impl BufferedUsageRecorder {
    #[must_use]
    pub fn new(capacity: usize, sink: Arc<dyn UsageSink>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            monthly: DashMap::new(),
            sink,
        }
    }

    /// Events dropped to overflow since startup
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Events currently buffered
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Proxied requests recorded for an identity in the current month
    #[must_use]
    pub fn monthly_count(&self, identity: &str) -> u64 {
        let key = format!("{identity}:{}", Utc::now().format("%Y-%m"));
        self.monthly.get(&key).map_or(0, |entry| *entry)
    }

    fn count_monthly(&self, event: &UsageEvent) {
        if event.source != UsageSource::Proxy {
            return;
        }
        let key = format!("{}:{}", event.identity(), event.timestamp.format("%Y-%m"));
        *self.monthly.entry(key).or_insert(0) += 1;
    }
}

#[async_trait]
impl UsageRecorder for BufferedUsageRecorder {
    fn record(&self, event: UsageEvent) {
        self.count_monthly(&event);

        let Ok(mut queue) = self.queue.lock() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(event);
    }

    async fn flush(&self) -> GatewayResult<()> {
        let drained: Vec<UsageEvent> = {
            let Ok(mut queue) = self.queue.lock() else {
                return Err(GatewayError::internal("usage queue lock poisoned"));
            };
            queue.drain(..).collect()
        };
        if drained.is_empty() {
            return Ok(());
        }
        self.sink.submit(drained).await
    }

    async fn close(&self) -> GatewayResult<()> {
        self.flush().await
    }
}
