// ABOUTME: Health and readiness checks for operational visibility
// ABOUTME: Liveness is local; readiness probes the default upstream and the usage queue
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

//! Health check endpoints and monitoring utilities

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::constants::service_names;
use crate::upstream::UpstreamClient;
use crate::usage::BufferedUsageRecorder;

/// Overall health status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
    pub duration_ms: u64,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub checks: Vec<ComponentHealth>,
}

/// Readiness checker with a short-lived cache so probes do not hammer the
/// upstream.
pub struct HealthChecker {
    start_time: Instant,
    upstream: Arc<UpstreamClient>,
    recorder: Arc<BufferedUsageRecorder>,
    usage_queue_capacity: usize,
    cached: RwLock<Option<(HealthResponse, Instant)>>,
    cache_ttl: Duration,
}

impl HealthChecker {
    #[must_use]
    pub fn new(
        upstream: Arc<UpstreamClient>,
        recorder: Arc<BufferedUsageRecorder>,
        usage_queue_capacity: usize,
    ) -> Self {
        Self {
            start_time: Instant::now(),
            upstream,
            recorder,
            usage_queue_capacity,
            cached: RwLock::new(None),
            cache_ttl: Duration::from_secs(10),
        }
    }

    /// Liveness: the process is up and serving
    #[must_use]
    pub fn live(&self) -> HealthResponse {
        HealthResponse {
            status: HealthStatus::Healthy,
            service: service_names::APIGATE.to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            checks: Vec::new(),
        }
    }

    /// Readiness: probe the default upstream and inspect the usage queue.
    /// Results are cached briefly.
    pub async fn ready(&self) -> HealthResponse {
        if let Some((response, at)) = self.cached.read().await.clone() {
            if at.elapsed() < self.cache_ttl {
                return response;
            }
        }

        let mut checks = Vec::new();

        let probe_start = Instant::now();
        let reachable = self.upstream.health_check().await;
        checks.push(ComponentHealth {
            name: "upstream".into(),
            status: if reachable {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            message: if reachable {
                "default upstream reachable".into()
            } else {
                "default upstream unreachable".into()
            },
            duration_ms: probe_start.elapsed().as_millis() as u64,
        });

        let depth = self.recorder.queue_depth();
        let queue_status = if depth >= self.usage_queue_capacity {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        checks.push(ComponentHealth {
            name: "usage_queue".into(),
            status: queue_status,
            message: format!("{depth}/{} events buffered", self.usage_queue_capacity),
            duration_ms: 0,
        });

        let overall = if checks.iter().any(|c| c.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else if checks.iter().any(|c| c.status == HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        let response = HealthResponse {
            status: overall,
            service: service_names::APIGATE.to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            checks,
        };

        *self.cached.write().await = Some((response.clone(), Instant::now()));
        response
    }
}
