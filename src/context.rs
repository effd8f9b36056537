// ABOUTME: Centralized resource container for dependency injection
// ABOUTME: Bundles the shared subsystems the pipeline and front door consume
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

//! Shared resource container. Expensive objects (clients, stores, the
//! route snapshot) are built once at boot and shared by reference;
//! nothing here is recreated per request.

use std::sync::Arc;

use crate::auth::Authenticator;
use crate::capabilities::CapabilityContainer;
use crate::config::ServerConfig;
use crate::health::HealthChecker;
use crate::metrics::GatewayMetrics;
use crate::rate_limiting::WindowStore;
use crate::routing::RouteService;
use crate::storage::UpstreamRepository;
use crate::upstream::UpstreamClient;
use crate::usage::BufferedUsageRecorder;

/// Shared server resources
#[derive(Clone)]
pub struct GatewayResources {
    /// Server configuration loaded from the environment
    pub config: Arc<ServerConfig>,
    /// Live route snapshot and reserved-path filter
    pub routes: Arc<RouteService>,
    /// Credential resolver
    pub authenticator: Authenticator,
    /// Rate-limit window store
    pub windows: Arc<WindowStore>,
    /// Upstream definitions for route-specified targets
    pub upstreams: Arc<dyn UpstreamRepository>,
    /// Buffered and streaming forwarders
    pub upstream_client: Arc<UpstreamClient>,
    /// Usage event recorder and monthly quota counter
    pub recorder: Arc<BufferedUsageRecorder>,
    /// Capability container, immutable after boot
    pub capabilities: Arc<CapabilityContainer>,
    /// Process-wide counters
    pub metrics: Arc<GatewayMetrics>,
    /// Health and readiness checker
    pub health: Arc<HealthChecker>,
}

impl GatewayResources {
    /// Assemble the container from its parts
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ServerConfig>,
        routes: Arc<RouteService>,
        authenticator: Authenticator,
        windows: Arc<WindowStore>,
        upstreams: Arc<dyn UpstreamRepository>,
        upstream_client: Arc<UpstreamClient>,
        recorder: Arc<BufferedUsageRecorder>,
        capabilities: Arc<CapabilityContainer>,
        metrics: Arc<GatewayMetrics>,
        health: Arc<HealthChecker>,
    ) -> Self {
        Self {
            config,
            routes,
            authenticator,
            windows,
            upstreams,
            upstream_client,
            recorder,
            capabilities,
            metrics,
            health,
        }
    }
}
