// ABOUTME: Gateway server binary: configuration, resource wiring, and the serve loop
// ABOUTME: Exits non-zero on fatal init failure (port bind, bad configuration)
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

#![forbid(unsafe_code)]

//! # Apigate Server Binary
//!
//! Boots the gateway: structured logging, environment configuration,
//! in-memory repositories, the capability container, and the HTTP front
//! door.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use apigate::auth::{Authenticator, SessionTokenManager};
use apigate::capabilities::{
    Capability, CapabilityContainer, MemoryCacheProvider, MemoryQueueProvider, ProviderHandle,
    ProviderOptions, Sha256HashProvider,
};
use apigate::config::ServerConfig;
use apigate::context::GatewayResources;
use apigate::health::HealthChecker;
use apigate::logging;
use apigate::metrics::GatewayMetrics;
use apigate::models::Plan;
use apigate::rate_limiting::WindowStore;
use apigate::routing::{ReservedPaths, RouteService, RouteTable};
use apigate::server;
use apigate::storage::{
    InMemoryKeyRepository, InMemoryPlanRepository, InMemoryRouteRepository,
    InMemorySessionStore, InMemoryUpstreamRepository, InMemoryUserRepository, RouteRepository,
};
use apigate::upstream::UpstreamClient;
use apigate::usage::{BufferedUsageRecorder, TracingUsageSink, UsageRecorder};

#[derive(Parser)]
#[command(name = "apigate")]
#[command(about = "API gateway core - auth, routing, rate limiting, usage metering")]
pub struct Args {
    /// Override the HTTP listen port
    #[arg(long)]
    http_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = setup_configuration(&args)?;

    if let Err(e) = bootstrap_server(config).await {
        error!("fatal: {e}");
        return Err(e);
    }
    Ok(())
}

/// Load configuration from the environment and apply argument overrides
fn setup_configuration(args: &Args) -> Result<ServerConfig> {
    logging::init_from_env()?;

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }

    info!("starting apigate");
    info!("{}", config.summary());
    Ok(config)
}

/// Wire every subsystem and run the serve loop
async fn bootstrap_server(config: ServerConfig) -> Result<()> {
    let config = Arc::new(config);

    // Repositories. Durable backends plug in behind these traits; the
    // in-memory set serves single-process deployments.
    let keys = Arc::new(InMemoryKeyRepository::new());
    let users = Arc::new(InMemoryUserRepository::new());
    let plans = Arc::new(InMemoryPlanRepository::new());
    let sessions = Arc::new(InMemorySessionStore::new());
    let upstreams = Arc::new(InMemoryUpstreamRepository::new());
    let route_repo = Arc::new(InMemoryRouteRepository::new(Vec::new()));

    plans.insert(Plan {
        id: config.rate_limit.anonymous_plan_id.clone(),
        name: "Free".into(),
        rate_limit_per_minute: 60,
        requests_per_month: 100_000,
        byte_allowance: None,
    });

    let reserved = ReservedPaths::with_extras(&config.reserved.extra_prefixes);
    let initial_routes = route_repo.list_routes().await?;
    let routes = Arc::new(RouteService::new(
        RouteTable::compile(initial_routes).map_err(|e| anyhow::anyhow!(e.to_string()))?,
        reserved,
    ));

    let session_tokens = SessionTokenManager::new(&config.auth.session_secret, 24);
    let authenticator = Authenticator::new(keys, users, plans, sessions, session_tokens);

    let upstream_client = Arc::new(
        UpstreamClient::new(&config.upstream, config.http.max_response_body_bytes)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?,
    );

    let recorder = Arc::new(BufferedUsageRecorder::new(
        config.usage.queue_capacity,
        Arc::new(TracingUsageSink),
    ));

    let capabilities = Arc::new(build_capabilities()?);
    let metrics = Arc::new(GatewayMetrics::new());
    let windows = Arc::new(WindowStore::new());
    let health = Arc::new(HealthChecker::new(
        Arc::clone(&upstream_client),
        Arc::clone(&recorder),
        config.usage.queue_capacity,
    ));

    let resources = Arc::new(GatewayResources::new(
        Arc::clone(&config),
        routes,
        authenticator,
        Arc::clone(&windows),
        upstreams,
        upstream_client,
        Arc::clone(&recorder),
        Arc::clone(&capabilities),
        metrics,
        health,
    ));

    spawn_background_tasks(&config, Arc::clone(&recorder), windows);

    let result = server::serve(resources).await;

    if let Err(e) = recorder.close().await {
        error!("usage recorder close failed: {e}");
    }
    if let Err(e) = capabilities.close_all().await {
        error!("capability teardown failed: {e}");
    }
    result
}

/// Register the built-in capability providers
fn build_capabilities() -> Result<CapabilityContainer> {
    let mut container = CapabilityContainer::new();
    container
        .register(
            &Capability::Cache,
            "memory",
            ProviderHandle::Cache(Arc::new(MemoryCacheProvider::new())),
            ProviderOptions {
                enabled: true,
                default: true,
            },
        )
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    container
        .register(
            &Capability::Queue,
            "memory",
            ProviderHandle::Queue(Arc::new(MemoryQueueProvider::new())),
            ProviderOptions {
                enabled: true,
                default: true,
            },
        )
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    container
        .register(
            &Capability::Hasher,
            "sha256",
            ProviderHandle::Hasher(Arc::new(Sha256HashProvider)),
            ProviderOptions {
                enabled: true,
                default: true,
            },
        )
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    Ok(container)
}

/// Periodic usage flushing and window pruning
fn spawn_background_tasks(
    config: &ServerConfig,
    recorder: Arc<BufferedUsageRecorder>,
    windows: Arc<WindowStore>,
) {
    let flush_interval = std::time::Duration::from_secs(config.usage.flush_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(flush_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = recorder.flush().await {
                tracing::warn!("usage flush failed: {e}");
            }
        }
    });

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            ticker.tick().await;
            windows.prune_expired(chrono::Utc::now().timestamp());
        }
    });
}
