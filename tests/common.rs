// ABOUTME: Shared fixtures for gateway integration tests
// ABOUTME: In-memory repositories, seeded identities, and ephemeral upstream doubles
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(dead_code)]

use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

use apigate::api_keys::ApiKeyManager;
use apigate::auth::{Authenticator, SessionTokenManager};
use apigate::capabilities::CapabilityContainer;
use apigate::config::ServerConfig;
use apigate::context::GatewayResources;
use apigate::health::HealthChecker;
use apigate::metrics::GatewayMetrics;
use apigate::models::{Plan, ProxyRequest, Route, Session, User, UserStatus};
use apigate::pipeline::RequestPipeline;
use apigate::rate_limiting::WindowStore;
use apigate::routing::{ReservedPaths, RouteService, RouteTable};
use apigate::storage::{
    InMemoryKeyRepository, InMemoryPlanRepository, InMemorySessionStore,
    InMemoryUpstreamRepository, InMemoryUserRepository,
};
use apigate::upstream::UpstreamClient;
use apigate::usage::{BufferedUsageRecorder, InMemoryUsageSink};

pub const TEST_SESSION_SECRET: &str = "integration-test-secret";

/// Everything a pipeline test needs, wired over in-memory repositories
pub struct Fixtures {
    pub config: Arc<ServerConfig>,
    pub resources: Arc<GatewayResources>,
    pub pipeline: RequestPipeline,
    pub keys: Arc<InMemoryKeyRepository>,
    pub users: Arc<InMemoryUserRepository>,
    pub plans: Arc<InMemoryPlanRepository>,
    pub sessions: Arc<InMemorySessionStore>,
    pub upstreams: Arc<InMemoryUpstreamRepository>,
    pub sink: Arc<InMemoryUsageSink>,
    pub session_tokens: SessionTokenManager,
}

/// Build fixtures against a default upstream base URL and route set
pub fn fixtures_with(default_base: &str, routes: Vec<Route>) -> Fixtures {
    let mut config = ServerConfig::default();
    config.upstream.default_base_url = default_base.to_owned();
    config.auth.session_secret = TEST_SESSION_SECRET.to_owned();
    fixtures_with_config(config, routes)
}

/// Build fixtures with full control over the configuration
pub fn fixtures_with_config(config: ServerConfig, routes: Vec<Route>) -> Fixtures {
    let config = Arc::new(config);

    let keys = Arc::new(InMemoryKeyRepository::new());
    let users = Arc::new(InMemoryUserRepository::new());
    let plans = Arc::new(InMemoryPlanRepository::new());
    let sessions = Arc::new(InMemorySessionStore::new());
    let upstreams = Arc::new(InMemoryUpstreamRepository::new());

    plans.insert(Plan {
        id: config.rate_limit.anonymous_plan_id.clone(),
        name: "Free".into(),
        rate_limit_per_minute: 60,
        requests_per_month: 100_000,
        byte_allowance: None,
    });

    let reserved = ReservedPaths::with_extras(&config.reserved.extra_prefixes);
    let routes = Arc::new(RouteService::new(
        RouteTable::compile(routes).expect("test routes must compile"),
        reserved,
    ));

    let session_tokens = SessionTokenManager::new(&config.auth.session_secret, 24);
    let authenticator = Authenticator::new(
        keys.clone(),
        users.clone(),
        plans.clone(),
        sessions.clone(),
        session_tokens.clone(),
    );

    let upstream_client = Arc::new(
        UpstreamClient::new(&config.upstream, config.http.max_response_body_bytes)
            .expect("upstream client must build"),
    );

    let sink = Arc::new(InMemoryUsageSink::new());
    let recorder = Arc::new(BufferedUsageRecorder::new(
        config.usage.queue_capacity,
        sink.clone(),
    ));

    let health = Arc::new(HealthChecker::new(
        upstream_client.clone(),
        recorder.clone(),
        config.usage.queue_capacity,
    ));

    let resources = Arc::new(GatewayResources::new(
        config.clone(),
        routes,
        authenticator,
        Arc::new(WindowStore::new()),
        upstreams.clone(),
        upstream_client,
        recorder,
        Arc::new(CapabilityContainer::new()),
        Arc::new(GatewayMetrics::new()),
        health,
    ));

    Fixtures {
        pipeline: RequestPipeline::new(resources.clone()),
        config,
        resources,
        keys,
        users,
        plans,
        sessions,
        upstreams,
        sink,
        session_tokens,
    }
}

impl Fixtures {
    /// Seed a plan, an active user on it, and an API key. Returns the
    /// user and the full key.
    pub fn seed_identity(&self, plan: Plan) -> (User, String) {
        self.seed_identity_with_status(plan, UserStatus::Active)
    }

    pub fn seed_identity_with_status(&self, plan: Plan, status: UserStatus) -> (User, String) {
        let plan_id = plan.id.clone();
        self.plans.insert(plan);

        let user = User {
            id: Uuid::new_v4(),
            email: format!("user+{}@example.com", Uuid::new_v4().simple()),
            status,
            plan_id,
            created_at: Utc::now(),
        };
        self.users.insert(user.clone());

        let manager = ApiKeyManager::new();
        let (record, full_key) = manager.create_key(user.id, "test key");
        self.keys.insert(record);

        (user, full_key)
    }

    /// Seed a session for a user and return a valid session token
    pub fn seed_session(&self, user_id: Uuid) -> String {
        let token_id = Uuid::new_v4().to_string();
        self.sessions.insert(Session {
            token_id: token_id.clone(),
            user_id,
            expires_at: Utc::now() + chrono::Duration::hours(1),
        });
        self.session_tokens
            .generate(user_id, &token_id)
            .expect("token generation")
    }
}

/// A plan with the given per-minute limit and monthly quota
pub fn plan(id: &str, rate_limit_per_minute: u32, requests_per_month: u64) -> Plan {
    Plan {
        id: id.into(),
        name: id.into(),
        rate_limit_per_minute,
        requests_per_month,
        byte_allowance: None,
    }
}

/// A minimal proxy request
pub fn proxy_request(method: &str, path: &str) -> ProxyRequest {
    ProxyRequest {
        api_key: None,
        session_token: None,
        method: method.into(),
        path: path.into(),
        raw_query: None,
        headers: HashMap::new(),
        host: None,
        body: Bytes::new(),
        remote_ip: "203.0.113.7".into(),
        user_agent: Some("apigate-tests/1.0".into()),
        trace_id: format!("req_{}", Uuid::new_v4().simple()),
    }
}

/// A catch-all route definition to customize per test
pub fn route(id: &str, path_pattern: &str) -> Route {
    Route {
        id: id.into(),
        priority: 0,
        host_pattern: "*".into(),
        methods: Vec::new(),
        path_pattern: path_pattern.into(),
        rewrite: None,
        upstream_id: None,
        protocol: apigate::models::Protocol::Http,
        auth_required: true,
        metering_expression: String::new(),
        default_plan_id: None,
    }
}

/// Serve an axum router on an ephemeral local port
pub async fn spawn_upstream(app: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });
    addr
}
