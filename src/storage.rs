// ABOUTME: Repository trait contracts the gateway core consumes, plus in-memory implementations
// ABOUTME: Persistence backends are external collaborators; the core only sees these interfaces
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

//! # Repositories
//!
//! Trait contracts for the key, user, plan, route, upstream, and session
//! stores. Durable backends live outside the core; the in-memory
//! implementations here back the test suite and single-process
//! deployments, and double as the reference semantics for external
//! implementations.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::errors::GatewayResult;
use crate::models::{ApiKeyRecord, Plan, Route, Session, Upstream, User};

/// Lookup of stored `API` key records by their plaintext prefix
#[async_trait]
pub trait KeyRepository: Send + Sync {
    /// Find the record whose lookup prefix matches
    async fn find_by_prefix(&self, prefix: &str) -> GatewayResult<Option<ApiKeyRecord>>;

    /// Record a successful use of the key; failures are non-fatal
    async fn touch_last_used(&self, key_id: &str) -> GatewayResult<()>;
}

/// Lookup of user accounts
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, user_id: Uuid) -> GatewayResult<Option<User>>;
}

/// Lookup of plans
#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn find_by_id(&self, plan_id: &str) -> GatewayResult<Option<Plan>>;
}

/// Source of route definitions for table (re)compilation
#[async_trait]
pub trait RouteRepository: Send + Sync {
    async fn list_routes(&self) -> GatewayResult<Vec<Route>>;
}

/// Lookup of upstream definitions
#[async_trait]
pub trait UpstreamRepository: Send + Sync {
    async fn find_by_id(&self, upstream_id: &str) -> GatewayResult<Option<Upstream>>;
}

/// Lookup of server-side sessions by token id
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find_by_token_id(&self, token_id: &str) -> GatewayResult<Option<Session>>;
}

/// In-memory key repository
#[derive(Debug, Default)]
pub struct InMemoryKeyRepository {
    by_prefix: DashMap<String, ApiKeyRecord>,
}

impl InMemoryKeyRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a key record
    pub fn insert(&self, record: ApiKeyRecord) {
        self.by_prefix.insert(record.key_prefix.clone(), record);
    }
}

#[async_trait]
impl KeyRepository for InMemoryKeyRepository {
    async fn find_by_prefix(&self, prefix: &str) -> GatewayResult<Option<ApiKeyRecord>> {
        Ok(self.by_prefix.get(prefix).map(|entry| entry.value().clone()))
    }

    async fn touch_last_used(&self, key_id: &str) -> GatewayResult<()> {
        for mut entry in self.by_prefix.iter_mut() {
            if entry.id == key_id {
                entry.last_used_at = Some(Utc::now());
                break;
            }
        }
        Ok(())
    }
}

/// In-memory user repository
#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    users: DashMap<Uuid, User>,
}

impl InMemoryUserRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) {
        self.users.insert(user.id, user);
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, user_id: Uuid) -> GatewayResult<Option<User>> {
        Ok(self.users.get(&user_id).map(|entry| entry.value().clone()))
    }
}

/// In-memory plan repository
#[derive(Debug, Default)]
pub struct InMemoryPlanRepository {
    plans: DashMap<String, Plan>,
}

impl InMemoryPlanRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, plan: Plan) {
        self.plans.insert(plan.id.clone(), plan);
    }
}

#[async_trait]
impl PlanRepository for InMemoryPlanRepository {
    async fn find_by_id(&self, plan_id: &str) -> GatewayResult<Option<Plan>> {
        Ok(self.plans.get(plan_id).map(|entry| entry.value().clone()))
    }
}

/// In-memory route repository
#[derive(Debug, Default)]
pub struct InMemoryRouteRepository {
    routes: std::sync::Mutex<Vec<Route>>,
}

impl InMemoryRouteRepository {
    #[must_use]
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            routes: std::sync::Mutex::new(routes),
        }
    }

    /// Replace the stored definitions, for reload tests
    pub fn set_routes(&self, routes: Vec<Route>) {
        if let Ok(mut guard) = self.routes.lock() {
            *guard = routes;
        }
    }
}

#[async_trait]
impl RouteRepository for InMemoryRouteRepository {
    async fn list_routes(&self) -> GatewayResult<Vec<Route>> {
        Ok(self
            .routes
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default())
    }
}

/// In-memory upstream repository
#[derive(Debug, Default)]
pub struct InMemoryUpstreamRepository {
    upstreams: DashMap<String, Upstream>,
}

impl InMemoryUpstreamRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, upstream: Upstream) {
        self.upstreams.insert(upstream.id.clone(), upstream);
    }
}

#[async_trait]
impl UpstreamRepository for InMemoryUpstreamRepository {
    async fn find_by_id(&self, upstream_id: &str) -> GatewayResult<Option<Upstream>> {
        Ok(self.upstreams.get(upstream_id).map(|entry| entry.value().clone()))
    }
}

/// In-memory session store
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Session>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Session) {
        self.sessions.insert(session.token_id.clone(), session);
    }

    pub fn remove(&self, token_id: &str) {
        self.sessions.remove(token_id);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn find_by_token_id(&self, token_id: &str) -> GatewayResult<Option<Session>> {
        Ok(self.sessions.get(token_id).map(|entry| entry.value().clone()))
    }
}
