// ABOUTME: Credential extraction and identity resolution for the request pipeline
// ABOUTME: Resolves API keys and session tokens to an immutable AuthContext with plan limits
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

//! # Authentication
//!
//! Credentials are extracted in a fixed order: `Authorization: Bearer`,
//! `X-API-Key`, `?api_key=`, then the session cookie. Key verification
//! hashes the presented key and compares digests in constant time; the
//! resulting error never reveals whether the record was missing or the
//! hash mismatched. Session tokens are HS256 JWTs resolved through the
//! session store before following the same user and plan path.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::api_keys::ApiKeyManager;
use crate::constants::headers;
use crate::errors::{GatewayError, GatewayResult};
use crate::models::{AuthContext, UserStatus};
use crate::storage::{KeyRepository, PlanRepository, SessionStore, UserRepository};

/// Raw credentials pulled off the wire by the front door
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub session_token: Option<String>,
}

impl Credentials {
    /// Whether neither credential slot is populated
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.api_key.is_none() && self.session_token.is_none()
    }
}

/// Extract credentials from headers and query, in precedence order
#[must_use]
pub fn extract_credentials(
    request_headers: &HashMap<String, String>,
    raw_query: Option<&str>,
    session_cookie: &str,
) -> Credentials {
    let mut api_key = None;

    if let Some(authorization) = request_headers.get("authorization") {
        if let Some(token) = strip_bearer(authorization) {
            if !token.is_empty() {
                api_key = Some(token.to_owned());
            }
        }
    }

    if api_key.is_none() {
        if let Some(value) = request_headers.get(headers::X_API_KEY) {
            if !value.is_empty() {
                api_key = Some(value.clone());
            }
        }
    }

    if api_key.is_none() {
        if let Some(query) = raw_query {
            api_key = query_param(query, "api_key");
        }
    }

    let session_token = request_headers
        .get("cookie")
        .and_then(|cookies| cookie_value(cookies, session_cookie));

    Credentials {
        api_key,
        session_token,
    }
}

fn strip_bearer(authorization: &str) -> Option<&str> {
    let (scheme, rest) = authorization.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(rest.trim())
    } else {
        None
    }
}

fn query_param(raw_query: &str, name: &str) -> Option<String> {
    raw_query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == name && !value.is_empty() {
            Some(value.to_owned())
        } else {
            None
        }
    })
}

fn cookie_value(cookie_header: &str, name: &str) -> Option<String> {
    cookie_header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        if key == name && !value.is_empty() {
            Some(value.to_owned())
        } else {
            None
        }
    })
}

/// Claims carried by a session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id
    pub sub: String,
    /// Token id, resolved through the session store
    pub jti: String,
    /// Expiry, seconds since the epoch
    pub exp: i64,
    /// Issued at, seconds since the epoch
    pub iat: i64,
}

/// HS256 session token issuer and validator
#[derive(Clone)]
pub struct SessionTokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_hours: i64,
}

impl SessionTokenManager {
    #[must_use]
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_hours,
        }
    }

    /// Issue a session token for a user
    ///
    /// # Errors
    ///
    /// Returns an internal error if signing fails.
    pub fn generate(&self, user_id: Uuid, token_id: &str) -> GatewayResult<String> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: user_id.to_string(),
            jti: token_id.to_owned(),
            exp: (now + Duration::hours(self.expiry_hours)).timestamp(),
            iat: now.timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| GatewayError::internal(format!("session token signing failed: {e}")))
    }

    /// Validate a session token's signature and expiry
    ///
    /// # Errors
    ///
    /// Returns `invalid_api_key` on any validation failure; the detail is
    /// logged, not surfaced.
    pub fn validate(&self, token: &str) -> GatewayResult<SessionClaims> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("session token rejected: {e}");
                GatewayError::invalid_api_key()
            })
    }
}

/// Resolves credentials to an [`AuthContext`]
#[derive(Clone)]
pub struct Authenticator {
    keys: Arc<dyn KeyRepository>,
    users: Arc<dyn UserRepository>,
    plans: Arc<dyn PlanRepository>,
    sessions: Arc<dyn SessionStore>,
    key_manager: ApiKeyManager,
    session_tokens: SessionTokenManager,
}

impl Authenticator {
    #[must_use]
    pub fn new(
        keys: Arc<dyn KeyRepository>,
        users: Arc<dyn UserRepository>,
        plans: Arc<dyn PlanRepository>,
        sessions: Arc<dyn SessionStore>,
        session_tokens: SessionTokenManager,
    ) -> Self {
        Self {
            keys,
            users,
            plans,
            sessions,
            key_manager: ApiKeyManager::new(),
            session_tokens,
        }
    }

    /// Resolve credentials to an identity
    ///
    /// # Errors
    ///
    /// - `missing_api_key` when no credential is present
    /// - `invalid_api_key` on lookup or verification failure, without
    ///   distinguishing which
    /// - `account_suspended` when the owning user is not active
    /// - `unknown_plan` when the user references a missing plan
    pub async fn authenticate(&self, credentials: &Credentials) -> GatewayResult<AuthContext> {
        if let Some(api_key) = credentials.api_key.as_deref() {
            return self.authenticate_api_key(api_key).await;
        }
        if let Some(token) = credentials.session_token.as_deref() {
            return self.authenticate_session(token).await;
        }
        Err(GatewayError::missing_api_key())
    }

    async fn authenticate_api_key(&self, api_key: &str) -> GatewayResult<AuthContext> {
        self.key_manager.validate_key_format(api_key)?;

        let prefix = self.key_manager.extract_key_prefix(api_key);
        let record = self
            .keys
            .find_by_prefix(&prefix)
            .await?
            .ok_or_else(GatewayError::invalid_api_key)?;

        let presented = self.key_manager.hash_key(api_key);
        if !digest_matches(&presented, &record.key_hash) {
            return Err(GatewayError::invalid_api_key());
        }
        self.key_manager.is_key_valid(&record)?;

        if let Err(e) = self.keys.touch_last_used(&record.id).await {
            tracing::debug!(key_id = %record.id, "failed to touch key last-used: {e}");
        }

        let (user_id, plan_id, rate_limit, quota) =
            self.resolve_user_and_plan(record.user_id).await?;
        Ok(AuthContext {
            key_id: Some(record.id),
            user_id: Some(user_id),
            plan_id,
            rate_limit_per_minute: rate_limit,
            monthly_quota: quota,
            scopes: record.scopes,
            anonymous_key: None,
        })
    }

    async fn authenticate_session(&self, token: &str) -> GatewayResult<AuthContext> {
        let claims = self.session_tokens.validate(token)?;

        let session = self
            .sessions
            .find_by_token_id(&claims.jti)
            .await?
            .ok_or_else(GatewayError::invalid_api_key)?;
        if Utc::now() > session.expires_at {
            return Err(GatewayError::invalid_api_key());
        }

        let (user_id, plan_id, rate_limit, quota) =
            self.resolve_user_and_plan(session.user_id).await?;
        Ok(AuthContext {
            key_id: None,
            user_id: Some(user_id),
            plan_id,
            rate_limit_per_minute: rate_limit,
            monthly_quota: quota,
            scopes: Vec::new(),
            anonymous_key: None,
        })
    }

    /// Synthesize an anonymous identity for routes that do not require
    /// auth, keyed per client address so open routes still rate limit.
    ///
    /// # Errors
    ///
    /// Returns `unknown_plan` when the named plan does not exist.
    pub async fn anonymous(
        &self,
        plan_id: &str,
        remote_ip: &str,
    ) -> GatewayResult<AuthContext> {
        let plan = self
            .plans
            .find_by_id(plan_id)
            .await?
            .ok_or_else(|| GatewayError::unknown_plan(plan_id))?;

        Ok(AuthContext {
            key_id: None,
            user_id: None,
            plan_id: plan.id,
            rate_limit_per_minute: plan.rate_limit_per_minute,
            monthly_quota: plan.requests_per_month,
            scopes: Vec::new(),
            anonymous_key: Some(format!("anon:{remote_ip}")),
        })
    }

    async fn resolve_user_and_plan(
        &self,
        user_id: Uuid,
    ) -> GatewayResult<(Uuid, String, u32, u64)> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(GatewayError::invalid_api_key)?;
        if user.status != UserStatus::Active {
            return Err(GatewayError::account_suspended());
        }

        let plan = self
            .plans
            .find_by_id(&user.plan_id)
            .await?
            .ok_or_else(|| GatewayError::unknown_plan(user.plan_id.clone()))?;

        Ok((
            user.id,
            plan.id,
            plan.rate_limit_per_minute,
            plan.requests_per_month,
        ))
    }
}

/// Constant-time digest comparison. Mismatched lengths compare against a
/// same-length copy of the expected digest so timing does not depend on
/// where the difference is.
fn digest_matches(presented: &str, stored: &str) -> bool {
    let presented = presented.as_bytes();
    let stored = stored.as_bytes();
    if presented.len() != stored.len() {
        let _ = presented.ct_eq(presented);
        return false;
    }
    presented.ct_eq(stored).into()
}
