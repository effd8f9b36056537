// ABOUTME: Authentication tests for credential extraction and identity resolution
// ABOUTME: Covers extraction order, opaque failures, account status, plans, and session tokens
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::collections::HashMap;

use apigate::auth::{extract_credentials, Credentials};
use apigate::errors::ErrorCode;
use apigate::models::UserStatus;
use common::{fixtures_with, plan};

fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

#[test]
fn bearer_header_wins_over_everything() {
    let creds = extract_credentials(
        &headers(&[
            ("authorization", "Bearer from-bearer"),
            ("x-api-key", "from-header"),
        ]),
        Some("api_key=from-query"),
        "token",
    );
    assert_eq!(creds.api_key.as_deref(), Some("from-bearer"));
}

#[test]
fn x_api_key_wins_over_query() {
    let creds = extract_credentials(
        &headers(&[("x-api-key", "from-header")]),
        Some("api_key=from-query"),
        "token",
    );
    assert_eq!(creds.api_key.as_deref(), Some("from-header"));
}

#[test]
fn query_param_is_last_key_source() {
    let creds = extract_credentials(&headers(&[]), Some("a=b&api_key=from-query"), "token");
    assert_eq!(creds.api_key.as_deref(), Some("from-query"));
}

#[test]
fn session_cookie_is_extracted() {
    let creds = extract_credentials(
        &headers(&[("cookie", "theme=dark; token=jwt-value; lang=en")]),
        None,
        "token",
    );
    assert_eq!(creds.session_token.as_deref(), Some("jwt-value"));
    assert!(creds.api_key.is_none());
}

#[test]
fn non_bearer_authorization_is_ignored() {
    let creds = extract_credentials(
        &headers(&[("authorization", "Basic dXNlcjpwYXNz")]),
        None,
        "token",
    );
    assert!(creds.is_empty());
}

#[tokio::test]
async fn valid_key_resolves_full_context() {
    let f = fixtures_with("http://127.0.0.1:1", Vec::new());
    let (user, full_key) = f.seed_identity(plan("pro", 120, 1_000_000));

    let auth = f
        .resources
        .authenticator
        .authenticate(&Credentials {
            api_key: Some(full_key),
            session_token: None,
        })
        .await
        .unwrap();

    assert_eq!(auth.user_id, Some(user.id));
    assert_eq!(auth.plan_id, "pro");
    assert_eq!(auth.rate_limit_per_minute, 120);
    assert_eq!(auth.monthly_quota, 1_000_000);
    assert!(auth.key_id.is_some());
}

#[tokio::test]
async fn unknown_and_mismatched_keys_fail_identically() {
    let f = fixtures_with("http://127.0.0.1:1", Vec::new());
    let (_, full_key) = f.seed_identity(plan("pro", 120, 0));

    // Same prefix, different tail: the hash mismatches.
    let mut mismatched = full_key[..full_key.len() - 1].to_owned();
    mismatched.push(if full_key.ends_with('a') { 'b' } else { 'a' });

    let unknown = f
        .resources
        .authenticator
        .authenticate(&Credentials {
            api_key: Some(format!("ak_{}", "x".repeat(61))),
            session_token: None,
        })
        .await
        .unwrap_err();
    let wrong_hash = f
        .resources
        .authenticator
        .authenticate(&Credentials {
            api_key: Some(mismatched),
            session_token: None,
        })
        .await
        .unwrap_err();

    assert_eq!(unknown.code, ErrorCode::InvalidApiKey);
    assert_eq!(wrong_hash.code, ErrorCode::InvalidApiKey);
    // The two failures are indistinguishable to the caller.
    assert_eq!(unknown.sanitized_message(), wrong_hash.sanitized_message());
}

#[tokio::test]
async fn malformed_key_is_invalid() {
    let f = fixtures_with("http://127.0.0.1:1", Vec::new());
    let error = f
        .resources
        .authenticator
        .authenticate(&Credentials {
            api_key: Some("not-a-key".into()),
            session_token: None,
        })
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidApiKey);
}

#[tokio::test]
async fn suspended_user_is_rejected() {
    let f = fixtures_with("http://127.0.0.1:1", Vec::new());
    let (_, full_key) =
        f.seed_identity_with_status(plan("pro", 120, 0), UserStatus::Suspended);

    let error = f
        .resources
        .authenticator
        .authenticate(&Credentials {
            api_key: Some(full_key),
            session_token: None,
        })
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::AccountSuspended);
}

#[tokio::test]
async fn missing_plan_is_surfaced() {
    let f = fixtures_with("http://127.0.0.1:1", Vec::new());
    let (user, full_key) = f.seed_identity(plan("will-vanish", 120, 0));
    // Point the user at a plan that does not exist.
    let mut broken = user;
    broken.plan_id = "ghost".into();
    f.users.insert(broken);

    let error = f
        .resources
        .authenticator
        .authenticate(&Credentials {
            api_key: Some(full_key),
            session_token: None,
        })
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::UnknownPlan);
}

#[tokio::test]
async fn no_credentials_is_missing_api_key() {
    let f = fixtures_with("http://127.0.0.1:1", Vec::new());
    let error = f
        .resources
        .authenticator
        .authenticate(&Credentials::default())
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::MissingApiKey);
}

#[tokio::test]
async fn session_token_resolves_through_the_store() {
    let f = fixtures_with("http://127.0.0.1:1", Vec::new());
    let (user, _) = f.seed_identity(plan("pro", 120, 0));
    let token = f.seed_session(user.id);

    let auth = f
        .resources
        .authenticator
        .authenticate(&Credentials {
            api_key: None,
            session_token: Some(token),
        })
        .await
        .unwrap();
    assert_eq!(auth.user_id, Some(user.id));
    assert!(auth.key_id.is_none());
}

#[tokio::test]
async fn session_token_without_store_entry_is_rejected() {
    let f = fixtures_with("http://127.0.0.1:1", Vec::new());
    let (user, _) = f.seed_identity(plan("pro", 120, 0));
    let token = f.seed_session(user.id);
    // Revoke server-side: the JWT alone is not enough.
    let claims = f.session_tokens.validate(&token).unwrap();
    f.sessions.remove(&claims.jti);

    let error = f
        .resources
        .authenticator
        .authenticate(&Credentials {
            api_key: None,
            session_token: Some(token),
        })
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidApiKey);
}

#[tokio::test]
async fn garbage_session_token_is_rejected() {
    let f = fixtures_with("http://127.0.0.1:1", Vec::new());
    let error = f
        .resources
        .authenticator
        .authenticate(&Credentials {
            api_key: None,
            session_token: Some("not.a.jwt".into()),
        })
        .await
        .unwrap_err();
    assert_eq!(error.code, ErrorCode::InvalidApiKey);
}

#[tokio::test]
async fn anonymous_context_is_keyed_by_address() {
    let f = fixtures_with("http://127.0.0.1:1", Vec::new());
    let auth = f
        .resources
        .authenticator
        .anonymous("free", "198.51.100.4")
        .await
        .unwrap();
    assert!(auth.user_id.is_none());
    assert_eq!(auth.rate_identity(), "anon:198.51.100.4");
}
