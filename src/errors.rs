// ABOUTME: Centralized error handling and error types for the gateway core
// ABOUTME: Defines machine error codes, HTTP status mapping, and the JSON:API-style error envelope
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

//! # Unified Error Handling System
//!
//! This module provides the centralized error handling system for the
//! gateway. It defines the machine error codes surfaced to clients, their
//! `HTTP` status mapping, and the JSON:API-style response envelope used on
//! every error path. The pipeline never lets an error cross the ingress
//! boundary raw; everything is converted to a [`GatewayError`] first.

use crate::constants::http_status;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Machine error codes surfaced to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Authentication
    /// No credential was supplied and the route requires one
    MissingApiKey,
    /// Credential lookup or verification failed
    InvalidApiKey,
    /// The owning user is not active
    AccountSuspended,
    /// The user references a plan the gateway does not know
    UnknownPlan,

    // Quota and rate
    /// Fixed-window rate limit exhausted, including burst tokens
    RateLimitExceeded,
    /// Monthly plan quota exhausted
    QuotaExceeded,

    // Upstream
    /// Upstream I/O failure
    UpstreamError,
    /// Upstream deadline or client cancellation
    UpstreamTimeout,

    // Client
    /// Oversize body, malformed URL, or malformed event payload
    BadRequest,

    // Internal
    /// Configuration error detected at boot or reload
    ConfigError,
    /// Unrecoverable fault, recovered and logged
    InternalError,
}

impl ErrorCode {
    /// Get the `HTTP` status code for this error
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::MissingApiKey | Self::InvalidApiKey | Self::AccountSuspended => {
                http_status::UNAUTHORIZED
            }
            Self::QuotaExceeded => http_status::PAYMENT_REQUIRED,
            Self::RateLimitExceeded => http_status::TOO_MANY_REQUESTS,
            Self::UpstreamError => http_status::BAD_GATEWAY,
            Self::UpstreamTimeout => http_status::GATEWAY_TIMEOUT,
            Self::BadRequest => http_status::BAD_REQUEST,
            Self::UnknownPlan | Self::ConfigError | Self::InternalError => {
                http_status::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine code string used in the wire envelope
    #[must_use]
    pub const fn machine_code(self) -> &'static str {
        match self {
            Self::MissingApiKey => "missing_api_key",
            Self::InvalidApiKey => "invalid_api_key",
            Self::AccountSuspended => "account_suspended",
            Self::UnknownPlan => "unknown_plan",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::QuotaExceeded => "quota_exceeded",
            Self::UpstreamError => "upstream_error",
            Self::UpstreamTimeout => "upstream_timeout",
            Self::BadRequest => "bad_request",
            Self::ConfigError => "config_error",
            Self::InternalError => "internal_error",
        }
    }

    /// Get a user-facing description of this error
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::MissingApiKey => "No API key or session token was provided",
            Self::InvalidApiKey => "The provided credential is invalid",
            Self::AccountSuspended => "The account owning this credential is suspended",
            Self::UnknownPlan => "The account references an unknown plan",
            Self::RateLimitExceeded => "Rate limit exceeded. Please slow down your requests",
            Self::QuotaExceeded => "Monthly quota exceeded for your current plan",
            Self::UpstreamError => "The upstream service returned an error",
            Self::UpstreamTimeout => "The upstream service did not respond in time",
            Self::BadRequest => "The request is malformed",
            Self::ConfigError => "Gateway configuration error",
            Self::InternalError => "An internal error occurred",
        }
    }
}

/// Gateway error carried through the pipeline
#[derive(Debug, Clone, Error)]
pub struct GatewayError {
    /// Machine error code
    pub code: ErrorCode,
    /// Human-readable detail
    pub message: String,
    /// Trace id for correlation, when known
    pub request_id: Option<String>,
}

impl GatewayError {
    /// Create a new error with the given code and detail message
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: None,
        }
    }

    /// Attach a trace id to the error
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Get the `HTTP` status code for this error
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Detail safe to expose to clients. Internal faults are replaced with
    /// the generic code description; validation and policy errors pass
    /// their message through.
    #[must_use]
    pub fn sanitized_message(&self) -> String {
        match self.code {
            ErrorCode::BadRequest
            | ErrorCode::RateLimitExceeded
            | ErrorCode::QuotaExceeded
            | ErrorCode::UpstreamError
            | ErrorCode::UpstreamTimeout => self.message.clone(),
            _ => self.code.description().to_owned(),
        }
    }

    /// Full details for internal logging. Never send this to clients.
    #[must_use]
    pub fn internal_details(&self) -> String {
        format!("{:?}: {}", self.code, self.message)
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.machine_code(), self.message)
    }
}

/// Result type alias for convenience
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Single member of the wire error envelope
#[derive(Debug, Serialize)]
pub struct ErrorObject {
    /// `HTTP` status as a string
    pub status: String,
    /// Machine code
    pub code: String,
    /// Machine code, repeated as the title
    pub title: String,
    /// Human-readable detail (sanitized)
    pub detail: String,
}

/// JSON:API-style error response body
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub errors: Vec<ErrorObject>,
}

impl From<&GatewayError> for ErrorEnvelope {
    fn from(error: &GatewayError) -> Self {
        Self {
            errors: vec![ErrorObject {
                status: error.http_status().to_string(),
                code: error.code.machine_code().to_owned(),
                title: error.code.machine_code().to_owned(),
                detail: error.sanitized_message(),
            }],
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        tracing::warn!(
            request_id = self.request_id.as_deref().unwrap_or("-"),
            "gateway error: {}",
            self.internal_details()
        );
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let envelope = ErrorEnvelope::from(&self);
        (status, axum::Json(envelope)).into_response()
    }
}

/// Convenience constructors for the common error paths
impl GatewayError {
    /// No credential on an auth-required route
    #[must_use]
    pub fn missing_api_key() -> Self {
        Self::new(ErrorCode::MissingApiKey, "API key required")
    }

    /// Lookup or verification failed. The message never distinguishes a
    /// missing record from a hash mismatch.
    #[must_use]
    pub fn invalid_api_key() -> Self {
        Self::new(ErrorCode::InvalidApiKey, "Invalid API key")
    }

    /// Owning user is not active
    #[must_use]
    pub fn account_suspended() -> Self {
        Self::new(ErrorCode::AccountSuspended, "Account is suspended")
    }

    /// User references a plan that does not exist
    #[must_use]
    pub fn unknown_plan(plan_id: impl Into<String>) -> Self {
        let plan = plan_id.into();
        Self::new(ErrorCode::UnknownPlan, format!("Unknown plan: {plan}"))
    }

    /// Fixed-window limit exhausted
    #[must_use]
    pub fn rate_limit_exceeded(limit: u32) -> Self {
        Self::new(
            ErrorCode::RateLimitExceeded,
            format!("Rate limit of {limit} requests per window exceeded"),
        )
    }

    /// Monthly quota exhausted
    #[must_use]
    pub fn quota_exceeded(quota: u64) -> Self {
        Self::new(
            ErrorCode::QuotaExceeded,
            format!("Monthly quota of {quota} requests exceeded"),
        )
    }

    /// Upstream I/O failure
    #[must_use]
    pub fn upstream_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UpstreamError, message)
    }

    /// Upstream deadline exceeded or canceled
    #[must_use]
    pub fn upstream_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UpstreamTimeout, message)
    }

    /// Malformed or oversize client request
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// Configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    /// Internal error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::upstream_timeout(format!("upstream timeout: {error}"))
        } else {
            Self::upstream_error(format!("upstream error: {error}"))
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(error: std::io::Error) -> Self {
        Self::internal(format!("IO error: {error}"))
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(error: serde_json::Error) -> Self {
        Self::bad_request(format!("JSON error: {error}"))
    }
}

impl From<url::ParseError> for GatewayError {
    fn from(error: url::ParseError) -> Self {
        Self::bad_request(format!("URL error: {error}"))
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal(error.to_string())
    }
}
