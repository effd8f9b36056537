// ABOUTME: Metering endpoint accepting externally submitted usage events
// ABOUTME: Validates event types at the boundary and feeds accepted events to the recorder
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::auth::extract_credentials;
use crate::usage::{UsageEvent, UsageRecorder};

use super::{flatten_headers, ServerState};

/// Externally submitted usage event payload
#[derive(Debug, Deserialize)]
pub struct ExternalEventRequest {
    pub event_type: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub cost_multiplier: Option<f64>,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ExternalEventResponse {
    pub status: &'static str,
    pub id: String,
}

/// `POST /api/v1/meter/events`: accept one external event. The caller
/// must authenticate the same way proxy callers do.
pub async fn submit_event(
    State(state): State<ServerState>,
    request_headers: HeaderMap,
    Json(payload): Json<ExternalEventRequest>,
) -> Response {
    let flattened = flatten_headers(&request_headers);
    let credentials = extract_credentials(
        &flattened,
        None,
        &state.resources.config.auth.session_cookie,
    );

    let auth = match state.resources.authenticator.authenticate(&credentials).await {
        Ok(auth) => auth,
        Err(e) => return e.into_response(),
    };

    let mut event =
        match UsageEvent::external(payload.event_type, payload.quantity.unwrap_or(1.0)) {
            Ok(event) => event,
            Err(e) => return e.into_response(),
        };
    event.key_id = auth.key_id;
    event.user_id = auth.user_id;
    event.plan_id = Some(auth.plan_id);
    event.resource_id = payload.resource_id;
    event.resource_type = payload.resource_type;
    event.cost_multiplier = payload.cost_multiplier.unwrap_or(1.0);
    event.source_name = payload.source_name;
    event.metadata = payload.metadata;

    let id = event.id.to_string();
    state.resources.recorder.record(event);

    (
        axum::http::StatusCode::ACCEPTED,
        Json(ExternalEventResponse {
            status: "accepted",
            id,
        }),
    )
        .into_response()
}
