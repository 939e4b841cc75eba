//! Static API-key gate.
//!
//! Sits in front of the dispatch engine as axum middleware; the engine
//! never sees unauthenticated traffic. Reserved endpoints are mounted
//! outside this layer.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::server::AppState;

/// Pull the caller's key from `x-api-key` or `Authorization: Bearer <key>`.
fn provided_key(request: &Request) -> Option<&str> {
    let headers = request.headers();
    if let Some(key) = headers.get("x-api-key") {
        return key.to_str().ok();
    }
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(key) = provided_key(&request) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "message": "API key required. Use 'x-api-key' header or 'Authorization: Bearer <key>'"
            })),
        )
            .into_response();
    };

    if key != state.config.auth.api_key {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "message": "Invalid API key" })),
        )
            .into_response();
    }

    next.run(request).await
}
