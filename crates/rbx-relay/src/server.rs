//! Axum HTTP server: router, relay handler, reserved endpoints, shutdown.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::config::RelayConfig;
use crate::dispatch::forward::HttpForwarder;
use crate::dispatch::retry::{RelayOutcome, RequestContext, RetryOrchestrator};
use crate::dispatch::{headers, router};
use crate::stats::{format_uptime, StatsSnapshot};

/// Shared application state.
pub struct AppState {
    pub config: RelayConfig,
    pub engine: RetryOrchestrator,
    pub forwarder: HttpForwarder,
}

/// Build and run the HTTP server.
pub async fn run(state: AppState) -> anyhow::Result<()> {
    let listen_addr = state.config.server.listen_address.clone();
    let app = build_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Relay shut down gracefully");
    Ok(())
}

/// Reserved endpoints bypass the key gate and are never forwarded;
/// everything else goes through auth and into the dispatch engine.
fn build_router(state: Arc<AppState>) -> Router {
    let gated = Router::new().fallback(handle_relay).layer(
        middleware::from_fn_with_state(Arc::clone(&state), auth::require_api_key),
    );

    Router::new()
        .route("/__stats", get(handle_stats))
        .route("/health", get(handle_health))
        .merge(gated)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Catch-all relay handler: validate, sanitize, dispatch, relay back.
async fn handle_relay(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(|q| q.to_string());

    let routed = match router::route(&path) {
        Ok(routed) => routed,
        Err(e) => {
            tracing::debug!(path = %path, error = %e, "Rejected inbound path");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "message": e.to_string() })),
            )
                .into_response();
        }
    };

    let outbound_headers = headers::sanitize(request.headers());

    // Body only travels for write methods
    let body = if method == Method::GET || method == Method::HEAD {
        None
    } else {
        match axum::body::to_bytes(request.into_body(), state.config.upstream.max_body_bytes).await
        {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::error!(error = %e, "Failed to read request body");
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "message": "Failed to read request body" })),
                )
                    .into_response();
            }
        }
    };

    let url = router::upstream_url(&routed, &state.config.upstream.host, query.as_deref());
    let ctx = RequestContext::new(method, url, outbound_headers, body);

    let outcome = state
        .engine
        .dispatch(&ctx, |egress| {
            let forwarder = &state.forwarder;
            let ctx = &ctx;
            async move { forwarder.forward(ctx, &egress).await }
        })
        .await;

    match outcome {
        // Verbatim relay in both cases: the caller gets the real upstream
        // status, a 429 after exhaustion included.
        RelayOutcome::Completed(response) | RelayOutcome::ExhaustedRetryable(response) => {
            response.into_response()
        }
        RelayOutcome::ExhaustedTransport(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "message": "Proxy request failed",
                "error": error.to_string(),
            })),
        )
            .into_response(),
    }
}

#[derive(Serialize)]
struct StatsResponse {
    uptime: String,
    #[serde(flatten)]
    snapshot: StatsSnapshot,
    config: ConfigSnapshot,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigSnapshot {
    max_retries: u32,
    request_timeout: String,
    proxies_enabled: bool,
    proxy_count: usize,
}

async fn handle_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let stats = state.engine.stats();
    let proxy_count = state.engine.selector().proxy_count();

    Json(StatsResponse {
        uptime: format_uptime(stats.uptime()),
        snapshot: stats.snapshot(),
        config: ConfigSnapshot {
            max_retries: state.config.upstream.max_attempts,
            request_timeout: format!("{}s", state.config.upstream.timeout_secs),
            proxies_enabled: proxy_count > 0,
            proxy_count,
        },
    })
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "proxies": state.engine.selector().proxy_count(),
    }))
}

/// Wait for SIGINT (Ctrl+C) for graceful shutdown.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    tracing::info!("Shutdown signal received, draining connections...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::egress::EgressSelector;
    use crate::dispatch::retry::RetryPolicy;
    use crate::stats::StatsRecorder;
    use axum::body::Body;
    use figment::providers::{Format, Toml};
    use figment::Figment;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let config: RelayConfig = Figment::new()
            .merge(Toml::string("[auth]\napi_key = \"secret\""))
            .extract()
            .unwrap();

        let selector = EgressSelector::from_config(&config.proxies).unwrap();
        let stats = StatsRecorder::new(selector.descriptors());
        let forwarder =
            HttpForwarder::new(selector.descriptors(), Duration::from_secs(1)).unwrap();
        let policy = RetryPolicy {
            max_attempts: config.upstream.max_attempts,
            retry_delay: Duration::ZERO,
        };

        Arc::new(AppState {
            config,
            engine: RetryOrchestrator::new(selector, stats, policy),
            forwarder,
        })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unknown_domain_is_rejected_without_an_outbound_call() {
        let state = test_state();
        let app = build_router(Arc::clone(&state));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/nope/v1/foo")
                    .header("x-api-key", "secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["message"], "domain not allowed: nope");

        // No attempt was recorded
        let snap = state.engine.stats().snapshot();
        assert_eq!(snap.overall.total_requests, 0);
    }

    #[tokio::test]
    async fn missing_key_is_unauthorized_and_wrong_key_forbidden() {
        let state = test_state();

        let response = build_router(Arc::clone(&state))
            .oneshot(
                axum::http::Request::builder()
                    .uri("/users/v1/users/1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = build_router(state)
            .oneshot(
                axum::http::Request::builder()
                    .uri("/users/v1/users/1")
                    .header("x-api-key", "wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn health_endpoint_bypasses_the_gate() {
        let response = build_router(test_state())
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["proxies"], 0);
    }

    #[tokio::test]
    async fn stats_endpoint_reports_all_sections() {
        let response = build_router(test_state())
            .oneshot(
                axum::http::Request::builder()
                    .uri("/__stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["overall"]["totalRequests"], 0);
        assert_eq!(body["overall"]["successRate"], "0.00%");
        assert_eq!(body["perIP"]["direct"]["ip"], "direct");
        assert_eq!(body["config"]["maxRetries"], 3);
        assert_eq!(body["config"]["requestTimeout"], "30s");
        assert_eq!(body["config"]["proxiesEnabled"], false);
        assert!(body["uptime"].as_str().unwrap().ends_with('s'));
    }
}
