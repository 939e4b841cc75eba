//! One bounded outbound call to the upstream through a chosen egress.
//!
//! Each egress gets its own `reqwest::Client` built once at startup (the
//! proxy binding lives on the client). Every attempt is a fresh request;
//! nothing is held open across attempts.

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use thiserror::Error;

use super::egress::{EgressDescriptor, EgressKind};
use super::retry::RequestContext;

/// Upstream statuses that signal a transient, egress-rotatable condition.
const RETRYABLE_STATUSES: &[u16] = &[429, 502, 503];

pub fn is_retryable_status(status: StatusCode) -> bool {
    RETRYABLE_STATUSES.contains(&status.as_u16())
}

/// A completed upstream response, buffered so it can be relayed after the
/// retry loop finishes. Only `content-type` survives of the upstream's
/// response headers.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let mut builder = Response::builder().status(self.status);
        if let Some(content_type) = self.content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        builder
            .body(Body::from(self.body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

/// Transport-level failure of a single attempt.
#[derive(Debug, Error, Clone)]
pub enum AttemptError {
    #[error("upstream timeout after {0:?}")]
    Timeout(Duration),
    #[error("upstream connection failed: {0}")]
    Transport(String),
    #[error("failed to read upstream body: {0}")]
    Body(String),
}

/// Classified result of one outbound attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Completed and not worth retrying — any status outside the retryable
    /// set, ordinary upstream 4xx included.
    Success(UpstreamResponse),
    /// Completed with 429/502/503; the response is carried so the last one
    /// can be relayed verbatim when no attempts remain.
    RetryableFailure(UpstreamResponse),
    TerminalError(AttemptError),
}

/// Issues outbound calls, one client per egress descriptor.
pub struct HttpForwarder {
    clients: Vec<reqwest::Client>,
    timeout: Duration,
}

impl HttpForwarder {
    /// Build one client per descriptor, in slot order.
    pub fn new(
        descriptors: &[std::sync::Arc<EgressDescriptor>],
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let mut clients = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let mut builder = reqwest::Client::builder().timeout(timeout);
            if let EgressKind::Proxy {
                host,
                port,
                username,
                password,
            } = &descriptor.kind
            {
                let proxy = reqwest::Proxy::all(format!("http://{host}:{port}"))?
                    .basic_auth(username, password);
                builder = builder.proxy(proxy);
            }
            clients.push(builder.build()?);
        }
        Ok(Self { clients, timeout })
    }

    /// Issue exactly one outbound call for `ctx` through `egress`.
    pub async fn forward(
        &self,
        ctx: &RequestContext,
        egress: &EgressDescriptor,
    ) -> AttemptOutcome {
        let client = &self.clients[egress.slot];
        let start = Instant::now();

        let mut request = client
            .request(ctx.method.clone(), &ctx.url)
            .headers(ctx.headers.clone());
        if let Some(body) = &ctx.body {
            request = request.body(body.clone());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let error = if e.is_timeout() {
                    AttemptError::Timeout(self.timeout)
                } else {
                    AttemptError::Transport(e.to_string())
                };
                tracing::warn!(
                    request_id = %ctx.request_id,
                    egress = %egress.id,
                    latency_ms = start.elapsed().as_millis() as u64,
                    error = %error,
                    "Outbound attempt failed"
                );
                return AttemptOutcome::TerminalError(error);
            }
        };

        let status = response.status();
        let content_type = response.headers().get(CONTENT_TYPE).cloned();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                return AttemptOutcome::TerminalError(AttemptError::Body(e.to_string()));
            }
        };

        tracing::debug!(
            request_id = %ctx.request_id,
            egress = %egress.id,
            status = status.as_u16(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Outbound attempt complete"
        );

        let upstream = UpstreamResponse {
            status,
            content_type,
            body,
        };
        if is_retryable_status(status) {
            AttemptOutcome::RetryableFailure(upstream)
        } else {
            AttemptOutcome::Success(upstream)
        }
    }
}
