//! The retry-with-fallback state machine.
//!
//! Drives up to `max_attempts` outbound calls for one inbound request,
//! rotating egress per the configured strategy and recording every outcome.
//! The forward step is a generic seam so the state machine is testable
//! without a network.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use uuid::Uuid;

use super::egress::{EgressDescriptor, EgressSelector};
use super::forward::{AttemptError, AttemptOutcome, UpstreamResponse};
use crate::stats::StatsRecorder;

/// Everything one inbound request carries through the dispatch engine.
/// Created at dispatch start, dropped when the response is sent.
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl RequestContext {
    pub fn new(method: Method, url: String, headers: HeaderMap, body: Option<Bytes>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            method,
            url,
            headers,
            body,
        }
    }
}

/// Fixed retry configuration. Constant delay between attempts, no backoff:
/// the goal is to reach a different egress quickly.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

/// Terminal result of the retry loop.
#[derive(Debug)]
pub enum RelayOutcome {
    /// An attempt completed with a non-retryable status; relay it.
    Completed(UpstreamResponse),
    /// Every attempt was retryable; relay the last upstream response
    /// verbatim so the caller sees the real upstream condition.
    ExhaustedRetryable(UpstreamResponse),
    /// The final attempt failed at the transport level.
    ExhaustedTransport(AttemptError),
}

enum LastFailure {
    None,
    Retryable(UpstreamResponse),
    Transport(AttemptError),
}

/// Orchestrates egress selection, forwarding, classification, and stats
/// for one inbound request at a time.
pub struct RetryOrchestrator {
    selector: EgressSelector,
    stats: StatsRecorder,
    policy: RetryPolicy,
}

impl RetryOrchestrator {
    pub fn new(selector: EgressSelector, stats: StatsRecorder, policy: RetryPolicy) -> Self {
        Self {
            selector,
            stats,
            policy,
        }
    }

    pub fn selector(&self) -> &EgressSelector {
        &self.selector
    }

    pub fn stats(&self) -> &StatsRecorder {
        &self.stats
    }

    /// Run the attempt loop for `ctx`, calling `forward` once per attempt.
    ///
    /// Attempts are strictly sequential within one request; the shared pool
    /// cursor may interleave with other requests' attempts between calls.
    pub async fn dispatch<F, Fut>(&self, ctx: &RequestContext, forward: F) -> RelayOutcome
    where
        F: Fn(Arc<EgressDescriptor>) -> Fut,
        Fut: Future<Output = AttemptOutcome>,
    {
        let mut last = LastFailure::None;

        for attempt in 1..=self.policy.max_attempts {
            let egress = self.selector.select(attempt);
            if attempt > 1 && egress.is_proxy() {
                self.stats.record_fallback();
            }
            self.stats.record_attempt(egress.slot);

            tracing::debug!(
                request_id = %ctx.request_id,
                attempt,
                egress = %egress.id,
                url = %ctx.url,
                "Attempt started"
            );

            match forward(Arc::clone(&egress)).await {
                AttemptOutcome::Success(response) => {
                    self.stats.record_success(egress.slot, attempt);
                    tracing::info!(
                        request_id = %ctx.request_id,
                        attempt,
                        egress = %egress.id,
                        status = response.status.as_u16(),
                        "Relay complete"
                    );
                    return RelayOutcome::Completed(response);
                }
                AttemptOutcome::RetryableFailure(response) => {
                    if response.status == StatusCode::TOO_MANY_REQUESTS {
                        self.stats.record_rate_limit(egress.slot);
                    } else {
                        self.stats.record_upstream_error(egress.slot);
                    }
                    tracing::warn!(
                        request_id = %ctx.request_id,
                        attempt,
                        egress = %egress.id,
                        status = response.status.as_u16(),
                        "Retryable upstream status"
                    );
                    last = LastFailure::Retryable(response);
                }
                AttemptOutcome::TerminalError(error) => {
                    self.stats.record_upstream_error(egress.slot);
                    tracing::warn!(
                        request_id = %ctx.request_id,
                        attempt,
                        egress = %egress.id,
                        error = %error,
                        "Attempt failed"
                    );
                    last = LastFailure::Transport(error);
                }
            }

            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.retry_delay).await;
            }
        }

        // One exhaustion per inbound request, never per attempt.
        self.stats.record_exhausted();
        tracing::warn!(
            request_id = %ctx.request_id,
            attempts = self.policy.max_attempts,
            url = %ctx.url,
            "All attempts exhausted"
        );

        match last {
            LastFailure::Retryable(response) => RelayOutcome::ExhaustedRetryable(response),
            LastFailure::Transport(error) => RelayOutcome::ExhaustedTransport(error),
            // Unreachable with max_attempts >= 1; treat as a transport failure.
            LastFailure::None => RelayOutcome::ExhaustedTransport(AttemptError::Transport(
                "no attempts were made".to_string(),
            )),
        }
    }
}
