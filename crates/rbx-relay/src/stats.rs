//! Atomic relay statistics counters.
//!
//! Lock-free counters for request volume and per-egress health. All atomics
//! use `Relaxed` ordering — these are monotonic display counters with no
//! synchronization requirements beyond their own monotonicity.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::dispatch::egress::EgressDescriptor;

#[derive(Default)]
struct GlobalCounters {
    total_requests: AtomicU64,
    rate_limit_hits: AtomicU64,
    proxy_fallbacks: AtomicU64,
    successful_retries: AtomicU64,
    errors: AtomicU64,
}

struct EgressCounters {
    id: String,
    ip: String,
    requests: AtomicU64,
    rate_limits: AtomicU64,
    errors: AtomicU64,
    successes: AtomicU64,
}

struct StatsInner {
    started: Instant,
    global: GlobalCounters,
    per_egress: Vec<EgressCounters>,
}

/// Thread-safe relay statistics. Cheap to clone (Arc).
///
/// Per-egress counters are indexed by descriptor slot; the egress set is
/// fixed at startup so the table never grows.
#[derive(Clone)]
pub struct StatsRecorder {
    inner: Arc<StatsInner>,
}

impl StatsRecorder {
    pub fn new(descriptors: &[Arc<EgressDescriptor>]) -> Self {
        let per_egress = descriptors
            .iter()
            .map(|d| EgressCounters {
                id: d.id.clone(),
                ip: d.ip_label().to_string(),
                requests: AtomicU64::new(0),
                rate_limits: AtomicU64::new(0),
                errors: AtomicU64::new(0),
                successes: AtomicU64::new(0),
            })
            .collect();

        Self {
            inner: Arc::new(StatsInner {
                started: Instant::now(),
                global: GlobalCounters::default(),
                per_egress,
            }),
        }
    }

    /// Called once at the start of every outbound attempt.
    pub fn record_attempt(&self, slot: usize) {
        self.inner.global.total_requests.fetch_add(1, Ordering::Relaxed);
        self.inner.per_egress[slot]
            .requests
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Upstream answered 429 on this egress.
    pub fn record_rate_limit(&self, slot: usize) {
        self.inner.global.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        self.inner.per_egress[slot]
            .rate_limits
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Upstream answered 502/503, or the transport failed, on this egress.
    pub fn record_upstream_error(&self, slot: usize) {
        self.inner.per_egress[slot]
            .errors
            .fetch_add(1, Ordering::Relaxed);
    }

    /// A retry attempt was routed through a proxy egress.
    pub fn record_fallback(&self) {
        self.inner.global.proxy_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// The attempt completed with a non-retryable response.
    pub fn record_success(&self, slot: usize, attempt: u32) {
        self.inner.per_egress[slot]
            .successes
            .fetch_add(1, Ordering::Relaxed);
        if attempt > 1 {
            self.inner
                .global
                .successful_retries
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// All attempts for one inbound request were used without a success.
    /// Called exactly once per exhausted request, never per attempt.
    pub fn record_exhausted(&self) {
        self.inner.global.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.inner.started.elapsed()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let global = &self.inner.global;
        let total_requests = global.total_requests.load(Ordering::Relaxed);
        let errors = global.errors.load(Ordering::Relaxed);

        let per_ip = self
            .inner
            .per_egress
            .iter()
            .map(|c| {
                let requests = c.requests.load(Ordering::Relaxed);
                let successes = c.successes.load(Ordering::Relaxed);
                (
                    c.id.clone(),
                    EgressSnapshot {
                        ip: c.ip.clone(),
                        requests,
                        rate_limits: c.rate_limits.load(Ordering::Relaxed),
                        errors: c.errors.load(Ordering::Relaxed),
                        successes,
                        success_rate: percentage(successes, requests),
                    },
                )
            })
            .collect();

        StatsSnapshot {
            overall: OverallSnapshot {
                total_requests,
                rate_limit_hits: global.rate_limit_hits.load(Ordering::Relaxed),
                proxy_fallbacks: global.proxy_fallbacks.load(Ordering::Relaxed),
                successful_retries: global.successful_retries.load(Ordering::Relaxed),
                errors,
                success_rate: percentage(total_requests.saturating_sub(errors), total_requests),
            },
            per_ip,
        }
    }
}

/// Point-in-time copy of the counters, serializable to JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub overall: OverallSnapshot,
    #[serde(rename = "perIP")]
    pub per_ip: BTreeMap<String, EgressSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallSnapshot {
    pub total_requests: u64,
    pub rate_limit_hits: u64,
    pub proxy_fallbacks: u64,
    pub successful_retries: u64,
    pub errors: u64,
    pub success_rate: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EgressSnapshot {
    pub ip: String,
    pub requests: u64,
    pub rate_limits: u64,
    pub errors: u64,
    pub successes: u64,
    pub success_rate: String,
}

/// Conventional two-decimal percentage; `0.00%` when the denominator is 0.
fn percentage(numerator: u64, denominator: u64) -> String {
    if denominator == 0 {
        return "0.00%".to_string();
    }
    format!("{:.2}%", numerator as f64 * 100.0 / denominator as f64)
}

/// Human-readable uptime for the stats endpoint.
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}
