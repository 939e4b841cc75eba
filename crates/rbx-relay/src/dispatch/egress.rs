//! Egress descriptors, the rotating pool, and attempt-time selection.
//!
//! The pool is a plain round-robin rotor shared by every inbound request;
//! the strategy only decides which attempts consult it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::config::ProxiesConfig;

/// One network path an outbound call can leave through. Immutable after load.
#[derive(Debug)]
pub struct EgressDescriptor {
    /// `direct` or `proxy-<index>`; the key used in stats reporting.
    pub id: String,
    /// Stable index into the per-egress client and counter tables.
    pub slot: usize,
    pub kind: EgressKind,
}

#[derive(Debug)]
pub enum EgressKind {
    Direct,
    Proxy {
        host: String,
        port: u16,
        username: String,
        password: String,
    },
}

impl EgressDescriptor {
    pub fn is_proxy(&self) -> bool {
        matches!(self.kind, EgressKind::Proxy { .. })
    }

    /// Label reported as `ip` in the stats snapshot.
    pub fn ip_label(&self) -> &str {
        match &self.kind {
            EgressKind::Direct => "direct",
            EgressKind::Proxy { host, .. } => host,
        }
    }
}

/// How the orchestrator picks an egress for each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    /// Single synthetic direct descriptor; every attempt uses it.
    DirectOnly,
    /// Every attempt, the first included, rotates through the proxies.
    ProxyRoundRobin,
    /// Attempt 1 goes direct; attempts 2..N rotate through the proxies.
    DirectFirst,
}

/// Ordered set of descriptors plus a shared rotation cursor.
pub struct EgressPool {
    entries: Vec<Arc<EgressDescriptor>>,
    cursor: AtomicUsize,
}

impl EgressPool {
    fn new(entries: Vec<Arc<EgressDescriptor>>) -> Self {
        debug_assert!(!entries.is_empty());
        Self {
            entries,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Strict round robin: atomically advance the cursor and return the
    /// descriptor at the pre-advance index. Safe under unbounded concurrent
    /// callers; a single fetch_add means no update is ever lost.
    pub fn next(&self) -> Arc<EgressDescriptor> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.entries.len();
        Arc::clone(&self.entries[index])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Strategy-aware egress selection for the retry orchestrator.
///
/// Owns the full descriptor set: the synthetic direct descriptor (when the
/// strategy uses one) and the rotating proxy pool.
pub struct EgressSelector {
    strategy: SelectionStrategy,
    descriptors: Vec<Arc<EgressDescriptor>>,
    direct: Option<Arc<EgressDescriptor>>,
    pool: EgressPool,
}

impl EgressSelector {
    /// Build the selector from configuration.
    ///
    /// A disabled proxies section, or one with no endpoints, degrades to
    /// `direct-only` regardless of the configured strategy.
    pub fn from_config(config: &ProxiesConfig) -> anyhow::Result<Self> {
        let strategy = if !config.enabled || config.endpoints.is_empty() {
            SelectionStrategy::DirectOnly
        } else {
            config.strategy
        };

        let mut descriptors: Vec<Arc<EgressDescriptor>> = Vec::new();

        let direct = if strategy != SelectionStrategy::ProxyRoundRobin {
            let direct = Arc::new(EgressDescriptor {
                id: "direct".to_string(),
                slot: 0,
                kind: EgressKind::Direct,
            });
            descriptors.push(Arc::clone(&direct));
            Some(direct)
        } else {
            None
        };

        if strategy != SelectionStrategy::DirectOnly {
            for (i, endpoint) in config.endpoints.iter().enumerate() {
                let (host, port) = parse_endpoint(endpoint)
                    .with_context(|| format!("invalid proxy endpoint {endpoint:?}"))?;
                descriptors.push(Arc::new(EgressDescriptor {
                    id: format!("proxy-{}", i + 1),
                    slot: descriptors.len(),
                    kind: EgressKind::Proxy {
                        host,
                        port,
                        username: config.username.clone(),
                        password: config.password.clone(),
                    },
                }));
            }
        }

        // The rotating pool holds only the descriptors rotation may hand
        // out: under direct-only that is the direct descriptor itself.
        let rotating: Vec<Arc<EgressDescriptor>> = match strategy {
            SelectionStrategy::DirectOnly => descriptors.clone(),
            _ => descriptors.iter().filter(|d| d.is_proxy()).cloned().collect(),
        };

        let pool = EgressPool::new(rotating);
        tracing::debug!(?strategy, rotating = pool.len(), "Egress pool constructed");

        Ok(Self {
            strategy,
            descriptors,
            direct,
            pool,
        })
    }

    /// Pick the egress for attempt `n` (1-based) per the configured strategy.
    pub fn select(&self, attempt: u32) -> Arc<EgressDescriptor> {
        match self.strategy {
            SelectionStrategy::DirectOnly => self
                .direct
                .as_ref()
                .map(Arc::clone)
                .unwrap_or_else(|| self.pool.next()),
            SelectionStrategy::ProxyRoundRobin => self.pool.next(),
            SelectionStrategy::DirectFirst => match (&self.direct, attempt) {
                (Some(direct), 1) => Arc::clone(direct),
                _ => self.pool.next(),
            },
        }
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    /// Every descriptor this selector can hand out, in slot order.
    pub fn descriptors(&self) -> &[Arc<EgressDescriptor>] {
        &self.descriptors
    }

    pub fn proxy_count(&self) -> usize {
        self.descriptors.iter().filter(|d| d.is_proxy()).count()
    }
}

fn parse_endpoint(endpoint: &str) -> anyhow::Result<(String, u16)> {
    let Some((host, port)) = endpoint.rsplit_once(':') else {
        bail!("expected host:port");
    };
    if host.is_empty() {
        bail!("empty host");
    }
    let port: u16 = port.parse().context("invalid port")?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxies(endpoints: &[&str], strategy: SelectionStrategy) -> ProxiesConfig {
        ProxiesConfig {
            enabled: true,
            strategy,
            endpoints: endpoints.iter().map(|s| s.to_string()).collect(),
            username: "relay".to_string(),
            password: "secret".to_string(),
        }
    }

    #[test]
    fn round_robin_cycles_in_insertion_order() {
        let selector = EgressSelector::from_config(&proxies(
            &["10.0.0.1:8001", "10.0.0.2:8002", "10.0.0.3:8003"],
            SelectionStrategy::ProxyRoundRobin,
        ))
        .unwrap();

        let first_cycle: Vec<String> =
            (0..3).map(|_| selector.select(1).id.clone()).collect();
        assert_eq!(first_cycle, ["proxy-1", "proxy-2", "proxy-3"]);

        // Fourth call wraps back to the first descriptor
        assert_eq!(selector.select(1).id, "proxy-1");
    }

    #[test]
    fn direct_first_uses_direct_without_advancing_rotation() {
        let selector = EgressSelector::from_config(&proxies(
            &["10.0.0.1:8001", "10.0.0.2:8002"],
            SelectionStrategy::DirectFirst,
        ))
        .unwrap();

        // First attempts never touch the cursor no matter how many happen
        assert_eq!(selector.select(1).id, "direct");
        assert_eq!(selector.select(1).id, "direct");

        // Retry attempts rotate from the untouched cursor
        assert_eq!(selector.select(2).id, "proxy-1");
        assert_eq!(selector.select(3).id, "proxy-2");
        assert_eq!(selector.select(2).id, "proxy-1");
    }

    #[test]
    fn disabled_config_degrades_to_direct_only() {
        let mut config = proxies(&["10.0.0.1:8001"], SelectionStrategy::ProxyRoundRobin);
        config.enabled = false;

        let selector = EgressSelector::from_config(&config).unwrap();
        assert_eq!(selector.strategy(), SelectionStrategy::DirectOnly);
        assert_eq!(selector.proxy_count(), 0);
        for attempt in 1..=4 {
            assert_eq!(selector.select(attempt).id, "direct");
        }
    }

    #[test]
    fn empty_endpoint_list_degrades_to_direct_only() {
        let config = proxies(&[], SelectionStrategy::DirectFirst);
        let selector = EgressSelector::from_config(&config).unwrap();
        assert_eq!(selector.strategy(), SelectionStrategy::DirectOnly);
        assert_eq!(selector.descriptors().len(), 1);
    }

    #[test]
    fn slots_are_contiguous_and_stable() {
        let selector = EgressSelector::from_config(&proxies(
            &["10.0.0.1:8001", "10.0.0.2:8002"],
            SelectionStrategy::DirectFirst,
        ))
        .unwrap();

        let slots: Vec<usize> = selector.descriptors().iter().map(|d| d.slot).collect();
        assert_eq!(slots, [0, 1, 2]);
        assert_eq!(selector.descriptors()[0].id, "direct");
        assert_eq!(selector.descriptors()[2].ip_label(), "10.0.0.2");
    }

    #[test]
    fn rejects_malformed_endpoints() {
        assert!(EgressSelector::from_config(&proxies(
            &["not-an-endpoint"],
            SelectionStrategy::DirectFirst
        ))
        .is_err());
        assert!(EgressSelector::from_config(&proxies(
            &["host:notaport"],
            SelectionStrategy::DirectFirst
        ))
        .is_err());
    }

    #[test]
    fn concurrent_rotation_loses_no_updates() {
        let selector = Arc::new(
            EgressSelector::from_config(&proxies(
                &["10.0.0.1:8001", "10.0.0.2:8002", "10.0.0.3:8003"],
                SelectionStrategy::ProxyRoundRobin,
            ))
            .unwrap(),
        );

        let mut handles = Vec::new();
        for _ in 0..8 {
            let selector = Arc::clone(&selector);
            handles.push(std::thread::spawn(move || {
                let mut counts = [0u64; 3];
                for _ in 0..300 {
                    let id = selector.select(1).id.clone();
                    let idx: usize = id.strip_prefix("proxy-").unwrap().parse::<usize>().unwrap() - 1;
                    counts[idx] += 1;
                }
                counts
            }));
        }

        let mut totals = [0u64; 3];
        for handle in handles {
            let counts = handle.join().unwrap();
            for (total, count) in totals.iter_mut().zip(counts) {
                *total += count;
            }
        }

        // 2400 selections over a pool of 3: exactly even distribution
        assert_eq!(totals, [800, 800, 800]);
    }
}
