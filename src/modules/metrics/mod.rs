//! Metrics collection utilities.
//!
//! Per-domain counters for plain fetches, escalations, rendered fetches and
//! failures, with a rolling average of plain-fetch latency.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DEFAULT_LATENCY_WINDOW: usize = 100;

/// Aggregated metrics across all domains.
#[derive(Debug, Clone)]
pub struct GlobalStats {
    pub started_at: DateTime<Utc>,
    pub plain_requests: u64,
    pub escalations: u64,
    pub rendered: u64,
    pub failures: u64,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            plain_requests: 0,
            escalations: 0,
            rendered: 0,
            failures: 0,
        }
    }
}

/// Domain-scoped metrics snapshot.
#[derive(Debug, Clone, Default)]
pub struct DomainStats {
    pub domain: String,
    pub plain_requests: u64,
    pub plain_successes: u64,
    pub escalations: u64,
    pub rendered: u64,
    pub failures: u64,
    pub average_plain_latency: Option<Duration>,
    pub last_status: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub global: GlobalStats,
    pub domains: Vec<DomainStats>,
}

#[derive(Debug, Default)]
struct DomainAccumulator {
    stats: DomainStats,
    latencies: VecDeque<Duration>,
}

impl DomainAccumulator {
    fn snapshot(&self) -> DomainStats {
        let mut stats = self.stats.clone();
        if !self.latencies.is_empty() {
            let total: Duration = self.latencies.iter().sum();
            stats.average_plain_latency = Some(total / self.latencies.len() as u32);
        }
        stats
    }
}

#[derive(Debug)]
struct MetricsState {
    global: GlobalStats,
    max_window: usize,
    domains: HashMap<String, DomainAccumulator>,
}

impl MetricsState {
    fn domain(&mut self, domain: &str) -> &mut DomainAccumulator {
        self.domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainAccumulator {
                stats: DomainStats {
                    domain: domain.to_string(),
                    ..Default::default()
                },
                latencies: VecDeque::new(),
            })
    }
}

/// Cheap to clone; all clones share the same counters.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    state: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_LATENCY_WINDOW)
    }

    pub fn with_window(max_window: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MetricsState {
                global: GlobalStats::default(),
                max_window: max_window.max(1),
                domains: HashMap::new(),
            })),
        }
    }

    pub fn record_plain(&self, domain: &str, status: u16, latency: Duration) {
        self.with_state(|state| {
            state.global.plain_requests += 1;
            let max_window = state.max_window;
            let acc = state.domain(domain);
            acc.stats.plain_requests += 1;
            acc.stats.last_status = Some(status);
            if (200..300).contains(&status) {
                acc.stats.plain_successes += 1;
            }
            if acc.latencies.len() == max_window {
                acc.latencies.pop_front();
            }
            acc.latencies.push_back(latency);
        });
    }

    pub fn record_escalation(&self, domain: &str) {
        self.with_state(|state| {
            state.global.escalations += 1;
            state.domain(domain).stats.escalations += 1;
        });
    }

    pub fn record_rendered(&self, domain: &str) {
        self.with_state(|state| {
            state.global.rendered += 1;
            state.domain(domain).stats.rendered += 1;
        });
    }

    pub fn record_failure(&self, domain: &str) {
        self.with_state(|state| {
            state.global.failures += 1;
            state.domain(domain).stats.failures += 1;
        });
    }

    pub fn domain(&self, domain: &str) -> Option<DomainStats> {
        self.with_state(|state| state.domains.get(domain).map(DomainAccumulator::snapshot))
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.with_state(|state| {
            let mut domains: Vec<DomainStats> =
                state.domains.values().map(DomainAccumulator::snapshot).collect();
            domains.sort_by(|a, b| a.domain.cmp(&b.domain));
            MetricsSnapshot {
                global: state.global.clone(),
                domains,
            }
        })
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MetricsState) -> T) -> T {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
