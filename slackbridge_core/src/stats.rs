//! Process-wide request statistics.
//!
//! A single `RequestStats` is created at the composition root and shared by
//! `Arc` with the gateway and both resolvers. Counters are plain atomics;
//! latencies live in a bounded window used for percentile calculation.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const LATENCY_WINDOW: usize = 10_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Percentage rounded to two decimals; 0 when nothing was recorded.
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub latency_percentiles: LatencyPercentiles,
    pub rate_limit_events: u64,
    pub pagination_events: u64,
}

#[derive(Debug, Default)]
pub struct RequestStats {
    successes: AtomicU64,
    failures: AtomicU64,
    rate_limit_events: AtomicU64,
    pagination_events: AtomicU64,
    latencies: Mutex<VecDeque<u64>>,
}

impl RequestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limit_event(&self) {
        self.rate_limit_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pagination_event(&self) {
        self.pagination_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, latency_ms: u64) {
        // A panic while holding the lock must not disable recording.
        let mut window = self
            .latencies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        window.push_back(latency_ms);
        if window.len() > LATENCY_WINDOW {
            window.pop_front();
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let successful = self.successes.load(Ordering::Relaxed);
        let failed = self.failures.load(Ordering::Relaxed);
        let total = successful + failed;

        let success_rate = if total > 0 {
            round2(successful as f64 / total as f64 * 100.0)
        } else {
            0.0
        };

        let mut sorted: Vec<u64> = {
            let window = self
                .latencies
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            window.iter().copied().collect()
        };
        sorted.sort_unstable();

        let (average, p50, p99) = if sorted.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
            (
                round2(avg),
                percentile(&sorted, 0.50),
                percentile(&sorted, 0.99),
            )
        };

        StatsSnapshot {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            success_rate,
            average_latency_ms: average,
            latency_percentiles: LatencyPercentiles { p50, p99 },
            rate_limit_events: self.rate_limit_events.load(Ordering::Relaxed),
            pagination_events: self.pagination_events.load(Ordering::Relaxed),
        }
    }
}

/// Nearest-rank percentile over an ascending slice.
fn percentile(sorted: &[u64], q: f64) -> f64 {
    let rank = (q * sorted.len() as f64).ceil() as usize;
    let idx = rank.clamp(1, sorted.len()) - 1;
    sorted[idx] as f64
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
