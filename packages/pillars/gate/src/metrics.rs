//! Decision metrics, sharded per CPU-ish stripe and merged on read.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

const SHARD_COUNT: usize = 8;

#[derive(Debug, Default)]
struct Shard {
    total: AtomicU64,
    allowed: AtomicU64,
    denied: AtomicU64,
    failures: AtomicU64,
    latency_us_sum: AtomicU64,
}

/// Merged snapshot of all shards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_decisions: u64,
    pub allowed: u64,
    pub denied: u64,
    pub evaluation_failures: u64,
    pub avg_latency_us: u64,
}

/// Sharded decision counters. Writers pick a shard from the request id
/// hash; readers merge.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    shards: [Shard; SHARD_COUNT],
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn shard(&self, key: &str) -> &Shard {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    pub fn record_decision(&self, request_id: &str, allowed: bool, latency_us: u64) {
        let shard = self.shard(request_id);
        shard.total.fetch_add(1, Ordering::Relaxed);
        if allowed {
            shard.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            shard.denied.fetch_add(1, Ordering::Relaxed);
        }
        shard.latency_us_sum.fetch_add(latency_us, Ordering::Relaxed);
    }

    pub fn record_failure(&self, request_id: &str) {
        self.shard(request_id)
            .failures
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Merge all shards into one snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut total = 0u64;
        let mut allowed = 0u64;
        let mut denied = 0u64;
        let mut failures = 0u64;
        let mut latency_sum = 0u64;
        for shard in &self.shards {
            total += shard.total.load(Ordering::Relaxed);
            allowed += shard.allowed.load(Ordering::Relaxed);
            denied += shard.denied.load(Ordering::Relaxed);
            failures += shard.failures.load(Ordering::Relaxed);
            latency_sum += shard.latency_us_sum.load(Ordering::Relaxed);
        }
        MetricsSnapshot {
            total_decisions: total,
            allowed,
            denied,
            evaluation_failures: failures,
            avg_latency_us: if total > 0 { latency_sum / total } else { 0 },
        }
    }
}
