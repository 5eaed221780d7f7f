//! Runtime statistics for the proxy.
//!
//! Atomic counters plus a bounded history of recent queries. Recording
//! is fire-and-forget; nothing here can fail the resolution pipeline.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Most recent completed queries kept for the stats endpoint.
const HISTORY_LIMIT: usize = 1000;

/// Terminal outcome of one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    Answered,
    CacheHit,
    Blocked,
    Failed,
    Invalid,
}

/// One completed query as kept in history.
#[derive(Debug, Clone, Serialize)]
pub struct QueryRecord {
    pub domain: String,
    pub client: String,
    pub outcome: QueryOutcome,
    pub elapsed_ms: u64,
    pub timestamp: u64,
}

pub struct Monitor {
    started: Instant,
    total_queries: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    blocked: AtomicU64,
    failed: AtomicU64,
    response_time_total_ms: AtomicU64,
    response_samples: AtomicU64,
    history: Mutex<VecDeque<QueryRecord>>,
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            total_queries: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            response_time_total_ms: AtomicU64::new(0),
            response_samples: AtomicU64::new(0),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
        }
    }

    pub fn record_query(&self) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blocked(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response_time(&self, elapsed_ms: u64) {
        self.response_time_total_ms
            .fetch_add(elapsed_ms, Ordering::Relaxed);
        self.response_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Append a completed query, newest first, dropping the oldest past
    /// the history limit.
    pub fn record_history(&self, record: QueryRecord) {
        let Ok(mut history) = self.history.lock() else {
            return;
        };
        history.push_front(record);
        history.truncate(HISTORY_LIMIT);
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let total_queries = self.total_queries.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let samples = self.response_samples.load(Ordering::Relaxed);
        let total_ms = self.response_time_total_ms.load(Ordering::Relaxed);

        MonitorSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            total_queries,
            cache_hits,
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            average_response_ms: if samples == 0 {
                0.0
            } else {
                total_ms as f64 / samples as f64
            },
            cache_hit_rate: if total_queries == 0 {
                0.0
            } else {
                cache_hits as f64 / total_queries as f64
            },
            history: self
                .history
                .lock()
                .map(|h| h.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub uptime_secs: u64,
    pub total_queries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub blocked: u64,
    pub failed: u64,
    pub average_response_ms: f64,
    pub cache_hit_rate: f64,
    pub history: Vec<QueryRecord>,
}

/// Seconds since the unix epoch, for history timestamps.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
