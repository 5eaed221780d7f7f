//! Health- and latency-aware upstream selection.
//!
//! Tracks per-server outcome statistics and picks a server from a pool
//! with either round-robin or latency-weighted random selection. Both
//! strategies only consider currently-available servers; with none
//! available the first pool member is returned unconditionally, so a
//! total health outage degrades to plain failover instead of wedging
//! resolution.

pub mod health;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use crate::router::RouteClass;

/// Consecutive failures after which a server stops being selected.
const FAILURE_THRESHOLD: u32 = 3;

/// Weight floor that keeps a slow server selectable at all.
const MIN_WEIGHT: f64 = 0.1;

/// Server selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Weighted,
    RoundRobin,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Weighted
    }
}

/// An upstream resolver as configured. Identity is the socket address;
/// `weight` is the static base weight selection starts from.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamServer {
    pub addr: SocketAddr,
    pub name: String,
    pub weight: f64,
}

/// Mutable per-server statistics, created lazily on first reference and
/// kept for the process lifetime.
#[derive(Debug, Clone)]
pub struct ServerHealth {
    pub available: bool,
    pub consecutive_failures: u32,
    pub success_count: u64,
    pub total_response_ms: u64,
    pub average_response_ms: f64,
    pub weight: f64,
    pub last_updated: Instant,
}

impl ServerHealth {
    fn new(base_weight: f64) -> Self {
        Self {
            available: true,
            consecutive_failures: 0,
            success_count: 0,
            total_response_ms: 0,
            average_response_ms: 0.0,
            weight: base_weight,
            last_updated: Instant::now(),
        }
    }
}

/// Per-server view exposed to the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSnapshot {
    pub addr: String,
    pub name: String,
    pub available: bool,
    pub average_response_ms: f64,
    pub success_rate: f64,
    pub weight: f64,
}

pub struct LoadBalancer {
    health: DashMap<SocketAddr, ServerHealth>,
    domestic_cursor: AtomicUsize,
    foreign_cursor: AtomicUsize,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self {
            health: DashMap::new(),
            domestic_cursor: AtomicUsize::new(0),
            foreign_cursor: AtomicUsize::new(0),
        }
    }

    /// Pick a server for one resolution attempt.
    ///
    /// Never fails on a non-empty pool: if nothing is available the
    /// first pool member is returned and the attempt itself will fail
    /// and drive failover.
    pub fn select(
        &self,
        pool: &[UpstreamServer],
        class: RouteClass,
        strategy: Strategy,
    ) -> Option<UpstreamServer> {
        let first = pool.first()?;
        for server in pool {
            self.ensure_tracked(server);
        }

        let available: Vec<&UpstreamServer> = pool
            .iter()
            .filter(|s| self.is_available(s.addr))
            .collect();
        if available.is_empty() {
            return Some(first.clone());
        }

        let chosen = match strategy {
            Strategy::RoundRobin => {
                let cursor = match class {
                    RouteClass::Domestic => &self.domestic_cursor,
                    RouteClass::Foreign => &self.foreign_cursor,
                };
                available[cursor.fetch_add(1, Ordering::Relaxed) % available.len()]
            }
            Strategy::Weighted => self.weighted_pick(&available),
        };
        Some(chosen.clone())
    }

    /// Fold one query or probe outcome into the server's record.
    ///
    /// The read-modify-write runs under the per-key entry guard with no
    /// await inside, so concurrent outcomes for the same server cannot
    /// lose an update.
    pub fn record_outcome(&self, server: &UpstreamServer, response_ms: u64, success: bool) {
        let mut entry = self
            .health
            .entry(server.addr)
            .or_insert_with(|| ServerHealth::new(server.weight));

        if success {
            entry.consecutive_failures = 0;
            entry.success_count += 1;
            entry.total_response_ms += response_ms;
            entry.average_response_ms =
                entry.total_response_ms as f64 / entry.success_count as f64;
            entry.available = true;
            // Sub-millisecond averages clamp to 1ms so the derived weight
            // stays bounded.
            entry.weight =
                (server.weight * 1000.0 / entry.average_response_ms.max(1.0)).max(MIN_WEIGHT);
        } else {
            entry.consecutive_failures += 1;
            entry.available = entry.consecutive_failures < FAILURE_THRESHOLD;
        }
        entry.last_updated = Instant::now();
    }

    pub fn is_available(&self, addr: SocketAddr) -> bool {
        self.health.get(&addr).map(|h| h.available).unwrap_or(false)
    }

    /// Copy of one server's health record, if it has ever been seen.
    pub fn health_of(&self, addr: SocketAddr) -> Option<ServerHealth> {
        self.health.get(&addr).map(|h| h.value().clone())
    }

    /// Per-server observability view for a pool.
    pub fn snapshot(&self, pool: &[UpstreamServer]) -> Vec<ServerSnapshot> {
        pool.iter()
            .map(|server| match self.health_of(server.addr) {
                Some(h) => ServerSnapshot {
                    addr: server.addr.to_string(),
                    name: server.name.clone(),
                    available: h.available,
                    average_response_ms: h.average_response_ms,
                    success_rate: success_rate(&h),
                    weight: h.weight,
                },
                None => ServerSnapshot {
                    addr: server.addr.to_string(),
                    name: server.name.clone(),
                    available: true,
                    average_response_ms: 0.0,
                    success_rate: 0.0,
                    weight: server.weight,
                },
            })
            .collect()
    }

    fn ensure_tracked(&self, server: &UpstreamServer) {
        self.health
            .entry(server.addr)
            .or_insert_with(|| ServerHealth::new(server.weight));
    }

    fn weight_of(&self, addr: SocketAddr) -> f64 {
        self.health.get(&addr).map(|h| h.weight).unwrap_or(1.0)
    }

    /// Uniform draw over the summed weights; a server's chance of being
    /// picked is proportional to its weight.
    fn weighted_pick<'a>(&self, available: &[&'a UpstreamServer]) -> &'a UpstreamServer {
        let total: f64 = available.iter().map(|s| self.weight_of(s.addr)).sum();
        if total <= 0.0 {
            return available[0];
        }

        let mut draw = fastrand::f64() * total;
        for &server in available {
            draw -= self.weight_of(server.addr);
            if draw <= 0.0 {
                return server;
            }
        }
        available[0]
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new()
    }
}

fn success_rate(h: &ServerHealth) -> f64 {
    if h.success_count == 0 {
        return 0.0;
    }
    let total = h.success_count + h.consecutive_failures as u64;
    (1.0 - h.consecutive_failures as f64 / total as f64) * 100.0
}
