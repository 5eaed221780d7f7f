//! Resolution cache with dual-layer expiry.
//!
//! The store evicts entries past its own TTL, lazily on access and from
//! a periodic prune. Serving freshness is a separate, shorter TTL the
//! orchestrator checks explicitly, so an entry can be retrievable but
//! no longer servable.

use rustc_hash::FxHashMap;
use std::net::Ipv4Addr;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A resolved address with its provenance.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub address: Ipv4Addr,
    pub resolved_at: Instant,
    /// Display name of the upstream server that produced the answer.
    pub server: String,
}

struct StoredEntry {
    entry: CacheEntry,
    expires_at: Instant,
}

/// Hit/miss counters and current size, for observability.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Capacity-bounded map from domain name to its last resolved address.
pub struct ResolutionCache {
    entries: RwLock<FxHashMap<String, StoredEntry>>,
    capacity: usize,
    serve_ttl: Duration,
    store_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResolutionCache {
    pub fn new(capacity: usize, serve_ttl: Duration, store_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            capacity,
            serve_ttl,
            store_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a stored entry. Entries past the store TTL are evicted
    /// lazily and count as misses; freshness for serving is a separate
    /// check via [`is_fresh`](Self::is_fresh).
    pub fn get(&self, name: &str) -> Option<CacheEntry> {
        let now = Instant::now();

        {
            let Ok(entries) = self.entries.read() else {
                return None;
            };
            match entries.get(name) {
                Some(stored) if now < stored.expires_at => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(stored.entry.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        let Ok(mut entries) = self.entries.write() else {
            return None;
        };
        if let Some(stored) = entries.get(name) {
            if now >= stored.expires_at {
                entries.remove(name);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Whether an entry is still young enough to serve.
    pub fn is_fresh(&self, entry: &CacheEntry) -> bool {
        entry.resolved_at.elapsed() < self.serve_ttl
    }

    /// Store a resolution, overwriting any previous entry for the name.
    ///
    /// When full, expired entries are reclaimed first; if the store is
    /// still full the insert is refused.
    pub fn insert(&self, name: &str, entry: CacheEntry) -> bool {
        let Ok(mut entries) = self.entries.write() else {
            return false;
        };

        if entries.len() >= self.capacity && !entries.contains_key(name) {
            let now = Instant::now();
            entries.retain(|_, stored| now < stored.expires_at);
            if entries.len() >= self.capacity {
                return false;
            }
        }

        entries.insert(
            name.to_string(),
            StoredEntry {
                entry,
                expires_at: Instant::now() + self.store_ttl,
            },
        );
        true
    }

    /// Drop entries past the store TTL; returns how many were removed.
    /// Called from the periodic maintenance job.
    pub fn prune(&self) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, stored| now < stored.expires_at);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let hit_rate = if hits + misses == 0 {
            0.0
        } else {
            hits as f64 / (hits + misses) as f64
        };
        CacheStats {
            size: self.len(),
            capacity: self.capacity,
            hits,
            misses,
            hit_rate,
        }
    }
}
