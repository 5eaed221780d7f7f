//! Ad-domain filtering.
//!
//! Membership is exact: blocking a domain does not block its
//! subdomains. Block-lists are authored with every domain spelled out,
//! so the filter never walks parent domains.

mod fetch;

pub use fetch::{BlocklistUpdater, parse_list};

use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::sync::Arc;

/// Exact-match set of blocked domains.
///
/// The set is replaced wholesale by the updater; queries always see
/// either the old or the new complete snapshot.
pub struct AdBlockFilter {
    domains: ArcSwap<HashSet<String>>,
}

impl AdBlockFilter {
    /// Create an empty filter; nothing is blocked until a snapshot is
    /// published.
    pub fn new() -> Self {
        Self {
            domains: ArcSwap::from_pointee(HashSet::new()),
        }
    }

    /// Exact membership test against the current snapshot.
    pub fn is_blocked(&self, domain: &str) -> bool {
        self.domains.load().contains(domain)
    }

    /// Atomically replace the whole snapshot.
    pub fn publish(&self, domains: HashSet<String>) {
        self.domains.store(Arc::new(domains));
    }

    pub fn len(&self) -> usize {
        self.domains.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AdBlockFilter {
    fn default() -> Self {
        Self::new()
    }
}
