//! Query orchestration.
//!
//! The per-query pipeline: validate, ad-block check, cache lookup,
//! route to a pool, then resolve through the load balancer with
//! failover across the remaining candidates. Transports handle the
//! I/O with the client; the resolver makes every decision in between.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::balancer::{LoadBalancer, Strategy, UpstreamServer};
use crate::cache::{CacheEntry, ResolutionCache};
use crate::dns::{self, DnsQuery, DnsResponse};
use crate::error::ResolveError;
use crate::filter::AdBlockFilter;
use crate::monitor::{Monitor, QueryOutcome, QueryRecord, unix_now};
use crate::router::{RouteClass, Router};
use crate::upstream;

/// Upstream server pools by routing class.
pub struct Pools {
    pub domestic: Vec<UpstreamServer>,
    pub foreign: Vec<UpstreamServer>,
}

impl Pools {
    pub fn for_class(&self, class: RouteClass) -> &[UpstreamServer] {
        match class {
            RouteClass::Domestic => &self.domestic,
            RouteClass::Foreign => &self.foreign,
        }
    }

    /// Every configured server across both pools.
    pub fn all(&self) -> Vec<UpstreamServer> {
        self.domestic
            .iter()
            .chain(self.foreign.iter())
            .cloned()
            .collect()
    }
}

/// Per-query coordinator over router, filter, cache, and balancer.
///
/// Holds no mutable state of its own beyond the query counter; all
/// services are injected at construction so tests can build isolated
/// instances.
pub struct Resolver {
    router: Router,
    filter: Arc<AdBlockFilter>,
    cache: Arc<ResolutionCache>,
    balancer: Arc<LoadBalancer>,
    monitor: Arc<Monitor>,
    pools: Arc<Pools>,
    strategy: Strategy,
    timeout: Duration,
    query_counter: AtomicU64,
}

impl Resolver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router: Router,
        filter: Arc<AdBlockFilter>,
        cache: Arc<ResolutionCache>,
        balancer: Arc<LoadBalancer>,
        monitor: Arc<Monitor>,
        pools: Arc<Pools>,
        strategy: Strategy,
        timeout: Duration,
    ) -> Self {
        Self {
            router,
            filter,
            cache,
            balancer,
            monitor,
            pools,
            strategy,
            timeout,
            query_counter: AtomicU64::new(0),
        }
    }

    /// Handle one raw DNS packet and produce the wire response.
    ///
    /// Returns `None` only for packets too short to carry an ID;
    /// anything else gets an answer, even if it is empty.
    pub async fn handle_packet(&self, packet: &[u8], client: SocketAddr) -> Option<Vec<u8>> {
        let start = Instant::now();

        let Some(query) = DnsQuery::parse(packet) else {
            // Malformed past the header: an empty response, not a
            // protocol error.
            return dns::header_only_response(packet);
        };

        let seq = self.query_counter.fetch_add(1, Ordering::Relaxed);
        self.monitor.record_query();
        debug!(seq, client = %client, domain = %query.domain, "query received");

        let (response, outcome) = self.process(&query).await;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.monitor.record_response_time(elapsed_ms);
        self.monitor.record_history(QueryRecord {
            domain: query.domain,
            client: client.to_string(),
            outcome,
            elapsed_ms,
            timestamp: unix_now(),
        });

        Some(response.to_bytes())
    }

    async fn process(&self, query: &DnsQuery) -> (DnsResponse, QueryOutcome) {
        if !query.is_a_query() {
            return (DnsResponse::empty(query), QueryOutcome::Invalid);
        }

        if !valid_name(&query.domain) {
            warn!(domain = %query.domain, "invalid query name");
            return (DnsResponse::empty(query), QueryOutcome::Invalid);
        }

        if self.filter.is_blocked(&query.domain) {
            info!(domain = %query.domain, "blocked ad domain");
            self.monitor.record_blocked();
            return (DnsResponse::blocked(query), QueryOutcome::Blocked);
        }

        if let Some(entry) = self.cache.get(&query.domain) {
            if self.cache.is_fresh(&entry) {
                debug!(domain = %query.domain, address = %entry.address, "cache hit");
                self.monitor.record_cache_hit();
                return (
                    DnsResponse::answer(query, entry.address),
                    QueryOutcome::CacheHit,
                );
            }
            // Present but stale for serving: resolve again.
        }
        self.monitor.record_cache_miss();

        let class = self.router.route(&query.domain);
        let pool = self.pools.for_class(class);
        debug!(
            domain = %query.domain,
            class = class.as_str(),
            servers = pool.len(),
            "routing upstream"
        );

        match self.resolve_with_failover(&query.domain, pool, class).await {
            Ok((address, server)) => {
                self.cache.insert(
                    &query.domain,
                    CacheEntry {
                        address,
                        resolved_at: Instant::now(),
                        server: server.name,
                    },
                );
                (DnsResponse::answer(query, address), QueryOutcome::Answered)
            }
            Err(e) => {
                warn!(domain = %query.domain, error = %e, "resolution failed");
                self.monitor.record_failed();
                (DnsResponse::empty(query), QueryOutcome::Failed)
            }
        }
    }

    /// Try servers from the pool until one answers or none remain.
    ///
    /// The candidate list shrinks by the failed server each round, so
    /// the loop runs at most `pool.len()` times and the termination
    /// condition is the empty list.
    async fn resolve_with_failover(
        &self,
        domain: &str,
        pool: &[UpstreamServer],
        class: RouteClass,
    ) -> Result<(Ipv4Addr, UpstreamServer), ResolveError> {
        let mut candidates = pool.to_vec();

        while !candidates.is_empty() {
            let Some(server) = self.balancer.select(&candidates, class, self.strategy) else {
                break;
            };

            match upstream::resolve_a(server.addr, domain, self.timeout).await {
                Ok((address, elapsed_ms)) => {
                    self.balancer.record_outcome(&server, elapsed_ms, true);
                    info!(
                        domain,
                        address = %address,
                        server = %server.name,
                        elapsed_ms,
                        "resolved"
                    );
                    return Ok((address, server));
                }
                Err(e) => {
                    self.balancer.record_outcome(&server, 0, false);
                    warn!(domain, server = %server.name, error = %e, "upstream attempt failed");
                    candidates.retain(|s| s.addr != server.addr);
                }
            }
        }

        Err(ResolveError::PoolExhausted)
    }
}

/// Conservative query-name syntax: letters, digits, hyphen, underscore,
/// and dots, shorter than 255 bytes, not starting or ending with a
/// separator.
fn valid_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() >= 255 {
        return false;
    }
    if !bytes
        .iter()
        .all(|&b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
    {
        return false;
    }
    bytes[0].is_ascii_alphanumeric() && bytes[bytes.len() - 1].is_ascii_alphanumeric()
}
