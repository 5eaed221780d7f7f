//! Proxy startup orchestration.
//!
//! Builds every service from configuration, spawns the background jobs
//! (blocklist refresh, health checks, cache maintenance, periodic stats
//! log), binds the transports, and runs until killed.

use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::balancer::LoadBalancer;
use crate::balancer::health::HealthChecker;
use crate::cache::ResolutionCache;
use crate::config::Config;
use crate::filter::{AdBlockFilter, BlocklistUpdater};
use crate::http::{self, ApiState};
use crate::limiter::RateLimiter;
use crate::monitor::Monitor;
use crate::resolver::{Pools, Resolver};
use crate::router::Router;
use crate::transport::{tcp::TcpTransport, udp::UdpTransport};

/// Run the DNS proxy with the given configuration. Runs indefinitely.
pub async fn run(config: Config) -> io::Result<()> {
    let filter = Arc::new(AdBlockFilter::new());
    let cache = Arc::new(ResolutionCache::new(
        config.cache.size,
        Duration::from_secs(config.cache.ttl_secs),
        Duration::from_secs(config.cache.store_ttl_secs),
    ));
    let balancer = Arc::new(LoadBalancer::new());
    let monitor = Arc::new(Monitor::new());
    let pools = Arc::new(Pools {
        domestic: config.upstream.domestic.iter().map(|s| s.to_server()).collect(),
        foreign: config.upstream.foreign.iter().map(|s| s.to_server()).collect(),
    });

    let resolver = Arc::new(Resolver::new(
        Router::new(config.routing_rules()),
        Arc::clone(&filter),
        Arc::clone(&cache),
        Arc::clone(&balancer),
        Arc::clone(&monitor),
        Arc::clone(&pools),
        config.balancer.strategy,
        config.server.timeout(),
    ));

    let listen_addr = config.server.listen_addr();
    info!(addr = %listen_addr, "DNS proxy listening");
    info!(
        domestic = %server_names(&pools.domestic),
        foreign = %server_names(&pools.foreign),
        "upstream pools"
    );

    if config.adblock.enabled && !config.adblock.lists.is_empty() {
        let updater = Arc::new(BlocklistUpdater::new(
            Arc::clone(&filter),
            config.adblock.lists.clone(),
            Duration::from_secs(config.adblock.update_interval_secs),
        ));
        tokio::spawn(updater.run());
    }

    if config.balancer.health_check.enabled {
        let checker = Arc::new(HealthChecker::new(
            Arc::clone(&balancer),
            pools.all(),
            config.balancer.health_check.probe_domain.clone(),
            Duration::from_millis(config.balancer.health_check.timeout_ms),
            Duration::from_secs(config.balancer.health_check.interval_secs),
        ));
        tokio::spawn(checker.run());
    }

    // Cache maintenance: prune entries past the store TTL.
    {
        let cache = Arc::clone(&cache);
        let period = Duration::from_secs(config.cache.check_period_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // Skip first immediate tick
            loop {
                interval.tick().await;
                let removed = cache.prune();
                if removed > 0 {
                    debug!(removed, "cache maintenance pruned expired entries");
                }
            }
        });
    }

    // Log stats every minute
    {
        let monitor = Arc::clone(&monitor);
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            interval.tick().await; // Skip first immediate tick
            loop {
                interval.tick().await;
                let stats = monitor.snapshot();
                info!(
                    uptime_secs = stats.uptime_secs,
                    cache = cache.len(),
                    requests = stats.total_queries,
                    cached = stats.cache_hits,
                    blocked = stats.blocked,
                    failed = stats.failed,
                    avg_response_ms = stats.average_response_ms,
                    "stats"
                );
            }
        });
    }

    if config.http.enabled {
        let state = ApiState {
            monitor: Arc::clone(&monitor),
            cache: Arc::clone(&cache),
            balancer: Arc::clone(&balancer),
            pools: Arc::clone(&pools),
        };
        let listen = config.http.listen;
        tokio::spawn(async move {
            if let Err(e) = http::serve(listen, state).await {
                error!(error = %e, "stats endpoint exited");
            }
        });
    }

    let limiter = config.limits.enabled.then(|| {
        Arc::new(RateLimiter::new(
            config.limits.per_client_per_minute,
            config.limits.global_per_second,
            Duration::from_secs(config.limits.ban_secs),
        ))
    });

    let udp = UdpTransport::bind(listen_addr).await?;
    let tcp = TcpTransport::bind(listen_addr).await?;
    udp.start(Arc::clone(&resolver), limiter.clone());
    tcp.start(resolver, limiter);

    // Keep running forever
    std::future::pending::<()>().await;

    Ok(())
}

fn server_names(pool: &[crate::balancer::UpstreamServer]) -> String {
    pool.iter()
        .map(|s| format!("{}({})", s.name, s.addr))
        .collect::<Vec<_>>()
        .join(", ")
}
