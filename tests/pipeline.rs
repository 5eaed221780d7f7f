//! End-to-end pipeline tests against mock upstream servers.
//!
//! Each test builds an isolated resolver wired to local UDP mocks, so
//! routing, caching, blocking, failover, and exhaustion are observable
//! through real socket traffic.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

use divert::balancer::{LoadBalancer, Strategy, UpstreamServer};
use divert::cache::ResolutionCache;
use divert::dns::{self, DnsQuery, DnsResponse};
use divert::filter::AdBlockFilter;
use divert::monitor::Monitor;
use divert::resolver::{Pools, Resolver};
use divert::router::{RouteClass, Router, RoutingRule};

const MAX_PACKET: usize = 4096;

#[derive(Clone, Copy)]
enum Behavior {
    Answer(Ipv4Addr),
    ServFail,
}

/// Spawn a mock upstream resolver with a fixed behavior.
async fn mock_upstream(behavior: Behavior) -> UpstreamServer {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = [0u8; MAX_PACKET];
        loop {
            let Ok((len, src)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let Some(query) = DnsQuery::parse(&buf[..len]) else {
                continue;
            };
            let response = match behavior {
                Behavior::Answer(address) => DnsResponse::answer(&query, address),
                Behavior::ServFail => {
                    let mut r = DnsResponse::empty(&query);
                    r.flags = 0x8182;
                    r
                }
            };
            let _ = socket.send_to(&response.to_bytes(), src).await;
        }
    });

    UpstreamServer {
        addr,
        name: format!("mock-{}", addr.port()),
        weight: 1.0,
    }
}

struct Harness {
    resolver: Resolver,
    balancer: Arc<LoadBalancer>,
    monitor: Arc<Monitor>,
    filter: Arc<AdBlockFilter>,
}

impl Harness {
    fn new(
        rules: Vec<RoutingRule>,
        domestic: Vec<UpstreamServer>,
        foreign: Vec<UpstreamServer>,
        strategy: Strategy,
        serve_ttl: Duration,
    ) -> Self {
        let filter = Arc::new(AdBlockFilter::new());
        let balancer = Arc::new(LoadBalancer::new());
        let monitor = Arc::new(Monitor::new());
        let cache = Arc::new(ResolutionCache::new(128, serve_ttl, Duration::from_secs(120)));

        let resolver = Resolver::new(
            Router::new(rules),
            Arc::clone(&filter),
            cache,
            Arc::clone(&balancer),
            Arc::clone(&monitor),
            Arc::new(Pools { domestic, foreign }),
            strategy,
            Duration::from_millis(250),
        );

        Self {
            resolver,
            balancer,
            monitor,
            filter,
        }
    }

    async fn query(&self, domain: &str) -> Vec<u8> {
        let client: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        self.resolver
            .handle_packet(&dns::build_query(0x4242, domain), client)
            .await
            .unwrap()
    }
}

fn baidu_rule() -> Vec<RoutingRule> {
    vec![RoutingRule {
        suffix: "baidu.com".to_string(),
        action: RouteClass::Domestic,
    }]
}

#[tokio::test]
async fn routes_by_rule_and_serves_repeat_from_cache() {
    let domestic = mock_upstream(Behavior::Answer(Ipv4Addr::new(10, 1, 1, 1))).await;
    let foreign = mock_upstream(Behavior::Answer(Ipv4Addr::new(20, 2, 2, 2))).await;
    let harness = Harness::new(
        baidu_rule(),
        vec![domestic.clone()],
        vec![foreign.clone()],
        Strategy::Weighted,
        Duration::from_secs(60),
    );

    let response = harness.query("www.baidu.com").await;
    assert_eq!(
        dns::first_a_record(&response),
        Some(Ipv4Addr::new(10, 1, 1, 1))
    );
    assert_eq!(
        harness.balancer.health_of(domestic.addr).unwrap().success_count,
        1
    );
    assert!(harness.balancer.health_of(foreign.addr).is_none());

    // Repeat within the TTL: answered from cache, no further upstream
    // traffic and no new balancer outcomes.
    let repeat = harness.query("www.baidu.com").await;
    assert_eq!(
        dns::first_a_record(&repeat),
        Some(Ipv4Addr::new(10, 1, 1, 1))
    );
    assert_eq!(
        harness.balancer.health_of(domestic.addr).unwrap().success_count,
        1
    );

    let stats = harness.monitor.snapshot();
    assert_eq!(stats.total_queries, 2);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.cache_misses, 1);
}

#[tokio::test]
async fn unmatched_domain_routes_foreign() {
    let domestic = mock_upstream(Behavior::Answer(Ipv4Addr::new(10, 1, 1, 1))).await;
    let foreign = mock_upstream(Behavior::Answer(Ipv4Addr::new(20, 2, 2, 2))).await;
    let harness = Harness::new(
        baidu_rule(),
        vec![domestic],
        vec![foreign],
        Strategy::Weighted,
        Duration::from_secs(60),
    );

    let response = harness.query("example.org").await;

    assert_eq!(
        dns::first_a_record(&response),
        Some(Ipv4Addr::new(20, 2, 2, 2))
    );
}

#[tokio::test]
async fn failover_exhausts_failing_servers_then_succeeds() {
    let failing_a = mock_upstream(Behavior::ServFail).await;
    let healthy = mock_upstream(Behavior::Answer(Ipv4Addr::new(9, 9, 9, 9))).await;
    let failing_b = mock_upstream(Behavior::ServFail).await;
    // Round-robin makes the selection order deterministic: both failing
    // servers are tried before the healthy one answers.
    let harness = Harness::new(
        Vec::new(),
        Vec::new(),
        vec![failing_a.clone(), healthy.clone(), failing_b.clone()],
        Strategy::RoundRobin,
        Duration::from_secs(60),
    );

    let response = harness.query("www.example.com").await;

    assert_eq!(dns::first_a_record(&response), Some(Ipv4Addr::new(9, 9, 9, 9)));

    // Exactly three recorded outcomes for the single query: two
    // failures and one success.
    let fail_a = harness.balancer.health_of(failing_a.addr).unwrap();
    let fail_b = harness.balancer.health_of(failing_b.addr).unwrap();
    let ok = harness.balancer.health_of(healthy.addr).unwrap();
    assert_eq!(fail_a.consecutive_failures, 1);
    assert_eq!(fail_a.success_count, 0);
    assert_eq!(fail_b.consecutive_failures, 1);
    assert_eq!(fail_b.success_count, 0);
    assert_eq!(ok.success_count, 1);
    assert_eq!(ok.consecutive_failures, 0);

    assert_eq!(harness.monitor.snapshot().failed, 0);
}

#[tokio::test]
async fn exhausted_pool_answers_empty_and_counts_one_failure() {
    let failing_a = mock_upstream(Behavior::ServFail).await;
    let failing_b = mock_upstream(Behavior::ServFail).await;
    let harness = Harness::new(
        Vec::new(),
        Vec::new(),
        vec![failing_a, failing_b],
        Strategy::Weighted,
        Duration::from_secs(60),
    );

    let response = harness.query("www.example.com").await;

    assert_eq!(dns::response_id(&response), Some(0x4242));
    assert_eq!(dns::first_a_record(&response), None);
    assert_eq!(harness.monitor.snapshot().failed, 1);
}

#[tokio::test]
async fn blocked_domain_answers_null_without_upstream() {
    let foreign = mock_upstream(Behavior::Answer(Ipv4Addr::new(20, 2, 2, 2))).await;
    let harness = Harness::new(
        Vec::new(),
        Vec::new(),
        vec![foreign.clone()],
        Strategy::Weighted,
        Duration::from_secs(60),
    );
    harness
        .filter
        .publish(["ads.example.com".to_string()].into_iter().collect());

    let response = harness.query("ads.example.com").await;
    assert_eq!(dns::first_a_record(&response), Some(Ipv4Addr::UNSPECIFIED));
    assert!(harness.balancer.health_of(foreign.addr).is_none());
    assert_eq!(harness.monitor.snapshot().blocked, 1);

    // Blocking is exact: the subdomain still resolves upstream.
    let sub = harness.query("sub.ads.example.com").await;
    assert_eq!(dns::first_a_record(&sub), Some(Ipv4Addr::new(20, 2, 2, 2)));
}

#[tokio::test]
async fn stale_cache_entry_is_resolved_again() {
    let foreign = mock_upstream(Behavior::Answer(Ipv4Addr::new(20, 2, 2, 2))).await;
    let harness = Harness::new(
        Vec::new(),
        Vec::new(),
        vec![foreign.clone()],
        Strategy::Weighted,
        Duration::from_millis(10),
    );

    harness.query("www.example.com").await;
    tokio::time::sleep(Duration::from_millis(40)).await;
    harness.query("www.example.com").await;

    // The stale entry was never served: both queries went upstream.
    assert_eq!(
        harness.balancer.health_of(foreign.addr).unwrap().success_count,
        2
    );
}

#[tokio::test]
async fn unsupported_query_type_gets_empty_answer() {
    let foreign = mock_upstream(Behavior::Answer(Ipv4Addr::new(20, 2, 2, 2))).await;
    let harness = Harness::new(
        Vec::new(),
        Vec::new(),
        vec![foreign.clone()],
        Strategy::Weighted,
        Duration::from_secs(60),
    );

    let mut packet = dns::build_query(0x4242, "www.example.com");
    let qtype_at = packet.len() - 4;
    packet[qtype_at..qtype_at + 2].copy_from_slice(&28u16.to_be_bytes()); // AAAA

    let client: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    let response = harness
        .resolver
        .handle_packet(&packet, client)
        .await
        .unwrap();

    assert_eq!(dns::first_a_record(&response), None);
    assert!(harness.balancer.health_of(foreign.addr).is_none());
    assert_eq!(harness.monitor.snapshot().failed, 0);
}

#[tokio::test]
async fn invalid_name_gets_empty_answer() {
    let harness = Harness::new(
        Vec::new(),
        Vec::new(),
        Vec::new(),
        Strategy::Weighted,
        Duration::from_secs(60),
    );

    // A name the wire format allows but the conservative syntax rejects.
    let response = harness.query("_example.com").await;

    assert_eq!(dns::first_a_record(&response), None);
    let stats = harness.monitor.snapshot();
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.total_queries, 1);
}
