//! Periodic upstream health probes.
//!
//! Each sweep resolves a fixed probe domain against every configured
//! server and feeds the outcome through the same recording path as live
//! traffic. This is the only way a server that live traffic has failed
//! away from can become available again.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{LoadBalancer, UpstreamServer};
use crate::upstream;

pub struct HealthChecker {
    balancer: Arc<LoadBalancer>,
    servers: Vec<UpstreamServer>,
    probe_domain: String,
    timeout: Duration,
    period: Duration,
}

impl HealthChecker {
    pub fn new(
        balancer: Arc<LoadBalancer>,
        servers: Vec<UpstreamServer>,
        probe_domain: String,
        timeout: Duration,
        period: Duration,
    ) -> Self {
        Self {
            balancer,
            servers,
            probe_domain,
            timeout,
            period,
        }
    }

    /// Probe every server on a fixed interval, forever.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.tick().await; // Skip first immediate tick
        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    /// One probe sweep over every server, concurrently.
    pub async fn sweep(&self) {
        join_all(self.servers.iter().map(|s| self.probe(s))).await;
    }

    /// Probe one server with a real resolution of the probe domain.
    pub async fn probe(&self, server: &UpstreamServer) -> bool {
        match upstream::resolve_a(server.addr, &self.probe_domain, self.timeout).await {
            Ok((_, elapsed_ms)) => {
                self.balancer.record_outcome(server, elapsed_ms, true);
                debug!(server = %server.addr, elapsed_ms, "health check ok");
                true
            }
            Err(e) => {
                self.balancer.record_outcome(server, 0, false);
                warn!(server = %server.addr, error = %e, "health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{DnsQuery, DnsResponse};
    use std::net::Ipv4Addr;
    use tokio::net::UdpSocket;

    async fn answering_upstream() -> UpstreamServer {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let Ok((len, src)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                if let Some(query) = DnsQuery::parse(&buf[..len]) {
                    let response = DnsResponse::answer(&query, Ipv4Addr::new(5, 5, 5, 5));
                    let _ = socket.send_to(&response.to_bytes(), src).await;
                }
            }
        });
        UpstreamServer {
            addr,
            name: "probe-target".to_string(),
            weight: 1.0,
        }
    }

    #[tokio::test]
    async fn successful_probe_restores_availability() {
        let balancer = Arc::new(LoadBalancer::new());
        let server = answering_upstream().await;
        let checker = HealthChecker::new(
            Arc::clone(&balancer),
            vec![server.clone()],
            "www.example.com".to_string(),
            Duration::from_secs(1),
            Duration::from_secs(30),
        );

        for _ in 0..3 {
            balancer.record_outcome(&server, 0, false);
        }
        assert!(!balancer.is_available(server.addr));

        assert!(checker.probe(&server).await);
        assert!(balancer.is_available(server.addr));
    }

    #[tokio::test]
    async fn failed_probe_counts_toward_unavailability() {
        let balancer = Arc::new(LoadBalancer::new());
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server = UpstreamServer {
            addr: socket.local_addr().unwrap(),
            name: "dead".to_string(),
            weight: 1.0,
        };
        let checker = HealthChecker::new(
            Arc::clone(&balancer),
            vec![server.clone()],
            "www.example.com".to_string(),
            Duration::from_millis(50),
            Duration::from_secs(30),
        );

        for _ in 0..3 {
            assert!(!checker.probe(&server).await);
        }

        assert!(!balancer.is_available(server.addr));
    }
}
