//! UDP transport for DNS queries.
//!
//! Connectionless queries; each datagram is resolved in its own task so
//! slow upstreams never block the receive loop.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{error, warn};

use crate::limiter::RateLimiter;
use crate::resolver::Resolver;

use super::MAX_DNS_PACKET_SIZE;

/// UDP listener for the DNS proxy.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        Ok(Self { socket })
    }

    /// Spawn the receive loop.
    pub fn start(self, resolver: Arc<Resolver>, limiter: Option<Arc<RateLimiter>>) {
        tokio::spawn(run(self.socket, resolver, limiter));
    }
}

async fn run(socket: Arc<UdpSocket>, resolver: Arc<Resolver>, limiter: Option<Arc<RateLimiter>>) {
    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "udp recv error");
                continue;
            }
        };

        if len < 12 {
            continue;
        }

        if let Some(limiter) = &limiter {
            if !limiter.check(src.ip()) {
                continue;
            }
        }

        let packet = buf[..len].to_vec();
        let socket = Arc::clone(&socket);
        let resolver = Arc::clone(&resolver);
        tokio::spawn(async move {
            if let Some(response) = resolver.handle_packet(&packet, src).await {
                if let Err(e) = socket.send_to(&response, src).await {
                    warn!(error = %e, client = %src, "udp send error");
                }
            }
        });
    }
}
