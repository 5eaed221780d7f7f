//! A single resolution attempt against one upstream server.
//!
//! Sends an A query over a fresh ephemeral UDP socket and races the
//! reply against the caller's timeout. A timed-out attempt is abandoned
//! with the socket; its stats are recorded by the caller.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

use crate::dns;
use crate::error::ResolveError;
use crate::transport::MAX_DNS_PACKET_SIZE;

/// Resolve `domain`'s A record against `server`.
///
/// Returns the first answered address and the elapsed milliseconds.
/// Timeouts, network errors, error rcodes, and answerless responses are
/// all equivalent failures to the failover loop.
pub async fn resolve_a(
    server: SocketAddr,
    domain: &str,
    timeout: Duration,
) -> Result<(Ipv4Addr, u64), ResolveError> {
    let start = Instant::now();

    let bind_addr: SocketAddr = match server {
        SocketAddr::V4(_) => (IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0).into(),
        SocketAddr::V6(_) => (IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0).into(),
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(server).await?;

    let id = fastrand::u16(..);
    socket.send(&dns::build_query(id, domain)).await?;

    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];
    let len = tokio::time::timeout(timeout, socket.recv(&mut buf))
        .await
        .map_err(|_| ResolveError::Timeout)??;
    let response = &buf[..len];

    if dns::response_id(response) != Some(id) {
        return Err(ResolveError::IdMismatch);
    }
    match dns::rcode(response) {
        Some(0) => {}
        Some(rcode) => return Err(ResolveError::Refused { rcode }),
        None => return Err(ResolveError::NoAnswer),
    }

    let address = dns::first_a_record(response).ok_or(ResolveError::NoAnswer)?;
    Ok((address, start.elapsed().as_millis() as u64))
}
