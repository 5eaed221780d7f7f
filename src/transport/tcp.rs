//! TCP transport for DNS queries.
//!
//! TCP DNS messages are prefixed with a 2-byte length. Each connection
//! is handled in its own task: read the query, run it through the
//! resolver, write the response back with its prefix.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::error;

use crate::limiter::RateLimiter;
use crate::resolver::Resolver;

use super::MAX_DNS_PACKET_SIZE;

/// TCP listener for the DNS proxy.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// Spawn the accept loop.
    pub fn start(self, resolver: Arc<Resolver>, limiter: Option<Arc<RateLimiter>>) {
        tokio::spawn(run_accept_loop(self.listener, resolver, limiter));
    }
}

async fn run_accept_loop(
    listener: TcpListener,
    resolver: Arc<Resolver>,
    limiter: Option<Arc<RateLimiter>>,
) {
    loop {
        match listener.accept().await {
            Ok((client, peer)) => {
                if let Some(limiter) = &limiter {
                    if !limiter.check(peer.ip()) {
                        continue;
                    }
                }
                tokio::spawn(handle_connection(client, peer, Arc::clone(&resolver)));
            }
            Err(e) => {
                error!(error = %e, "tcp accept error");
            }
        }
    }
}

/// Handle a single connection: read one query, resolve, respond.
async fn handle_connection(mut client: TcpStream, peer: SocketAddr, resolver: Arc<Resolver>) {
    let query = match read_dns_message(&mut client).await {
        Some(q) => q,
        None => return,
    };

    let Some(response) = resolver.handle_packet(&query, peer).await else {
        return;
    };

    let mut framed = Vec::with_capacity(2 + response.len());
    framed.extend_from_slice(&(response.len() as u16).to_be_bytes());
    framed.extend_from_slice(&response);
    let _ = client.write_all(&framed).await;
}

/// Read a length-prefixed DNS message from a TCP stream.
///
/// Returns the message without its length prefix.
async fn read_dns_message(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; MAX_DNS_PACKET_SIZE];
    let mut total_read = 0;

    loop {
        match stream.read(&mut buf[total_read..]).await {
            Ok(0) => return None,
            Ok(n) => total_read += n,
            Err(_) => return None,
        }

        if total_read >= 2 {
            let msg_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
            if total_read >= 2 + msg_len {
                buf.truncate(2 + msg_len);
                buf.drain(..2);

                return Some(buf);
            }
        }

        if total_read == buf.len() {
            return None;
        }
    }
}
