//! Transport layer implementations for the DNS proxy.
//!
//! UDP and TCP listeners that feed inbound queries to the resolver and
//! write its responses back to clients.

pub mod tcp;
pub mod udp;

/// Maximum size of a DNS packet (with some headroom).
pub const MAX_DNS_PACKET_SIZE: usize = 4096;
