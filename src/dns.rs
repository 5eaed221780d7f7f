//! DNS message parsing and construction.

use std::net::Ipv4Addr;

const HEADER_LEN: usize = 12;

/// A record type.
pub const TYPE_A: u16 = 1;
/// IN class.
pub const CLASS_IN: u16 = 1;
/// TTL stamped on synthesized answers; upstream TTLs are not propagated.
pub const ANSWER_TTL: u32 = 300;

/// A parsed DNS query.
#[derive(Debug, Clone)]
pub struct DnsQuery {
    pub id: u16,
    pub domain: String,
    pub qtype: u16,
    pub qclass: u16,
}

impl DnsQuery {
    /// Parse a DNS query from raw bytes. The domain comes out lower-cased.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN + 1 {
            return None;
        }

        let id = u16::from_be_bytes([data[0], data[1]]);

        // Parse domain name
        let mut pos = HEADER_LEN;
        let mut domain_parts = Vec::new();

        while pos < data.len() {
            let label_len = data[pos] as usize;
            if label_len == 0 {
                pos += 1;
                break;
            }
            pos += 1;
            if pos + label_len > data.len() {
                return None;
            }
            let label = std::str::from_utf8(&data[pos..pos + label_len]).ok()?;
            domain_parts.push(label.to_string());
            pos += label_len;
        }

        if domain_parts.is_empty() {
            return None;
        }

        // Parse QTYPE and QCLASS
        if pos + 4 > data.len() {
            return None;
        }
        let qtype = u16::from_be_bytes([data[pos], data[pos + 1]]);
        let qclass = u16::from_be_bytes([data[pos + 2], data[pos + 3]]);

        Some(Self {
            id,
            domain: domain_parts.join(".").to_lowercase(),
            qtype,
            qclass,
        })
    }

    /// Whether this is an IPv4 address query we can resolve.
    pub fn is_a_query(&self) -> bool {
        self.qtype == TYPE_A && self.qclass == CLASS_IN
    }
}

/// Encode an A query for `domain` with the given transaction ID.
///
/// Used for upstream resolution attempts and health probes. The RD bit
/// is set so the upstream recurses for us.
pub fn build_query(id: u16, domain: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(HEADER_LEN + domain.len() + 6);

    data.extend_from_slice(&id.to_be_bytes());
    data.extend_from_slice(&0x0100u16.to_be_bytes()); // Standard query, recursion desired
    data.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    data.extend_from_slice(&[0x00, 0x00]); // ANCOUNT
    data.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
    data.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

    encode_domain(&mut data, domain);
    data.extend_from_slice(&TYPE_A.to_be_bytes());
    data.extend_from_slice(&CLASS_IN.to_be_bytes());

    data
}

/// A DNS response under construction.
#[derive(Debug, Clone)]
pub struct DnsResponse {
    pub id: u16,
    pub flags: u16,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
}

/// A DNS question section entry.
#[derive(Debug, Clone)]
pub struct DnsQuestion {
    pub domain: String,
    pub qtype: u16,
    pub qclass: u16,
}

/// A DNS resource record.
#[derive(Debug, Clone)]
pub struct DnsRecord {
    pub name: String,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl DnsResponse {
    /// A response answering `query` with a single A record.
    pub fn answer(query: &DnsQuery, address: Ipv4Addr) -> Self {
        Self {
            id: query.id,
            flags: 0x8180, // Standard response, recursion available, no error
            questions: vec![DnsQuestion {
                domain: query.domain.clone(),
                qtype: query.qtype,
                qclass: query.qclass,
            }],
            answers: vec![DnsRecord {
                name: query.domain.clone(),
                rtype: TYPE_A,
                class: CLASS_IN,
                ttl: ANSWER_TTL,
                rdata: address.octets().to_vec(),
            }],
        }
    }

    /// The sentinel answer for a blocked domain.
    pub fn blocked(query: &DnsQuery) -> Self {
        Self::answer(query, Ipv4Addr::UNSPECIFIED)
    }

    /// A response with the question echoed and no answers.
    pub fn empty(query: &DnsQuery) -> Self {
        Self {
            id: query.id,
            flags: 0x8180,
            questions: vec![DnsQuestion {
                domain: query.domain.clone(),
                qtype: query.qtype,
                qclass: query.qclass,
            }],
            answers: Vec::new(),
        }
    }

    /// Encode the response to wire format bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(512);

        // Header
        data.extend_from_slice(&self.id.to_be_bytes());
        data.extend_from_slice(&self.flags.to_be_bytes());
        data.extend_from_slice(&(self.questions.len() as u16).to_be_bytes());
        data.extend_from_slice(&(self.answers.len() as u16).to_be_bytes());
        data.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
        data.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

        // Questions
        for q in &self.questions {
            encode_domain(&mut data, &q.domain);
            data.extend_from_slice(&q.qtype.to_be_bytes());
            data.extend_from_slice(&q.qclass.to_be_bytes());
        }

        // Answers
        for a in &self.answers {
            // Use compression pointer if this is the first question's domain
            if !self.questions.is_empty() && a.name == self.questions[0].domain {
                data.extend_from_slice(&[0xC0, 0x0C]); // Pointer to offset 12
            } else {
                encode_domain(&mut data, &a.name);
            }
            data.extend_from_slice(&a.rtype.to_be_bytes());
            data.extend_from_slice(&a.class.to_be_bytes());
            data.extend_from_slice(&a.ttl.to_be_bytes());
            data.extend_from_slice(&(a.rdata.len() as u16).to_be_bytes());
            data.extend_from_slice(&a.rdata);
        }

        data
    }
}

/// A bare 12-byte empty response carrying the query's ID, for packets
/// that cannot be parsed past the header.
pub fn header_only_response(packet: &[u8]) -> Option<Vec<u8>> {
    if packet.len() < 2 {
        return None;
    }
    let mut data = vec![0u8; HEADER_LEN];
    data[0] = packet[0];
    data[1] = packet[1];
    data[2..4].copy_from_slice(&0x8180u16.to_be_bytes());
    Some(data)
}

fn encode_domain(buf: &mut Vec<u8>, domain: &str) {
    for label in domain.split('.') {
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);
}

/// Transaction ID of a wire-format message.
pub fn response_id(data: &[u8]) -> Option<u16> {
    if data.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([data[0], data[1]]))
}

/// Response code of a wire-format message.
pub fn rcode(data: &[u8]) -> Option<u8> {
    data.get(3).map(|b| b & 0x0F)
}

/// Extract the first A record address from a response's answer section.
pub fn first_a_record(response: &[u8]) -> Option<Ipv4Addr> {
    if response.len() < HEADER_LEN {
        return None;
    }

    let qdcount = u16::from_be_bytes([response[4], response[5]]) as usize;
    let ancount = u16::from_be_bytes([response[6], response[7]]) as usize;
    if ancount == 0 {
        return None;
    }

    let mut pos = HEADER_LEN;

    // Skip question section
    for _ in 0..qdcount {
        while pos < response.len() {
            let label_len = response[pos] as usize;
            if label_len == 0 {
                pos += 1;
                break;
            }
            if label_len >= 0xC0 {
                pos += 2;
                break;
            }
            pos += 1 + label_len;
        }
        pos += 4; // QTYPE + QCLASS
    }

    for _ in 0..ancount {
        if pos >= response.len() {
            break;
        }

        // Skip name (handle compression)
        while pos < response.len() {
            let b = response[pos];
            if b == 0 {
                pos += 1;
                break;
            }
            if b >= 0xC0 {
                pos += 2;
                break;
            }
            pos += 1 + b as usize;
        }

        if pos + 10 > response.len() {
            break;
        }

        let rtype = u16::from_be_bytes([response[pos], response[pos + 1]]);
        let class = u16::from_be_bytes([response[pos + 2], response[pos + 3]]);
        let rdlength = u16::from_be_bytes([response[pos + 8], response[pos + 9]]) as usize;
        let rdata_start = pos + 10;

        if rtype == TYPE_A && class == CLASS_IN && rdlength == 4 {
            let rdata = response.get(rdata_start..rdata_start + 4)?;
            return Some(Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]));
        }

        pos = rdata_start + rdlength;
    }

    None
}
