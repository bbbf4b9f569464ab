// Frame decoding: Ethernet -> IPv4/IPv6 -> TCP/UDP, strictly layered with
// explicit offsets, short-circuiting on the first failure. Anything that is
// not an IP frame carrying TCP or UDP is dropped silently.

use std::collections::HashSet;
use std::sync::Arc;

use crate::dns::Lookup;
use crate::model::{Connection, Direction, LocalSocket, Protocol, RemoteSocket, Segment};
use crate::resolver::ProcessMonitor;

// Ethernet
const ETH_HLEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;

// IPv4
const IPV4_MIN_HLEN: usize = 20;
const IPV4_TOTAL_LEN_OFFSET: usize = 2;
const IPV4_FLAGS_FRAG_OFFSET: usize = 6;
const IPV4_PROTO_OFFSET: usize = 9;
const IPV4_SRC_OFFSET: usize = 12;
const IPV4_DST_OFFSET: usize = 16;

// IPv6
const IPV6_HLEN: usize = 40;
const IPV6_PAYLOAD_LEN_OFFSET: usize = 4;
const IPV6_NEXT_HDR_OFFSET: usize = 6;
const IPV6_SRC_OFFSET: usize = 8;
const IPV6_DST_OFFSET: usize = 24;

// L4 protocol numbers
const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;

// IPv6 extension header protocol numbers
const EXT_HOP_BY_HOP: u8 = 0;
const EXT_ROUTING: u8 = 43;
const EXT_FRAGMENT: u8 = 44;
const EXT_DEST_OPTIONS: u8 = 60;

const TCP_MIN_HLEN: usize = 20;
const UDP_HLEN: usize = 8;

/// Flow identity and size extracted from one frame, before direction and
/// attribution are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSummary {
    pub protocol: Protocol,
    pub src_ip: String,
    pub src_port: u16,
    pub dst_ip: String,
    pub dst_port: u16,
    /// L4 header bytes + L4 payload bytes.
    pub data_len: u64,
}

/// Decode one raw Ethernet frame into a flow summary.
///
/// Returns `None` for truncated frames, non-IP EtherTypes, non-first IPv4
/// fragments, and transports other than TCP/UDP.
pub fn decode_flow(frame: &[u8]) -> Option<FlowSummary> {
    if frame.len() < ETH_HLEN {
        return None;
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    let l3 = &frame[ETH_HLEN..];

    match ethertype {
        ETHERTYPE_IPV4 => decode_ipv4(l3),
        ETHERTYPE_IPV6 => decode_ipv6(l3),
        _ => None,
    }
}

fn decode_ipv4(data: &[u8]) -> Option<FlowSummary> {
    if data.len() < IPV4_MIN_HLEN {
        return None;
    }
    let ihl = ((data[0] & 0x0F) as usize) * 4;
    if ihl < IPV4_MIN_HLEN || data.len() < ihl {
        return None;
    }

    // Non-first fragments carry no L4 header.
    let flags_frag = u16::from_be_bytes([
        data[IPV4_FLAGS_FRAG_OFFSET],
        data[IPV4_FLAGS_FRAG_OFFSET + 1],
    ]);
    if (flags_frag & 0x1FFF) != 0 {
        return None;
    }

    let total_len = u16::from_be_bytes([
        data[IPV4_TOTAL_LEN_OFFSET],
        data[IPV4_TOTAL_LEN_OFFSET + 1],
    ]) as usize;
    if total_len < ihl {
        return None;
    }
    // The L4 slice is bounded by the IP total length so that link-layer
    // padding never counts as payload.
    let l4_len = (total_len - ihl).min(data.len() - ihl);

    let src_ip = format!(
        "{}.{}.{}.{}",
        data[IPV4_SRC_OFFSET],
        data[IPV4_SRC_OFFSET + 1],
        data[IPV4_SRC_OFFSET + 2],
        data[IPV4_SRC_OFFSET + 3]
    );
    let dst_ip = format!(
        "{}.{}.{}.{}",
        data[IPV4_DST_OFFSET],
        data[IPV4_DST_OFFSET + 1],
        data[IPV4_DST_OFFSET + 2],
        data[IPV4_DST_OFFSET + 3]
    );

    decode_l4(data[IPV4_PROTO_OFFSET], &data[ihl..ihl + l4_len], src_ip, dst_ip)
}

fn decode_ipv6(data: &[u8]) -> Option<FlowSummary> {
    if data.len() < IPV6_HLEN {
        return None;
    }

    let payload_len = u16::from_be_bytes([
        data[IPV6_PAYLOAD_LEN_OFFSET],
        data[IPV6_PAYLOAD_LEN_OFFSET + 1],
    ]) as usize;

    let src_ip = ipv6_to_string(&data[IPV6_SRC_OFFSET..IPV6_SRC_OFFSET + 16]);
    let dst_ip = ipv6_to_string(&data[IPV6_DST_OFFSET..IPV6_DST_OFFSET + 16]);

    let after_fixed = &data[IPV6_HLEN..];
    let bounded = &after_fixed[..payload_len.min(after_fixed.len())];
    let (next_hdr, ext_len) = skip_extension_headers(data[IPV6_NEXT_HDR_OFFSET], bounded);

    decode_l4(next_hdr, &bounded[ext_len..], src_ip, dst_ip)
}

/// Skip recognized IPv6 extension headers, returning the final next-header
/// value and the offset where the L4 header starts.
fn skip_extension_headers(mut next_hdr: u8, data: &[u8]) -> (u8, usize) {
    let mut offset = 0;
    loop {
        match next_hdr {
            EXT_HOP_BY_HOP | EXT_ROUTING | EXT_DEST_OPTIONS => {
                if offset + 2 > data.len() {
                    return (next_hdr, offset);
                }
                let ext_len = (data[offset + 1] as usize + 1) * 8;
                if offset + ext_len > data.len() {
                    return (next_hdr, offset);
                }
                next_hdr = data[offset];
                offset += ext_len;
            }
            EXT_FRAGMENT => {
                if offset + 8 > data.len() {
                    return (next_hdr, offset);
                }
                next_hdr = data[offset];
                offset += 8;
            }
            _ => return (next_hdr, offset),
        }
    }
}

fn decode_l4(proto: u8, data: &[u8], src_ip: String, dst_ip: String) -> Option<FlowSummary> {
    let protocol = match proto {
        PROTO_TCP => {
            if data.len() < TCP_MIN_HLEN {
                return None;
            }
            let data_offset = ((data[12] >> 4) as usize) * 4;
            if data_offset < TCP_MIN_HLEN || data_offset > data.len() {
                return None;
            }
            Protocol::Tcp
        }
        PROTO_UDP => {
            if data.len() < UDP_HLEN {
                return None;
            }
            Protocol::Udp
        }
        _ => return None,
    };

    Some(FlowSummary {
        protocol,
        src_port: u16::from_be_bytes([data[0], data[1]]),
        dst_port: u16::from_be_bytes([data[2], data[3]]),
        src_ip,
        dst_ip,
        data_len: data.len() as u64,
    })
}

fn ipv6_to_string(bytes: &[u8]) -> String {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(bytes);
    std::net::Ipv6Addr::from(octets).to_string()
}

/// Turns decoded flows into attributed segments for one capture handle.
///
/// Holds the handle's bound-IP set (written once at construction), the
/// optional DNS lookup, and the attribution service.
pub struct Decoder {
    interface: String,
    bound_ips: HashSet<String>,
    lookup: Option<Arc<dyn Lookup>>,
    monitor: Arc<ProcessMonitor>,
}

impl Decoder {
    pub fn new(
        interface: String,
        bound_ips: HashSet<String>,
        lookup: Option<Arc<dyn Lookup>>,
        monitor: Arc<ProcessMonitor>,
    ) -> Self {
        Self {
            interface,
            bound_ips,
            lookup,
            monitor,
        }
    }

    /// Decode one frame into an attributed segment, or `None` when the
    /// frame is unclassifiable.
    pub fn decode(&self, frame: &[u8]) -> Option<Segment> {
        let flow = decode_flow(frame)?;

        let direction = if self.bound_ips.contains(&flow.src_ip) {
            Direction::Upload
        } else {
            Direction::Download
        };

        let (local_ip, local_port, remote_ip, remote_port) = match direction {
            Direction::Upload => (flow.src_ip, flow.src_port, flow.dst_ip, flow.dst_port),
            Direction::Download => (flow.dst_ip, flow.dst_port, flow.src_ip, flow.src_port),
        };

        // Hostname substitution applies to TCP remotes only.
        let remote_ip = match (&self.lookup, flow.protocol) {
            (Some(lookup), Protocol::Tcp) => lookup.lookup(&remote_ip),
            _ => remote_ip,
        };

        let connection = Connection {
            local: LocalSocket {
                ip: local_ip,
                port: local_port,
                protocol: flow.protocol,
            },
            remote: RemoteSocket {
                ip: remote_ip,
                port: remote_port,
            },
        };

        let process = self.monitor.get(&connection.local);

        Some(Segment {
            interface: self.interface.clone(),
            data_len: flow.data_len,
            connection,
            direction,
            process,
        })
    }
}
