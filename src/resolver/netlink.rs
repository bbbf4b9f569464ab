// Kernel socket-diagnosis channel (NETLINK_SOCK_DIAG).
//
// One dump request is sent per (protocol, family) tuple; the kernel answers
// with a stream of fixed-layout inet_diag_msg records terminated by
// NLMSG_DONE. Records are read at explicit byte offsets with explicit
// endianness conversion; nothing here relies on host struct layout.
//
// Record layout (inet_diag.h):
//
//   struct inet_diag_msg {
//       __u8  idiag_family;        // offset 0
//       __u8  idiag_state;         //        1
//       __u8  idiag_timer;         //        2
//       __u8  idiag_retrans;       //        3
//       struct inet_diag_sockid {
//           __be16 idiag_sport;    //        4
//           __be16 idiag_dport;    //        6
//           __be32 idiag_src[4];   //        8
//           __be32 idiag_dst[4];   //       24
//           __u32  idiag_if;       //       40
//           __u32  idiag_cookie[2];//       44
//       };
//       __u32 idiag_expires;       //       52
//       __u32 idiag_rqueue;        //       56
//       __u32 idiag_wqueue;        //       60
//       __u32 idiag_uid;           //       64
//       __u32 idiag_inode;         //       68
//   };                             // total 72

use std::net::{Ipv4Addr, Ipv6Addr};

// Kernel TCP/UDP state numbers (include/net/tcp_states.h).
const TCP_ESTABLISHED: u8 = 1;
const UDP_CONNECTION: u8 = 7;

// Diagnosis state masks. The low `1` bit is carried verbatim from the
// reference dump requests.
pub const TCP_STATES: u32 = 1 | 1 << TCP_ESTABLISHED;
pub const UDP_STATES: u32 = 1 << UDP_CONNECTION;

// Netlink message plumbing.
const NLMSG_HDRLEN: usize = 16;
const NLMSG_DONE: u16 = 3;
const NLMSG_ERROR: u16 = 2;
const NLM_F_REQUEST: u16 = 0x0001;
const NLM_F_DUMP: u16 = 0x0300;
const SOCK_DIAG_BY_FAMILY: u16 = 20;

// Address family wire values as the kernel emits them.
pub const FAMILY_INET: u8 = 2;
pub const FAMILY_INET6: u8 = 10;

const INET_DIAG_REQ_LEN: usize = NLMSG_HDRLEN + 56;
const INET_DIAG_MSG_LEN: usize = 72;

const SPORT_OFFSET: usize = 4;
const SRC_ADDR_OFFSET: usize = 8;
const INODE_OFFSET: usize = 68;

/// One socket reported by the diagnosis stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagRecord {
    /// Source address in canonical textual form.
    pub ip: String,
    /// Source port, host byte order.
    pub port: u16,
    /// Inode of the owning socket.
    pub inode: u32,
}

/// Outcome of parsing one receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// The terminator message was seen; the dump is complete.
    Done,
    /// More messages are expected from further receives.
    More,
}

/// Build one SOCK_DIAG_BY_FAMILY dump request.
pub fn build_diag_request(protocol: u8, family: u8, states: u32) -> [u8; INET_DIAG_REQ_LEN] {
    let mut buf = [0u8; INET_DIAG_REQ_LEN];

    // nlmsghdr: len, type, flags, seq, pid — native byte order.
    buf[0..4].copy_from_slice(&(INET_DIAG_REQ_LEN as u32).to_ne_bytes());
    buf[4..6].copy_from_slice(&SOCK_DIAG_BY_FAMILY.to_ne_bytes());
    buf[6..8].copy_from_slice(&(NLM_F_REQUEST | NLM_F_DUMP).to_ne_bytes());

    // inet_diag_req_v2: family, protocol, ext, pad, states; sockid zeroed.
    buf[16] = family;
    buf[17] = protocol;
    buf[20..24].copy_from_slice(&states.to_ne_bytes());

    buf
}

/// Parse every netlink message in one receive buffer, appending the decoded
/// records to `out`.
pub fn parse_diag_stream(buf: &[u8], out: &mut Vec<DiagRecord>) -> StreamState {
    let mut offset = 0;

    while offset + NLMSG_HDRLEN <= buf.len() {
        let msg_len = u32::from_ne_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ]) as usize;
        let msg_type = u16::from_ne_bytes([buf[offset + 4], buf[offset + 5]]);

        if msg_len < NLMSG_HDRLEN || offset + msg_len > buf.len() {
            break;
        }
        match msg_type {
            NLMSG_DONE => return StreamState::Done,
            NLMSG_ERROR => return StreamState::Done,
            _ => {}
        }

        if let Some(record) = parse_diag_record(&buf[offset + NLMSG_HDRLEN..offset + msg_len]) {
            out.push(record);
        }

        // Messages are 4-byte aligned.
        offset += (msg_len + 3) & !3;
    }

    StreamState::More
}

/// Decode one inet_diag_msg payload.
///
/// Returns `None` for truncated records or unknown address families.
pub fn parse_diag_record(payload: &[u8]) -> Option<DiagRecord> {
    if payload.len() < INET_DIAG_MSG_LEN {
        return None;
    }

    let family = payload[0];
    let ip = ip_to_string(family, &payload[SRC_ADDR_OFFSET..SRC_ADDR_OFFSET + 16])?;

    // Port arrives big-endian on the wire.
    let port = u16::from_be_bytes([payload[SPORT_OFFSET], payload[SPORT_OFFSET + 1]]);

    let inode = u32::from_ne_bytes([
        payload[INODE_OFFSET],
        payload[INODE_OFFSET + 1],
        payload[INODE_OFFSET + 2],
        payload[INODE_OFFSET + 3],
    ]);

    Some(DiagRecord { ip, port, inode })
}

/// Interpret 16 address bytes per the record's family.
fn ip_to_string(family: u8, bytes: &[u8]) -> Option<String> {
    match family {
        FAMILY_INET => Some(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]).to_string()),
        FAMILY_INET6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&bytes[..16]);
            Some(Ipv6Addr::from(octets).to_string())
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Diagnosis socket I/O (Linux only)
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
pub use io::dump_sockets;

#[cfg(target_os = "linux")]
mod io {
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use std::time::Duration;

    use super::{DiagRecord, StreamState, build_diag_request, parse_diag_stream};
    use crate::error::NetsiftError;

    /// Receive timeout for one diagnosis dump.
    const RECV_TIMEOUT: Duration = Duration::from_millis(200);

    const RECV_BUF_LEN: usize = 8192;

    /// Run one dump request on a dedicated diagnosis socket and collect the
    /// reported records.
    ///
    /// A receive timeout surfaces as an error: the refresh decides whether
    /// to keep partial results (it does not — the whole refresh fails and
    /// the previous map is retained).
    pub fn dump_sockets(
        protocol: u8,
        family: u8,
        states: u32,
    ) -> Result<Vec<DiagRecord>, NetsiftError> {
        let fd = open_diag_socket()?;
        send_request(&fd, protocol, family, states)?;

        let mut records = Vec::new();
        let mut buf = vec![0u8; RECV_BUF_LEN];
        loop {
            let n = unsafe {
                libc::recv(
                    fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                )
            };
            if n < 0 {
                return Err(NetsiftError::Diagnosis(io::Error::last_os_error()));
            }
            if n == 0 {
                break;
            }
            if parse_diag_stream(&buf[..n as usize], &mut records) == StreamState::Done {
                break;
            }
        }

        Ok(records)
    }

    fn open_diag_socket() -> Result<OwnedFd, NetsiftError> {
        let fd = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_DGRAM | libc::SOCK_CLOEXEC,
                libc::NETLINK_SOCK_DIAG,
            )
        };
        if fd < 0 {
            return Err(NetsiftError::Diagnosis(io::Error::last_os_error()));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let timeout = libc::timeval {
            tv_sec: RECV_TIMEOUT.as_secs() as libc::time_t,
            tv_usec: RECV_TIMEOUT.subsec_micros() as libc::suseconds_t,
        };
        let ret = unsafe {
            libc::setsockopt(
                fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &timeout as *const libc::timeval as *const libc::c_void,
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(NetsiftError::Diagnosis(io::Error::last_os_error()));
        }

        Ok(fd)
    }

    fn send_request(
        fd: &OwnedFd,
        protocol: u8,
        family: u8,
        states: u32,
    ) -> Result<(), NetsiftError> {
        let request = build_diag_request(protocol, family, states);

        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;

        let ret = unsafe {
            libc::sendto(
                fd.as_raw_fd(),
                request.as_ptr() as *const libc::c_void,
                request.len(),
                0,
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(NetsiftError::Diagnosis(io::Error::last_os_error()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a full netlink message carrying one inet_diag_msg record.
    fn diag_message(family: u8, src: &[u8], sport: [u8; 2], inode: u32) -> Vec<u8> {
        let msg_len = NLMSG_HDRLEN + INET_DIAG_MSG_LEN;
        let mut buf = vec![0u8; msg_len];
        buf[0..4].copy_from_slice(&(msg_len as u32).to_ne_bytes());
        buf[4..6].copy_from_slice(&SOCK_DIAG_BY_FAMILY.to_ne_bytes());

        let payload = &mut buf[NLMSG_HDRLEN..];
        payload[0] = family;
        payload[SPORT_OFFSET..SPORT_OFFSET + 2].copy_from_slice(&sport);
        payload[SRC_ADDR_OFFSET..SRC_ADDR_OFFSET + src.len()].copy_from_slice(src);
        payload[INODE_OFFSET..INODE_OFFSET + 4].copy_from_slice(&inode.to_ne_bytes());
        buf
    }

    fn done_message() -> Vec<u8> {
        let mut buf = vec![0u8; NLMSG_HDRLEN];
        buf[0..4].copy_from_slice(&(NLMSG_HDRLEN as u32).to_ne_bytes());
        buf[4..6].copy_from_slice(&NLMSG_DONE.to_ne_bytes());
        buf
    }

    // ut_port_big_endian: wire bytes [0x01, 0xBB] decode to 443
    #[test]
    fn ut_port_big_endian() {
        let msg = diag_message(FAMILY_INET, &[1, 1, 1, 1], [0x01, 0xBB], 9);
        let rec = parse_diag_record(&msg[NLMSG_HDRLEN..]).unwrap();
        assert_eq!(rec.port, 443);
    }

    // ut_ipv4_dotted_quad: [a, b, c, d] renders as "a.b.c.d"
    #[test]
    fn ut_ipv4_dotted_quad() {
        let msg = diag_message(FAMILY_INET, &[192, 168, 1, 100], [0x1F, 0x90], 77);
        let rec = parse_diag_record(&msg[NLMSG_HDRLEN..]).unwrap();
        assert_eq!(rec.ip, "192.168.1.100");
        assert_eq!(rec.port, 8080);
        assert_eq!(rec.inode, 77);
    }

    // ut_ipv6_canonical_form
    #[test]
    fn ut_ipv6_canonical_form() {
        let mut src = [0u8; 16];
        src[15] = 1;
        let msg = diag_message(FAMILY_INET6, &src, [0x00, 0x35], 5);
        let rec = parse_diag_record(&msg[NLMSG_HDRLEN..]).unwrap();
        assert_eq!(rec.ip, "::1");
        assert_eq!(rec.port, 53);
    }

    // ut_unknown_family_skipped
    #[test]
    fn ut_unknown_family_skipped() {
        let msg = diag_message(99, &[1, 2, 3, 4], [0, 80], 5);
        assert!(parse_diag_record(&msg[NLMSG_HDRLEN..]).is_none());
    }

    // ut_truncated_record_skipped
    #[test]
    fn ut_truncated_record_skipped() {
        let msg = diag_message(FAMILY_INET, &[1, 2, 3, 4], [0, 80], 5);
        assert!(parse_diag_record(&msg[NLMSG_HDRLEN..NLMSG_HDRLEN + 40]).is_none());
    }

    // ut_stream_until_done: records before the terminator are collected
    #[test]
    fn ut_stream_until_done() {
        let mut stream = diag_message(FAMILY_INET, &[10, 0, 0, 2], [0xC3, 0x50], 100);
        stream.extend(diag_message(FAMILY_INET, &[10, 0, 0, 3], [0x00, 0x50], 200));

        let mut out = Vec::new();
        assert_eq!(parse_diag_stream(&stream, &mut out), StreamState::More);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].port, 50000);
        assert_eq!(out[1].ip, "10.0.0.3");

        out.clear();
        stream.extend(done_message());
        assert_eq!(parse_diag_stream(&stream, &mut out), StreamState::Done);
        assert_eq!(out.len(), 2);
    }

    // ut_done_terminates_before_later_records
    #[test]
    fn ut_done_terminates_before_later_records() {
        let mut stream = done_message();
        stream.extend(diag_message(FAMILY_INET, &[10, 0, 0, 2], [0, 80], 1));

        let mut out = Vec::new();
        assert_eq!(parse_diag_stream(&stream, &mut out), StreamState::Done);
        assert!(out.is_empty());
    }

    // ut_request_layout: header + request fields land at their offsets
    #[test]
    fn ut_request_layout() {
        let req = build_diag_request(6, FAMILY_INET, TCP_STATES);
        assert_eq!(req.len(), 72);
        assert_eq!(u32::from_ne_bytes([req[0], req[1], req[2], req[3]]), 72);
        assert_eq!(u16::from_ne_bytes([req[4], req[5]]), 20);
        assert_eq!(u16::from_ne_bytes([req[6], req[7]]), 0x0301);
        assert_eq!(req[16], FAMILY_INET);
        assert_eq!(req[17], 6);
        assert_eq!(
            u32::from_ne_bytes([req[20], req[21], req[22], req[23]]),
            TCP_STATES
        );
    }

    // ut_state_masks_verbatim: bit patterns preserved from the reference
    #[test]
    fn ut_state_masks_verbatim() {
        assert_eq!(TCP_STATES, 0b11);
        assert_eq!(UDP_STATES, 0x80);
    }
}
