pub mod sink;
pub mod stat;

use rustc_hash::FxHashMap;
use serde::Serialize;

/// Display form of a process that could not be attributed.
pub const UNKNOWN_PROCESS: &str = "<UNKNOWN>";

/// Transport-layer protocol of an attributed flow.
#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// Packet direction relative to the capturing interface.
#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

/// The on-host endpoint of a flow, used as the attribution key.
///
/// `ip` is the canonical textual address. The wildcard forms `"0.0.0.0"`,
/// `"::"` and the synthetic `"*"` are lookup-time fallbacks only and are
/// never inserted into a socket map.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LocalSocket {
    pub ip: String,
    pub port: u16,
    pub protocol: Protocol,
}

/// The remote endpoint of a flow. `ip` may carry a resolved hostname in
/// place of the address when DNS resolution is enabled (TCP only).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RemoteSocket {
    pub ip: String,
    pub port: u16,
}

/// The (local, remote) socket pair identifying a flow.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Connection {
    pub local: LocalSocket,
    pub remote: RemoteSocket,
}

impl std::fmt::Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} => {}:{} ({})",
            self.local.ip, self.local.port, self.remote.ip, self.remote.port, self.local.protocol
        )
    }
}

/// Identity of the local process owning a socket.
///
/// An empty name means "unresolved"; such entries must never reach the
/// port-fallback cache.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: i32,
    pub name: String,
}

impl std::fmt::Display for ProcessInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}>:{}", self.pid, self.name)
    }
}

/// Per-connection counters accumulated between two sampling ticks.
#[derive(Clone, Debug, Default)]
pub struct ConnectionInfo {
    pub interface: String,
    pub upload_packets: u64,
    pub download_packets: u64,
    pub upload_bytes: u64,
    pub download_bytes: u64,
    pub process: Option<ProcessInfo>,
}

/// One observed L4 datum: a single packet's byte/packet contribution
/// annotated with flow identity and direction.
#[derive(Clone, Debug)]
pub struct Segment {
    pub interface: String,
    pub data_len: u64,
    pub connection: Connection,
    pub direction: Direction,
    pub process: Option<ProcessInfo>,
}

/// The sink's between-tick aggregation, keyed by flow.
pub type Utilization = FxHashMap<Connection, ConnectionInfo>;

/// The resolver's current best-effort answer to "which process owns this
/// local socket". Rebuilt by whole-map substitution on every refresh.
pub type OpenSockets = FxHashMap<LocalSocket, ProcessInfo>;

/// One tick's input to the stats manager.
#[derive(Debug, Default)]
pub struct Stat {
    pub open_sockets: OpenSockets,
    pub utilization: Utilization,
}

#[cfg(test)]
mod tests {
    use super::*;

    // ut_process_display: display form is <pid>:name
    #[test]
    fn ut_process_display() {
        let p = ProcessInfo {
            pid: 42,
            name: "curl".to_string(),
        };
        assert_eq!(p.to_string(), "<42>:curl");
    }

    // ut_protocol_display
    #[test]
    fn ut_protocol_display() {
        assert_eq!(Protocol::Tcp.to_string(), "tcp");
        assert_eq!(Protocol::Udp.to_string(), "udp");
    }

    // ut_local_socket_exact_equality: keys compare by exact value
    #[test]
    fn ut_local_socket_exact_equality() {
        let a = LocalSocket {
            ip: "10.0.0.2".to_string(),
            port: 443,
            protocol: Protocol::Tcp,
        };
        let b = LocalSocket {
            ip: "0.0.0.0".to_string(),
            port: 443,
            protocol: Protocol::Tcp,
        };
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    // ut_connection_equality_uses_both_sides
    #[test]
    fn ut_connection_equality_uses_both_sides() {
        let local = LocalSocket {
            ip: "10.0.0.2".to_string(),
            port: 50000,
            protocol: Protocol::Tcp,
        };
        let c1 = Connection {
            local: local.clone(),
            remote: RemoteSocket {
                ip: "1.1.1.1".to_string(),
                port: 443,
            },
        };
        let c2 = Connection {
            local,
            remote: RemoteSocket {
                ip: "one.one.one.one".to_string(),
                port: 443,
            },
        };
        assert_ne!(c1, c2);
    }

    // ut_connection_display
    #[test]
    fn ut_connection_display() {
        let conn = Connection {
            local: LocalSocket {
                ip: "10.0.0.2".to_string(),
                port: 50000,
                protocol: Protocol::Udp,
            },
            remote: RemoteSocket {
                ip: "8.8.8.8".to_string(),
                port: 53,
            },
        };
        assert_eq!(conn.to_string(), "10.0.0.2:50000 => 8.8.8.8:53 (udp)");
    }
}
