// Per-tick aggregation: folds a drained utilisation and the current socket
// map into ranked per-connection / per-remote / per-process tables.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::model::{Connection, LocalSocket, OpenSockets, ProcessInfo, Stat, UNKNOWN_PROCESS};
use crate::options::ViewMode;
use crate::resolver::SocketFetcher;

/// Wildcard substitutions tried when a direct socket-map lookup misses.
const WILDCARD_IPS: &[&str] = &["*", "0.0.0.0", "::"];

/// Counters for one connection within a sampling window.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ConnectionData {
    pub interface: String,
    pub process_name: String,
    pub upload_bytes: u64,
    pub download_bytes: u64,
    pub upload_packets: u64,
    pub download_packets: u64,
}

/// Counters aggregated over several connections sharing a key
/// (remote endpoint or process name).
#[derive(Clone, Debug, Default, Serialize)]
pub struct AggregatedData {
    pub conn_count: u64,
    pub upload_bytes: u64,
    pub download_bytes: u64,
    pub upload_packets: u64,
    pub download_packets: u64,
}

impl AggregatedData {
    fn add(&mut self, data: &ConnectionData) {
        self.conn_count += 1;
        self.upload_bytes += data.upload_bytes;
        self.download_bytes += data.download_bytes;
        self.upload_packets += data.upload_packets;
        self.download_packets += data.download_packets;
    }
}

/// Immutable per-tick summary consumed by the rendering collaborator.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub total_connections: usize,
    pub total_upload_bytes: u64,
    pub total_download_bytes: u64,
    pub total_upload_packets: u64,
    pub total_download_packets: u64,
    pub connections: FxHashMap<Connection, ConnectionData>,
    pub remote_addrs: FxHashMap<String, AggregatedData>,
    pub processes: FxHashMap<String, AggregatedData>,
}

impl Snapshot {
    /// The `n` highest-ranked connections under `mode`. Ties break by the
    /// connection display key, so the order is fully deterministic.
    pub fn top_n_connections(&self, n: usize, mode: ViewMode) -> Vec<(Connection, ConnectionData)> {
        let mut rows: Vec<(String, Connection, ConnectionData)> = self
            .connections
            .iter()
            .map(|(conn, data)| (conn.to_string(), conn.clone(), data.clone()))
            .collect();
        rows.sort_by(|a, b| {
            let ka = rank_key(mode, 1, &a.2);
            let kb = rank_key(mode, 1, &b.2);
            kb.cmp(&ka).then_with(|| a.0.cmp(&b.0))
        });
        rows.truncate(n);
        rows.into_iter().map(|(_, conn, data)| (conn, data)).collect()
    }

    /// The `n` highest-ranked remote endpoints under `mode`.
    pub fn top_n_remote_addrs(&self, n: usize, mode: ViewMode) -> Vec<(String, AggregatedData)> {
        top_n_aggregated(&self.remote_addrs, n, mode)
    }

    /// The `n` highest-ranked processes under `mode`.
    pub fn top_n_processes(&self, n: usize, mode: ViewMode) -> Vec<(String, AggregatedData)> {
        top_n_aggregated(&self.processes, n, mode)
    }
}

fn top_n_aggregated(
    table: &FxHashMap<String, AggregatedData>,
    n: usize,
    mode: ViewMode,
) -> Vec<(String, AggregatedData)> {
    let mut rows: Vec<(String, AggregatedData)> =
        table.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    rows.sort_by(|a, b| {
        let ka = agg_rank_key(mode, &a.1);
        let kb = agg_rank_key(mode, &b.1);
        kb.cmp(&ka).then_with(|| a.0.cmp(&b.0))
    });
    rows.truncate(n);
    rows
}

/// Ordering key for a single connection: (primary, secondary), larger first.
fn rank_key(mode: ViewMode, conn_count: u64, data: &ConnectionData) -> (u64, u64) {
    match mode {
        ViewMode::Bytes => (data.upload_bytes + data.download_bytes, 0),
        ViewMode::Packets => (data.upload_packets + data.download_packets, 0),
        ViewMode::Processes => (conn_count, data.upload_bytes + data.download_bytes),
    }
}

fn agg_rank_key(mode: ViewMode, data: &AggregatedData) -> (u64, u64) {
    match mode {
        ViewMode::Bytes => (data.upload_bytes + data.download_bytes, 0),
        ViewMode::Packets => (data.upload_packets + data.download_packets, 0),
        ViewMode::Processes => (data.conn_count, data.upload_bytes + data.download_bytes),
    }
}

/// Folds each tick's drained utilisation into the current snapshot.
///
/// The port fallback is an explicitly injected capability: the manager never
/// assumes anything about the fetcher's concrete type.
pub struct StatsManager {
    fetcher: Option<Arc<dyn SocketFetcher>>,
    snapshot: Snapshot,
}

impl StatsManager {
    pub fn new(fetcher: Option<Arc<dyn SocketFetcher>>) -> Self {
        Self {
            fetcher,
            snapshot: Snapshot::default(),
        }
    }

    /// Replace the in-memory model with the aggregation of one window.
    pub fn put(&mut self, stat: Stat) {
        let mut snap = Snapshot::default();

        for (conn, info) in stat.utilization {
            let process_name =
                self.resolve_process_name(&conn.local, info.process.as_ref(), &stat.open_sockets);

            snap.total_upload_bytes += info.upload_bytes;
            snap.total_download_bytes += info.download_bytes;
            snap.total_upload_packets += info.upload_packets;
            snap.total_download_packets += info.download_packets;

            let data = ConnectionData {
                interface: info.interface,
                process_name: process_name.clone(),
                upload_bytes: info.upload_bytes,
                download_bytes: info.download_bytes,
                upload_packets: info.upload_packets,
                download_packets: info.download_packets,
            };

            let remote_key = format!(
                "{}:{}/{}",
                conn.remote.ip, conn.remote.port, conn.local.protocol
            );
            snap.remote_addrs.entry(remote_key).or_default().add(&data);
            snap.processes.entry(process_name).or_default().add(&data);
            snap.connections.insert(conn, data);
        }

        snap.total_connections = snap.connections.len();
        self.snapshot = snap;
    }

    /// The current window's immutable view.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.clone()
    }

    /// Resolution ladder: attached process, then the socket map (exact,
    /// then wildcard substitutions), then the port-fallback cache, then
    /// the unknown sentinel.
    fn resolve_process_name(
        &self,
        local: &LocalSocket,
        attached: Option<&ProcessInfo>,
        open_sockets: &OpenSockets,
    ) -> String {
        if let Some(process) = attached {
            return process.to_string();
        }

        // Empty-name map entries are unresolved placeholders, not hits.
        if let Some(process) = open_sockets.get(local)
            && !process.name.is_empty()
        {
            return process.to_string();
        }

        for wildcard in WILDCARD_IPS {
            let candidate = LocalSocket {
                ip: wildcard.to_string(),
                port: local.port,
                protocol: local.protocol,
            };
            if let Some(process) = open_sockets.get(&candidate)
                && !process.name.is_empty()
            {
                return process.to_string();
            }
        }

        if let Some(fetcher) = &self.fetcher
            && let Some(process) = fetcher.port_fallback(local.port)
        {
            return process.to_string();
        }

        UNKNOWN_PROCESS.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetsiftError;
    use crate::model::{ConnectionInfo, Protocol, RemoteSocket, Utilization};

    fn local(ip: &str, port: u16) -> LocalSocket {
        LocalSocket {
            ip: ip.to_string(),
            port,
            protocol: Protocol::Tcp,
        }
    }

    fn conn(local_ip: &str, local_port: u16, remote_ip: &str, remote_port: u16) -> Connection {
        Connection {
            local: local(local_ip, local_port),
            remote: RemoteSocket {
                ip: remote_ip.to_string(),
                port: remote_port,
            },
        }
    }

    fn info(upload_bytes: u64, upload_packets: u64) -> ConnectionInfo {
        ConnectionInfo {
            interface: "eth0".to_string(),
            upload_bytes,
            upload_packets,
            ..Default::default()
        }
    }

    struct PortOnlyFetcher(Option<ProcessInfo>);

    impl SocketFetcher for PortOnlyFetcher {
        fn get_open_sockets(&self) -> Result<OpenSockets, NetsiftError> {
            Ok(OpenSockets::default())
        }

        fn port_fallback(&self, _port: u16) -> Option<ProcessInfo> {
            self.0.clone()
        }
    }

    fn put_single(manager: &mut StatsManager, conn: Connection, open_sockets: OpenSockets) {
        let mut utilization = Utilization::default();
        utilization.insert(conn, info(100, 2));
        manager.put(Stat {
            open_sockets,
            utilization,
        });
    }

    // ut_wildcard_listener_resolved: 0.0.0.0-bound socket matches any local ip
    #[test]
    fn ut_wildcard_listener_resolved() {
        let mut open_sockets = OpenSockets::default();
        open_sockets.insert(
            local("0.0.0.0", 8080),
            ProcessInfo {
                pid: 7,
                name: "nginx".to_string(),
            },
        );

        let mut manager = StatsManager::new(None);
        put_single(
            &mut manager,
            conn("192.168.1.5", 8080, "10.9.8.7", 50111),
            open_sockets,
        );

        let snap = manager.snapshot();
        assert_eq!(snap.processes.len(), 1);
        assert!(snap.processes.contains_key("<7>:nginx"));
    }

    // ut_attached_process_wins: decoder enrichment beats the socket map
    #[test]
    fn ut_attached_process_wins() {
        let mut open_sockets = OpenSockets::default();
        open_sockets.insert(
            local("10.0.0.2", 50000),
            ProcessInfo {
                pid: 9,
                name: "other".to_string(),
            },
        );

        let mut utilization = Utilization::default();
        let mut ci = info(10, 1);
        ci.process = Some(ProcessInfo {
            pid: 42,
            name: "curl".to_string(),
        });
        utilization.insert(conn("10.0.0.2", 50000, "1.1.1.1", 443), ci);

        let mut manager = StatsManager::new(None);
        manager.put(Stat {
            open_sockets,
            utilization,
        });

        assert!(manager.snapshot().processes.contains_key("<42>:curl"));
    }

    // ut_port_fallback_consulted_last
    #[test]
    fn ut_port_fallback_consulted_last() {
        let fetcher = Arc::new(PortOnlyFetcher(Some(ProcessInfo {
            pid: 11,
            name: "beam".to_string(),
        })));
        let mut manager = StatsManager::new(Some(fetcher));
        put_single(
            &mut manager,
            conn("10.0.0.2", 4369, "10.0.0.9", 40000),
            OpenSockets::default(),
        );

        assert!(manager.snapshot().processes.contains_key("<11>:beam"));
    }

    // ut_unknown_sentinel: every ladder rung missed
    #[test]
    fn ut_unknown_sentinel() {
        let mut manager = StatsManager::new(Some(Arc::new(PortOnlyFetcher(None))));
        put_single(
            &mut manager,
            conn("10.0.0.2", 50000, "1.1.1.1", 443),
            OpenSockets::default(),
        );

        let snap = manager.snapshot();
        assert!(snap.processes.contains_key(UNKNOWN_PROCESS));
        assert_eq!(snap.total_connections, 1);
    }

    // ut_totals_and_remote_key: totals sum both directions; remote key is
    // ip:port/proto
    #[test]
    fn ut_totals_and_remote_key() {
        let mut utilization = Utilization::default();
        utilization.insert(
            conn("10.0.0.2", 50000, "1.1.1.1", 443),
            ConnectionInfo {
                interface: "eth0".to_string(),
                upload_bytes: 100,
                upload_packets: 2,
                download_bytes: 300,
                download_packets: 4,
                ..Default::default()
            },
        );

        let mut manager = StatsManager::new(None);
        manager.put(Stat {
            open_sockets: OpenSockets::default(),
            utilization,
        });

        let snap = manager.snapshot();
        assert_eq!(snap.total_upload_bytes, 100);
        assert_eq!(snap.total_download_bytes, 300);
        assert_eq!(snap.total_upload_packets, 2);
        assert_eq!(snap.total_download_packets, 4);
        assert!(snap.remote_addrs.contains_key("1.1.1.1:443/tcp"));
    }

    // ut_top_n_tie_breaks_alphabetically: A and B at 100 bytes -> [A, B]
    #[test]
    fn ut_top_n_tie_breaks_alphabetically() {
        let mut snap = Snapshot::default();
        for (name, bytes) in [("B", 100u64), ("A", 100), ("C", 50)] {
            snap.processes.insert(
                name.to_string(),
                AggregatedData {
                    conn_count: 1,
                    upload_bytes: bytes,
                    ..Default::default()
                },
            );
        }

        let top = snap.top_n_processes(2, ViewMode::Bytes);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0, "A");
        assert_eq!(top[1].0, "B");
    }

    // ut_top_n_processes_mode: connection count first, then bytes
    #[test]
    fn ut_top_n_processes_mode() {
        let mut snap = Snapshot::default();
        snap.processes.insert(
            "few-conns-big".to_string(),
            AggregatedData {
                conn_count: 1,
                upload_bytes: 9_000,
                ..Default::default()
            },
        );
        snap.processes.insert(
            "many-conns-small".to_string(),
            AggregatedData {
                conn_count: 5,
                upload_bytes: 10,
                ..Default::default()
            },
        );

        let top = snap.top_n_processes(10, ViewMode::Processes);
        assert_eq!(top[0].0, "many-conns-small");
        assert_eq!(top[1].0, "few-conns-big");
    }

    // ut_top_n_length_clamped: length = min(n, set size)
    #[test]
    fn ut_top_n_length_clamped() {
        let mut snap = Snapshot::default();
        snap.remote_addrs
            .insert("1.1.1.1:443/tcp".to_string(), AggregatedData::default());

        assert_eq!(snap.top_n_remote_addrs(5, ViewMode::Bytes).len(), 1);
        assert_eq!(snap.top_n_remote_addrs(0, ViewMode::Bytes).len(), 0);
    }

    // ut_put_replaces_window: a second put discards the previous window
    #[test]
    fn ut_put_replaces_window() {
        let mut manager = StatsManager::new(None);
        put_single(
            &mut manager,
            conn("10.0.0.2", 50000, "1.1.1.1", 443),
            OpenSockets::default(),
        );
        assert_eq!(manager.snapshot().total_connections, 1);

        manager.put(Stat::default());
        let snap = manager.snapshot();
        assert_eq!(snap.total_connections, 0);
        assert_eq!(snap.total_upload_bytes, 0);
        assert!(snap.connections.is_empty());
    }
}
