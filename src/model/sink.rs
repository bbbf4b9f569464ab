// Between-tick accumulator shared by all capture readers.

use std::sync::Mutex;

use crate::model::{Direction, Segment, Utilization};

/// Thread-safe drain-on-read accumulator.
///
/// Readers call [`Sinker::fetch`] once per decoded packet; the tick driver
/// calls [`Sinker::drain`] to take the whole window. The map is mutated only
/// under the mutex and replaced by an empty one on every drain, so any
/// segment fetched before a drain is included in it and any fetched after is
/// excluded.
pub struct Sinker {
    utilization: Mutex<Utilization>,
}

impl Sinker {
    pub fn new() -> Self {
        Self {
            utilization: Mutex::new(Utilization::default()),
        }
    }

    /// Merge one segment into the current window.
    ///
    /// The first segment for a connection records the interface and the
    /// attributed process; later segments never overwrite them.
    pub fn fetch(&self, seg: Segment) {
        let mut utilization = self.utilization.lock().unwrap_or_else(|e| e.into_inner());

        let info = utilization
            .entry(seg.connection)
            .or_insert_with(|| crate::model::ConnectionInfo {
                interface: seg.interface,
                process: seg.process,
                ..Default::default()
            });

        match seg.direction {
            Direction::Upload => {
                info.upload_bytes += seg.data_len;
                info.upload_packets += 1;
            }
            Direction::Download => {
                info.download_bytes += seg.data_len;
                info.download_packets += 1;
            }
        }
    }

    /// Take the current window, leaving an empty one in place.
    pub fn drain(&self) -> Utilization {
        let mut utilization = self.utilization.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *utilization)
    }
}

impl Default for Sinker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Connection, LocalSocket, ProcessInfo, Protocol, RemoteSocket};

    fn conn() -> Connection {
        Connection {
            local: LocalSocket {
                ip: "10.0.0.2".to_string(),
                port: 50000,
                protocol: Protocol::Tcp,
            },
            remote: RemoteSocket {
                ip: "1.1.1.1".to_string(),
                port: 443,
            },
        }
    }

    fn upload_segment(data_len: u64, process: Option<ProcessInfo>) -> Segment {
        Segment {
            interface: "eth0".to_string(),
            data_len,
            connection: conn(),
            direction: Direction::Upload,
            process,
        }
    }

    // ut_fetch_accumulates_direction: three uploads of 50 -> 150/3
    #[test]
    fn ut_fetch_accumulates_direction() {
        let sink = Sinker::new();
        for _ in 0..3 {
            sink.fetch(upload_segment(50, None));
        }

        let util = sink.drain();
        assert_eq!(util.len(), 1);
        let info = &util[&conn()];
        assert_eq!(info.upload_bytes, 150);
        assert_eq!(info.upload_packets, 3);
        assert_eq!(info.download_bytes, 0);
        assert_eq!(info.download_packets, 0);
        assert_eq!(info.interface, "eth0");
    }

    // ut_second_drain_empty: drain leaves an empty window behind
    #[test]
    fn ut_second_drain_empty() {
        let sink = Sinker::new();
        sink.fetch(upload_segment(50, None));

        assert_eq!(sink.drain().len(), 1);
        assert!(sink.drain().is_empty());
    }

    // ut_drain_empty_sink: idempotent on an empty sink
    #[test]
    fn ut_drain_empty_sink() {
        let sink = Sinker::new();
        assert!(sink.drain().is_empty());
        assert!(sink.drain().is_empty());
    }

    // ut_process_stable_within_window: first insertion wins
    #[test]
    fn ut_process_stable_within_window() {
        let sink = Sinker::new();
        let first = ProcessInfo {
            pid: 42,
            name: "curl".to_string(),
        };
        let second = ProcessInfo {
            pid: 7,
            name: "wget".to_string(),
        };

        sink.fetch(upload_segment(10, Some(first.clone())));
        sink.fetch(upload_segment(10, Some(second)));

        let util = sink.drain();
        assert_eq!(util[&conn()].process, Some(first));
    }

    // ut_download_counters_separate
    #[test]
    fn ut_download_counters_separate() {
        let sink = Sinker::new();
        let mut seg = upload_segment(100, None);
        seg.direction = Direction::Download;
        sink.fetch(seg);
        sink.fetch(upload_segment(40, None));

        let util = sink.drain();
        let info = &util[&conn()];
        assert_eq!(info.download_bytes, 100);
        assert_eq!(info.download_packets, 1);
        assert_eq!(info.upload_bytes, 40);
        assert_eq!(info.upload_packets, 1);
    }
}
