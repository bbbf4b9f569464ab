// Linux socket fetcher: joins the kernel diagnosis stream with /proc.
//
// 1. Enumerate numeric /proc entries (PIDs); scan each PID's fd directory
//    for `socket:[N]` links and resolve the process name -> inode map.
// 2. Dump open sockets per (protocol, family) over the diagnosis socket.
// 3. Join both on the inode to build LocalSocket -> ProcessInfo.
//
// Scanning /proc is per-entry expensive, so step 1 runs on a bounded pool
// of up to ten workers. Two 5-second caches smooth over transiently
// unreadable PIDs (inode cache) and feed the port-based fallback lookup
// (port cache).

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::error::NetsiftError;
use crate::model::{LocalSocket, OpenSockets, ProcessInfo, Protocol, UNKNOWN_PROCESS};
use crate::resolver::SocketFetcher;
use crate::resolver::netlink::{self, FAMILY_INET, FAMILY_INET6, TCP_STATES, UDP_STATES};

/// Lifetime of inode-cache and port-cache entries.
pub const CACHE_TTL: Duration = Duration::from_secs(5);

/// Upper bound on concurrent /proc PID scanners.
const MAX_SCAN_WORKERS: usize = 10;

struct CacheEntry {
    info: ProcessInfo,
    stamp: Instant,
}

pub struct NetlinkSocketFetcher {
    inode_cache: RwLock<FxHashMap<u32, CacheEntry>>,
    port_cache: RwLock<FxHashMap<u16, CacheEntry>>,
    proc_root: PathBuf,
}

impl NetlinkSocketFetcher {
    pub fn new() -> Self {
        Self::with_proc_root(PathBuf::from("/proc"))
    }

    fn with_proc_root(proc_root: PathBuf) -> Self {
        Self {
            inode_cache: RwLock::new(FxHashMap::default()),
            port_cache: RwLock::new(FxHashMap::default()),
            proc_root,
        }
    }

    /// Numeric entries under the process filesystem root.
    fn list_pids(&self) -> Result<Vec<i32>, NetsiftError> {
        let entries = fs::read_dir(&self.proc_root).map_err(NetsiftError::ProcScan)?;

        let mut pids = Vec::new();
        for entry in entries.flatten() {
            if let Ok(pid) = entry.file_name().to_string_lossy().parse::<i32>() {
                pids.push(pid);
            }
        }
        Ok(pids)
    }

    /// Resolve one PID's name and socket inodes.
    ///
    /// Returns `None` when no name source works or the fd directory fails
    /// for a reason other than permission; EACCES keeps the name with an
    /// empty inode list.
    fn proc_inodes(&self, pid: i32) -> Option<(String, Vec<u32>)> {
        let base = self.proc_root.join(pid.to_string());
        let name = read_process_name(&base)?;

        let mut inodes = Vec::new();
        match fs::read_dir(base.join("fd")) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    if let Ok(target) = fs::read_link(entry.path())
                        && let Some(inode) = parse_socket_inode(&target.to_string_lossy())
                    {
                        inodes.push(inode);
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {}
            Err(_) => return None,
        }

        Some((name, inodes))
    }

    /// Build the inode -> process map for all PIDs on a bounded worker pool,
    /// seeded from unexpired cache entries so a transiently unreadable PID
    /// does not drop sockets that were attributed moments ago.
    fn all_proc_inodes(&self, pids: &[i32]) -> FxHashMap<u32, ProcessInfo> {
        self.all_proc_inodes_at(pids, Instant::now())
    }

    pub(crate) fn all_proc_inodes_at(
        &self,
        pids: &[i32],
        now: Instant,
    ) -> FxHashMap<u32, ProcessInfo> {
        let mut inode_map: FxHashMap<u32, ProcessInfo> = FxHashMap::default();

        {
            let cache = self.inode_cache.read().unwrap_or_else(|e| e.into_inner());
            for (inode, entry) in cache.iter() {
                if now.duration_since(entry.stamp) < CACHE_TTL {
                    inode_map.insert(*inode, entry.info.clone());
                }
            }
        }

        let workers = MAX_SCAN_WORKERS.min(pids.len());
        let mut fresh: Vec<(ProcessInfo, Vec<u32>)> = Vec::new();

        if workers > 0 {
            let (pid_tx, pid_rx) = crossbeam_channel::bounded::<i32>(pids.len());
            let (result_tx, result_rx) = crossbeam_channel::bounded(pids.len());
            for pid in pids {
                let _ = pid_tx.send(*pid);
            }
            drop(pid_tx);

            std::thread::scope(|scope| {
                for _ in 0..workers {
                    let pid_rx = pid_rx.clone();
                    let result_tx = result_tx.clone();
                    scope.spawn(move || {
                        for pid in pid_rx.iter() {
                            if let Some((name, inodes)) = self.proc_inodes(pid) {
                                let _ = result_tx.send((ProcessInfo { pid, name }, inodes));
                            }
                        }
                    });
                }
                drop(result_tx);

                for result in result_rx.iter() {
                    fresh.push(result);
                }
            });
        }

        let mut cache = self.inode_cache.write().unwrap_or_else(|e| e.into_inner());
        for (info, inodes) in fresh {
            for inode in inodes {
                inode_map.insert(inode, info.clone());
                cache.insert(
                    inode,
                    CacheEntry {
                        info: info.clone(),
                        stamp: now,
                    },
                );
            }
        }
        cache.retain(|_, entry| now.duration_since(entry.stamp) < CACHE_TTL);

        inode_map
    }

    /// Remember a resolved process under its local port. Unresolved and
    /// sentinel names never enter the cache.
    pub(crate) fn cache_port(&self, port: u16, info: &ProcessInfo) {
        self.cache_port_at(port, info, Instant::now())
    }

    pub(crate) fn cache_port_at(&self, port: u16, info: &ProcessInfo, now: Instant) {
        if info.name.is_empty() || info.name == UNKNOWN_PROCESS {
            return;
        }
        let mut cache = self.port_cache.write().unwrap_or_else(|e| e.into_inner());
        cache.insert(
            port,
            CacheEntry {
                info: info.clone(),
                stamp: now,
            },
        );
    }

    pub(crate) fn port_fallback_at(&self, port: u16, now: Instant) -> Option<ProcessInfo> {
        let cache = self.port_cache.read().unwrap_or_else(|e| e.into_inner());
        let entry = cache.get(&port)?;
        if now.duration_since(entry.stamp) < CACHE_TTL {
            Some(entry.info.clone())
        } else {
            None
        }
    }

    pub(crate) fn sweep_port_cache_at(&self, now: Instant) {
        let mut cache = self.port_cache.write().unwrap_or_else(|e| e.into_inner());
        cache.retain(|_, entry| now.duration_since(entry.stamp) < CACHE_TTL);
    }

    fn has_ipv6(&self) -> bool {
        self.proc_root.join("net/if_inet6").exists()
    }
}

impl Default for NetlinkSocketFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketFetcher for NetlinkSocketFetcher {
    fn get_open_sockets(&self) -> Result<OpenSockets, NetsiftError> {
        let pids = self.list_pids()?;
        let inode_map = self.all_proc_inodes(&pids);

        let mut requests = vec![
            (Protocol::Tcp, libc::IPPROTO_TCP as u8, FAMILY_INET, TCP_STATES),
            (Protocol::Udp, libc::IPPROTO_UDP as u8, FAMILY_INET, UDP_STATES),
        ];
        if self.has_ipv6() {
            requests.push((
                Protocol::Tcp,
                libc::IPPROTO_TCP as u8,
                FAMILY_INET6,
                TCP_STATES,
            ));
            requests.push((
                Protocol::Udp,
                libc::IPPROTO_UDP as u8,
                FAMILY_INET6,
                UDP_STATES,
            ));
        }

        let mut sockets = OpenSockets::default();
        for (protocol, ipproto, family, states) in requests {
            for record in netlink::dump_sockets(ipproto, family, states)? {
                let info = inode_map.get(&record.inode).cloned().unwrap_or_default();
                if !info.name.is_empty() && info.name != UNKNOWN_PROCESS {
                    self.cache_port(record.port, &info);
                }
                sockets.insert(
                    LocalSocket {
                        ip: record.ip,
                        port: record.port,
                        protocol,
                    },
                    info,
                );
            }
        }
        self.sweep_port_cache_at(Instant::now());

        Ok(sockets)
    }

    fn port_fallback(&self, port: u16) -> Option<ProcessInfo> {
        self.port_fallback_at(port, Instant::now())
    }
}

/// Process name, tried in order: `exe` symlink basename, first NUL token of
/// `cmdline` (basename), trimmed `comm`.
fn read_process_name(base: &Path) -> Option<String> {
    if let Ok(target) = fs::read_link(base.join("exe"))
        && let Some(name) = target.file_name()
    {
        return Some(name.to_string_lossy().into_owned());
    }

    if let Ok(cmdline) = fs::read(base.join("cmdline"))
        && let Some(first) = cmdline.split(|b| *b == 0).next()
        && !first.is_empty()
    {
        let arg0 = String::from_utf8_lossy(first).into_owned();
        return Some(
            Path::new(&arg0)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(arg0),
        );
    }

    if let Ok(comm) = fs::read_to_string(base.join("comm")) {
        let trimmed = comm.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }

    None
}

/// Parse a readlink target like `socket:[12345]` -> Some(12345).
/// Any other prefix is not a socket.
fn parse_socket_inode(link: &str) -> Option<u32> {
    let s = link.strip_prefix("socket:[")?;
    let s = s.strip_suffix(']')?;
    s.parse().ok()
}
