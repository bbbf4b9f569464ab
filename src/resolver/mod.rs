// Platform-abstracted socket-to-process attribution.
//
// On Linux: kernel socket diagnosis (netlink) joined with /proc fd scans.
// Elsewhere: a stub returning empty maps, so the pipeline still runs and
// every flow displays as unattributed.
//
// All platforms export:
//   - SocketFetcher (trait)
//   - default_fetcher() -> Arc<dyn SocketFetcher>
// The platform-neutral ProcessMonitor service lives here as well.

pub mod netlink;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(not(target_os = "linux"))]
pub mod stub;

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, select, tick};

use crate::error::NetsiftError;
use crate::model::{LocalSocket, OpenSockets, ProcessInfo};

/// How often the background refresh rebuilds the socket map.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(2);

/// Wildcard substitutions applied by the lookup fallback ladder, in order.
const WILDCARD_IPS: &[&str] = &["*", "0.0.0.0", "::"];

/// Platform seam for socket enumeration and the port-based fallback.
pub trait SocketFetcher: Send + Sync {
    /// Enumerate open sockets, attributing each to its owning process.
    fn get_open_sockets(&self) -> Result<OpenSockets, NetsiftError>;

    /// Consult the port-based cache when a direct socket lookup missed.
    /// A miss is not an error.
    fn port_fallback(&self, port: u16) -> Option<ProcessInfo>;
}

/// The platform's fetcher.
pub fn default_fetcher() -> Arc<dyn SocketFetcher> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(linux::NetlinkSocketFetcher::new())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(stub::StubSocketFetcher)
    }
}

/// Read-mostly attribution service shared by the decoder and the stats
/// manager.
///
/// The socket map is replaced whole on every refresh; readers observe
/// either the pre-swap or the post-swap map, never a mixture. A failed
/// refresh retains the previous map.
pub struct ProcessMonitor {
    fetcher: Arc<dyn SocketFetcher>,
    socket_map: ArcSwap<OpenSockets>,
}

impl ProcessMonitor {
    pub fn new(fetcher: Arc<dyn SocketFetcher>) -> Arc<Self> {
        Arc::new(Self {
            fetcher,
            socket_map: ArcSwap::from_pointee(OpenSockets::default()),
        })
    }

    /// Rebuild the socket map from scratch and swap it in.
    pub fn refresh(&self) -> Result<(), NetsiftError> {
        let sockets = self.fetcher.get_open_sockets()?;
        self.socket_map.store(Arc::new(sockets));
        Ok(())
    }

    /// Look up the process owning `local`, relaxing the IP to the wildcard
    /// forms when the exact key misses. Entries with an empty name count as
    /// unresolved and do not match.
    pub fn get(&self, local: &LocalSocket) -> Option<ProcessInfo> {
        let map = self.socket_map.load();

        if let Some(process) = map.get(local)
            && !process.name.is_empty()
        {
            return Some(process.clone());
        }

        for wildcard in WILDCARD_IPS {
            let candidate = LocalSocket {
                ip: wildcard.to_string(),
                port: local.port,
                protocol: local.protocol,
            };
            if let Some(process) = map.get(&candidate)
                && !process.name.is_empty()
            {
                return Some(process.clone());
            }
        }

        None
    }

    /// A copy of the current map, for folding into a stats window.
    pub fn open_sockets(&self) -> OpenSockets {
        self.socket_map.load().as_ref().clone()
    }

    /// The fetcher backing this monitor, for injecting its port-fallback
    /// capability into consumers.
    pub fn fetcher(&self) -> Arc<dyn SocketFetcher> {
        Arc::clone(&self.fetcher)
    }

    /// Spawn the periodic refresh thread. It rebuilds the map every
    /// [`REFRESH_INTERVAL`] until `shutdown` disconnects or yields.
    pub fn start(self: &Arc<Self>, shutdown: Receiver<()>) -> std::io::Result<JoinHandle<()>> {
        let monitor = Arc::clone(self);
        std::thread::Builder::new()
            .name("netsift-resolver".into())
            .spawn(move || {
                let ticker = tick(REFRESH_INTERVAL);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            if let Err(e) = monitor.refresh() {
                                log::warn!("socket map refresh failed, keeping previous map: {e}");
                            }
                        }
                        recv(shutdown) -> _ => return,
                    }
                }
            })
    }
}
