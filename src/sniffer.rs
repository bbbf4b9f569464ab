// Lifecycle wiring: resolver refresh loop, one reader per capture device,
// and the periodic tick that turns sink windows into snapshots.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender, bounded, select, tick};

use crate::capture::{self, decode::Decoder};
use crate::dns::Lookup;
use crate::error::NetsiftError;
use crate::model::Stat;
use crate::model::sink::Sinker;
use crate::model::stat::{Snapshot, StatsManager};
use crate::options::Options;
use crate::resolver::{self, ProcessMonitor};

pub struct Sniffer {
    opts: Options,
    sink: Arc<Sinker>,
    monitor: Arc<ProcessMonitor>,
    stats: StatsManager,
    latest: Arc<ArcSwap<Snapshot>>,
    readers: Vec<JoinHandle<()>>,
    monitor_thread: Option<JoinHandle<()>>,
    shutdown_tx: Option<Sender<()>>,
}

impl Sniffer {
    /// Build the whole pipeline and start its background threads.
    ///
    /// Fails when no device matches the configured prefixes, a device or
    /// its filter cannot be opened, or the initial socket-map refresh
    /// cannot reach the diagnosis socket.
    pub fn new(opts: Options, lookup: Arc<dyn Lookup>) -> Result<Self, NetsiftError> {
        opts.validate()?;

        let monitor = ProcessMonitor::new(resolver::default_fetcher());
        monitor.refresh()?;

        let (shutdown_tx, shutdown_rx): (Sender<()>, Receiver<()>) = bounded(0);
        let monitor_thread = monitor
            .start(shutdown_rx.clone())
            .map_err(|e| NetsiftError::Fatal(format!("spawn resolver thread: {e}")))?;

        let sink = Arc::new(Sinker::new());
        let lookup = (!opts.disable_dns_resolve).then_some(lookup);

        let mut readers = Vec::new();
        for device in capture::select_devices(&opts)? {
            let handle = capture::open_device(device, &opts.bpf_filter)?;
            log::info!(
                "capturing on {} ({} bound addresses)",
                handle.device(),
                handle.bound_ips().len()
            );

            let decoder = Decoder::new(
                handle.device().to_string(),
                handle.bound_ips().clone(),
                lookup.clone(),
                Arc::clone(&monitor),
            );
            let reader_sink = Arc::clone(&sink);
            let reader_shutdown = shutdown_rx.clone();
            let thread = std::thread::Builder::new()
                .name(format!("netsift-read-{}", handle.device()))
                .spawn(move || capture::read_loop(handle, decoder, reader_sink, reader_shutdown))
                .map_err(|e| NetsiftError::Fatal(format!("spawn reader thread: {e}")))?;
            readers.push(thread);
        }

        let stats = StatsManager::new(Some(monitor.fetcher()));

        Ok(Self {
            opts,
            sink,
            monitor,
            stats,
            latest: Arc::new(ArcSwap::from_pointee(Snapshot::default())),
            readers,
            monitor_thread: Some(monitor_thread),
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// One tick: drain the sink's window, combine it with the current
    /// socket map, and publish the resulting snapshot.
    pub fn refresh(&mut self) -> Snapshot {
        let utilization = self.sink.drain();
        let open_sockets = self.monitor.open_sockets();
        self.stats.put(Stat {
            open_sockets,
            utilization,
        });

        let snapshot = self.stats.snapshot();
        self.latest.store(Arc::new(snapshot.clone()));
        snapshot
    }

    /// The most recently published snapshot, for a polling consumer.
    pub fn latest(&self) -> Arc<Snapshot> {
        self.latest.load_full()
    }

    /// Drive the periodic tick until `stop` is set, handing each snapshot
    /// to the rendering collaborator.
    pub fn run(&mut self, stop: &AtomicBool, mut render: impl FnMut(&Snapshot)) {
        let ticker = tick(Duration::from_secs(self.opts.interval));
        loop {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            select! {
                recv(ticker) -> _ => {
                    let snapshot = self.refresh();
                    render(&snapshot);
                }
                default(Duration::from_millis(200)) => {}
            }
        }
    }

    /// Signal cancellation and join every background thread. Idempotent.
    pub fn close(&mut self) {
        // Readers and the resolver wake on the channel disconnect; readers
        // are additionally bounded by their read timeout.
        drop(self.shutdown_tx.take());

        for thread in self.readers.drain(..) {
            let _ = thread.join();
        }
        if let Some(thread) = self.monitor_thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Sniffer {
    fn drop(&mut self) {
        self.close();
    }
}
