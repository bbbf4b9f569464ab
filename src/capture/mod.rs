// Per-interface packet capture through libpcap.
//
// Device enumeration and BPF compilation are the capture library's job;
// this module selects devices by name prefix, opens one handle per device
// with the filter installed, records the device's bound addresses for
// direction assignment, and runs the blocking reader loop.

pub mod decode;

use std::collections::HashSet;
use std::sync::Arc;

use crossbeam_channel::{Receiver, TryRecvError};

use crate::capture::decode::Decoder;
use crate::error::NetsiftError;
use crate::model::sink::Sinker;
use crate::options::Options;

/// Snapshot length passed to the capture library.
const SNAPLEN: i32 = 65_535;

/// Read timeout so blocked readers observe cancellation promptly.
const READ_TIMEOUT_MS: i32 = 500;

/// One opened capture device.
pub struct CaptureHandle {
    device: String,
    bound_ips: HashSet<String>,
    cap: pcap::Capture<pcap::Active>,
}

impl CaptureHandle {
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Addresses bound to this handle's interface, textual form.
    pub fn bound_ips(&self) -> &HashSet<String> {
        &self.bound_ips
    }
}

/// True when `name` is selected by the configured prefix list.
pub fn device_matches(name: &str, prefixes: &[String], all_devices: bool) -> bool {
    all_devices || prefixes.iter().any(|prefix| name.starts_with(prefix))
}

/// Enumerate link devices and keep those the options select.
pub fn select_devices(opts: &Options) -> Result<Vec<pcap::Device>, NetsiftError> {
    let all = pcap::Device::list().map_err(|e| NetsiftError::DeviceList(e.to_string()))?;

    let devices: Vec<pcap::Device> = all
        .into_iter()
        .filter(|d| device_matches(&d.name, &opts.devices_prefix, opts.all_devices))
        .collect();

    if devices.is_empty() {
        return Err(NetsiftError::NoMatchingDevice(opts.devices_prefix.clone()));
    }
    Ok(devices)
}

/// Open one device and install the BPF filter.
pub fn open_device(device: pcap::Device, bpf_filter: &str) -> Result<CaptureHandle, NetsiftError> {
    let name = device.name.clone();
    let bound_ips: HashSet<String> = device
        .addresses
        .iter()
        .map(|addr| addr.addr.to_string())
        .collect();

    let mut cap = pcap::Capture::from_device(device)
        .map_err(|e| open_error(&name, e))?
        .snaplen(SNAPLEN)
        .immediate_mode(true)
        .timeout(READ_TIMEOUT_MS)
        .open()
        .map_err(|e| open_error(&name, e))?;

    if !bpf_filter.is_empty() {
        cap.filter(bpf_filter, true)
            .map_err(|e| NetsiftError::BpfCompile {
                filter: bpf_filter.to_string(),
                detail: e.to_string(),
            })?;
    }

    Ok(CaptureHandle {
        device: name,
        bound_ips,
        cap,
    })
}

fn open_error(device: &str, e: pcap::Error) -> NetsiftError {
    // libpcap reports activation failures as text; classify the common
    // privilege message so the caller can hint at the missing capability.
    let detail = e.to_string();
    let lowered = detail.to_lowercase();
    if lowered.contains("permission") || lowered.contains("not permitted") {
        NetsiftError::Permission(format!("opening capture device {device}: {detail}"))
    } else {
        NetsiftError::CaptureOpen {
            device: device.to_string(),
            detail,
        }
    }
}

/// Blocking reader: decode every frame the handle yields and feed the sink
/// until shutdown. Transient read and decode failures are swallowed.
pub fn read_loop(
    mut handle: CaptureHandle,
    decoder: Decoder,
    sink: Arc<Sinker>,
    shutdown: Receiver<()>,
) {
    loop {
        if should_shutdown(&shutdown) {
            return;
        }

        match handle.cap.next_packet() {
            Ok(packet) => {
                if let Some(segment) = decoder.decode(packet.data) {
                    sink.fetch(segment);
                }
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(pcap::Error::NoMorePackets) => return,
            Err(e) => {
                log::debug!("read error on {}: {e}", handle.device);
            }
        }
    }
}

fn should_shutdown(shutdown: &Receiver<()>) -> bool {
    match shutdown.try_recv() {
        Ok(()) | Err(TryRecvError::Disconnected) => true,
        Err(TryRecvError::Empty) => false,
    }
}
