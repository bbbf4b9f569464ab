// Runtime configuration shared by the capture, resolver and stats layers.

use clap::ValueEnum;
use serde::Serialize;

use crate::error::NetsiftError;

/// Default interface-name prefixes monitored when `all_devices` is off.
pub const DEFAULT_DEVICE_PREFIXES: &[&str] = &["en", "lo", "eth", "em", "bond"];

/// Options for one observer instance.
#[derive(Debug, Clone)]
pub struct Options {
    /// Capture filter in BPF syntax, e.g. "tcp and port 80".
    pub bpf_filter: String,
    /// Refresh interval in seconds.
    pub interval: u64,
    /// Which ordering key the rendered tables use.
    pub view_mode: ViewMode,
    /// Display unit for byte counters.
    pub unit: Unit,
    /// Interface-name prefixes to monitor.
    pub devices_prefix: Vec<String>,
    /// Skip hostname substitution of TCP remote addresses.
    pub disable_dns_resolve: bool,
    /// Monitor every interface, ignoring `devices_prefix`.
    pub all_devices: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            bpf_filter: "tcp or udp".to_string(),
            interval: 2,
            view_mode: ViewMode::Bytes,
            unit: Unit::Kb,
            devices_prefix: DEFAULT_DEVICE_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            disable_dns_resolve: false,
            all_devices: false,
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<(), NetsiftError> {
        if self.interval == 0 {
            return Err(NetsiftError::InvalidOption(
                "interval must be at least 1 second".to_string(),
            ));
        }
        if !self.all_devices && self.devices_prefix.is_empty() {
            return Err(NetsiftError::InvalidOption(
                "devices-prefix must not be empty unless --all-devices is set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Ordering key for the ranked tables.
#[derive(ValueEnum, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    /// Upload + download bytes, descending.
    Bytes,
    /// Upload + download packets, descending.
    Packets,
    /// Connection count, then bytes, descending.
    Processes,
}

/// Display unit for byte counters.
#[derive(ValueEnum, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    #[value(name = "B")]
    B,
    #[value(name = "Kb")]
    Kbit,
    #[value(name = "KB")]
    Kb,
    #[value(name = "Mb")]
    Mbit,
    #[value(name = "MB")]
    Mb,
    #[value(name = "Gb")]
    Gbit,
    #[value(name = "GB")]
    Gb,
}

impl Unit {
    /// Render a byte count in this unit with a fixed suffix.
    pub fn format(&self, bytes: u64) -> String {
        match self {
            Unit::B => format!("{bytes}B"),
            Unit::Kbit => format!("{:.1}Kb", bytes as f64 * 8.0 / 1_000.0),
            Unit::Kb => format!("{:.1}KB", bytes as f64 / 1_024.0),
            Unit::Mbit => format!("{:.1}Mb", bytes as f64 * 8.0 / 1_000_000.0),
            Unit::Mb => format!("{:.1}MB", bytes as f64 / 1_048_576.0),
            Unit::Gbit => format!("{:.1}Gb", bytes as f64 * 8.0 / 1_000_000_000.0),
            Unit::Gb => format!("{:.1}GB", bytes as f64 / 1_073_741_824.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ut_default_options: defaults mirror the documented configuration
    #[test]
    fn ut_default_options() {
        let opts = Options::default();
        assert_eq!(opts.bpf_filter, "tcp or udp");
        assert_eq!(opts.interval, 2);
        assert_eq!(opts.view_mode, ViewMode::Bytes);
        assert_eq!(
            opts.devices_prefix,
            vec!["en", "lo", "eth", "em", "bond"]
        );
        assert!(!opts.disable_dns_resolve);
        assert!(!opts.all_devices);
        assert!(opts.validate().is_ok());
    }

    // ut_zero_interval_rejected
    #[test]
    fn ut_zero_interval_rejected() {
        let opts = Options {
            interval: 0,
            ..Options::default()
        };
        assert!(opts.validate().is_err());
    }

    // ut_empty_prefixes_require_all_devices
    #[test]
    fn ut_empty_prefixes_require_all_devices() {
        let mut opts = Options {
            devices_prefix: Vec::new(),
            ..Options::default()
        };
        assert!(opts.validate().is_err());

        opts.all_devices = true;
        assert!(opts.validate().is_ok());
    }

    // ut_unit_format
    #[test]
    fn ut_unit_format() {
        assert_eq!(Unit::B.format(512), "512B");
        assert_eq!(Unit::Kb.format(2_048), "2.0KB");
        assert_eq!(Unit::Mb.format(3_145_728), "3.0MB");
        assert_eq!(Unit::Kbit.format(1_000), "8.0Kb");
    }
}
