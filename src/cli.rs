use clap::Parser;

use crate::options::{Options, Unit, ViewMode};

#[derive(Parser, Debug)]
#[command(
    name = "netsift",
    version,
    about = "Per-host network traffic observer with per-process flow attribution"
)]
pub struct Cli {
    /// Capture filter in BPF syntax
    #[arg(short = 'b', long = "bpf-filter", default_value = "tcp or udp")]
    pub bpf_filter: String,

    /// Refresh interval in seconds
    #[arg(short = 'i', long, default_value_t = 2, value_parser = validate_interval)]
    pub interval: u64,

    /// Table ordering key
    #[arg(short = 'm', long = "mode", default_value = "bytes")]
    pub view_mode: ViewMode,

    /// Display unit for byte counters
    #[arg(short = 'u', long, default_value = "KB")]
    pub unit: Unit,

    /// Interface-name prefixes to monitor (repeatable).
    /// `--device-names` is accepted as an equivalent alias.
    #[arg(
        short = 'd',
        long = "devices-prefix",
        visible_alias = "device-names",
        value_delimiter = ','
    )]
    pub devices_prefix: Vec<String>,

    /// Disable hostname substitution of TCP remote addresses
    #[arg(short = 'n', long)]
    pub no_dns_resolve: bool,

    /// Monitor every interface, ignoring the prefix list
    #[arg(short = 'a', long)]
    pub all_devices: bool,

    /// Output format for each tick's snapshot
    #[arg(short = 'f', long, default_value = "plain")]
    pub format: OutputFormat,
}

impl Cli {
    /// Resolve CLI flags into runtime options, falling back to defaults.
    pub fn into_options(self) -> Options {
        let defaults = Options::default();
        Options {
            bpf_filter: self.bpf_filter,
            interval: self.interval,
            view_mode: self.view_mode,
            unit: self.unit,
            devices_prefix: if self.devices_prefix.is_empty() {
                defaults.devices_prefix
            } else {
                self.devices_prefix
            },
            disable_dns_resolve: self.no_dns_resolve,
            all_devices: self.all_devices,
        }
    }
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Plain,
    Json,
}

fn validate_interval(s: &str) -> Result<u64, String> {
    let val: u64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid integer"))?;
    if val == 0 {
        Err("interval must be at least 1 second".to_string())
    } else if val > 3600 {
        Err("interval must be at most 3600 seconds".to_string())
    } else {
        Ok(val)
    }
}
