#[derive(Debug, thiserror::Error)]
pub enum NetsiftError {
    #[error("device enumeration error: {0}")]
    DeviceList(String),
    #[error("no capture device matches prefixes {0:?}")]
    NoMatchingDevice(Vec<String>),
    #[error("cannot open capture device {device}: {detail}")]
    CaptureOpen { device: String, detail: String },
    #[error("BPF filter `{filter}` rejected: {detail}")]
    BpfCompile { filter: String, detail: String },
    #[error("insufficient capture privileges: {0}")]
    Permission(String),
    #[error("diagnosis socket error: {0}")]
    Diagnosis(#[source] std::io::Error),
    #[error("process table scan error: {0}")]
    ProcScan(#[source] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[source] std::io::Error),
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error("fatal: {0}")]
    Fatal(String),
}
