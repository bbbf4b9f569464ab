use std::io::Write;

use serde::Serialize;

use crate::error::NetsiftError;
use crate::model::stat::{AggregatedData, Snapshot};
use crate::options::Options;

#[derive(Serialize)]
struct ConnectionRow {
    local: String,
    remote: String,
    protocol: String,
    interface: String,
    process: String,
    upload_bytes: u64,
    download_bytes: u64,
    upload_packets: u64,
    download_packets: u64,
}

#[derive(Serialize)]
struct KeyedRow<'a> {
    key: &'a str,
    #[serde(flatten)]
    data: &'a AggregatedData,
}

#[derive(Serialize)]
struct SnapshotDoc<'a> {
    total_connections: usize,
    total_upload_bytes: u64,
    total_download_bytes: u64,
    total_upload_packets: u64,
    total_download_packets: u64,
    connections: Vec<ConnectionRow>,
    remote_addrs: Vec<KeyedRow<'a>>,
    processes: Vec<KeyedRow<'a>>,
}

/// Write the full snapshot as one JSON document, tables ordered by the
/// configured view mode.
pub fn write_json(
    snapshot: &Snapshot,
    opts: &Options,
    writer: &mut impl Write,
) -> Result<(), NetsiftError> {
    let mode = opts.view_mode;

    let connections = snapshot
        .top_n_connections(usize::MAX, mode)
        .into_iter()
        .map(|(conn, data)| ConnectionRow {
            local: format!("{}:{}", conn.local.ip, conn.local.port),
            remote: format!("{}:{}", conn.remote.ip, conn.remote.port),
            protocol: conn.local.protocol.to_string(),
            interface: data.interface,
            process: data.process_name,
            upload_bytes: data.upload_bytes,
            download_bytes: data.download_bytes,
            upload_packets: data.upload_packets,
            download_packets: data.download_packets,
        })
        .collect();

    let remote_rows = snapshot.top_n_remote_addrs(usize::MAX, mode);
    let process_rows = snapshot.top_n_processes(usize::MAX, mode);

    let doc = SnapshotDoc {
        total_connections: snapshot.total_connections,
        total_upload_bytes: snapshot.total_upload_bytes,
        total_download_bytes: snapshot.total_download_bytes,
        total_upload_packets: snapshot.total_upload_packets,
        total_download_packets: snapshot.total_download_packets,
        connections,
        remote_addrs: remote_rows
            .iter()
            .map(|(key, data)| KeyedRow {
                key: key.as_str(),
                data,
            })
            .collect(),
        processes: process_rows
            .iter()
            .map(|(key, data)| KeyedRow {
                key: key.as_str(),
                data,
            })
            .collect(),
    };

    serde_json::to_writer(&mut *writer, &doc)
        .map_err(|e| NetsiftError::Serialization(std::io::Error::other(e.to_string())))?;
    writeln!(writer).map_err(NetsiftError::Serialization)?;
    Ok(())
}
