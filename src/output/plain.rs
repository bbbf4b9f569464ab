use std::io::Write;

use crate::error::NetsiftError;
use crate::model::stat::Snapshot;
use crate::options::Options;
use crate::output::TOP_ROWS;

/// Write totals plus the three ranked tables as plain text.
pub fn write_plain(
    snapshot: &Snapshot,
    opts: &Options,
    writer: &mut impl Write,
) -> Result<(), NetsiftError> {
    let unit = opts.unit;
    let mode = opts.view_mode;

    writeln!(
        writer,
        "connections: {}  up: {} ({} pkts)  down: {} ({} pkts)",
        snapshot.total_connections,
        unit.format(snapshot.total_upload_bytes),
        snapshot.total_upload_packets,
        unit.format(snapshot.total_download_bytes),
        snapshot.total_download_packets,
    )
    .map_err(NetsiftError::Serialization)?;

    writeln!(writer, "\nprocesses:").map_err(NetsiftError::Serialization)?;
    for (name, data) in snapshot.top_n_processes(TOP_ROWS, mode) {
        writeln!(
            writer,
            "  {:<32} conns: {:<5} up: {:<10} down: {}",
            name,
            data.conn_count,
            unit.format(data.upload_bytes),
            unit.format(data.download_bytes),
        )
        .map_err(NetsiftError::Serialization)?;
    }

    writeln!(writer, "\nremote addresses:").map_err(NetsiftError::Serialization)?;
    for (addr, data) in snapshot.top_n_remote_addrs(TOP_ROWS, mode) {
        writeln!(
            writer,
            "  {:<40} conns: {:<5} up: {:<10} down: {}",
            addr,
            data.conn_count,
            unit.format(data.upload_bytes),
            unit.format(data.download_bytes),
        )
        .map_err(NetsiftError::Serialization)?;
    }

    writeln!(writer, "\nconnections:").map_err(NetsiftError::Serialization)?;
    for (conn, data) in snapshot.top_n_connections(TOP_ROWS, mode) {
        writeln!(
            writer,
            "  {:<48} {:<24} up: {:<10} down: {}",
            conn.to_string(),
            data.process_name,
            unit.format(data.upload_bytes),
            unit.format(data.download_bytes),
        )
        .map_err(NetsiftError::Serialization)?;
    }

    writeln!(writer).map_err(NetsiftError::Serialization)?;
    Ok(())
}
