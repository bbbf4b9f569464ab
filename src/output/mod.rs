pub mod json;
pub mod plain;

use std::io::Write;

use crate::cli::OutputFormat;
use crate::error::NetsiftError;
use crate::model::stat::Snapshot;
use crate::options::Options;

/// Rows rendered per ranked table.
pub const TOP_ROWS: usize = 10;

/// Write one tick's snapshot in the selected format.
pub fn write_snapshot(
    snapshot: &Snapshot,
    opts: &Options,
    format: OutputFormat,
    writer: &mut impl Write,
) -> Result<(), NetsiftError> {
    match format {
        OutputFormat::Plain => plain::write_plain(snapshot, opts, writer),
        OutputFormat::Json => json::write_json(snapshot, opts, writer),
    }
}
