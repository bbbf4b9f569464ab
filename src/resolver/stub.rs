// Non-Linux hosts have no diagnosis socket; the pipeline still runs with
// every flow unattributed.

use crate::error::NetsiftError;
use crate::model::{OpenSockets, ProcessInfo};
use crate::resolver::SocketFetcher;

pub struct StubSocketFetcher;

impl SocketFetcher for StubSocketFetcher {
    fn get_open_sockets(&self) -> Result<OpenSockets, NetsiftError> {
        Ok(OpenSockets::default())
    }

    fn port_fallback(&self, _port: u16) -> Option<ProcessInfo> {
        None
    }
}
