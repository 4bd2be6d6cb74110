//! Fibre Channel driver placeholder
//!
//! Concrete FC backends return `fibre_channel` connection info whose target
//! identifier is one WWN or a list of them. This generic driver has no way to
//! look those up, so it refuses to export.

use super::{ConnectionInfo, VolumeDriver};
use crate::attach::{AttachError, AttachResult};
use crate::connector::HostConnector;
use crate::volume::Volume;

#[derive(Debug, Clone, Copy, Default)]
pub struct FibreChannelDriver;

impl VolumeDriver for FibreChannelDriver {
    fn initialize_connection(
        &self,
        _volume: &Volume,
        _host: &HostConnector,
    ) -> AttachResult<ConnectionInfo> {
        Err(AttachError::unsupported(
            "driver must implement initialize_connection for fibre_channel",
        ))
    }

    fn terminate_connection(&self, _volume: &Volume, _host: &HostConnector) -> AttachResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_is_unsupported() {
        let host = HostConnector {
            ip: "10.0.0.1".to_string(),
            host: "node-1".to_string(),
            initiator: None,
            multipath: false,
        };
        let err = FibreChannelDriver
            .initialize_connection(&Volume::default(), &host)
            .unwrap_err();
        assert!(err.to_string().starts_with("not implemented"));
    }
}
