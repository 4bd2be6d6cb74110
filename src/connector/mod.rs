//! Device connectors
//!
//! A connector turns connection properties into a local block device and
//! back. Connectors are picked by protocol through a [`ConnectorFactory`].

pub mod iscsi;

use crate::attach::{AttachError, AttachResult};
use crate::config::IscsiConfig;
use crate::executor::Executor;
use crate::properties::{ConnectionProperties, Protocol};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use iscsi::IscsiConnector;

/// Host-side properties handed to the backend when exporting a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConnector {
    pub ip: String,
    pub host: String,
    /// iSCSI initiator name, if open-iscsi is configured
    pub initiator: Option<String>,
    pub multipath: bool,
}

impl HostConnector {
    /// Gather properties for the local host
    pub fn gather(iscsi: &IscsiConfig, multipath: bool) -> Self {
        Self {
            ip: iscsi.ip_address.clone(),
            host: local_hostname(),
            initiator: read_initiator_name(&iscsi.initiator_name_path),
            multipath,
        }
    }
}

fn local_hostname() -> String {
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .filter_map(|path| fs::read_to_string(path).ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Read the `InitiatorName=` line from an open-iscsi initiator file
pub fn read_initiator_name(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(contents) => parse_initiator_name(&contents),
        Err(e) => {
            log::debug!("Could not read initiator name from {:?}: {}", path, e);
            None
        }
    }
}

fn parse_initiator_name(contents: &str) -> Option<String> {
    contents
        .lines()
        .find_map(|line| line.strip_prefix("InitiatorName="))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

/// A local block device produced by a connector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub path: PathBuf,
}

/// Turns connection properties into a local device
pub trait DeviceConnector: Send {
    fn protocol(&self) -> Protocol;

    /// Attach the target and return the local device
    fn connect(&self, properties: &ConnectionProperties) -> AttachResult<Device>;

    /// Release whatever `connect` set up
    fn disconnect(&self, properties: &ConnectionProperties, device: &Device) -> AttachResult<()>;

    /// Whether the device can actually be read
    fn check_valid_device(&self, path: &Path) -> bool;
}

/// Produces a connector for a protocol
pub trait ConnectorFactory: Send + Sync {
    fn connector(
        &self,
        protocol: Protocol,
        use_multipath: bool,
    ) -> AttachResult<Box<dyn DeviceConnector>>;
}

/// Factory for connectors that drive the host's initiator tools
#[derive(Debug, Clone)]
pub struct SystemConnectorFactory {
    executor: Executor,
    device_dir: PathBuf,
    scan_tries: u32,
    rescan_unit: Duration,
}

impl SystemConnectorFactory {
    pub fn new(executor: Executor, iscsi: &IscsiConfig) -> Self {
        Self {
            executor,
            device_dir: iscsi.device_dir.clone(),
            scan_tries: iscsi.num_scan_tries,
            rescan_unit: Duration::from_secs(1),
        }
    }

    pub fn with_rescan_unit(mut self, unit: Duration) -> Self {
        self.rescan_unit = unit;
        self
    }
}

impl ConnectorFactory for SystemConnectorFactory {
    fn connector(
        &self,
        protocol: Protocol,
        use_multipath: bool,
    ) -> AttachResult<Box<dyn DeviceConnector>> {
        match protocol {
            Protocol::Iscsi => Ok(Box::new(IscsiConnector::new(
                self.executor.clone(),
                self.device_dir.clone(),
                self.scan_tries,
                self.rescan_unit,
                use_multipath,
            ))),
            Protocol::FibreChannel => Err(AttachError::unsupported(
                "no device connector for fibre_channel",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_initiator_name() {
        let contents = "## DO NOT EDIT OR REMOVE THIS FILE!\n\
                        InitiatorName=iqn.1993-08.org.debian:01:abcdef\n";
        assert_eq!(
            parse_initiator_name(contents).as_deref(),
            Some("iqn.1993-08.org.debian:01:abcdef")
        );
        assert_eq!(parse_initiator_name("# nothing here\n"), None);
        assert_eq!(parse_initiator_name("InitiatorName=\n"), None);
    }

    #[test]
    fn test_gather_reads_initiator_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("initiatorname.iscsi");
        fs::write(&path, "InitiatorName=iqn.2004-10.com.example:host\n").unwrap();

        let iscsi = IscsiConfig {
            ip_address: "10.0.0.1".to_string(),
            initiator_name_path: path,
            ..Default::default()
        };
        let host = HostConnector::gather(&iscsi, true);
        assert_eq!(host.ip, "10.0.0.1");
        assert_eq!(host.initiator.as_deref(), Some("iqn.2004-10.com.example:host"));
        assert!(host.multipath);
        assert!(!host.host.is_empty());
    }

    #[test]
    fn test_gather_without_initiator_file() {
        let iscsi = IscsiConfig {
            initiator_name_path: PathBuf::from("/nonexistent/initiatorname.iscsi"),
            ..Default::default()
        };
        assert!(HostConnector::gather(&iscsi, false).initiator.is_none());
    }

    #[test]
    fn test_factory_dispatch() {
        let factory = SystemConnectorFactory::new(Executor::fake(), &IscsiConfig::default());
        let connector = factory.connector(Protocol::Iscsi, false).unwrap();
        assert_eq!(connector.protocol(), Protocol::Iscsi);
        assert!(matches!(
            factory.connector(Protocol::FibreChannel, false),
            Err(AttachError::Unsupported(_))
        ));
    }
}
