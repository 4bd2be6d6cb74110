//! Generic iSCSI driver
//!
//! Uses the volume's provider fields as follows:
//!
//! - `provider_location`: the target in sendtargets discovery format,
//!   `<ip>:<port>,<portal> <target IQN> [<lun>]`
//! - `provider_auth`: `<auth method> <auth username> <auth password>`,
//!   CHAP being the only method in use
//! - `provider_geometry`: `<physical block size> <logical block size>`

use super::{ConnectionInfo, VolumeDriver, VolumeStats};
use crate::attach::{AttachError, AttachResult};
use crate::config::Config;
use crate::connector::HostConnector;
use crate::executor::Executor;
use crate::properties::{IscsiPropertyResolver, Protocol};
use crate::volume::Volume;

/// iSCSI volume driver
#[derive(Debug, Clone)]
pub struct IscsiDriver {
    resolver: IscsiPropertyResolver,
    volume_backend_name: Option<String>,
}

impl IscsiDriver {
    pub fn new(resolver: IscsiPropertyResolver, volume_backend_name: Option<String>) -> Self {
        Self {
            resolver,
            volume_backend_name,
        }
    }

    /// Driver that runs its commands through `executor`
    pub fn from_config(config: &Config, executor: Executor) -> Self {
        Self::new(
            IscsiPropertyResolver::from_config(config, executor),
            config.backend.volume_backend_name.clone(),
        )
    }

    /// Driver that logs commands instead of running them
    pub fn fake(config: &Config) -> Self {
        Self::from_config(config, Executor::fake())
    }

    pub fn resolver(&self) -> &IscsiPropertyResolver {
        &self.resolver
    }
}

impl VolumeDriver for IscsiDriver {
    fn initialize_connection(
        &self,
        volume: &Volume,
        _host: &HostConnector,
    ) -> AttachResult<ConnectionInfo> {
        let data = self.resolver.resolve(volume)?;
        log::debug!(
            "Initialized iSCSI connection for {}: {} {} lun {}",
            volume.name,
            data.target_address,
            data.target_identifier,
            data.logical_unit
        );
        Ok(ConnectionInfo {
            protocol: Protocol::Iscsi,
            data,
        })
    }

    fn terminate_connection(&self, _volume: &Volume, _host: &HostConnector) -> AttachResult<()> {
        Ok(())
    }

    fn validate_connector(&self, host: &HostConnector) -> AttachResult<()> {
        if host.initiator.is_none() {
            log::error!("The volume driver requires the iSCSI initiator name in the connector");
            return Err(AttachError::InvalidConnector(
                "the volume driver requires the iSCSI initiator name in the connector".to_string(),
            ));
        }
        Ok(())
    }

    fn check_for_setup_error(&self) -> AttachResult<()> {
        Ok(())
    }

    fn volume_stats(&self) -> Option<VolumeStats> {
        log::debug!("Updating volume status");
        Some(VolumeStats {
            volume_backend_name: self
                .volume_backend_name
                .clone()
                .unwrap_or_else(|| "Generic_iSCSI".to_string()),
            vendor_name: "Open Source".to_string(),
            driver_version: "1.0".to_string(),
            storage_protocol: "iSCSI".to_string(),
            total_capacity_gb: None,
            free_capacity_gb: None,
            reserved_percentage: 100,
            qos_support: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::ConnectionPropertyError;

    fn host(initiator: Option<&str>) -> HostConnector {
        HostConnector {
            ip: "10.0.0.1".to_string(),
            host: "node-1".to_string(),
            initiator: initiator.map(str::to_string),
            multipath: false,
        }
    }

    #[test]
    fn test_initialize_connection_tags_iscsi() {
        let driver = IscsiDriver::fake(&Config::default());
        let volume = Volume {
            id: "vol-1".to_string(),
            name: "volume-1".to_string(),
            host: "10.0.0.5".to_string(),
            provider_location: Some("10.0.0.5:3260,1 iqn.example:target".to_string()),
            ..Default::default()
        };

        let info = driver.initialize_connection(&volume, &host(None)).unwrap();
        assert_eq!(info.protocol, Protocol::Iscsi);
        assert_eq!(info.data.logical_unit, 1);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["driver_volume_type"], "iscsi");
        assert_eq!(json["data"]["target_address"], "10.0.0.5:3260");
    }

    #[test]
    fn test_fake_driver_discovery_finds_nothing() {
        let driver = IscsiDriver::fake(&Config::default());
        let volume = Volume {
            name: "volume-1".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            driver.initialize_connection(&volume, &host(None)),
            Err(AttachError::ConnectionProperty(
                ConnectionPropertyError::NoExportFound { .. }
            ))
        ));
    }

    #[test]
    fn test_fake_driver_resolves_stored_location() {
        let driver = IscsiDriver::fake(&Config::default());
        let volume = Volume {
            name: "volume-1".to_string(),
            provider_location: Some("10.0.0.5:3260,1 iqn.example:target 4".to_string()),
            ..Default::default()
        };

        let info = driver.initialize_connection(&volume, &host(None)).unwrap();
        assert_eq!(info.protocol, Protocol::Iscsi);
        assert_eq!(info.data.logical_unit, 4);
        driver.terminate_connection(&volume, &host(None)).unwrap();
    }

    #[test]
    fn test_validate_connector_requires_initiator() {
        let driver = IscsiDriver::fake(&Config::default());
        assert!(matches!(
            driver.validate_connector(&host(None)),
            Err(AttachError::InvalidConnector(_))
        ));
        assert!(driver
            .validate_connector(&host(Some("iqn.1993-08.org.debian:01:abc")))
            .is_ok());
    }

    #[test]
    fn test_volume_stats_defaults() {
        let stats = IscsiDriver::fake(&Config::default()).volume_stats().unwrap();
        assert_eq!(stats.volume_backend_name, "Generic_iSCSI");
        assert_eq!(stats.storage_protocol, "iSCSI");
        assert!(stats.total_capacity_gb.is_none());
    }

    #[test]
    fn test_management_operations_not_implemented() {
        let driver = IscsiDriver::fake(&Config::default());
        assert!(matches!(
            driver.create_volume(&Volume::default()),
            Err(AttachError::Unsupported(_))
        ));
        assert!(!driver.clone_image(&Volume::default(), "rbd://pool/image").unwrap());
    }
}
