//! Backend volume drivers
//!
//! A driver exports volumes to hosts. The attach code only needs
//! `initialize_connection` / `terminate_connection`; the management
//! operations default to "not implemented" so a driver opts into them.

pub mod fibre_channel;
pub mod iscsi;

use crate::attach::{AttachError, AttachResult};
use crate::connector::HostConnector;
use crate::properties::{ConnectionProperties, Protocol};
use crate::volume::Volume;
use serde::{Deserialize, Serialize};

pub use fibre_channel::FibreChannelDriver;
pub use iscsi::IscsiDriver;

/// Protocol-tagged connection data returned by a driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(rename = "driver_volume_type")]
    pub protocol: Protocol,
    pub data: ConnectionProperties,
}

/// Capacity report for a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeStats {
    pub volume_backend_name: String,
    pub vendor_name: String,
    pub driver_version: String,
    pub storage_protocol: String,
    /// `None` means unbounded
    pub total_capacity_gb: Option<u64>,
    pub free_capacity_gb: Option<u64>,
    pub reserved_percentage: u32,
    pub qos_support: bool,
}

/// Snapshot reference passed to the snapshot operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub name: String,
    pub volume_id: String,
}

/// Backend volume driver
pub trait VolumeDriver: Send + Sync {
    /// Export the volume to `host` and describe how to reach it
    fn initialize_connection(
        &self,
        volume: &Volume,
        host: &HostConnector,
    ) -> AttachResult<ConnectionInfo>;

    /// Withdraw the export made by `initialize_connection`
    fn terminate_connection(&self, volume: &Volume, host: &HostConnector) -> AttachResult<()>;

    /// Fail if the host properties lack what this driver needs
    fn validate_connector(&self, _host: &HostConnector) -> AttachResult<()> {
        Ok(())
    }

    fn check_for_setup_error(&self) -> AttachResult<()> {
        Err(AttachError::unsupported("check_for_setup_error"))
    }

    fn create_volume(&self, _volume: &Volume) -> AttachResult<()> {
        Err(AttachError::unsupported("create_volume"))
    }

    fn create_volume_from_snapshot(
        &self,
        _volume: &Volume,
        _snapshot: &Snapshot,
    ) -> AttachResult<()> {
        Err(AttachError::unsupported("create_volume_from_snapshot"))
    }

    fn create_cloned_volume(&self, _volume: &Volume, _source: &Volume) -> AttachResult<()> {
        Err(AttachError::unsupported("create_cloned_volume"))
    }

    fn delete_volume(&self, _volume: &Volume) -> AttachResult<()> {
        Err(AttachError::unsupported("delete_volume"))
    }

    fn create_snapshot(&self, _snapshot: &Snapshot) -> AttachResult<()> {
        Err(AttachError::unsupported("create_snapshot"))
    }

    fn delete_snapshot(&self, _snapshot: &Snapshot) -> AttachResult<()> {
        Err(AttachError::unsupported("delete_snapshot"))
    }

    fn extend_volume(&self, _volume: &Volume, _new_size_gb: u64) -> AttachResult<()> {
        Err(AttachError::unsupported("extend_volume"))
    }

    fn backup_volume(&self, _volume: &Volume, _backup_id: &str) -> AttachResult<()> {
        Err(AttachError::unsupported("backup_volume"))
    }

    fn restore_backup(&self, _backup_id: &str, _volume: &Volume) -> AttachResult<()> {
        Err(AttachError::unsupported("restore_backup"))
    }

    /// Create the volume directly from an image location if the backend can.
    /// Returns whether cloning happened.
    fn clone_image(&self, _volume: &Volume, _image_location: &str) -> AttachResult<bool> {
        Ok(false)
    }

    /// Clean up after an interrupted image copy
    fn clear_download(&self, _volume: &Volume) -> AttachResult<()> {
        Ok(())
    }

    fn volume_stats(&self) -> Option<VolumeStats> {
        None
    }
}
