//! Single-use attachment session

use super::{AttachError, AttachResult};
use crate::backend::{ConnectionInfo, VolumeDriver};
use crate::connector::{ConnectorFactory, Device, DeviceConnector, HostConnector};
use crate::properties::ConnectionProperties;
use crate::volume::Volume;
use std::path::PathBuf;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connected,
    Detached,
    Failed,
}

/// Attaches one volume to this host and detaches it again.
///
/// Ordering is fixed: `initialize_connection` → `connect` → validate on open,
/// `disconnect` → `terminate_connection` on close. Whatever open managed to
/// acquire is released by `close`, which is idempotent. A session dropped
/// while still holding resources tears them down and logs the fact.
pub struct AttachmentSession<'a> {
    driver: &'a dyn VolumeDriver,
    factory: &'a dyn ConnectorFactory,
    use_multipath: bool,
    volume: Volume,
    host: HostConnector,
    state: SessionState,
    /// `initialize_connection` succeeded and has not been terminated
    exported: bool,
    connection: Option<ConnectionInfo>,
    connector: Option<Box<dyn DeviceConnector>>,
    device: Option<Device>,
}

impl<'a> AttachmentSession<'a> {
    pub fn new(
        driver: &'a dyn VolumeDriver,
        factory: &'a dyn ConnectorFactory,
        volume: Volume,
        host: HostConnector,
        use_multipath: bool,
    ) -> Self {
        Self {
            driver,
            factory,
            use_multipath,
            volume,
            host,
            state: SessionState::Idle,
            exported: false,
            connection: None,
            connector: None,
            device: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    pub fn properties(&self) -> Option<&ConnectionProperties> {
        self.connection.as_ref().map(|c| &c.data)
    }

    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    /// Attach the volume and return its properties and local device path
    pub fn open(&mut self) -> AttachResult<(ConnectionProperties, PathBuf)> {
        if self.state != SessionState::Idle {
            return Err(AttachError::SessionReused(self.state));
        }

        match self.attach() {
            Ok(attached) => {
                self.state = SessionState::Connected;
                Ok(attached)
            }
            Err(e) => {
                log::error!("Failed to attach volume {}: {}", self.volume.name, e);
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    fn attach(&mut self) -> AttachResult<(ConnectionProperties, PathBuf)> {
        self.driver.validate_connector(&self.host)?;
        let connection = self.driver.initialize_connection(&self.volume, &self.host)?;
        self.exported = true;

        let connector = self.factory.connector(connection.protocol, self.use_multipath)?;
        let device = connector.connect(&connection.data)?;

        if !connector.check_valid_device(&device.path) {
            // The connector's own state must not outlive a failed open
            if let Err(e) = connector.disconnect(&connection.data, &device) {
                log::warn!(
                    "Failed to disconnect unusable device {:?}: {}",
                    device.path,
                    e
                );
            }
            return Err(AttachError::DeviceUnavailable {
                reason: format!(
                    "Unable to access the backend storage via the path {}.",
                    device.path.display()
                ),
                path: device.path,
            });
        }

        log::debug!("Attached volume {} at {:?}", self.volume.name, device.path);

        let attached = (connection.data.clone(), device.path.clone());
        self.connection = Some(connection);
        self.connector = Some(connector);
        self.device = Some(device);
        Ok(attached)
    }

    /// Detach whatever open acquired. Both steps always run; the first
    /// failure is returned after the second has been attempted.
    pub fn close(&mut self) -> AttachResult<()> {
        let mut first_error = None;

        if let (Some(connector), Some(device), Some(connection)) =
            (self.connector.take(), self.device.take(), self.connection.as_ref())
        {
            if let Err(e) = connector.disconnect(&connection.data, &device) {
                log::warn!(
                    "Failed to disconnect {:?} for volume {}: {}",
                    device.path,
                    self.volume.name,
                    e
                );
                first_error.get_or_insert(e);
            }
        }

        if self.exported {
            self.exported = false;
            if let Err(e) = self.driver.terminate_connection(&self.volume, &self.host) {
                log::warn!(
                    "Failed to terminate connection for volume {}: {}",
                    self.volume.name,
                    e
                );
                first_error.get_or_insert(e);
            }
        }

        if self.state == SessionState::Connected {
            self.state = SessionState::Detached;
            log::debug!("Detached volume {}", self.volume.name);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Close while another error is already on its way up
    pub fn close_quietly(&mut self) {
        // close has logged every failure
        let _ = self.close();
    }

    fn holds_resources(&self) -> bool {
        self.exported || self.device.is_some()
    }
}

impl Drop for AttachmentSession<'_> {
    fn drop(&mut self) {
        if self.holds_resources() {
            log::warn!(
                "Attachment of volume {} dropped without close, tearing down",
                self.volume.name
            );
            self.close_quietly();
        }
    }
}
