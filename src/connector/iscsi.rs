//! iSCSI connector (open-iscsi)
//!
//! Logs in to the target with `iscsiadm` and waits for the stable
//! `/dev/disk/by-path` link of the requested LUN to appear.

use super::{Device, DeviceConnector};
use crate::attach::{AttachError, AttachResult};
use crate::executor::{CommandOutput, ExecResult, Executor, ShellCommand};
use crate::properties::{ConnectionProperties, Protocol};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// iscsiadm: session already exists
const ISCSI_ERR_SESS_EXISTS: i32 = 15;
/// iscsiadm: no records / objects found
const ISCSI_ERR_NO_OBJS_FOUND: i32 = 21;

/// Connector for iSCSI targets
#[derive(Debug, Clone)]
pub struct IscsiConnector {
    executor: Executor,
    device_dir: PathBuf,
    scan_tries: u32,
    rescan_unit: Duration,
    use_multipath: bool,
}

impl IscsiConnector {
    pub fn new(
        executor: Executor,
        device_dir: PathBuf,
        scan_tries: u32,
        rescan_unit: Duration,
        use_multipath: bool,
    ) -> Self {
        Self {
            executor,
            device_dir,
            scan_tries: scan_tries.max(1),
            rescan_unit,
            use_multipath,
        }
    }

    /// Stable by-path link for a target LUN
    pub fn device_path(&self, properties: &ConnectionProperties) -> PathBuf {
        self.device_dir.join(format!(
            "ip-{}-iscsi-{}-lun-{}",
            properties.target_address, properties.target_identifier, properties.logical_unit
        ))
    }

    fn iscsiadm(
        &self,
        properties: &ConnectionProperties,
        command: &[&str],
        ok_codes: &[i32],
    ) -> ExecResult<CommandOutput> {
        let cmd = ShellCommand::new("iscsiadm")
            .args(["-m", "node", "-T"])
            .arg(properties.target_identifier.to_string())
            .arg("-p")
            .arg(properties.target_address.as_str())
            .args(command.iter().copied())
            .as_root()
            .ok_exit_codes(ok_codes);
        let output = self.executor.try_run(&cmd, &[])?;
        log::debug!(
            "iscsiadm {:?}: stdout={} stderr={}",
            command,
            output.stdout,
            output.stderr
        );
        Ok(output)
    }

    fn update(
        &self,
        properties: &ConnectionProperties,
        key: &str,
        value: &str,
    ) -> ExecResult<CommandOutput> {
        self.iscsiadm(properties, &["--op", "update", "-n", key, "-v", value], &[0])
    }

    /// Configure, log in and wait for the device. Assumes the node record exists.
    fn login(&self, properties: &ConnectionProperties) -> AttachResult<PathBuf> {
        if let Some(auth) = &properties.auth {
            self.update(properties, "node.session.auth.authmethod", auth.method.as_str())?;
            self.update(properties, "node.session.auth.username", &auth.username)?;
            self.update(properties, "node.session.auth.password", &auth.secret)?;
        }

        self.iscsiadm(properties, &["--login"], &[0, ISCSI_ERR_SESS_EXISTS])?;
        self.update(properties, "node.startup", "automatic")?;

        self.wait_for_device(properties)
    }

    /// Log out and drop the node record. Missing sessions and records are fine.
    fn logout(&self, properties: &ConnectionProperties) -> AttachResult<()> {
        self.update(properties, "node.startup", "manual")?;
        self.iscsiadm(properties, &["--logout"], &[0, ISCSI_ERR_NO_OBJS_FOUND])?;
        self.iscsiadm(properties, &["--op", "delete"], &[0, ISCSI_ERR_NO_OBJS_FOUND])?;
        Ok(())
    }

    fn wait_for_device(&self, properties: &ConnectionProperties) -> AttachResult<PathBuf> {
        let path = self.device_path(properties);
        let mut tries = 0;

        while !path.exists() {
            if tries >= self.scan_tries {
                return Err(AttachError::DeviceUnavailable {
                    path,
                    reason: "iSCSI device not found".to_string(),
                });
            }

            log::warn!(
                "iSCSI volume not yet found at {:?}. Will rescan & retry. Try number: {}",
                path,
                tries
            );
            self.iscsiadm(properties, &["--rescan"], &[0])?;

            tries += 1;
            thread::sleep(self.rescan_unit * (tries * tries));
        }

        if tries > 0 {
            log::debug!("Found iSCSI node {:?} (after {} rescans)", path, tries);
        }
        Ok(path)
    }
}

impl DeviceConnector for IscsiConnector {
    fn protocol(&self) -> Protocol {
        Protocol::Iscsi
    }

    fn connect(&self, properties: &ConnectionProperties) -> AttachResult<Device> {
        log::info!(
            "Connecting to iSCSI target {} at {} (multipath: {})",
            properties.target_identifier,
            properties.target_address,
            self.use_multipath
        );

        // Node record may be missing when the target was not discovered
        self.iscsiadm(properties, &["--op", "new"], &[0])?;

        match self.login(properties) {
            Ok(path) => {
                log::info!("iSCSI target connected at {:?}", path);
                Ok(Device { path })
            }
            Err(e) => {
                log::error!(
                    "Failed to connect to iSCSI target {}: {}",
                    properties.target_identifier,
                    e
                );
                if let Err(cleanup) = self.logout(properties) {
                    log::warn!(
                        "Failed to log out of iSCSI target {} after a failed connect: {}",
                        properties.target_identifier,
                        cleanup
                    );
                }
                Err(e)
            }
        }
    }

    fn disconnect(&self, properties: &ConnectionProperties, device: &Device) -> AttachResult<()> {
        log::info!(
            "Disconnecting iSCSI target {} ({:?})",
            properties.target_identifier,
            device.path
        );

        self.logout(properties)
    }

    fn check_valid_device(&self, path: &Path) -> bool {
        let cmd = ShellCommand::new("dd")
            .arg(format!("if={}", path.display()))
            .args(["of=/dev/null", "count=1"])
            .as_root();
        match self.executor.run(&cmd) {
            Ok(_) => true,
            Err(e) => {
                log::error!("Failed to access the device on the path {:?}: {}", path, e);
                false
            }
        }
    }
}
