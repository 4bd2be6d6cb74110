//! iSCSI connection property resolution
//!
//! The stored `provider_location` is the primary source. Volumes created
//! before locations were persisted fall back to a sendtargets discovery
//! against the volume's host.

use super::{
    parse_auth, parse_geometry, parse_location, ConnectionProperties, ConnectionPropertyError,
    Protocol, TargetIdentifier,
};
use crate::config::Config;
use crate::executor::{Executor, ShellCommand};
use crate::volume::Volume;
use serde::{Deserialize, Serialize};

/// One LUN default rule: records from `backend` exported by `helper` use `lun`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LunRule {
    pub backend: String,
    pub helper: String,
    pub lun: u32,
}

/// Ordered LUN default table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LunPolicy {
    rules: Vec<LunRule>,
    fallback: u32,
}

impl LunPolicy {
    pub fn new(rules: Vec<LunRule>, fallback: u32) -> Self {
        Self { rules, fallback }
    }

    /// LUN to assume when a record carries none. First matching rule wins.
    pub fn default_for(&self, backend: &str, helper: &str) -> u32 {
        self.rules
            .iter()
            .find(|rule| rule.backend == backend && rule.helper == helper)
            .map(|rule| rule.lun)
            .unwrap_or(self.fallback)
    }
}

/// Resolves iSCSI connection properties for a volume
#[derive(Debug, Clone)]
pub struct IscsiPropertyResolver {
    executor: Executor,
    local_address: String,
    backend: String,
    helper: String,
    lun_policy: LunPolicy,
}

impl IscsiPropertyResolver {
    pub fn new(
        executor: Executor,
        local_address: impl Into<String>,
        backend: impl Into<String>,
        helper: impl Into<String>,
        lun_policy: LunPolicy,
    ) -> Self {
        Self {
            executor,
            local_address: local_address.into(),
            backend: backend.into(),
            helper: helper.into(),
            lun_policy,
        }
    }

    /// Build a resolver from configuration
    pub fn from_config(config: &Config, executor: Executor) -> Self {
        Self::new(
            executor,
            config.iscsi.ip_address.clone(),
            config.backend.kind.clone(),
            config.iscsi.helper.clone(),
            config.lun_policy(),
        )
    }

    /// Run sendtargets discovery against the volume's host and return the
    /// first record naming both our address and the volume.
    pub fn discover(&self, volume: &Volume) -> Result<Option<String>, ConnectionPropertyError> {
        log::warn!("iSCSI provider_location not stored for {}, using discovery", volume.name);

        let command = ShellCommand::new("iscsiadm")
            .args(["-m", "discovery", "-t", "sendtargets", "-p"])
            .arg(volume.host.as_str())
            .as_root();
        let output = self.executor.run(&command)?;

        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| line.contains(&self.local_address) && line.contains(&volume.name))
            .map(str::to_string))
    }

    /// Resolve connection properties for a volume
    pub fn resolve(
        &self,
        volume: &Volume,
    ) -> Result<ConnectionProperties, ConnectionPropertyError> {
        let (location, target_discovered) = match volume.location() {
            Some(location) => (location.to_string(), false),
            None => {
                let location = self.discover(volume)?.ok_or_else(|| {
                    ConnectionPropertyError::NoExportFound {
                        volume: volume.name.clone(),
                    }
                })?;
                log::debug!("iSCSI discovery: found {}", location);
                (location, true)
            }
        };

        let record = parse_location(&location)?;
        let logical_unit = match record.lun {
            Some(lun) => lun,
            None => self.lun_policy.default_for(&self.backend, &self.helper),
        };

        let auth = volume.auth().map(parse_auth).transpose()?;
        let geometry = volume.geometry().map(parse_geometry).transpose()?;

        Ok(ConnectionProperties {
            protocol: Protocol::Iscsi,
            target_discovered,
            target_address: record.address,
            target_identifier: TargetIdentifier::Single(record.identifier),
            logical_unit,
            volume_id: volume.id.clone(),
            auth,
            geometry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::AuthMethod;
    use crate::test_support::{executor_with, ScriptedRunner};
    use std::sync::Arc;

    fn policy() -> LunPolicy {
        LunPolicy::new(
            vec![LunRule {
                backend: "lvm".to_string(),
                helper: "tgtadm".to_string(),
                lun: 1,
            }],
            0,
        )
    }

    fn resolver(
        runner: &Arc<ScriptedRunner>,
        backend: &str,
        helper: &str,
    ) -> IscsiPropertyResolver {
        IscsiPropertyResolver::new(executor_with(runner), "10.0.0.1", backend, helper, policy())
    }

    fn volume(location: Option<&str>) -> Volume {
        Volume {
            id: "vol-0001".to_string(),
            name: "volume-0001".to_string(),
            host: "10.0.0.5".to_string(),
            provider_location: location.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_stored_location() {
        let runner = Arc::new(ScriptedRunner::new());
        let props = resolver(&runner, "lvm", "tgtadm")
            .resolve(&volume(Some("10.0.0.5:3260,1 iqn.example:target 2")))
            .unwrap();

        assert!(!props.target_discovered);
        assert_eq!(props.target_address, "10.0.0.5:3260");
        assert_eq!(
            props.target_identifier,
            TargetIdentifier::Single("iqn.example:target".to_string())
        );
        assert_eq!(props.logical_unit, 2);
        assert_eq!(props.volume_id, "vol-0001");
        assert!(props.auth.is_none());
        assert!(props.geometry.is_none());
        assert_eq!(runner.invocations(), 0);
    }

    #[test]
    fn test_missing_lun_uses_policy() {
        let runner = Arc::new(ScriptedRunner::new());
        let vol = volume(Some("10.0.0.5:3260,1 iqn.example:target"));

        assert_eq!(resolver(&runner, "lvm", "tgtadm").resolve(&vol).unwrap().logical_unit, 1);
        assert_eq!(resolver(&runner, "lvm", "lioadm").resolve(&vol).unwrap().logical_unit, 0);
        assert_eq!(resolver(&runner, "nfs", "tgtadm").resolve(&vol).unwrap().logical_unit, 0);
    }

    #[test]
    fn test_discovery_fallback() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_success(
            "10.0.0.9:3260,1 iqn.example:volume-0001\n\
             10.0.0.1:3260,1 iqn.example:volume-0002\n\
             10.0.0.1:3260,1 iqn.example:volume-0001\n",
        );

        let props = resolver(&runner, "lvm", "tgtadm").resolve(&volume(None)).unwrap();

        assert!(props.target_discovered);
        assert_eq!(props.target_address, "10.0.0.1:3260");
        assert_eq!(props.target_identifier.primary(), Some("iqn.example:volume-0001"));
        assert_eq!(props.logical_unit, 1);

        let commands = runner.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(
            commands[0].to_string(),
            "iscsiadm -m discovery -t sendtargets -p 10.0.0.5"
        );
        assert!(commands[0].run_as_root);
    }

    #[test]
    fn test_discovery_without_match() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_success("10.0.0.9:3260,1 iqn.example:volume-0001\n");

        let err = resolver(&runner, "lvm", "tgtadm").resolve(&volume(None)).unwrap_err();
        assert!(matches!(err, ConnectionPropertyError::NoExportFound { .. }));
    }

    #[test]
    fn test_discovery_command_failure() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_failure("iscsiadm: cannot make connection");

        let err = resolver(&runner, "lvm", "tgtadm").resolve(&volume(None)).unwrap_err();
        assert!(matches!(err, ConnectionPropertyError::Discovery(_)));
    }

    #[test]
    fn test_auth_and_geometry_attached() {
        let runner = Arc::new(ScriptedRunner::new());
        let mut vol = volume(Some("10.0.0.5:3260,1 iqn.example:target 0"));
        vol.provider_auth = Some("CHAP user pass".to_string());
        vol.provider_geometry = Some("4096 512".to_string());

        let props = resolver(&runner, "lvm", "tgtadm").resolve(&vol).unwrap();
        let auth = props.auth.unwrap();
        assert_eq!(auth.method, AuthMethod::Chap);
        assert_eq!(auth.username, "user");
        assert_eq!(auth.secret, "pass");
        let geometry = props.geometry.unwrap();
        assert_eq!(geometry.physical_block_size, 4096);
        assert_eq!(geometry.logical_block_size, 512);
    }

    #[test]
    fn test_malformed_auth_fails_whole_resolution() {
        let runner = Arc::new(ScriptedRunner::new());
        let mut vol = volume(Some("10.0.0.5:3260,1 iqn.example:target 0"));
        vol.provider_auth = Some("CHAP user".to_string());

        assert!(matches!(
            resolver(&runner, "lvm", "tgtadm").resolve(&vol),
            Err(ConnectionPropertyError::MalformedAuth)
        ));
    }
}
