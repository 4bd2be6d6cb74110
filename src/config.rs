//! Configuration file parsing
//!
//! Parses the TOML configuration for volume attach and image transfer. Every
//! section is optional; missing values fall back to the defaults below.

use crate::executor::{Executor, RetryPolicy, SystemRunner};
use crate::properties::{LunPolicy, LunRule};
use crate::volume_utils;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub executor: ExecutorConfig,
    pub iscsi: IscsiConfig,
    pub backend: BackendConfig,
    pub transfer: TransferConfig,
    pub logging: LoggingConfig,

    /// Logical-unit defaults for records that carry no LUN
    pub lun_policy: Vec<LunRule>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            iscsi: IscsiConfig::default(),
            backend: BackendConfig::default(),
            transfer: TransferConfig::default(),
            logging: LoggingConfig::default(),
            lun_policy: default_lun_policy(),
        }
    }
}

/// Shell command settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of times to attempt to run flaky shell commands
    pub num_shell_tries: u32,

    /// Stderr substrings that make a failure non-recoverable
    pub no_retry_patterns: Vec<String>,

    /// Base unit for the quadratic retry backoff
    pub backoff_unit_ms: u64,

    /// Kill any command still running after this many seconds
    pub command_timeout_secs: u64,

    /// Prefix for commands that need root (e.g. "sudo")
    pub root_helper: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            num_shell_tries: 3,
            no_retry_patterns: Vec::new(),
            backoff_unit_ms: 1000,
            command_timeout_secs: 120,
            root_helper: Some("sudo".to_string()),
        }
    }
}

/// iSCSI settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IscsiConfig {
    /// Local address matched against discovery output
    pub ip_address: String,

    /// Port appended to discovery portals given without one
    pub port: u16,

    /// Target helper in use on the backend (tgtadm, ietadm, lioadm)
    pub helper: String,

    /// Number of times to rescan the target to find the volume
    pub num_scan_tries: u32,

    /// Where open-iscsi keeps the initiator name
    pub initiator_name_path: PathBuf,

    /// Directory holding stable iSCSI device links
    pub device_dir: PathBuf,
}

impl Default for IscsiConfig {
    fn default() -> Self {
        Self {
            ip_address: "127.0.0.1".to_string(),
            port: 3260,
            helper: "tgtadm".to_string(),
            num_scan_tries: 3,
            initiator_name_path: PathBuf::from("/etc/iscsi/initiatorname.iscsi"),
            device_dir: PathBuf::from("/dev/disk/by-path"),
        }
    }
}

impl IscsiConfig {
    /// `host` as a discovery portal, with the configured port unless it carries one
    pub fn portal(&self, host: &str) -> String {
        let has_port = host
            .rsplit_once(':')
            .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
        if has_port {
            host.to_string()
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

/// Backend identity
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend kind, matched by the LUN policy (e.g. "lvm")
    pub kind: String,

    /// Name reported in volume stats
    pub volume_backend_name: Option<String>,

    /// LUN used when no policy rule matches
    pub default_lun: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: "lvm".to_string(),
            volume_backend_name: None,
            default_lun: 0,
        }
    }
}

/// Image transfer settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Attach with multipath for volume/image transfers
    pub use_multipath: bool,

    /// dd block size (e.g. "1M", "512K", "4096")
    pub dd_blocksize: String,

    /// Directory of the raw image store
    pub image_dir: PathBuf,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            use_multipath: false,
            dd_blocksize: volume_utils::DEFAULT_BLOCKSIZE.to_string(),
            image_dir: PathBuf::from("/var/lib/volume-xfer/images"),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_lun_policy() -> Vec<LunRule> {
    vec![LunRule {
        backend: "lvm".to_string(),
        helper: "tgtadm".to_string(),
        lun: 1,
    }]
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.executor.num_shell_tries == 0 {
            return Err(ConfigError::Invalid(
                "executor.num_shell_tries must be at least 1".to_string(),
            ));
        }

        if self.executor.command_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "executor.command_timeout_secs must be non-zero".to_string(),
            ));
        }

        if let Some(helper) = &self.executor.root_helper {
            if helper.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "executor.root_helper must not be empty".to_string(),
                ));
            }
        }

        if self.iscsi.ip_address.trim().is_empty() {
            return Err(ConfigError::Invalid("iscsi.ip_address must be set".to_string()));
        }

        if volume_utils::parse_blocksize(&self.transfer.dd_blocksize).is_none() {
            return Err(ConfigError::Invalid(format!(
                "transfer.dd_blocksize is not a valid size: {}",
                self.transfer.dd_blocksize
            )));
        }

        Ok(())
    }

    /// Retry policy for shell commands
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_tries: self.executor.num_shell_tries,
            backoff_unit: Duration::from_millis(self.executor.backoff_unit_ms),
            no_retry_patterns: self.executor.no_retry_patterns.clone(),
        }
    }

    /// Executor that runs real processes
    pub fn system_executor(&self) -> Executor {
        let runner = SystemRunner::new(
            self.executor.root_helper.clone(),
            Duration::from_secs(self.executor.command_timeout_secs),
        );
        Executor::new(Arc::new(runner), self.retry_policy())
    }

    /// LUN default policy
    pub fn lun_policy(&self) -> LunPolicy {
        LunPolicy::new(self.lun_policy.clone(), self.backend.default_lun)
    }
}
