//! Connection properties
//!
//! Everything a device connector needs to reach a volume: where the target is,
//! what it is called, which logical unit to use, and how to authenticate.

pub mod parse;
pub mod resolver;

use crate::executor::ExecutionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use parse::{parse_auth, parse_geometry, parse_location, LocationRecord};
pub use resolver::{IscsiPropertyResolver, LunPolicy, LunRule};

/// Connection property errors
#[derive(Debug, Error)]
pub enum ConnectionPropertyError {
    #[error("could not find iSCSI export for volume {volume}")]
    NoExportFound { volume: String },

    #[error("malformed location record: {0:?}")]
    MalformedLocation(String),

    #[error("malformed auth record: expected \"<method> <username> <secret>\"")]
    MalformedAuth,

    #[error("unsupported auth method: {0}")]
    UnsupportedAuthMethod(String),

    #[error("malformed geometry record: {0:?}")]
    MalformedGeometry(String),

    #[error("discovery failed: {0}")]
    Discovery(#[from] ExecutionError),
}

/// Storage transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Iscsi,
    FibreChannel,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Iscsi => "iscsi",
            Protocol::FibreChannel => "fibre_channel",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "iscsi" => Ok(Protocol::Iscsi),
            "fibre_channel" | "fc" => Ok(Protocol::FibreChannel),
            other => Err(format!("unknown protocol: {}", other)),
        }
    }
}

/// Target name: an IQN, or one or more WWNs for multi-path Fibre Channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetIdentifier {
    Single(String),
    Multi(Vec<String>),
}

impl TargetIdentifier {
    /// Primary identifier (first entry for multi-path targets)
    pub fn primary(&self) -> Option<&str> {
        match self {
            TargetIdentifier::Single(id) => Some(id),
            TargetIdentifier::Multi(ids) => ids.first().map(String::as_str),
        }
    }
}

impl fmt::Display for TargetIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetIdentifier::Single(id) => f.write_str(id),
            TargetIdentifier::Multi(ids) => f.write_str(&ids.join(",")),
        }
    }
}

/// Authentication method. CHAP is the only one in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMethod {
    #[serde(rename = "CHAP")]
    Chap,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Chap => "CHAP",
        }
    }
}

/// Target credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    pub method: AuthMethod,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub secret: String,
}

impl fmt::Debug for AuthInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthInfo")
            .field("method", &self.method)
            .field("username", &self.username)
            .field("secret", &"***")
            .finish()
    }
}

/// Block-size geometry exported by the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub physical_block_size: u32,
    pub logical_block_size: u32,
}

/// Resolved connection properties for one attach attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    pub protocol: Protocol,

    /// True when derived from live discovery rather than the stored location
    pub target_discovered: bool,

    /// `host:port` of the target portal
    pub target_address: String,

    pub target_identifier: TargetIdentifier,

    pub logical_unit: u32,

    pub volume_id: String,

    #[serde(default)]
    pub auth: Option<AuthInfo>,

    #[serde(default)]
    pub geometry: Option<Geometry>,
}
