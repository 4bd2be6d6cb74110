//! Persisted volume record
//!
//! The subset of a volume's database row that attach and transfer consume.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// A block-storage volume as recorded by the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Opaque volume identifier
    pub id: String,

    /// Volume name (matched against discovery output)
    pub name: String,

    /// Host serving the volume, used as the discovery portal
    pub host: String,

    /// Size in GiB
    #[serde(default)]
    pub size_gb: u64,

    /// `"<ip>:<port>,<portal> <target-identifier> [<lun>]"`
    #[serde(default)]
    pub provider_location: Option<String>,

    /// `"<method> <username> <secret>"`
    #[serde(default)]
    pub provider_auth: Option<String>,

    /// `"<physical-block-size> <logical-block-size>"`
    #[serde(default)]
    pub provider_geometry: Option<String>,
}

impl Volume {
    /// Load a volume record from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read volume record from {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse volume record from {:?}", path))
    }

    /// Size in MiB
    pub fn size_mb(&self) -> u64 {
        self.size_gb * 1024
    }

    fn field(value: &Option<String>) -> Option<&str> {
        value.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Persisted location, ignoring empty strings
    pub fn location(&self) -> Option<&str> {
        Self::field(&self.provider_location)
    }

    pub fn auth(&self) -> Option<&str> {
        Self::field(&self.provider_auth)
    }

    pub fn geometry(&self) -> Option<&str> {
        Self::field(&self.provider_geometry)
    }
}
