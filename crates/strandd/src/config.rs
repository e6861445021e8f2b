//! TOML configuration for the Strand daemon.

use std::path::Path;

use serde::Deserialize;
use strand_distributor::DistributorConfig;
use strand_types::GlobalMetadata;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node identity.
    pub node: NodeSection,
    /// Distributor settings.
    pub distributor: DistributorConfig,
    /// Cluster-wide placement policy.
    pub cluster: ClusterSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[node]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Cluster identity of this node. A random UUID is generated if unset.
    pub uuid: Option<String>,
}

/// `[cluster]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Copies kept of each data block.
    pub replication: usize,
    /// Copies kept of each inode record.
    pub inode_replication: usize,
    /// Data block size in bytes.
    pub block_size: u64,
}

impl Default for ClusterSection {
    fn default() -> Self {
        let global = GlobalMetadata::default();
        Self {
            replication: 1,
            inode_replication: global.inode_replication,
            block_size: global.block_size,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load config from a TOML file, or defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                Ok(toml::from_str(&content)?)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string.
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Cluster-wide metadata seeded into the coordination service.
    pub fn global_metadata(&self) -> GlobalMetadata {
        GlobalMetadata {
            inode_replication: self.cluster.inode_replication.max(1),
            block_size: self.cluster.block_size,
        }
    }
}
