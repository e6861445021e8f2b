//! Distributor configuration.

use std::time::Duration;

use serde::Deserialize;

/// How many copies a write must land before it succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteLevel {
    /// Every primary peer must store the copy.
    #[default]
    All,
    /// At least one primary peer must store the copy.
    One,
    /// Only the local store is written.
    Local,
}

/// Configuration for a [`Distributor`](crate::Distributor).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DistributorConfig {
    /// Serve the storage protocol to other peers.
    pub listen: bool,
    /// Address the storage service binds to.
    pub listen_addr: String,
    /// Interval between heartbeats, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Upper bound on each shutdown wait, in milliseconds.
    pub drain_timeout_ms: u64,
    /// Copies required for a write to succeed.
    pub write_level: WriteLevel,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            listen: true,
            listen_addr: "127.0.0.1:4830".to_string(),
            heartbeat_interval_ms: 1000,
            drain_timeout_ms: 5000,
            write_level: WriteLevel::All,
        }
    }
}

impl DistributorConfig {
    /// Heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    /// Shutdown wait bound as a [`Duration`].
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
