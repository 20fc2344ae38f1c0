use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Master-side replication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterReplicationConfig {
    /// Address the master listens on for replica connections.
    pub listen_address: SocketAddr,

    /// Fallback tick for the shipping loop, in milliseconds. The loop
    /// normally suspends on the log's append notification; the tick only
    /// bounds how long a missed wakeup can stall delivery.
    pub idle_poll_ms: u64,
}

impl Default for MasterReplicationConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8888".parse().unwrap(),
            idle_poll_ms: 100,
        }
    }
}

/// Replica-side replication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaConfig {
    /// Master's replication port.
    pub master_address: SocketAddr,

    /// Fixed delay between reconnect attempts, in milliseconds. Attempts
    /// are unbounded; a replica that stops retrying is unusable for
    /// promotion.
    pub reconnect_delay_ms: u64,

    /// Bounded timeout for each connect attempt, in milliseconds.
    pub connect_timeout_ms: u64,

    /// Disable reconnection. Only meant for tests; a production replica
    /// must keep retrying forever.
    pub auto_reconnect: bool,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            master_address: "127.0.0.1:8888".parse().unwrap(),
            reconnect_delay_ms: 5000,
            connect_timeout_ms: 5000,
            auto_reconnect: true,
        }
    }
}
