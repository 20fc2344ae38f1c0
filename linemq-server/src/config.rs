use crate::replication::{MasterReplicationConfig, ReplicaConfig};
use crate::sentinel::SentinelConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Node configuration, loaded from a YAML file. Every section has working
/// defaults so a partial file (or none at all) is enough to start a node;
/// the role subcommand in `main` decides which sections are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub logging: LoggingConfig,
    pub master: MasterConfig,
    pub replica: ReplicaNodeConfig,
    pub sentinel: SentinelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Client command port.
    pub client_address: SocketAddr,
    /// Write-ahead log file.
    pub log_path: PathBuf,
    pub replication: MasterReplicationConfig,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            client_address: "0.0.0.0:9999".parse().unwrap(),
            log_path: PathBuf::from("linemq-master.log"),
            replication: MasterReplicationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaNodeConfig {
    /// Health endpoint the sentinel probes. Replicas bind no client command
    /// port, so they cannot be desynchronized by direct writes.
    pub health_address: SocketAddr,
    /// Replica-local log file; replayed at startup, never written by
    /// replication traffic.
    pub log_path: PathBuf,
    pub replication: ReplicaConfig,
}

impl Default for ReplicaNodeConfig {
    fn default() -> Self {
        Self {
            health_address: "0.0.0.0:9998".parse().unwrap(),
            log_path: PathBuf::from("linemq-replica.log"),
            replication: ReplicaConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: NodeConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }
}
