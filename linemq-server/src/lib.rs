//! linemq: a minimal distributed message broker.
//!
//! Named FIFO queues behind a line-oriented text protocol, durable through
//! an fsync-per-append command log, replicated from one master to any
//! number of replicas by per-cursor log shipping, watched by a sentinel
//! that probes master liveness and elects (but does not enact) a promotion
//! candidate.

pub mod config;
pub mod core;
pub mod persistence;
pub mod protocol;
pub mod replication;
pub mod sentinel;
pub mod server;

pub use config::NodeConfig;
pub use self::core::{BrokerError, CommandEngine, QueueStore};
pub use persistence::{CommandLog, PersistenceError};
pub use protocol::{Command, Response};
pub use replication::{MasterReplicationConfig, ReplicaConfig, ReplicaNode, ReplicationMaster};
pub use sentinel::{CandidateNode, ProbeOutcome, Sentinel, SentinelConfig};
