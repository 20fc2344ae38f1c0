//! Master-replica log shipping.
//!
//! The master tails the command log with one cursor per connected replica
//! and forwards records, verbatim, strictly in log order. Replicas apply
//! the stream through their local engine without re-logging it. There is no
//! acknowledgment beyond connection liveness, and no snapshot: a joining
//! replica replays the whole history from line 1.
pub mod config;
pub mod master;
pub mod replica;

pub use config::{MasterReplicationConfig, ReplicaConfig};
pub use master::ReplicationMaster;
pub use replica::ReplicaNode;
