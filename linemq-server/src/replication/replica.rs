use super::config::ReplicaConfig;
use crate::core::CommandEngine;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Replica side of replication.
///
/// Keeps a persistent connection to the master's replication port and
/// applies each received line through the local engine with logging
/// disabled: the replica's in-memory state is derived from the replicated
/// stream, so its own log is never populated by replication traffic. (The
/// local log is still replayed at startup, so a node whose log was seeded
/// while serving as master comes back with that state.)
///
/// On disconnect or connect failure the replica retries on a fixed delay,
/// indefinitely. A replica that stops retrying can never catch up and is
/// useless as a promotion candidate.
///
/// The master restarts every connection at line 1 (no resumable cursor on
/// its side), so the replica remembers how many stream lines it has already
/// applied this process and skips that prefix after a reconnect. Without
/// that, re-replication would double-apply history onto existing state.
pub struct ReplicaNode {
    config: ReplicaConfig,
    engine: Arc<CommandEngine>,
    connected: AtomicBool,
    applied: AtomicU64,
    /// Lines of the master's stream already applied (1-based high-water
    /// mark). Not persisted; a restarted replica replays from scratch.
    stream_position: AtomicU64,
}

impl ReplicaNode {
    /// Start the replication loop in the background.
    pub fn start(config: ReplicaConfig, engine: Arc<CommandEngine>) -> Arc<Self> {
        let node = Arc::new(Self {
            config,
            engine,
            connected: AtomicBool::new(false),
            applied: AtomicU64::new(0),
            stream_position: AtomicU64::new(0),
        });

        let loop_node = Arc::clone(&node);
        tokio::spawn(async move {
            loop_node.replication_loop().await;
        });

        node
    }

    async fn replication_loop(self: Arc<Self>) {
        let master = self.config.master_address;
        let retry_delay = Duration::from_millis(self.config.reconnect_delay_ms);

        loop {
            info!(%master, "connecting to master");
            match self.connect_and_apply(master).await {
                Ok(()) => info!(%master, "replication connection closed"),
                Err(e) => warn!(%master, error = %e, "replication connection failed"),
            }
            self.connected.store(false, Ordering::SeqCst);

            if !self.config.auto_reconnect {
                warn!("auto-reconnect disabled, replication stopped");
                return;
            }
            tokio::time::sleep(retry_delay).await;
        }
    }

    async fn connect_and_apply(&self, master: std::net::SocketAddr) -> std::io::Result<()> {
        let connect = TcpStream::connect(master);
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let stream = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;

        info!(%master, "connected to master, applying replicated stream");
        self.connected.store(true, Ordering::SeqCst);

        let mut lines = BufReader::new(stream).lines();
        let mut position: u64 = 0;
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            position += 1;
            if position <= self.stream_position.load(Ordering::SeqCst) {
                // Re-replication after a reconnect; this prefix is already
                // applied.
                continue;
            }
            match self.engine.apply(line, false).await {
                Ok(response) => {
                    self.applied.fetch_add(1, Ordering::SeqCst);
                    self.stream_position.store(position, Ordering::SeqCst);
                    debug!(command = line, response = %response, "applied replicated command");
                }
                Err(e) => {
                    // should_log=false never appends, so this is unexpected;
                    // keep the stream alive but say so loudly.
                    warn!(command = line, error = %e, "failed to apply replicated command");
                }
            }
        }

        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of replicated commands applied since startup. Skipped
    /// already-applied prefixes after a reconnect do not count.
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::SeqCst)
    }

    pub fn engine(&self) -> &Arc<CommandEngine> {
        &self.engine
    }
}
