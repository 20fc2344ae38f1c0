use super::config::MasterReplicationConfig;
use crate::persistence::CommandLog;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Master side of replication: ships log records to every connected
/// replica, strictly in log order, one cursor per replica.
///
/// A replica joins with cursor 1 and receives the entire history from the
/// beginning; there is no snapshot mechanism. Disconnection drops the
/// cursor, so a reconnecting replica replays from line 1 again. Different
/// replicas advance independently; replication is eventual, not
/// synchronous.
pub struct ReplicationMaster {
    replicas: Arc<RwLock<HashMap<Uuid, ReplicaHandle>>>,
    local_addr: SocketAddr,
}

struct ReplicaHandle {
    addr: SocketAddr,
    /// Next 1-based log line to send. Only ever increases.
    cursor: u64,
    sender: mpsc::UnboundedSender<String>,
}

impl ReplicationMaster {
    /// Bind the replica port and start the accept and shipping loops.
    pub async fn start(
        config: MasterReplicationConfig,
        log: Arc<CommandLog>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.listen_address).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "master listening for replicas");

        let replicas = Arc::new(RwLock::new(HashMap::new()));

        tokio::spawn(Self::accept_loop(listener, Arc::clone(&replicas)));
        tokio::spawn(Self::shipping_loop(
            Arc::clone(&replicas),
            log,
            Duration::from_millis(config.idle_poll_ms),
        ));

        Ok(Self {
            replicas,
            local_addr,
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        replicas: Arc<RwLock<HashMap<Uuid, ReplicaHandle>>>,
    ) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let id = Uuid::new_v4();
                    info!(replica = %id, %addr, "replica connected");

                    let (tx, rx) = mpsc::unbounded_channel();
                    replicas.write().await.insert(
                        id,
                        ReplicaHandle {
                            addr,
                            cursor: 1,
                            sender: tx,
                        },
                    );

                    tokio::spawn(Self::connection_task(
                        stream,
                        id,
                        rx,
                        Arc::clone(&replicas),
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "failed to accept replica connection");
                }
            }
        }
    }

    /// Owns one replica socket: forwards queued records, watches for EOF.
    /// Inbound bytes are drained and ignored; the connection itself is the
    /// only acknowledgment the protocol has.
    async fn connection_task(
        mut stream: TcpStream,
        id: Uuid,
        mut rx: mpsc::UnboundedReceiver<String>,
        replicas: Arc<RwLock<HashMap<Uuid, ReplicaHandle>>>,
    ) {
        let mut drain = [0u8; 256];
        loop {
            tokio::select! {
                queued = rx.recv() => {
                    let Some(record) = queued else { break };
                    if let Err(e) = Self::send_record(&mut stream, &record).await {
                        warn!(replica = %id, error = %e, "replica write failed");
                        break;
                    }
                }
                read = stream.read(&mut drain) => {
                    match read {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            }
        }

        replicas.write().await.remove(&id);
        info!(replica = %id, "replica disconnected");
    }

    async fn send_record(stream: &mut TcpStream, record: &str) -> std::io::Result<()> {
        stream.write_all(record.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await
    }

    /// The single replication loop. For every replica: if the log has a
    /// record at the replica's cursor, queue exactly that record and advance
    /// the cursor by one; otherwise leave the cursor alone. When no cursor
    /// advanced, suspend until the log reports an append (with a bounded
    /// fallback tick) instead of spinning.
    async fn shipping_loop(
        replicas: Arc<RwLock<HashMap<Uuid, ReplicaHandle>>>,
        log: Arc<CommandLog>,
        idle_poll: Duration,
    ) {
        loop {
            let mut advanced = false;
            {
                let mut reps = replicas.write().await;
                let mut gone = Vec::new();
                for (id, rep) in reps.iter_mut() {
                    match log.read_line(rep.cursor).await {
                        Ok(Some(record)) => {
                            debug!(replica = %id, line = rep.cursor, "shipping record");
                            if rep.sender.send(record).is_ok() {
                                rep.cursor += 1;
                                advanced = true;
                            } else {
                                gone.push(*id);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            error!(replica = %id, line = rep.cursor, error = %e,
                                "failed to read log record for replication");
                        }
                    }
                }
                for id in gone {
                    reps.remove(&id);
                }
            }

            if !advanced {
                tokio::select! {
                    _ = log.wait_for_append() => {}
                    _ = tokio::time::sleep(idle_poll) => {}
                }
            }
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn replica_count(&self) -> usize {
        self.replicas.read().await.len()
    }

    /// Connected replicas with their next-line cursors.
    pub async fn cursors(&self) -> Vec<(SocketAddr, u64)> {
        self.replicas
            .read()
            .await
            .values()
            .map(|r| (r.addr, r.cursor))
            .collect()
    }
}
