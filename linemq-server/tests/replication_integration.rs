//! Full-topology tests: master + replica + sentinel over localhost.

use linemq_server::{
    CandidateNode, CommandEngine, MasterReplicationConfig, ProbeOutcome, ReplicaConfig,
    ReplicaNode, ReplicationMaster, Sentinel, SentinelConfig, server,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

async fn converged(master: &Arc<CommandEngine>, replica: &Arc<CommandEngine>) -> bool {
    master.store().snapshot().await == replica.store().snapshot().await
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("cluster did not converge in time");
}

struct Cluster {
    _dir: tempfile::TempDir,
    master_engine: Arc<CommandEngine>,
    replica_engine: Arc<CommandEngine>,
    client_addr: std::net::SocketAddr,
    client_server: tokio::task::JoinHandle<()>,
    health_addr: std::net::SocketAddr,
}

impl Cluster {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();

        let master_engine = Arc::new(
            CommandEngine::open(dir.path().join("master.log"))
                .await
                .unwrap(),
        );
        let master = ReplicationMaster::start(
            MasterReplicationConfig {
                listen_address: "127.0.0.1:0".parse().unwrap(),
                idle_poll_ms: 20,
            },
            Arc::clone(master_engine.log()),
        )
        .await
        .unwrap();

        let client_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client_listener.local_addr().unwrap();
        let client_server = tokio::spawn(server::serve_clients(
            client_listener,
            Arc::clone(&master_engine),
        ));

        let replica_engine = Arc::new(
            CommandEngine::open(dir.path().join("replica.log"))
                .await
                .unwrap(),
        );
        let _replica = ReplicaNode::start(
            ReplicaConfig {
                master_address: master.local_addr(),
                reconnect_delay_ms: 50,
                connect_timeout_ms: 1000,
                auto_reconnect: true,
            },
            Arc::clone(&replica_engine),
        );

        let health_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let health_addr = health_listener.local_addr().unwrap();
        tokio::spawn(server::serve_health(health_listener));

        Self {
            _dir: dir,
            master_engine,
            replica_engine,
            client_addr,
            client_server,
            health_addr,
        }
    }

    async fn client_send(&self, command: &str) -> String {
        let stream = TcpStream::connect(self.client_addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        write_half
            .write_all(format!("{}\n", command).as_bytes())
            .await
            .unwrap();
        lines.next_line().await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn test_client_writes_reach_the_replica() {
    let cluster = Cluster::start().await;

    assert_eq!(cluster.client_send("CREATE jobs").await, "OK: queue created");
    for i in 0..5 {
        assert_eq!(
            cluster.client_send(&format!("PUBLISH jobs task{}", i)).await,
            "OK: message published"
        );
    }
    assert_eq!(cluster.client_send("CONSUME jobs").await, "MESSAGE: task0");

    wait_until(|| converged(&cluster.master_engine, &cluster.replica_engine)).await;

    // Same queue set, same per-queue order, and the replica's own log is
    // untouched by replicated traffic.
    assert_eq!(
        cluster.replica_engine.store().messages("jobs").await.unwrap(),
        vec!["task1", "task2", "task3", "task4"]
    );
    assert_eq!(cluster.replica_engine.log().count(), 0);
}

#[tokio::test]
async fn test_sentinel_elects_replica_after_master_death() {
    let cluster = Cluster::start().await;

    cluster.client_send("PUBLISH jobs work").await;
    wait_until(|| converged(&cluster.master_engine, &cluster.replica_engine)).await;

    let sentinel = Sentinel::new(SentinelConfig {
        master_address: cluster.client_addr,
        probe_interval_secs: 1,
        connect_timeout_ms: 500,
        candidates: vec![CandidateNode {
            address: cluster.health_addr,
            priority: 1,
        }],
    });

    assert_eq!(sentinel.cycle().await, ProbeOutcome::MasterAlive);

    // Kill the master's client port; the next cycle must elect the replica.
    cluster.client_server.abort();
    wait_until(|| async {
        TcpStream::connect(cluster.client_addr).await.is_err()
    })
    .await;

    match sentinel.cycle().await {
        ProbeOutcome::Promote(candidate) => {
            assert_eq!(candidate.address, cluster.health_addr);
        }
        other => panic!("expected promotion decision, got {:?}", other),
    }
}
