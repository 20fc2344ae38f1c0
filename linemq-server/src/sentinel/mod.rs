//! Failover watchdog.
//!
//! Probes the master on a fixed interval and, when it looks dead, ranks the
//! configured candidate replicas by liveness and static priority to pick a
//! promotion target. The output is a decision, not an enactment: nothing
//! here promotes the candidate, rewires routing, or guards against a
//! resurrected master. Enactment is explicitly out of scope.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// A known replica: address of its health endpoint plus a static priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateNode {
    pub address: SocketAddr,
    pub priority: u32,
}

impl CandidateNode {
    /// Liveness check: PING over the candidate's health port, expect PONG
    /// within the timeout.
    pub async fn is_alive(&self, timeout: Duration) -> bool {
        let probe = async {
            let mut stream = TcpStream::connect(self.address).await.ok()?;
            stream.write_all(b"PING\n").await.ok()?;
            stream.flush().await.ok()?;
            let mut reader = BufReader::new(stream);
            let mut reply = String::new();
            reader.read_line(&mut reply).await.ok()?;
            Some(reply.trim().eq_ignore_ascii_case("PONG"))
        };
        matches!(tokio::time::timeout(timeout, probe).await, Ok(Some(true)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// Master's client port; a successful bounded-timeout connect counts as
    /// alive.
    pub master_address: SocketAddr,

    /// Seconds between probe cycles.
    pub probe_interval_secs: u64,

    /// Bounded timeout for every connect attempt, in milliseconds.
    pub connect_timeout_ms: u64,

    /// Candidate replicas eligible for promotion.
    pub candidates: Vec<CandidateNode>,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            master_address: "127.0.0.1:9999".parse().unwrap(),
            probe_interval_secs: 5,
            connect_timeout_ms: 2000,
            candidates: Vec::new(),
        }
    }
}

/// Outcome of one probe cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    MasterAlive,
    /// Master unreachable; this is the elected promotion candidate.
    Promote(CandidateNode),
    /// Master unreachable and no candidate responded.
    NoCandidate,
}

pub struct Sentinel {
    config: SentinelConfig,
}

impl Sentinel {
    pub fn new(config: SentinelConfig) -> Self {
        Self { config }
    }

    /// Run probe cycles forever on the configured interval.
    pub async fn run(&self) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.probe_interval_secs));
        loop {
            interval.tick().await;
            match self.cycle().await {
                ProbeOutcome::MasterAlive => debug!("master alive"),
                ProbeOutcome::Promote(candidate) => {
                    // Decision only; promotion is not enacted here.
                    warn!(
                        candidate = %candidate.address,
                        priority = candidate.priority,
                        "master down, elected promotion candidate"
                    );
                }
                ProbeOutcome::NoCandidate => {
                    warn!("master down, no candidate available");
                }
            }
        }
    }

    /// One probe cycle: check the master, elect on failure.
    pub async fn cycle(&self) -> ProbeOutcome {
        if self.master_alive().await {
            return ProbeOutcome::MasterAlive;
        }
        info!(master = %self.config.master_address, "master unreachable, starting election");
        match self.elect().await {
            Some(candidate) => ProbeOutcome::Promote(candidate),
            None => ProbeOutcome::NoCandidate,
        }
    }

    async fn master_alive(&self) -> bool {
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        tokio::time::timeout(timeout, TcpStream::connect(self.config.master_address))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    /// Probe every candidate and pick the best responder.
    pub async fn elect(&self) -> Option<CandidateNode> {
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let mut alive = Vec::new();
        for candidate in &self.config.candidates {
            if candidate.is_alive(timeout).await {
                alive.push(candidate);
            } else {
                debug!(candidate = %candidate.address, "candidate not responding");
            }
        }
        best_candidate(alive).cloned()
    }
}

/// Highest static priority wins; ties break deterministically on the
/// lexicographically smallest address.
fn best_candidate<'a, I>(alive: I) -> Option<&'a CandidateNode>
where
    I: IntoIterator<Item = &'a CandidateNode>,
{
    alive.into_iter().reduce(|best, c| {
        if c.priority > best.priority
            || (c.priority == best.priority
                && c.address.to_string() < best.address.to_string())
        {
            c
        } else {
            best
        }
    })
}
