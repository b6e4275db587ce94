//! Neutrino peer selection
//!
//! Pings candidate block-filter peers and picks a low-latency subset for the
//! node to connect to on its next start.

use super::config::ControllerConfig;
use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;

/// Mainnet peers tried first
pub const PRIMARY_PEER_POOL: &[&str] = &[
    "btcd-mainnet.lightning.computer",
    "node.eldamar.icu",
    "noad.sathoarder.com",
    "btcd.lnolymp.us",
    "neutrino.shock.network",
];

/// Mainnet peers tried when the primary pool is too slow
pub const SECONDARY_PEER_POOL: &[&str] = &[
    "mainnet1-btcd.zaphq.io",
    "mainnet2-btcd.zaphq.io",
    "mainnet3-btcd.zaphq.io",
    "mainnet4-btcd.zaphq.io",
    "btcd1.lnolymp.us",
];

pub const TESTNET_PEER_POOL: &[&str] = &[
    "testnet.lightning.computer",
    "btcd-testnet.lightning.computer",
    "testnet.blixtwallet.com",
];

const MAINNET_P2P_PORT: u16 = 8333;
const TESTNET_P2P_PORT: u16 = 18333;

/// Measures round-trip latency to a host
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self, host: &str, timeout: Duration) -> io::Result<Duration>;
}

/// Pinger timing a TCP connect to the host's p2p port
#[derive(Debug, Clone, Copy)]
pub struct TcpPinger {
    port: u16,
}

impl TcpPinger {
    pub fn for_network(testnet: bool) -> Self {
        Self {
            port: if testnet { TESTNET_P2P_PORT } else { MAINNET_P2P_PORT },
        }
    }
}

impl Default for TcpPinger {
    fn default() -> Self {
        Self::for_network(false)
    }
}

#[async_trait]
impl Pinger for TcpPinger {
    async fn ping(&self, host: &str, timeout: Duration) -> io::Result<Duration> {
        let target = if host.contains(':') {
            host.to_string()
        } else {
            format!("{}:{}", host, self.port)
        };

        let started = Instant::now();
        match tokio::time::timeout(timeout, TcpStream::connect(&target)).await {
            Ok(Ok(_stream)) => Ok(started.elapsed()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {} timed out", target),
            )),
        }
    }
}

/// Outcome of pinging one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PingResult {
    Millis(u64),
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerCandidate {
    pub address: String,
    pub last_ping: PingResult,
}

impl PeerCandidate {
    fn latency_ms(&self) -> Option<u64> {
        match self.last_ping {
            PingResult::Millis(ms) => Some(ms),
            PingResult::TimedOut => None,
        }
    }
}

/// Peers chosen for the next start
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSelection {
    /// Best first; empty means keep the defaults
    pub peers: Vec<String>,
    /// Connect only to `peers` instead of adding them to the defaults
    pub restrict_to_selected: bool,
}

impl PeerSelection {
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

pub struct PeerOptimizer {
    pinger: Arc<dyn Pinger>,
    config: ControllerConfig,
}

impl PeerOptimizer {
    pub fn new(pinger: Arc<dyn Pinger>, config: ControllerConfig) -> Self {
        Self { pinger, config }
    }

    /// Select up to `target_count` fast peers for the given network
    pub async fn optimize(&self, testnet: bool, target_count: usize) -> PeerSelection {
        let pools: &[&[&str]] = if testnet {
            &[TESTNET_PEER_POOL]
        } else {
            &[PRIMARY_PEER_POOL, SECONDARY_PEER_POOL]
        };

        let mut selected: Vec<PeerCandidate> = Vec::new();
        for pool in pools {
            if selected.len() >= target_count {
                break;
            }
            let candidates = self.ping_all(pool).await;
            self.fill(&mut selected, candidates, target_count);
        }

        let peers: Vec<String> = selected.into_iter().map(|c| c.address).collect();
        log::info!("Selected {} neutrino peer(s): {:?}", peers.len(), peers);

        PeerSelection {
            restrict_to_selected: peers.len() > 2,
            peers,
        }
    }

    async fn ping_all(&self, pool: &[&str]) -> Vec<PeerCandidate> {
        let timeout = self.config.ping_timeout();
        let pings = pool.iter().map(|host| async move {
            let last_ping = match self.pinger.ping(host, timeout).await {
                Ok(latency) => PingResult::Millis(latency.as_millis() as u64),
                Err(e) => {
                    log::debug!("Ping to {} failed: {}", host, e);
                    PingResult::TimedOut
                }
            };
            PeerCandidate {
                address: host.to_string(),
                last_ping,
            }
        });
        join_all(pings).await
    }

    /// Take candidates bucket by bucket, fastest first within a bucket
    fn fill(&self, selected: &mut Vec<PeerCandidate>, mut candidates: Vec<PeerCandidate>, target_count: usize) {
        candidates.retain(|c| c.latency_ms().is_some());
        candidates.sort_by_key(|c| c.latency_ms());

        let buckets = [
            self.config.optimal_latency_ms,
            self.config.lax_latency_ms,
            self.config.threshold_latency_ms,
        ];
        let mut floor = 0;
        for ceiling in buckets {
            for candidate in &candidates {
                if selected.len() >= target_count {
                    return;
                }
                let Some(ms) = candidate.latency_ms() else { continue };
                let in_bucket = ms >= floor && ms < ceiling;
                if in_bucket && !selected.iter().any(|s| s.address == candidate.address) {
                    selected.push(candidate.clone());
                }
            }
            floor = ceiling;
        }
    }
}
