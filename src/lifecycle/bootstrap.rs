//! Best-effort network bootstrap.
//!
//! Once the gateway is listening, a handful of well-known peers are dialed so
//! the node can join the network. Dials are detached tasks: their outcome is
//! logged and otherwise dropped, and a failed dial never fails startup. The
//! gateway's own peer maintenance is responsible for retrying and filling up.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;

use crate::lifecycle::startup::BoxError;
use crate::observability::metrics;

/// Number of bootstrap peers dialed at startup.
pub const BOOTSTRAP_DIALS: usize = 3;

/// Known-good peers used only for first contact with the network.
pub const BOOTSTRAP_PEERS: &[&str] = &[
    "101.200.214.115:9981",
    "109.172.42.157:9981",
    "109.206.33.225:9981",
    "142.4.209.72:9981",
    "148.251.221.163:9981",
    "162.210.249.170:9981",
    "162.222.23.93:9981",
    "106.15.188.209:9981",
    "139.162.81.190:9981",
    "144.76.136.112:9981",
    "23.239.14.98:9971",
    "87.98.216.46:9981",
];

/// Outbound side of the network module.
#[async_trait]
pub trait PeerDialer: Send + Sync + 'static {
    /// Open a connection to `address` (`host:port`).
    async fn connect(&self, address: &str) -> Result<(), BoxError>;
}

/// Pick `count` distinct peers uniformly at random.
///
/// Returns every peer (in random order) when fewer than `count` are known.
pub fn sample_peers<R>(peers: &[String], count: usize, rng: &mut R) -> Vec<String>
where
    R: Rng + ?Sized,
{
    let amount = count.min(peers.len());
    rand::seq::index::sample(rng, peers.len(), amount)
        .into_iter()
        .map(|i| peers[i].clone())
        .collect()
}

/// Dials a random subset of the bootstrap peer list.
#[derive(Debug, Clone)]
pub struct BootstrapJoiner {
    peers: Vec<String>,
    dials: usize,
}

impl BootstrapJoiner {
    /// Joiner over an explicit peer list.
    pub fn new(peers: Vec<String>) -> Self {
        Self {
            peers,
            dials: BOOTSTRAP_DIALS,
        }
    }

    /// Joiner over the built-in peer list, or the configured override.
    pub fn from_config(peers: Option<&[String]>) -> Self {
        match peers {
            Some(peers) => Self::new(peers.to_vec()),
            None => Self::new(BOOTSTRAP_PEERS.iter().map(|p| p.to_string()).collect()),
        }
    }

    /// The peer list being sampled.
    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Spawn detached dials to a random sample of peers.
    ///
    /// Never blocks and never fails; returns how many dials were scheduled.
    /// Must be called from within a Tokio runtime.
    pub fn join<D>(&self, dialer: Arc<D>) -> usize
    where
        D: PeerDialer + ?Sized,
    {
        let selected = sample_peers(&self.peers, self.dials, &mut rand::thread_rng());
        for address in &selected {
            let dialer = Arc::clone(&dialer);
            let address = address.clone();
            tokio::spawn(async move {
                match dialer.connect(&address).await {
                    Ok(()) => tracing::info!(peer = %address, "Connected to bootstrap peer"),
                    Err(e) => tracing::debug!(peer = %address, error = %e, "Bootstrap dial failed"),
                }
            });
        }

        metrics::record_bootstrap_dials(selected.len());
        tracing::debug!(
            scheduled = selected.len(),
            known = self.peers.len(),
            "Bootstrap dials scheduled"
        );
        selected.len()
    }
}
