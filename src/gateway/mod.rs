//! Peer-to-peer gateway.
//!
//! # Responsibilities
//! - Listen for inbound peers and dial outbound ones
//! - Keep the set of connected peers and the persisted node list
//! - Stop every connection and persist the node list on close
//!
//! # Data Flow
//! ```text
//! Gateway::new
//!     → load <dir>/nodes.json → bind rpc_addr → spawn accept loop
//!
//! accept loop / connect(addr)
//!     → peer.rs handshake → peers map → peer.rs read loop (holds a WorkGuard)
//!
//! close()
//!     → group stops → accept loop and peer loops exit → nodes.json saved
//! ```
//!
//! # Design Decisions
//! - Every spawned task holds a WorkGuard, so close() returns only after
//!   all of them have exited
//! - Dials race the stop signal; shutdown never waits out a dial timeout

pub mod nodes;
pub mod peer;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};

use crate::config::{listen_addr, GatewayConfig};
use crate::lifecycle::{BoxError, Module, PeerDialer, ShutdownError, ShutdownGroup};
use crate::observability::metrics;

pub use nodes::{NodeList, NODES_FILENAME};
pub use peer::{HandshakeError, PeerInfo, GATEWAY_AGENT, PROTOCOL_VERSION};

/// Errors from gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to prepare gateway directory {path}: {source}")]
    Dir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load node list: {0}")]
    NodeList(#[source] std::io::Error),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("gateway is stopped")]
    Stopped,

    #[error("refusing to dial own address {0}")]
    SelfDial(String),

    #[error("already connected to {0}")]
    AlreadyConnected(String),

    #[error("peer limit of {0} reached")]
    PeerLimit(usize),

    #[error("could not resolve {0}")]
    Resolve(String),

    #[error("failed to dial {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("dial to {0} timed out")]
    Timeout(String),

    #[error("handshake with {address} failed: {source}")]
    Handshake {
        address: String,
        #[source]
        source: HandshakeError,
    },
}

struct Shared {
    local_addr: SocketAddr,
    group: ShutdownGroup,
    /// Connected peers with the id of the connection that owns the entry.
    peers: DashMap<String, (u64, PeerInfo)>,
    /// Entries in `peers`; reserved under the entry lock before inserting.
    peer_count: AtomicUsize,
    next_conn: AtomicU64,
    nodes: NodeList,
    dial_timeout: Duration,
    max_peers: usize,
}

impl Shared {
    fn is_self(&self, remote: SocketAddr) -> bool {
        if remote == self.local_addr {
            return true;
        }
        remote.port() == self.local_addr.port()
            && self.local_addr.ip().is_unspecified()
            && remote.ip().is_loopback()
    }

    fn peer_count(&self) -> usize {
        self.peer_count.load(Ordering::Acquire)
    }

    /// Record a handshaken peer and spawn its read loop.
    ///
    /// The duplicate and limit checks run while the entry's shard is locked,
    /// so two connections racing for the same key cannot both be kept.
    fn add_peer(
        self: &Arc<Self>,
        key: String,
        remote: SocketAddr,
        reader: tokio::io::BufReader<TcpStream>,
        info: PeerInfo,
    ) -> Result<(), GatewayError> {
        let guard = self.group.acquire().map_err(|_| GatewayError::Stopped)?;
        let conn = self.next_conn.fetch_add(1, Ordering::Relaxed);

        match self.peers.entry(key.clone()) {
            Entry::Occupied(_) => return Err(GatewayError::AlreadyConnected(key)),
            Entry::Vacant(slot) => {
                self.peer_count
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < self.max_peers).then_some(n + 1)
                    })
                    .map_err(|_| GatewayError::PeerLimit(self.max_peers))?;
                slot.insert((conn, info));
            }
        }
        metrics::record_gateway_peers(self.peer_count());

        let shared = Arc::clone(self);
        let stop = self.group.stop_signal();
        tokio::spawn(async move {
            peer::run_peer(reader, remote, stop, guard).await;
            if shared.peers.remove_if(&key, |_, (owner, _)| *owner == conn).is_some() {
                shared.peer_count.fetch_sub(1, Ordering::AcqRel);
            }
            metrics::record_gateway_peers(shared.peer_count());
        });
        Ok(())
    }
}

/// The network module.
pub struct Gateway {
    shared: Arc<Shared>,
}

impl Gateway {
    /// Load the node list from `dir`, bind the listener and start accepting.
    pub async fn new(config: &GatewayConfig, dir: &Path) -> Result<Self, GatewayError> {
        std::fs::create_dir_all(dir).map_err(|source| GatewayError::Dir {
            path: dir.display().to_string(),
            source,
        })?;
        let nodes = NodeList::load(&dir.join(NODES_FILENAME)).map_err(GatewayError::NodeList)?;

        let listener = TcpListener::bind(listen_addr(&config.rpc_addr))
            .await
            .map_err(|source| GatewayError::Bind {
                address: config.rpc_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| GatewayError::Bind {
            address: config.rpc_addr.clone(),
            source,
        })?;

        let shared = Arc::new(Shared {
            local_addr,
            group: ShutdownGroup::new(),
            peers: DashMap::new(),
            peer_count: AtomicUsize::new(0),
            next_conn: AtomicU64::new(0),
            nodes,
            dial_timeout: Duration::from_secs(config.dial_timeout_secs),
            max_peers: config.max_peers,
        });

        let persisting = Arc::clone(&shared);
        shared.group.on_stop(move || match persisting.nodes.save() {
            Ok(()) => tracing::debug!(nodes = persisting.nodes.len(), "Saved node list"),
            Err(e) => tracing::error!(error = %e, "Failed to save node list"),
        });

        let guard = shared
            .group
            .acquire()
            .map_err(|_| GatewayError::Stopped)?;
        let accepting = Arc::clone(&shared);
        tokio::spawn(async move {
            accept_loop(accepting, listener).await;
            drop(guard);
        });

        tracing::info!(
            address = %local_addr,
            known_nodes = shared.nodes.len(),
            "Gateway listening"
        );

        Ok(Self { shared })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Currently connected peers.
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.shared.peers.iter().map(|e| e.value().1.clone()).collect()
    }

    /// Addresses in the persisted node list.
    pub fn nodes(&self) -> Vec<String> {
        self.shared.nodes.snapshot()
    }

    /// Dial `address`, handshake, and keep the connection.
    pub async fn connect(&self, address: &str) -> Result<(), GatewayError> {
        let shared = &self.shared;
        let _guard = shared.group.acquire().map_err(|_| GatewayError::Stopped)?;

        // Early outs before dialing; add_peer makes the binding decision.
        if shared.peers.contains_key(address) {
            return Err(GatewayError::AlreadyConnected(address.to_string()));
        }
        if shared.peer_count() >= shared.max_peers {
            return Err(GatewayError::PeerLimit(shared.max_peers));
        }

        let remote = resolve(address).await?;
        if shared.is_self(remote) {
            return Err(GatewayError::SelfDial(address.to_string()));
        }

        let stop = shared.group.stop_signal();
        let dial = async {
            let stream = TcpStream::connect(remote)
                .await
                .map_err(|source| GatewayError::Dial {
                    address: address.to_string(),
                    source,
                })?;
            peer::handshake(stream)
                .await
                .map_err(|source| GatewayError::Handshake {
                    address: address.to_string(),
                    source,
                })
        };

        let result = tokio::select! {
            _ = stop.wait() => {
                metrics::record_dial("cancelled");
                return Err(GatewayError::Stopped);
            }
            result = tokio::time::timeout(shared.dial_timeout, dial) => result,
        };
        let (reader, version) = match result {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => {
                metrics::record_dial("failed");
                return Err(e);
            }
            Err(_) => {
                metrics::record_dial("timeout");
                return Err(GatewayError::Timeout(address.to_string()));
            }
        };

        let info = PeerInfo {
            address: address.to_string(),
            version,
            inbound: false,
        };
        shared.add_peer(address.to_string(), remote, reader, info)?;
        shared.nodes.insert(address);
        metrics::record_dial("connected");

        tracing::debug!(peer = %address, "Connected to peer");
        Ok(())
    }
}

impl Module for Gateway {
    fn name(&self) -> &'static str {
        "gateway"
    }

    fn close(&self) -> Result<(), ShutdownError> {
        self.shared.group.stop()
    }
}

#[async_trait]
impl PeerDialer for Gateway {
    async fn connect(&self, address: &str) -> Result<(), BoxError> {
        Gateway::connect(self, address).await.map_err(BoxError::from)
    }
}

async fn resolve(address: &str) -> Result<SocketAddr, GatewayError> {
    if let Ok(addr) = address.parse() {
        return Ok(addr);
    }
    tokio::net::lookup_host(address)
        .await
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| GatewayError::Resolve(address.to_string()))
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    let stop = shared.group.stop_signal();
    loop {
        let (stream, remote) = tokio::select! {
            _ = stop.wait() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept peer connection");
                    continue;
                }
            },
        };

        if shared.peer_count() >= shared.max_peers {
            tracing::debug!(peer = %remote, "Peer limit reached, dropping inbound connection");
            continue;
        }

        // The handshake runs off the accept loop so a slow peer cannot stall it.
        let Ok(guard) = shared.group.acquire() else {
            break;
        };
        let handshaking = Arc::clone(&shared);
        tokio::spawn(async move {
            let stop = handshaking.group.stop_signal();
            let handshake = tokio::time::timeout(handshaking.dial_timeout, peer::handshake(stream));
            let result = tokio::select! {
                _ = stop.wait() => return,
                result = handshake => result,
            };
            match result {
                Ok(Ok((reader, version))) => {
                    let info = PeerInfo {
                        address: remote.to_string(),
                        version,
                        inbound: true,
                    };
                    if let Err(e) = handshaking.add_peer(remote.to_string(), remote, reader, info) {
                        tracing::debug!(peer = %remote, error = %e, "Dropped inbound peer");
                    }
                }
                Ok(Err(e)) => tracing::debug!(peer = %remote, error = %e, "Inbound handshake failed"),
                Err(_) => tracing::debug!(peer = %remote, "Inbound handshake timed out"),
            }
            drop(guard);
        });
    }
    tracing::debug!("Gateway accept loop stopped");
}
