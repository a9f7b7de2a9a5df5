//! Peer connections: version handshake and the per-peer read loop.

use serde::Serialize;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::lifecycle::{StopSignal, WorkGuard};

/// Name sent in the handshake line.
pub const GATEWAY_AGENT: &str = "p2pool-node";

/// Version sent in the handshake line.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Longest line accepted from a peer.
const MAX_LINE: u64 = 1024;

/// Public view of a connected peer.
#[derive(Debug, Clone, Serialize)]
pub struct PeerInfo {
    pub address: String,
    pub version: String,
    pub inbound: bool,
}

/// Errors that end a handshake.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("i/o error during handshake: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer closed the connection during handshake")]
    Closed,

    #[error("unexpected handshake line {0:?}")]
    BadAgent(String),
}

/// Exchange `<agent>/<version>` lines; returns the peer's version.
///
/// Both sides write first, so the exchange is symmetric for inbound and
/// outbound connections.
pub async fn handshake(stream: TcpStream) -> Result<(BufReader<TcpStream>, String), HandshakeError> {
    let mut reader = BufReader::new(stream);
    reader
        .get_mut()
        .write_all(format!("{GATEWAY_AGENT}/{PROTOCOL_VERSION}\n").as_bytes())
        .await?;

    let mut line = String::new();
    let n = (&mut reader).take(MAX_LINE).read_line(&mut line).await?;
    if n == 0 {
        return Err(HandshakeError::Closed);
    }

    let line = line.trim_end();
    match line.split_once('/') {
        Some((agent, version)) if agent == GATEWAY_AGENT && !version.is_empty() => {
            Ok((reader, version.to_string()))
        }
        _ => Err(HandshakeError::BadAgent(line.to_string())),
    }
}

/// Read from a peer until it hangs up or the gateway stops.
///
/// Holds `guard` for the life of the connection.
pub async fn run_peer(
    mut reader: BufReader<TcpStream>,
    remote: SocketAddr,
    stop: StopSignal,
    guard: WorkGuard,
) {
    let mut line = String::new();
    loop {
        line.clear();
        let mut limited = (&mut reader).take(MAX_LINE);
        tokio::select! {
            _ = stop.wait() => {
                tracing::trace!(peer = %remote, "Closing peer connection on shutdown");
                break;
            }
            read = limited.read_line(&mut line) => match read {
                Ok(0) => {
                    tracing::debug!(peer = %remote, "Peer disconnected");
                    break;
                }
                Ok(_) => tracing::trace!(peer = %remote, message = line.trim_end(), "Peer message"),
                Err(e) => {
                    tracing::debug!(peer = %remote, error = %e, "Peer connection error");
                    break;
                }
            }
        }
    }
    drop(guard);
}
