//! p2pool-node daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!   signals ──▶ Shutdown ──────────────────────────────────────────┐
//!                                                                   │ hooks, newest first
//!   pool listener     (miners: /fee, /version)      ◀── close ── 5th
//!   Node::start                                                     ▼
//!     ├─ gateway      (peers, nodes.json)           ◀── close ── 4th
//!     ├─ consensus    (consensus.db, genesis gate)  ◀── close ── 3rd
//!     ├─ tpool        (unconfirmed transactions)    ◀── close ── 2nd
//!     ├─ api          (HTTP, User-Agent gate)       ◀── close ── 1st
//!     ├─ bootstrap    (3 random well-known peers, fire and forget)
//!     └─ api.serve()  until shutdown
//! ```

use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use p2pool_node::config::{load_or_default, validate_config, ConfigError, NodeConfig};
use p2pool_node::lifecycle::signals::spawn_signal_handler;
use p2pool_node::observability::{logging, metrics};
use p2pool_node::pool::PoolServer;
use p2pool_node::{DaemonModules, Node};

#[derive(Debug, Parser)]
#[command(name = "p2pool-node", version, about = "Peer-to-peer mining pool node")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log at debug level regardless of configuration.
    #[arg(short, long)]
    debug: bool,

    /// Address miners reach the pool on.
    #[arg(short, long)]
    bind: Option<String>,

    /// Address the gateway listens on for peers.
    #[arg(long)]
    rpc_addr: Option<String>,

    /// Address the HTTP API listens on.
    #[arg(long)]
    api_addr: Option<String>,

    /// Directory holding the node's persisted state.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Pool fee in units of 0.01%.
    #[arg(short, long)]
    fee: Option<u32>,
}

impl Cli {
    /// Apply command-line overrides on top of the file configuration.
    fn apply(&self, config: &mut NodeConfig) {
        if let Some(addr) = &self.bind {
            config.pool.bind_address = addr.clone();
        }
        if let Some(addr) = &self.rpc_addr {
            config.gateway.rpc_addr = addr.clone();
        }
        if let Some(addr) = &self.api_addr {
            config.api.bind_address = addr.clone();
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(fee) = self.fee {
            config.pool.fee = fee;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let mut config = load_or_default(cli.config.as_deref())?;
    cli.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_tracing(&config.observability.log_level, cli.debug);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "p2pool-node starting");
    tracing::info!(
        data_dir = %config.data_dir.display(),
        pool_addr = %config.pool.bind_address,
        rpc_addr = %config.gateway.rpc_addr,
        api_addr = %config.api.bind_address,
        network = ?config.consensus.network,
        fee = config.pool.fee,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Miners get a bind failure before any module is built.
    let pool = Arc::new(PoolServer::bind(&config.pool).await?);

    let timeout = Duration::from_secs(config.shutdown_timeout_secs);
    let node = Node::new(DaemonModules, config);
    let shutdown = node.shutdown_handle();
    pool.close_on(&shutdown);
    spawn_signal_handler(shutdown, timeout);

    let serving = Arc::clone(&pool);
    let pool_task = tokio::spawn(async move {
        if let Err(e) = serving.serve().await {
            tracing::error!(error = %e, "Pool listener exited with error");
        }
    });

    let result = node.start().await;
    // start() always ends by running the shutdown, which closes the pool listener.
    if let Err(e) = pool_task.await {
        tracing::error!(error = %e, "Pool listener task failed");
    }
    if let Err(e) = result {
        tracing::error!(error = %e, "Node exited with error");
        return Err(e.into());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_flags_override_pool_settings() {
        let cli = Cli::try_parse_from(["p2pool-node", "-b", ":9999", "-f", "150", "-d"]).unwrap();
        let mut config = NodeConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.pool.bind_address, ":9999");
        assert_eq!(config.pool.fee, 150);
        assert!(cli.debug);
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn defaults_listen_like_a_stock_node() {
        let cli = Cli::try_parse_from(["p2pool-node"]).unwrap();
        let mut config = NodeConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.pool.bind_address, ":9985");
        assert_eq!(config.api.bind_address, "localhost:9980");
        assert_eq!(config.gateway.rpc_addr, ":9981");
    }
}
