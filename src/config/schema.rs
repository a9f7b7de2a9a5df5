//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the node.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Subdirectory of `data_dir` owned by the gateway.
pub const GATEWAY_DIR: &str = "gateway";
/// Subdirectory of `data_dir` owned by the consensus set.
pub const CONSENSUS_DIR: &str = "consensus";
/// Subdirectory of `data_dir` owned by the transaction pool.
pub const TRANSACTION_POOL_DIR: &str = "transactionpool";

/// Root configuration for the node.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory holding every module's persisted state.
    pub data_dir: PathBuf,

    /// Upper bound on a graceful shutdown before the process is forced down.
    pub shutdown_timeout_secs: u64,

    /// Peer-to-peer gateway settings.
    pub gateway: GatewayConfig,

    /// Chain state settings.
    pub consensus: ConsensusConfig,

    /// Transaction pool settings.
    pub tpool: TransactionPoolConfig,

    /// HTTP API settings.
    pub api: ApiConfig,

    /// Mining pool settings.
    pub pool: PoolConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("p2pooldata"),
            shutdown_timeout_secs: 30,
            gateway: GatewayConfig::default(),
            consensus: ConsensusConfig::default(),
            tpool: TransactionPoolConfig::default(),
            api: ApiConfig::default(),
            pool: PoolConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn gateway_dir(&self) -> PathBuf {
        self.data_dir.join(GATEWAY_DIR)
    }

    pub fn consensus_dir(&self) -> PathBuf {
        self.data_dir.join(CONSENSUS_DIR)
    }

    pub fn tpool_dir(&self) -> PathBuf {
        self.data_dir.join(TRANSACTION_POOL_DIR)
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the gateway listens on for peers (`host:port`, or `:port` for every interface).
    pub rpc_addr: String,

    /// Replacement for the built-in bootstrap peer list.
    /// An empty list disables bootstrapping.
    pub bootstrap_peers: Option<Vec<String>>,

    /// Outbound dial timeout in seconds.
    pub dial_timeout_secs: u64,

    /// Maximum number of connected peers (inbound + outbound).
    pub max_peers: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rpc_addr: ":9981".to_string(),
            bootstrap_peers: None,
            dial_timeout_secs: 20,
            max_peers: 128,
        }
    }
}

/// Which chain the node follows. Each has its own genesis block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChainNetwork {
    #[default]
    Main,
    Test,
    Dev,
}

/// How a stored genesis block that differs from ours is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GenesisCheck {
    /// Refuse to start.
    #[default]
    Enforce,
    /// Log the mismatch and continue. Development use only.
    Advisory,
}

/// Consensus set configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ConsensusConfig {
    pub network: ChainNetwork,
    pub genesis_check: GenesisCheck,
}

/// Transaction pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransactionPoolConfig {
    /// Maximum number of unconfirmed transactions held.
    pub max_transactions: usize,
}

impl Default for TransactionPoolConfig {
    fn default() -> Self {
        Self {
            max_transactions: 10_000,
        }
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Bind address (e.g., "localhost:9980").
    pub bind_address: String,

    /// Required substring of the `User-Agent` header.
    pub agent: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "localhost:9980".to_string(),
            agent: "SIA-Agent".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Mining pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Address miners reach the pool on.
    pub bind_address: String,

    /// Pool fee in units of 0.01%.
    pub fee: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            bind_address: ":9985".to_string(),
            fee: 200,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9990".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: NodeConfig = toml::from_str("").unwrap();
        assert_eq!(config.gateway.rpc_addr, ":9981");
        assert_eq!(config.pool.bind_address, ":9985");
        assert!(config.gateway.bootstrap_peers.is_none());
        assert_eq!(config.pool.fee, 200);
        assert_eq!(config.consensus.genesis_check, GenesisCheck::Enforce);
        assert_eq!(config.consensus_dir(), PathBuf::from("p2pooldata/consensus"));
    }

    #[test]
    fn sections_override_defaults() {
        let config: NodeConfig = toml::from_str(
            r#"
            data_dir = "/var/lib/p2pool"

            [gateway]
            bootstrap_peers = []
            max_peers = 8

            [consensus]
            network = "dev"
            genesis_check = "advisory"
            "#,
        )
        .unwrap();

        assert_eq!(config.gateway.bootstrap_peers, Some(vec![]));
        assert_eq!(config.gateway.max_peers, 8);
        assert_eq!(config.gateway.dial_timeout_secs, 20);
        assert_eq!(config.consensus.network, ChainNetwork::Dev);
        assert_eq!(config.consensus.genesis_check, GenesisCheck::Advisory);
        assert_eq!(config.tpool_dir(), PathBuf::from("/var/lib/p2pool/transactionpool"));
    }
}
