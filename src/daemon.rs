//! The production module set.

use async_trait::async_trait;
use std::sync::Arc;

use crate::api::{ApiServer, AppState};
use crate::config::NodeConfig;
use crate::consensus::ConsensusSet;
use crate::gateway::Gateway;
use crate::lifecycle::{BoxError, ModuleFactory};
use crate::tpool::TransactionPool;

/// Builds the gateway, consensus set, transaction pool and API server from
/// the node configuration, each in its own subdirectory of `data_dir`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DaemonModules;

#[async_trait]
impl ModuleFactory for DaemonModules {
    type Network = Gateway;
    type Chain = ConsensusSet;
    type Pool = TransactionPool;
    type Server = ApiServer;

    async fn network(&self, config: &NodeConfig) -> Result<Arc<Gateway>, BoxError> {
        let gateway = Gateway::new(&config.gateway, &config.gateway_dir()).await?;
        Ok(Arc::new(gateway))
    }

    async fn chain(
        &self,
        config: &NodeConfig,
        network: Arc<Gateway>,
    ) -> Result<Arc<ConsensusSet>, BoxError> {
        let consensus = ConsensusSet::new(&network, &config.consensus_dir(), &config.consensus)?;
        Ok(Arc::new(consensus))
    }

    async fn pool(
        &self,
        config: &NodeConfig,
        chain: Arc<ConsensusSet>,
        network: Arc<Gateway>,
    ) -> Result<Arc<TransactionPool>, BoxError> {
        let pool = TransactionPool::new(&chain, &network, &config.tpool_dir(), &config.tpool)?;
        Ok(Arc::new(pool))
    }

    async fn server(
        &self,
        config: &NodeConfig,
        chain: Arc<ConsensusSet>,
        network: Arc<Gateway>,
        pool: Arc<TransactionPool>,
    ) -> Result<Arc<ApiServer>, BoxError> {
        let state = AppState {
            consensus: chain,
            gateway: network,
            tpool: pool,
            fee: config.pool.fee,
        };
        let server = ApiServer::new(&config.api, state).await?;
        Ok(Arc::new(server))
    }
}
