//! Consensus set: the node's view of the chain.
//!
//! # Data Flow
//! ```text
//! ConsensusSet::new
//!     → create <data_dir>/consensus
//!     → persist.rs (open consensus.db, integrity gate against the genesis block)
//!     → ready; queries go through store.rs read transactions
//!
//! close()
//!     → group stops → hook closes the ChainDb
//! ```
//!
//! # Design Decisions
//! - Queries hold a WorkGuard so close() waits for them

pub mod block;
pub mod persist;
pub mod store;

use std::path::Path;
use std::sync::Arc;

use crate::config::ConsensusConfig;
use crate::gateway::Gateway;
use crate::lifecycle::{Module, ShutdownError, ShutdownGroup};

pub use block::{genesis_block, Block, BlockId};
pub use persist::{load_db, LoadError, LoadOutcome};
pub use store::{ChainDb, StoreError, Tx, DATABASE_DIRNAME};

/// Errors from consensus queries.
pub type ConsensusError = StoreError;

/// The chain-state module.
pub struct ConsensusSet {
    db: Arc<ChainDb>,
    genesis_id: BlockId,
    group: ShutdownGroup,
}

impl ConsensusSet {
    /// Open the consensus set in `dir`, failing if the stored chain does not
    /// pass the integrity gate.
    pub fn new(
        gateway: &Gateway,
        dir: &Path,
        config: &ConsensusConfig,
    ) -> Result<Self, LoadError> {
        std::fs::create_dir_all(dir).map_err(|source| StoreError::Create {
            path: dir.to_path_buf(),
            source,
        })?;

        let genesis = genesis_block(config.network);
        let (db, outcome) = load_db(
            &dir.join(DATABASE_DIRNAME),
            &genesis,
            config.genesis_check,
        )?;
        let db = Arc::new(db);

        let group = ShutdownGroup::new();
        let closing = Arc::clone(&db);
        group.on_stop(move || closing.close());

        tracing::info!(
            network = ?config.network,
            genesis = %genesis.id(),
            outcome = ?outcome,
            gateway = %gateway.local_addr(),
            "Consensus set loaded"
        );

        Ok(Self {
            db,
            genesis_id: genesis.id(),
            group,
        })
    }

    pub fn genesis_id(&self) -> BlockId {
        self.genesis_id
    }

    /// Height of the current tip.
    pub fn height(&self) -> Result<u64, ConsensusError> {
        let _guard = self.group.acquire().map_err(|_| StoreError::Closed)?;
        self.db.view(|tx| Ok(tx.height()?.unwrap_or(0)))
    }

    /// Identifier of the current tip.
    pub fn current_block(&self) -> Result<BlockId, ConsensusError> {
        let _guard = self.group.acquire().map_err(|_| StoreError::Closed)?;
        let tip = self.db.view(|tx| tx.tip())?;
        Ok(tip.unwrap_or(self.genesis_id))
    }
}

impl Module for ConsensusSet {
    fn name(&self) -> &'static str {
        "consensus"
    }

    fn close(&self) -> Result<(), ShutdownError> {
        self.group.stop()
    }
}
