//! Unconfirmed transaction pool.
//!
//! # Responsibilities
//! - Hold transactions waiting to be mined, keyed by id
//! - Reject duplicates and enforce the size limit
//! - Purge everything on close
//!
//! # Design Decisions
//! - In-memory only; `<data_dir>/transactionpool` is created so on-disk
//!   persistence can live there without a layout change
//! - Every accept holds a WorkGuard, so close() waits for in-flight accepts

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::config::TransactionPoolConfig;
use crate::consensus::ConsensusSet;
use crate::gateway::Gateway;
use crate::lifecycle::{Module, ShutdownError, ShutdownGroup};
use crate::observability::metrics;

/// BLAKE3 hash of a transaction's payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub [u8; 32]);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({self})")
    }
}

/// An unconfirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Opaque encoded transaction.
    pub payload: Vec<u8>,
    /// Offered fee, used for ordering by miners.
    pub fee: u64,
}

impl Transaction {
    pub fn id(&self) -> TransactionId {
        TransactionId(*blake3::hash(&self.payload).as_bytes())
    }
}

/// Reasons a transaction is not accepted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("transaction pool is closed")]
    Closed,

    #[error("transaction {0} is already in the pool")]
    Duplicate(TransactionId),

    #[error("transaction pool is full ({0} transactions)")]
    Full(usize),

    #[error("transaction has an empty payload")]
    Empty,
}

/// The transaction-pool module.
pub struct TransactionPool {
    transactions: Arc<DashMap<TransactionId, Transaction>>,
    /// Number of accepted transactions; only changed under an entry lock or by the purge.
    count: Arc<AtomicUsize>,
    max_transactions: usize,
    group: ShutdownGroup,
}

impl TransactionPool {
    pub fn new(
        consensus: &ConsensusSet,
        gateway: &Gateway,
        dir: &Path,
        config: &TransactionPoolConfig,
    ) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;

        let transactions: Arc<DashMap<TransactionId, Transaction>> = Arc::new(DashMap::new());
        let group = ShutdownGroup::new();
        let count = Arc::new(AtomicUsize::new(0));
        let purging = Arc::clone(&transactions);
        let resetting = Arc::clone(&count);
        group.on_stop(move || {
            let purged = purging.len();
            purging.clear();
            resetting.store(0, Ordering::Release);
            metrics::record_pool_size(0);
            tracing::debug!(purged, "Transaction pool purged");
        });

        tracing::info!(
            max_transactions = config.max_transactions,
            genesis = %consensus.genesis_id(),
            gateway = %gateway.local_addr(),
            "Transaction pool ready"
        );

        Ok(Self {
            transactions,
            count,
            max_transactions: config.max_transactions,
            group,
        })
    }

    /// Add a transaction to the pool.
    pub fn accept_transaction(&self, tx: Transaction) -> Result<TransactionId, PoolError> {
        let _guard = self.group.acquire().map_err(|_| PoolError::Closed)?;

        if tx.payload.is_empty() {
            return Err(PoolError::Empty);
        }
        let id = tx.id();

        // The limit is checked while the entry's shard is locked, so
        // concurrent accepts can never push the pool past it.
        let size = match self.transactions.entry(id) {
            Entry::Occupied(_) => return Err(PoolError::Duplicate(id)),
            Entry::Vacant(slot) => {
                let reserved = self
                    .count
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < self.max_transactions).then_some(n + 1)
                    })
                    .map_err(|_| PoolError::Full(self.max_transactions))?;
                slot.insert(tx);
                reserved + 1
            }
        };
        metrics::record_pool_size(size);
        tracing::trace!(tx = %id, "Transaction accepted");
        Ok(id)
    }

    /// Snapshot of the pool's transactions.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.transactions.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

impl Module for TransactionPool {
    fn name(&self) -> &'static str {
        "transaction pool"
    }

    fn close(&self) -> Result<(), ShutdownError> {
        self.group.stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainNetwork, ConsensusConfig, GatewayConfig};

    async fn pool(dir: &Path, max_transactions: usize) -> TransactionPool {
        let gw_config = GatewayConfig {
            rpc_addr: "127.0.0.1:0".to_string(),
            ..GatewayConfig::default()
        };
        let gateway = Gateway::new(&gw_config, &dir.join("gateway")).await.unwrap();
        let cs_config = ConsensusConfig {
            network: ChainNetwork::Dev,
            ..ConsensusConfig::default()
        };
        let consensus = ConsensusSet::new(&gateway, &dir.join("consensus"), &cs_config).unwrap();
        TransactionPool::new(
            &consensus,
            &gateway,
            &dir.join("transactionpool"),
            &TransactionPoolConfig { max_transactions },
        )
        .unwrap()
    }

    fn tx(payload: &[u8]) -> Transaction {
        Transaction {
            payload: payload.to_vec(),
            fee: 10,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn accepts_and_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(dir.path(), 10).await;
        assert!(dir.path().join("transactionpool").is_dir());

        let id = pool.accept_transaction(tx(b"a")).unwrap();
        assert_eq!(id, tx(b"a").id());
        assert_eq!(pool.accept_transaction(tx(b"a")), Err(PoolError::Duplicate(id)));
        assert_eq!(pool.accept_transaction(tx(b"")), Err(PoolError::Empty));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enforces_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(dir.path(), 2).await;
        pool.accept_transaction(tx(b"a")).unwrap();
        pool.accept_transaction(tx(b"b")).unwrap();
        assert_eq!(pool.accept_transaction(tx(b"c")), Err(PoolError::Full(2)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_accepts_respect_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(dir.path(), 5).await;

        let accepted: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..32u8)
                .map(|i| {
                    let pool = &pool;
                    s.spawn(move || pool.accept_transaction(tx(&[i])).is_ok())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap() as usize).sum()
        });

        assert_eq!(accepted, 5);
        assert_eq!(pool.len(), 5);
        assert_eq!(pool.accept_transaction(tx(b"late")), Err(PoolError::Full(5)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn full_pool_still_reports_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(dir.path(), 1).await;
        let id = pool.accept_transaction(tx(b"a")).unwrap();
        assert_eq!(pool.accept_transaction(tx(b"a")), Err(PoolError::Duplicate(id)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn close_purges_and_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(dir.path(), 10).await;
        pool.accept_transaction(tx(b"a")).unwrap();

        pool.close().unwrap();
        assert!(pool.is_empty());
        assert_eq!(pool.accept_transaction(tx(b"b")), Err(PoolError::Closed));
    }
}
