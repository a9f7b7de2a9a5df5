//! Integrity gate run when the consensus set opens its database.
//!
//! # Responsibilities
//! - Initialize a fresh database with the genesis block
//! - Refuse a database marked inconsistent by a previous run
//! - Refuse a database built for a different genesis block
//!
//! # Design Decisions
//! - The whole check runs inside one read/write transaction, so a fresh
//!   database is either fully initialized (one write batch) or untouched
//! - No retries here; every failure goes straight back to startup

use std::path::Path;
use thiserror::Error;

use crate::config::GenesisCheck;
use crate::consensus::block::{Block, BlockId};
use crate::consensus::store::{ChainDb, StoreError, Tx};

/// Reasons the consensus database cannot be used.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open consensus storage: {0}")]
    StorageOpenFailed(#[from] StoreError),

    #[error("consensus state is corrupt: {0}")]
    CorruptState(String),

    #[error("genesis block mismatch: expected {expected}, found {found}")]
    GenesisMismatch { expected: BlockId, found: BlockId },
}

/// What the gate did to an openable database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The database was empty and now holds the genesis block.
    Initialized,
    /// The database was already initialized and passed every check.
    Loaded,
}

/// Open the database at `path` and run the integrity gate against `genesis`.
pub fn load_db(
    path: &Path,
    genesis: &Block,
    check: GenesisCheck,
) -> Result<(ChainDb, LoadOutcome), LoadError> {
    let db = ChainDb::open(path)?;
    let outcome = db.update(|tx| check_state(tx, genesis, check))?;

    tracing::debug!(path = %path.display(), outcome = ?outcome, "Consensus database passed integrity gate");
    Ok((db, outcome))
}

fn check_state(
    tx: &mut Tx<'_>,
    genesis: &Block,
    check: GenesisCheck,
) -> Result<LoadOutcome, LoadError> {
    if !tx.is_initialized()? {
        tx.push_block(genesis)?;
        tx.set_initialized();
        return Ok(LoadOutcome::Initialized);
    }

    if tx.inconsistency()? {
        return Err(LoadError::CorruptState(
            "inconsistency detected during a previous run".to_string(),
        ));
    }

    let found = tx.genesis_id()?.ok_or_else(|| {
        LoadError::CorruptState("initialized database has no genesis block".to_string())
    })?;

    let expected = genesis.id();
    if found != expected {
        match check {
            GenesisCheck::Enforce => return Err(LoadError::GenesisMismatch { expected, found }),
            GenesisCheck::Advisory => {
                tracing::warn!(
                    expected = %expected,
                    found = %found,
                    "Genesis block mismatch ignored (advisory genesis check)"
                );
            }
        }
    }

    Ok(LoadOutcome::Loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainNetwork;
    use crate::consensus::block::genesis_block;
    use crate::consensus::store::DATABASE_DIRNAME;

    fn dev() -> Block {
        genesis_block(ChainNetwork::Dev)
    }

    #[test]
    fn fresh_database_is_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DATABASE_DIRNAME);

        let (db, outcome) = load_db(&path, &dev(), GenesisCheck::Enforce).unwrap();
        assert_eq!(outcome, LoadOutcome::Initialized);
        db.view(|tx| {
            assert!(tx.is_initialized()?);
            assert_eq!(tx.genesis_id()?, Some(dev().id()));
            assert_eq!(tx.height()?, Some(0));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn valid_database_loads_without_reinitializing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DATABASE_DIRNAME);

        let (db, _) = load_db(&path, &dev(), GenesisCheck::Enforce).unwrap();
        // Extend the chain so a re-initialization would be visible.
        let mut next = dev();
        next.parent_id = dev().id();
        next.nonce = 7;
        db.update(|tx| tx.push_block(&next)).unwrap();
        drop(db);

        let (db, outcome) = load_db(&path, &dev(), GenesisCheck::Enforce).unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded);
        assert_eq!(db.view(|tx| tx.height()).unwrap(), Some(1));
    }

    #[test]
    fn inconsistency_marker_is_corrupt_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DATABASE_DIRNAME);

        let (db, _) = load_db(&path, &dev(), GenesisCheck::Enforce).unwrap();
        db.update(|tx| {
            tx.mark_inconsistent();
            Ok::<_, StoreError>(())
        })
        .unwrap();
        drop(db);

        let err = load_db(&path, &dev(), GenesisCheck::Enforce).unwrap_err();
        assert!(matches!(err, LoadError::CorruptState(_)));
        // Even the advisory mode refuses corrupt state.
        let err = load_db(&path, &dev(), GenesisCheck::Advisory).unwrap_err();
        assert!(matches!(err, LoadError::CorruptState(_)));
    }

    #[test]
    fn missing_genesis_on_initialized_database_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DATABASE_DIRNAME);
        let db = ChainDb::open(&path).unwrap();
        db.update(|tx| {
            tx.set_initialized();
            Ok::<_, StoreError>(())
        })
        .unwrap();
        drop(db);

        let err = load_db(&path, &dev(), GenesisCheck::Enforce).unwrap_err();
        assert!(matches!(err, LoadError::CorruptState(_)));
    }

    #[test]
    fn other_network_genesis_is_a_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DATABASE_DIRNAME);
        load_db(&path, &genesis_block(ChainNetwork::Test), GenesisCheck::Enforce).unwrap();

        match load_db(&path, &dev(), GenesisCheck::Enforce) {
            Err(LoadError::GenesisMismatch { expected, found }) => {
                assert_eq!(expected, dev().id());
                assert_eq!(found, genesis_block(ChainNetwork::Test).id());
            }
            other => panic!("expected genesis mismatch, got {:?}", other.map(|(_, o)| o)),
        }
    }

    #[test]
    fn advisory_check_tolerates_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DATABASE_DIRNAME);
        load_db(&path, &genesis_block(ChainNetwork::Test), GenesisCheck::Enforce).unwrap();

        let (db, outcome) = load_db(&path, &dev(), GenesisCheck::Advisory).unwrap();
        assert_eq!(outcome, LoadOutcome::Loaded);
        // The stored chain is left as it was.
        assert_eq!(
            db.view(|tx| tx.genesis_id()).unwrap(),
            Some(genesis_block(ChainNetwork::Test).id())
        );
    }

    #[test]
    fn unreadable_storage_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DATABASE_DIRNAME);
        std::fs::write(&path, b"not a database").unwrap();

        let err = load_db(&path, &dev(), GenesisCheck::Enforce).unwrap_err();
        assert!(matches!(err, LoadError::StorageOpenFailed(StoreError::Open { .. })));
    }
}
