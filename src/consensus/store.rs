//! RocksDB-backed store for the consensus set.
//!
//! # Responsibilities
//! - Hold the persisted chain metadata (initialized flag, inconsistency
//!   marker, genesis id, tip height) and the block path
//! - Apply read/write transactions atomically
//!
//! # Data Layout
//! ```text
//! initialized        → [0|1]
//! inconsistency      → [0|1]
//! genesis_id         → 32-byte block id
//! height             → u64 (bincode)
//! path/<height BE>   → 32-byte block id
//! block/<id>         → Block (bincode)
//! ```
//!
//! # Design Decisions
//! - A transaction reads through to the database and stages its writes;
//!   the staged writes land in one `WriteBatch` only if the closure succeeds
//! - Writers are serialized by the store lock, so a read-check-write
//!   sequence inside one transaction cannot interleave with another
//! - The store is owned by exactly one consensus set

use rocksdb::{Options, WriteBatch, DB};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

use crate::consensus::block::{Block, BlockId};

/// Directory name of the consensus database.
pub const DATABASE_DIRNAME: &str = "consensus.db";

const KEY_INITIALIZED: &[u8] = b"initialized";
const KEY_INCONSISTENCY: &[u8] = b"inconsistency";
const KEY_GENESIS_ID: &[u8] = b"genesis_id";
const KEY_HEIGHT: &[u8] = b"height";
const PREFIX_PATH: &[u8] = b"path/";
const PREFIX_BLOCK: &[u8] = b"block/";

/// Errors from the store itself.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rocksdb::Error,
    },

    #[error("failed to read from store: {0}")]
    Read(#[source] rocksdb::Error),

    #[error("failed to write to store: {0}")]
    Write(#[source] rocksdb::Error),

    #[error("malformed value under {key}: {reason}")]
    Malformed { key: String, reason: String },

    #[error("store is closed")]
    Closed,
}

impl StoreError {
    fn malformed(key: &[u8], reason: impl ToString) -> Self {
        StoreError::Malformed {
            key: String::from_utf8_lossy(key).into_owned(),
            reason: reason.to_string(),
        }
    }
}

fn path_key(height: u64) -> Vec<u8> {
    [PREFIX_PATH, &height.to_be_bytes()[..]].concat()
}

fn block_key(id: &BlockId) -> Vec<u8> {
    [PREFIX_BLOCK, &id.as_bytes()[..]].concat()
}

/// A transaction over the store.
///
/// Reads see the transaction's own staged writes first.
pub struct Tx<'a> {
    db: &'a DB,
    staged: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl<'a> Tx<'a> {
    fn new(db: &'a DB) -> Self {
        Self {
            db,
            staged: BTreeMap::new(),
        }
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(value) = self.staged.get(key) {
            return Ok(Some(value.clone()));
        }
        self.db.get(key).map_err(StoreError::Read)
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.staged.insert(key, value);
    }

    fn get_flag(&self, key: &[u8]) -> Result<bool, StoreError> {
        match self.get(key)?.as_deref() {
            None | Some([0]) => Ok(false),
            Some([1]) => Ok(true),
            Some(other) => Err(StoreError::malformed(key, format!("flag of {} bytes", other.len()))),
        }
    }

    fn get_id(&self, key: &[u8]) -> Result<Option<BlockId>, StoreError> {
        self.get(key)?
            .map(|bytes| {
                <[u8; 32]>::try_from(bytes.as_slice())
                    .map(BlockId)
                    .map_err(|_| StoreError::malformed(key, format!("id of {} bytes", bytes.len())))
            })
            .transpose()
    }

    pub fn is_initialized(&self) -> Result<bool, StoreError> {
        self.get_flag(KEY_INITIALIZED)
    }

    pub fn set_initialized(&mut self) {
        self.put(KEY_INITIALIZED.to_vec(), vec![1]);
    }

    pub fn inconsistency(&self) -> Result<bool, StoreError> {
        self.get_flag(KEY_INCONSISTENCY)
    }

    /// Flag the database so the next open refuses it.
    pub fn mark_inconsistent(&mut self) {
        self.put(KEY_INCONSISTENCY.to_vec(), vec![1]);
    }

    pub fn genesis_id(&self) -> Result<Option<BlockId>, StoreError> {
        self.get_id(KEY_GENESIS_ID)
    }

    /// Height of the tip, `None` for an empty chain.
    pub fn height(&self) -> Result<Option<u64>, StoreError> {
        self.get(KEY_HEIGHT)?
            .map(|bytes| {
                bincode::deserialize::<u64>(&bytes).map_err(|e| StoreError::malformed(KEY_HEIGHT, e))
            })
            .transpose()
    }

    pub fn block_id_at(&self, height: u64) -> Result<Option<BlockId>, StoreError> {
        self.get_id(&path_key(height))
    }

    pub fn block(&self, id: &BlockId) -> Result<Option<Block>, StoreError> {
        let key = block_key(id);
        self.get(&key)?
            .map(|bytes| bincode::deserialize(&bytes).map_err(|e| StoreError::malformed(&key, e)))
            .transpose()
    }

    /// Id of the tip block.
    pub fn tip(&self) -> Result<Option<BlockId>, StoreError> {
        match self.height()? {
            Some(height) => self.block_id_at(height),
            None => Ok(None),
        }
    }

    /// Append a block to the tip. The first block becomes the genesis block.
    pub fn push_block(&mut self, block: &Block) -> Result<u64, StoreError> {
        let height = self.height()?.map_or(0, |h| h + 1);
        let id = block.id();
        let encoded = bincode::serialize(block).map_err(|e| StoreError::malformed(&block_key(&id), e))?;
        let encoded_height =
            bincode::serialize(&height).map_err(|e| StoreError::malformed(KEY_HEIGHT, e))?;

        self.put(block_key(&id), encoded);
        self.put(path_key(height), id.as_bytes().to_vec());
        self.put(KEY_HEIGHT.to_vec(), encoded_height);
        if height == 0 {
            self.put(KEY_GENESIS_ID.to_vec(), id.as_bytes().to_vec());
        }
        Ok(height)
    }

    fn commit(self) -> Result<(), StoreError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::default();
        for (key, value) in &self.staged {
            batch.put(key, value);
        }
        self.db.write(batch).map_err(StoreError::Write)
    }
}

/// Handle to an open consensus database.
#[derive(Debug)]
pub struct ChainDb {
    /// `None` once closed.
    db: RwLock<Option<DB>>,
}

impl ChainDb {
    /// Open the database at `path`, creating it (and its parent directory)
    /// if it does not exist yet.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::Create {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Opened consensus database");

        Ok(Self {
            db: RwLock::new(Some(db)),
        })
    }

    /// Run a read-only transaction.
    pub fn view<T>(&self, f: impl FnOnce(&Tx<'_>) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let guard = self.db.read().unwrap_or_else(PoisonError::into_inner);
        let db = guard.as_ref().ok_or(StoreError::Closed)?;
        f(&Tx::new(db))
    }

    /// Run a read/write transaction.
    ///
    /// If `f` returns `Ok`, its staged writes are committed in one batch; if
    /// it returns `Err`, nothing is written.
    pub fn update<T, E>(&self, f: impl FnOnce(&mut Tx<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let guard = self.db.write().unwrap_or_else(PoisonError::into_inner);
        let db = guard.as_ref().ok_or(StoreError::Closed)?;

        let mut tx = Tx::new(db);
        let out = f(&mut tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Close the store; later transactions fail with [`StoreError::Closed`].
    pub fn close(&self) {
        self.db.write().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn is_closed(&self) -> bool {
        self.db.read().unwrap_or_else(PoisonError::into_inner).is_none()
    }
}
