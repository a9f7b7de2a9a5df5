//! Persisted list of known peer addresses.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::persist;

/// File name of the node list inside the gateway directory.
pub const NODES_FILENAME: &str = "nodes.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct NodesFile {
    nodes: BTreeSet<String>,
}

/// Addresses the gateway has successfully connected to.
#[derive(Debug)]
pub struct NodeList {
    path: PathBuf,
    nodes: Mutex<BTreeSet<String>>,
}

impl NodeList {
    /// Load the list from `path`; a missing file is an empty list.
    pub fn load(path: &Path) -> io::Result<Self> {
        let file: NodesFile = persist::load_json(path)?.unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            nodes: Mutex::new(file.nodes),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` if the address was new.
    pub fn insert(&self, address: &str) -> bool {
        self.lock().insert(address.to_string())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sorted copy of the addresses.
    pub fn snapshot(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    pub fn save(&self) -> io::Result<()> {
        let file = NodesFile {
            nodes: self.lock().clone(),
        };
        persist::save_json_atomic(&self.path, &file)
    }
}
