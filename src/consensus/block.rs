//! Block identity and the per-network genesis blocks.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::config::ChainNetwork;

/// 32-byte BLAKE3 identifier of a block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockId(pub [u8; 32]);

impl BlockId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.to_hex())
    }
}

impl Serialize for BlockId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlockId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BlockId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A block header as stored by the consensus set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub parent_id: BlockId,
    pub timestamp: u64,
    pub nonce: u64,
    /// Free-form tag; for genesis blocks it names the network.
    pub arbitrary: String,
}

impl Block {
    /// Identifier over the block's canonical byte encoding.
    pub fn id(&self) -> BlockId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.parent_id.as_bytes());
        hasher.update(&self.timestamp.to_le_bytes());
        hasher.update(&self.nonce.to_le_bytes());
        hasher.update(&(self.arbitrary.len() as u64).to_le_bytes());
        hasher.update(self.arbitrary.as_bytes());
        BlockId(*hasher.finalize().as_bytes())
    }
}

/// The first block of the given network's chain.
pub fn genesis_block(network: ChainNetwork) -> Block {
    let (timestamp, arbitrary) = match network {
        ChainNetwork::Main => (1_433_600_000, "p2pool-node genesis: main"),
        ChainNetwork::Test => (1_424_139_000, "p2pool-node genesis: test"),
        ChainNetwork::Dev => (1_424_139_000, "p2pool-node genesis: dev"),
    };
    Block {
        parent_id: BlockId::default(),
        timestamp,
        nonce: 0,
        arbitrary: arbitrary.to_string(),
    }
}
