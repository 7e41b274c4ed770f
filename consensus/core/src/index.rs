//! In-memory face of the chain index.
//!
//! The chainstate manager proper is an external collaborator; the PoW layer
//! only needs to walk backwards over header metadata. Nodes are immutable
//! once linked, so sharing them across the miner and validation threads is
//! just `Arc` cloning.

use crate::hash::BlockHash;
use std::sync::Arc;

/// One entry in the block index: the header metadata difficulty and mining
/// need, linked to its parent.
#[derive(Clone, Debug)]
pub struct BlockIndexEntry {
    pub height: u64,
    /// Block timestamp as claimed by the header.
    pub time: i64,
    /// Compact difficulty target the block was mined at.
    pub bits: u32,
    pub block_hash: BlockHash,
    pub prev: Option<Arc<BlockIndexEntry>>,
}

impl BlockIndexEntry {
    /// Walks back to the ancestor at `height`, if this entry descends from it.
    pub fn ancestor(self: &Arc<Self>, height: u64) -> Option<Arc<BlockIndexEntry>> {
        if height > self.height {
            return None;
        }
        let mut node = Arc::clone(self);
        while node.height > height {
            node = Arc::clone(node.prev.as_ref()?);
        }
        (node.height == height).then_some(node)
    }
}

/// Read access to the active chain, implemented by the host node.
pub trait ChainIndex: Send + Sync {
    fn tip(&self) -> Option<Arc<BlockIndexEntry>>;
}
