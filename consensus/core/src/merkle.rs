use crate::hash::BlockHash;
use crate::hashing::sha256d;
use crate::header::Block;

/// Merkle tree over transaction ids, Bitcoin style: SHA256d over the
/// concatenated pair, an odd node pairs with itself.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    /// Nodes at each level of the tree (leaves at level 0)
    levels: Vec<Vec<BlockHash>>,
}

impl MerkleTree {
    /// Creates a new Merkle tree from a list of transaction hashes
    pub fn from_hashes(hashes: Vec<BlockHash>) -> Self {
        if hashes.is_empty() {
            return Self { levels: vec![] };
        }

        let mut levels = vec![hashes];
        while levels.last().map_or(0, |l| l.len()) > 1 {
            let current = levels.last().cloned().unwrap_or_default();
            let mut next = Vec::with_capacity((current.len() + 1) / 2);
            for chunk in current.chunks(2) {
                let left = chunk[0];
                let right = if chunk.len() == 2 { chunk[1] } else { left };
                next.push(Self::hash_pair(&left, &right));
            }
            levels.push(next);
        }

        Self { levels }
    }

    /// Returns the Merkle root hash
    pub fn root(&self) -> BlockHash {
        match self.levels.last() {
            Some(level) if !level.is_empty() => level[0],
            _ => BlockHash::default(),
        }
    }

    fn hash_pair(left: &BlockHash, right: &BlockHash) -> BlockHash {
        let mut data = [0u8; 64];
        data[..32].copy_from_slice(left.as_bytes());
        data[32..].copy_from_slice(right.as_bytes());
        BlockHash::new(sha256d(&data))
    }
}

/// Computes the merkle root over a block's transaction ids.
pub fn block_merkle_root(block: &Block) -> BlockHash {
    let txids = block.txdata.iter().map(|tx| tx.txid()).collect();
    MerkleTree::from_hashes(txids).root()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Transaction;

    #[test]
    fn test_empty_tree_has_zero_root() {
        assert!(MerkleTree::from_hashes(vec![]).root().is_zero());
    }

    #[test]
    fn test_single_leaf_is_root() {
        let leaf = BlockHash::new([7u8; 32]);
        assert_eq!(MerkleTree::from_hashes(vec![leaf]).root(), leaf);
    }

    #[test]
    fn test_odd_leaf_count_duplicates_last() {
        let leaves: Vec<BlockHash> = (0u8..3).map(|i| BlockHash::new([i; 32])).collect();
        let mut padded = leaves.clone();
        padded.push(leaves[2]);
        assert_eq!(
            MerkleTree::from_hashes(leaves).root(),
            MerkleTree::from_hashes(padded).root()
        );
    }

    #[test]
    fn test_block_merkle_root_tracks_txids() {
        let mut block = Block::default();
        block.txdata.push(Transaction::new(b"coinbase".to_vec()));
        let root1 = block_merkle_root(&block);
        assert_eq!(root1, block.txdata[0].txid());

        block.txdata.push(Transaction::new(b"spend".to_vec()));
        assert_ne!(block_merkle_root(&block), root1);
    }
}
