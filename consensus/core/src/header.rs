//! Block header wire format and the minimal block carrier used by mining.
//!
//! The proof-of-work layer only ever consumes the serialized 80-byte header:
//! version (4) || prev_hash (32) || merkle_root (32) || time (4) || bits (4)
//! || nonce (4), all integer fields little-endian. Full block and transaction
//! serialization is the node's business, not ours; `Transaction` here is an
//! opaque byte carrier that knows its own txid.

use crate::hash::BlockHash;
use crate::hashing::sha256d;
use serde::{Deserialize, Serialize};

/// Serialized size of a block header in bytes.
pub const HEADER_SIZE: usize = 80;

/// Byte offset of the nonce field within a serialized header.
pub const NONCE_OFFSET: usize = 76;

/// Block header as hashed by the proof-of-work function.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_hash: BlockHash,
    pub merkle_root: BlockHash,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Serializes the header into its 80-byte wire form.
    pub fn serialize(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.version.to_le_bytes());
        buf[4..36].copy_from_slice(self.prev_hash.as_bytes());
        buf[36..68].copy_from_slice(self.merkle_root.as_bytes());
        buf[68..72].copy_from_slice(&self.time.to_le_bytes());
        buf[72..76].copy_from_slice(&self.bits.to_le_bytes());
        buf[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        buf
    }

    /// The header's identity hash (SHA256d over the wire form).
    ///
    /// Not the proof-of-work hash; PoW uses RandomX over the same bytes.
    pub fn block_hash(&self) -> BlockHash {
        BlockHash::new(sha256d(&self.serialize()))
    }
}

/// Opaque transaction carrier.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub data: Vec<u8>,
}

impl Transaction {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn txid(&self) -> BlockHash {
        BlockHash::new(sha256d(&self.data))
    }
}

/// A candidate or mined block: header plus transactions, coinbase first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txdata: Vec<Transaction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_serializes_to_80_bytes() {
        let header = BlockHeader {
            version: 1,
            prev_hash: BlockHash::new([2u8; 32]),
            merkle_root: BlockHash::new([3u8; 32]),
            time: 1738195200,
            bits: 0x207fffff,
            nonce: 42,
        };
        let bytes = header.serialize();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..4], &1i32.to_le_bytes());
        assert_eq!(&bytes[4..36], &[2u8; 32]);
        assert_eq!(&bytes[36..68], &[3u8; 32]);
        assert_eq!(&bytes[72..76], &0x207fffffu32.to_le_bytes());
        assert_eq!(&bytes[NONCE_OFFSET..NONCE_OFFSET + 4], &42u32.to_le_bytes());
    }

    #[test]
    fn test_nonce_only_changes_nonce_bytes() {
        let mut header = BlockHeader::default();
        let before = header.serialize();
        header.nonce = 0xdeadbeef;
        let after = header.serialize();
        assert_eq!(before[..NONCE_OFFSET], after[..NONCE_OFFSET]);
        assert_ne!(before[NONCE_OFFSET..], after[NONCE_OFFSET..]);
    }

    #[test]
    fn test_block_hash_is_deterministic() {
        let header = BlockHeader::default();
        assert_eq!(header.block_hash(), header.block_hash());
        let mut other = header;
        other.nonce = 1;
        assert_ne!(header.block_hash(), other.block_hash());
    }

    #[test]
    fn test_txid_changes_with_payload() {
        let a = Transaction::new(vec![1, 2, 3]);
        let b = Transaction::new(vec![1, 2, 4]);
        assert_ne!(a.txid(), b.txid());
    }
}
