//! Core consensus types shared across the Botcoin proof-of-work stack.
//!
//! This crate defines the block header wire format, the 32-byte hash type,
//! the in-memory chain index nodes that difficulty and mining walk over, and
//! the consensus parameter record. It deliberately stops short of full block
//! and transaction serialization; those live with the node proper.

pub mod hash;
pub mod hashing;
pub mod header;
pub mod index;
pub mod merkle;
pub mod params;

pub use hash::BlockHash;
pub use hashing::{sha256, sha256d};
pub use header::{Block, BlockHeader, Transaction, HEADER_SIZE, NONCE_OFFSET};
pub use index::{BlockIndexEntry, ChainIndex};
pub use merkle::{block_merkle_root, MerkleTree};
pub use params::{Params, SeedRotation};
