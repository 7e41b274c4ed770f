//! RandomX seed schedule.
//!
//! Every block's PoW hash is keyed by a 32-byte seed. Under the rotating
//! schedule the seed is the hash of an epoch-aligned ancestor block, lagged
//! so miners see the new key well before it activates; under the deployed
//! fixed-genesis schedule every height keys to the same well-known digest.

use consensus_core::{sha256d, BlockHash, BlockIndexEntry, SeedRotation};
use std::sync::Arc;

/// Blocks per seed epoch.
pub const EPOCH_LENGTH: u64 = 2048;
/// Activation lag after an epoch boundary.
pub const EPOCH_LAG: u64 = 64;

/// A RandomX epoch key. Either a block hash or the genesis digest.
pub type SeedHash = BlockHash;

/// The pre-first-epoch seed: SHA256d of the ASCII tag.
pub fn genesis_seed_hash() -> SeedHash {
    BlockHash::new(sha256d(b"Botcoin Genesis Seed"))
}

/// Maps a block height to the height of its seed block.
pub fn seed_height(height: u64, rotation: SeedRotation) -> u64 {
    match rotation {
        SeedRotation::FixedGenesis => 0,
        SeedRotation::Rotating => {
            if height < EPOCH_LENGTH + EPOCH_LAG {
                0
            } else {
                (height - EPOCH_LAG) / EPOCH_LENGTH * EPOCH_LENGTH
            }
        }
    }
}

/// Resolves the seed hash for the block built on top of `tip`.
///
/// Walks `tip`'s ancestors to the seed block. An inconsistent index falls
/// back to the genesis digest; a wrong seed fails PoW later, so this is
/// never a fatal condition at this layer.
pub fn resolve_seed_hash(
    tip: Option<&Arc<BlockIndexEntry>>,
    rotation: SeedRotation,
) -> SeedHash {
    let Some(tip) = tip else {
        return genesis_seed_hash();
    };
    let seed_height = seed_height(tip.height + 1, rotation);
    if seed_height == 0 {
        return genesis_seed_hash();
    }
    match tip.ancestor(seed_height) {
        Some(node) => node.block_hash,
        None => genesis_seed_hash(),
    }
}
