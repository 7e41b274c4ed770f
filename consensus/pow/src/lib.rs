//! Proof-of-work rules for Botcoin.
//!
//! Ties together the compact-target arithmetic, the RandomX seed schedule,
//! and the per-block difficulty algorithm, and exposes the header checks the
//! validation layer and the internal miner share.

pub mod compact;
pub mod difficulty;
pub mod seed;

pub use compact::{
    compact_to_target, decode_compact, derive_target, target_to_compact, CompactError,
};
pub use difficulty::{classic_next_work_required, next_work_required, permitted_transition};
pub use seed::{genesis_seed_hash, resolve_seed_hash, seed_height, SeedHash};

use consensus_core::{BlockHash, BlockHeader, BlockIndexEntry, Params};
use primitive_types::U256;
use randomx_engine::{EngineError, RandomXEngine};
use std::sync::Arc;

/// Computes the RandomX proof-of-work hash of a header under `seed`.
///
/// Runs on the engine's serialized validation path; the miner uses its own
/// per-thread VMs instead.
pub fn pow_hash(
    engine: &RandomXEngine,
    header: &BlockHeader,
    seed: &SeedHash,
) -> Result<BlockHash, EngineError> {
    let digest = engine.hash_validate(&header.serialize(), seed.as_bytes())?;
    Ok(BlockHash::new(digest))
}

/// Checks a proof-of-work hash against a claimed compact target.
///
/// All invalid-target conditions fold into `false`; consensus treats the
/// block as invalid either way.
pub fn check_pow(hash: &BlockHash, bits: u32, params: &Params) -> bool {
    // Deterministic shortcut for fuzz builds: no hashing, no arithmetic.
    if cfg!(fuzzing) {
        return hash.as_bytes()[31] & 0x80 == 0;
    }
    let Ok(target) = derive_target(bits, &params.pow_limit) else {
        return false;
    };
    U256::from_little_endian(hash.as_bytes()) <= target
}

/// Full header PoW validation: resolve the seed for the block following
/// `prev`, hash the serialized header, and compare against its claimed bits.
pub fn validate_block_pow(
    engine: &RandomXEngine,
    header: &BlockHeader,
    prev: Option<&Arc<BlockIndexEntry>>,
    params: &Params,
) -> bool {
    let seed = resolve_seed_hash(prev, params.seed_rotation);
    match pow_hash(engine, header, &seed) {
        Ok(hash) => check_pow(&hash, header.bits, params),
        Err(e) => {
            log::warn!("pow hash failed during validation: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_from_target(target: U256) -> BlockHash {
        let mut bytes = [0u8; 32];
        target.to_little_endian(&mut bytes);
        BlockHash::new(bytes)
    }

    #[test]
    fn test_check_pow_boundary() {
        let params = Params::mainnet();
        let target = derive_target(0x1f00ffff, &params.pow_limit).unwrap();
        assert!(check_pow(&hash_from_target(target), 0x1f00ffff, &params));
        assert!(!check_pow(
            &hash_from_target(target + U256::one()),
            0x1f00ffff,
            &params
        ));
    }

    #[test]
    fn test_check_pow_rejects_invalid_encodings() {
        let params = Params::mainnet();
        let one = hash_from_target(U256::one());
        // Sign bit set (decodes to zero).
        assert!(!check_pow(&one, 0x0080_0000, &params));
        // Overflowing exponent.
        assert!(!check_pow(&one, !0x0080_0000u32, &params));
        // Zero mantissa.
        assert!(!check_pow(&one, 0, &params));
        // Easier than the pow limit.
        let doubled = target_to_compact(params.pow_limit << 1);
        assert!(!check_pow(&one, doubled, &params));
        // Explicitly negative encoding.
        let negative = target_to_compact(params.pow_limit) | 0x0080_0000;
        assert!(!check_pow(&one, negative, &params));
    }

    #[test]
    fn test_zero_hash_passes_any_valid_target() {
        let params = Params::mainnet();
        assert!(check_pow(&BlockHash::default(), 0x1f00ffff, &params));
    }

    #[test]
    fn test_known_vector_hash() {
        // 80 zero bytes under the genesis seed: nonzero, seed-distinct,
        // reproducible.
        let engine = RandomXEngine::global();
        let header = BlockHeader::default();
        let seed = genesis_seed_hash();
        let h1 = pow_hash(engine, &header, &seed).unwrap();
        assert!(!h1.is_zero());
        assert_ne!(h1, seed);
        let h2 = pow_hash(engine, &header, &seed).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_validate_block_pow_easy_chain() {
        // Regtest's half-range limit accepts roughly half of all digests;
        // a handful of nonces is enough to find a passing header.
        let engine = RandomXEngine::global();
        let params = Params::regtest();
        let mut header = BlockHeader {
            bits: target_to_compact(params.pow_limit),
            ..Default::default()
        };
        let found = (0u32..64).any(|nonce| {
            header.nonce = nonce;
            validate_block_pow(engine, &header, None, &params)
        });
        assert!(found);
    }
}
