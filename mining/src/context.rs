use consensus_core::Block;
use pow::SeedHash;

/// One unit of mining work, published by the coordinator.
///
/// Immutable once published: workers take a shared pointer, copy the header
/// into a local buffer, and mutate only the nonce bytes of that copy.
#[derive(Clone, Debug)]
pub struct MiningContext {
    /// Template block; the merkle root has already been recomputed.
    pub block: Block,
    /// RandomX epoch key for the height being mined.
    pub seed_hash: SeedHash,
    /// Compact target the block must meet.
    pub n_bits: u32,
    /// Monotonically increasing identifier used for staleness checks.
    pub job_id: u64,
    /// Height of the block being mined.
    pub height: u64,
}
