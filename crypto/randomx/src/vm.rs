//! Worker-owned mining VMs.

use crate::engine::RandomXEngine;
use crate::EngineError;
use randomx_rs::RandomXVM;
use std::sync::Arc;

/// A RandomX VM owned exclusively by one mining worker.
///
/// The VM shares the engine's cache (light mode) or dataset (fast mode) by
/// reference, so hashing here never takes the engine mutex. The lease tokens
/// keep the engine from swapping the seed while this VM is alive; dropping
/// the VM releases them.
pub struct MiningVm {
    vm: RandomXVM,
    seed: [u8; 32],
    fast: bool,
    _cache_lease: Arc<()>,
    _dataset_lease: Option<Arc<()>>,
}

impl MiningVm {
    /// Asks `engine` to install `seed` in the requested mode and binds a new
    /// VM to the resulting cache or dataset. Fast mode degrades to light when
    /// the dataset cannot be built; check [`MiningVm::is_fast`] for the mode
    /// actually in effect.
    pub fn create(
        engine: &RandomXEngine,
        seed: &[u8; 32],
        fast: bool,
    ) -> Result<Self, EngineError> {
        engine.create_mining_vm(seed, fast)
    }

    pub(crate) fn from_parts(
        vm: RandomXVM,
        seed: [u8; 32],
        fast: bool,
        cache_lease: Arc<()>,
        dataset_lease: Option<Arc<()>>,
    ) -> Self {
        Self {
            vm,
            seed,
            fast,
            _cache_lease: cache_lease,
            _dataset_lease: dataset_lease,
        }
    }

    /// Hashes `input` on this worker's VM. Lock-free with respect to the
    /// engine and to other mining VMs.
    pub fn hash(&self, input: &[u8]) -> Result<[u8; 32], EngineError> {
        let bytes = self.vm.calculate_hash(input).map_err(EngineError::Hash)?;
        bytes.try_into().map_err(|_| EngineError::DigestLength)
    }

    /// Whether this VM was built for `seed`. Used for staleness checks when
    /// a new template arrives.
    pub fn matches(&self, seed: &[u8; 32]) -> bool {
        self.seed == *seed
    }

    /// Mode actually in effect (fast may have degraded to light at creation).
    pub fn is_fast(&self) -> bool {
        self.fast
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: [u8; 32] = [0x42; 32];

    #[test]
    fn test_mining_vm_agrees_with_validation_path() {
        let engine = RandomXEngine::new();
        let vm = MiningVm::create(&engine, &SEED, false).unwrap();
        assert!(!vm.is_fast());
        assert!(vm.matches(&SEED));
        assert!(!vm.matches(&[0u8; 32]));

        let input = [7u8; 80];
        let mined = vm.hash(&input).unwrap();
        let validated = engine.hash_validate(&input, &SEED).unwrap();
        assert_eq!(mined, validated);
    }

    #[test]
    fn test_two_vms_hash_identically() {
        let engine = RandomXEngine::new();
        let vm1 = MiningVm::create(&engine, &SEED, false).unwrap();
        let vm2 = MiningVm::create(&engine, &SEED, false).unwrap();
        let input = b"stride nonce 12345";
        assert_eq!(vm1.hash(input).unwrap(), vm2.hash(input).unwrap());
    }
}
