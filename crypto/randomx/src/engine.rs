//! Process-wide RandomX state: one cache, at most one dataset, and the
//! mutex-guarded validation VMs.

use crate::vm::MiningVm;
use crate::EngineError;
use randomx_rs::{RandomXCache, RandomXDataset, RandomXFlag, RandomXVM};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Instant;

/// Lifecycle of the optional full dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatasetState {
    Absent,
    Building,
    Ready,
}

const DATASET_ABSENT: u8 = 0;
const DATASET_BUILDING: u8 = 1;
const DATASET_READY: u8 = 2;

/// Everything keyed by the currently installed seed.
struct Slot {
    seed: [u8; 32],
    cache: RandomXCache,
    /// Lease token cloned into every light mining VM. strong_count > 1 means
    /// a worker still reads the cache and the seed must not be swapped.
    cache_leases: Arc<()>,
    dataset: Option<RandomXDataset>,
    dataset_leases: Arc<()>,
    /// Cache-bound VM for the validation path.
    vm_light: RandomXVM,
    /// Dataset-bound VM, present iff `dataset` is.
    vm_fast: Option<RandomXVM>,
}

/// Owner of all shared RandomX state.
///
/// All methods lock the internal mutex; `hash_validate` and `hash_mining`
/// hold it across the hash computation, which serializes the validation path
/// globally. Mining VMs created through [`MiningVm::create`] hash without
/// touching this mutex at all.
pub struct RandomXEngine {
    slot: Mutex<Option<Slot>>,
    dataset_state: AtomicU8,
}

// The raw FFI pointers inside `RandomXCache`/`RandomXDataset`/`RandomXVM` make
// randomx-rs's types neither `Send` nor `Sync` by default. Every access to
// `Slot` here goes through `slot: Mutex<Option<Slot>>`, which serializes all
// reads and writes, so sharing `RandomXEngine` across threads is sound.
unsafe impl Send for RandomXEngine {}
unsafe impl Sync for RandomXEngine {}

static GLOBAL_ENGINE: OnceLock<RandomXEngine> = OnceLock::new();

impl RandomXEngine {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            dataset_state: AtomicU8::new(DATASET_ABSENT),
        }
    }

    /// The lazily-initialized process-wide engine.
    ///
    /// The cache and dataset each cost hundreds of MiB; sharing one engine
    /// keeps them from being duplicated across subsystems.
    pub fn global() -> &'static RandomXEngine {
        GLOBAL_ENGINE.get_or_init(RandomXEngine::new)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Slot>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Installs `seed`, allocating the cache (and dataset when `fast`).
    ///
    /// Idempotent when the seed already matches and the requested mode is
    /// satisfied. Returns whether fast mode is active after the call; a
    /// dataset allocation failure degrades to light mode rather than erroring
    /// so callers can decide how to proceed. Swapping to a *different* seed
    /// while mining VMs hold handles fails with [`EngineError::EngineBusy`].
    pub fn install_seed(&self, seed: &[u8; 32], fast: bool) -> Result<bool, EngineError> {
        let mut guard = self.lock();
        self.install_locked(&mut guard, seed, fast)
    }

    fn install_locked(
        &self,
        guard: &mut Option<Slot>,
        seed: &[u8; 32],
        fast: bool,
    ) -> Result<bool, EngineError> {
        if let Some(slot) = guard.as_mut() {
            if slot.seed == *seed {
                if slot.dataset.is_some() {
                    return Ok(true);
                }
                if !fast {
                    return Ok(false);
                }
                // Upgrade light -> fast in place.
                return match self.build_dataset(&slot.cache) {
                    Some((dataset, vm_fast)) => {
                        slot.dataset = Some(dataset);
                        slot.vm_fast = Some(vm_fast);
                        slot.dataset_leases = Arc::new(());
                        Ok(true)
                    }
                    None => Ok(false),
                };
            }

            if Arc::strong_count(&slot.cache_leases) > 1
                || Arc::strong_count(&slot.dataset_leases) > 1
            {
                return Err(EngineError::EngineBusy);
            }
        }

        // Release the previous epoch's memory before allocating the next.
        *guard = None;
        self.dataset_state.store(DATASET_ABSENT, Ordering::Release);

        let flags = RandomXFlag::get_recommended_flags();
        let cache = RandomXCache::new(flags | RandomXFlag::FLAG_JIT, seed)
            .or_else(|_| RandomXCache::new(flags, seed))
            .map_err(EngineError::ResourceExhausted)?;

        let vm_light = RandomXVM::new(flags | RandomXFlag::FLAG_JIT, Some(cache.clone()), None)
            .or_else(|_| RandomXVM::new(flags, Some(cache.clone()), None))
            .map_err(EngineError::ResourceExhausted)?;

        let mut slot = Slot {
            seed: *seed,
            cache,
            cache_leases: Arc::new(()),
            dataset: None,
            dataset_leases: Arc::new(()),
            vm_light,
            vm_fast: None,
        };

        let mut fast_active = false;
        if fast {
            if let Some((dataset, vm_fast)) = self.build_dataset(&slot.cache) {
                slot.dataset = Some(dataset);
                slot.vm_fast = Some(vm_fast);
                fast_active = true;
            }
        }

        log::debug!(
            "randomx engine installed seed {} ({} mode)",
            hex_prefix(seed),
            if fast_active { "fast" } else { "light" }
        );

        *guard = Some(slot);
        Ok(fast_active)
    }

    /// Builds the full dataset and its validation VM. Returns `None` on
    /// allocation failure (callers fall back to light mode).
    fn build_dataset(&self, cache: &RandomXCache) -> Option<(RandomXDataset, RandomXVM)> {
        self.dataset_state.store(DATASET_BUILDING, Ordering::Release);
        log::info!("initializing randomx dataset (~2 GiB, this can take minutes)");
        let started = Instant::now();

        let dataset = match RandomXDataset::new(RandomXFlag::FLAG_DEFAULT, cache.clone(), 0) {
            Ok(dataset) => dataset,
            Err(e) => {
                self.dataset_state.store(DATASET_ABSENT, Ordering::Release);
                log::warn!("randomx dataset allocation failed, staying in light mode: {e}");
                return None;
            }
        };

        let flags = RandomXFlag::get_recommended_flags();
        let vm_fast = RandomXVM::new(
            flags | RandomXFlag::FLAG_JIT | RandomXFlag::FLAG_FULL_MEM,
            Some(cache.clone()),
            Some(dataset.clone()),
        )
        .or_else(|_| {
            RandomXVM::new(
                flags | RandomXFlag::FLAG_FULL_MEM,
                Some(cache.clone()),
                Some(dataset.clone()),
            )
        });

        match vm_fast {
            Ok(vm) => {
                self.dataset_state.store(DATASET_READY, Ordering::Release);
                log::info!(
                    "randomx dataset ready in {:.1}s",
                    started.elapsed().as_secs_f64()
                );
                Some((dataset, vm))
            }
            Err(e) => {
                self.dataset_state.store(DATASET_ABSENT, Ordering::Release);
                log::warn!("randomx fast vm creation failed, staying in light mode: {e}");
                None
            }
        }
    }

    /// Light-mode hash for block validation. Reinstalls the cache when the
    /// seed differs; the engine mutex is held across the hash call.
    pub fn hash_validate(&self, input: &[u8], seed: &[u8; 32]) -> Result<[u8; 32], EngineError> {
        let mut guard = self.lock();
        self.install_locked(&mut guard, seed, false)?;
        let slot = guard.as_ref().ok_or(EngineError::NotInitialized)?;
        digest(slot.vm_light.calculate_hash(input))
    }

    /// Fast-mode hash. Ensures the dataset exists; errors if it cannot be
    /// built rather than silently hashing light.
    pub fn hash_mining(&self, input: &[u8], seed: &[u8; 32]) -> Result<[u8; 32], EngineError> {
        let mut guard = self.lock();
        if !self.install_locked(&mut guard, seed, true)? {
            return Err(EngineError::DatasetUnavailable);
        }
        let slot = guard.as_ref().ok_or(EngineError::NotInitialized)?;
        let vm = slot.vm_fast.as_ref().ok_or(EngineError::DatasetUnavailable)?;
        digest(vm.calculate_hash(input))
    }

    /// Builds a worker-owned mining VM bound to the current cache (light) or
    /// dataset (fast). Install, lease acquisition, and VM construction happen
    /// under one lock so the seed cannot change out from under the caller.
    pub(crate) fn create_mining_vm(
        &self,
        seed: &[u8; 32],
        fast: bool,
    ) -> Result<MiningVm, EngineError> {
        let mut guard = self.lock();
        let fast_active = self.install_locked(&mut guard, seed, fast)?;
        let slot = guard.as_ref().ok_or(EngineError::NotInitialized)?;
        let use_fast = fast && fast_active;

        let flags = RandomXFlag::get_recommended_flags();
        let vm = if use_fast {
            let dataset = slot.dataset.as_ref().ok_or(EngineError::DatasetUnavailable)?;
            RandomXVM::new(
                flags | RandomXFlag::FLAG_JIT | RandomXFlag::FLAG_FULL_MEM,
                Some(slot.cache.clone()),
                Some(dataset.clone()),
            )
            .or_else(|_| {
                RandomXVM::new(
                    flags | RandomXFlag::FLAG_FULL_MEM,
                    Some(slot.cache.clone()),
                    Some(dataset.clone()),
                )
            })
        } else {
            RandomXVM::new(flags | RandomXFlag::FLAG_JIT, Some(slot.cache.clone()), None)
                .or_else(|_| RandomXVM::new(flags, Some(slot.cache.clone()), None))
        }
        .map_err(EngineError::ResourceExhausted)?;

        let dataset_lease = use_fast.then(|| Arc::clone(&slot.dataset_leases));
        Ok(MiningVm::from_parts(
            vm,
            *seed,
            use_fast,
            Arc::clone(&slot.cache_leases),
            dataset_lease,
        ))
    }

    /// Leases the current cache for an external mining VM. The lease blocks
    /// seed swaps until dropped.
    pub fn cache_handle(&self) -> Result<CacheHandle, EngineError> {
        let guard = self.lock();
        let slot = guard.as_ref().ok_or(EngineError::NotInitialized)?;
        Ok(CacheHandle {
            cache: slot.cache.clone(),
            seed: slot.seed,
            _lease: Arc::clone(&slot.cache_leases),
        })
    }

    /// Leases the current dataset. Fails unless fast mode is ready.
    pub fn dataset_handle(&self) -> Result<DatasetHandle, EngineError> {
        let guard = self.lock();
        let slot = guard.as_ref().ok_or(EngineError::NotInitialized)?;
        let dataset = slot
            .dataset
            .as_ref()
            .ok_or(EngineError::DatasetUnavailable)?
            .clone();
        Ok(DatasetHandle {
            dataset,
            seed: slot.seed,
            _lease: Arc::clone(&slot.dataset_leases),
        })
    }

    /// Seed currently installed, if any.
    pub fn current_seed(&self) -> Option<[u8; 32]> {
        self.lock().as_ref().map(|slot| slot.seed)
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().is_some()
    }

    pub fn dataset_state(&self) -> DatasetState {
        match self.dataset_state.load(Ordering::Acquire) {
            DATASET_BUILDING => DatasetState::Building,
            DATASET_READY => DatasetState::Ready,
            _ => DatasetState::Absent,
        }
    }

    /// Coarse dataset build progress as (done, total) items.
    ///
    /// The underlying library initializes the dataset in a single call, so
    /// this only distinguishes not-started / building / complete.
    pub fn dataset_progress(&self) -> (u64, u64) {
        match self.dataset_state() {
            DatasetState::Absent => (0, 0),
            DatasetState::Building => (0, 1),
            DatasetState::Ready => (1, 1),
        }
    }

    /// Drops all RandomX state. Outstanding mining VMs keep their borrowed
    /// buffers alive through their own handles and simply go stale.
    pub fn shutdown(&self) {
        let mut guard = self.lock();
        *guard = None;
        self.dataset_state.store(DATASET_ABSENT, Ordering::Release);
        log::debug!("randomx engine shut down");
    }
}

impl Default for RandomXEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Leased borrow of the engine's cache. Valid for the seed it was taken
/// under; the engine rejects seed swaps while any lease is alive.
pub struct CacheHandle {
    cache: RandomXCache,
    seed: [u8; 32],
    _lease: Arc<()>,
}

impl CacheHandle {
    pub fn cache(&self) -> &RandomXCache {
        &self.cache
    }

    pub fn seed(&self) -> &[u8; 32] {
        &self.seed
    }
}

/// Leased borrow of the engine's dataset.
pub struct DatasetHandle {
    dataset: RandomXDataset,
    seed: [u8; 32],
    _lease: Arc<()>,
}

impl DatasetHandle {
    pub fn dataset(&self) -> &RandomXDataset {
        &self.dataset
    }

    pub fn seed(&self) -> &[u8; 32] {
        &self.seed
    }
}

fn digest(result: Result<Vec<u8>, randomx_rs::RandomXError>) -> Result<[u8; 32], EngineError> {
    let bytes = result.map_err(EngineError::Hash)?;
    bytes.try_into().map_err(|_| EngineError::DigestLength)
}

fn hex_prefix(seed: &[u8; 32]) -> String {
    seed[..4].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED_A: [u8; 32] = [0xa5; 32];
    const SEED_B: [u8; 32] = [0x5a; 32];

    #[test]
    fn test_hash_validate_is_deterministic() {
        let engine = RandomXEngine::global();
        let input = [0u8; 80];
        let h1 = engine.hash_validate(&input, &SEED_A).unwrap();
        let h2 = engine.hash_validate(&input, &SEED_A).unwrap();
        assert_eq!(h1, h2);
        assert_ne!(h1, [0u8; 32]);
        assert_ne!(h1, SEED_A);
    }

    #[test]
    fn test_different_inputs_differ() {
        let engine = RandomXEngine::global();
        let h1 = engine.hash_validate(&[0u8; 80], &SEED_A).unwrap();
        let mut input = [0u8; 80];
        input[76] = 1;
        let h2 = engine.hash_validate(&input, &SEED_A).unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_install_is_idempotent() {
        let engine = RandomXEngine::new();
        assert!(!engine.install_seed(&SEED_A, false).unwrap());
        assert!(!engine.install_seed(&SEED_A, false).unwrap());
        assert_eq!(engine.current_seed(), Some(SEED_A));
        assert_eq!(engine.dataset_state(), DatasetState::Absent);
    }

    #[test]
    fn test_cache_handle_lease_blocks_swap() {
        let engine = RandomXEngine::new();
        engine.install_seed(&SEED_A, false).unwrap();
        let handle = engine.cache_handle().unwrap();
        assert_eq!(handle.seed(), &SEED_A);
        assert!(matches!(
            engine.install_seed(&SEED_B, false),
            Err(EngineError::EngineBusy)
        ));
        drop(handle);
        assert!(engine.install_seed(&SEED_B, false).is_ok());
    }

    #[test]
    fn test_dataset_handle_requires_fast_mode() {
        let engine = RandomXEngine::new();
        engine.install_seed(&SEED_A, false).unwrap();
        assert!(matches!(
            engine.dataset_handle(),
            Err(EngineError::DatasetUnavailable)
        ));
    }

    #[test]
    fn test_seed_swap_rejected_while_vm_outstanding() {
        let engine = RandomXEngine::new();
        let vm = MiningVm::create(&engine, &SEED_A, false).unwrap();
        match engine.install_seed(&SEED_B, false) {
            Err(EngineError::EngineBusy) => {}
            other => panic!("expected EngineBusy, got {other:?}"),
        }
        // Same-seed installs stay fine while the handle is live.
        assert!(engine.install_seed(&SEED_A, false).is_ok());
        drop(vm);
        assert!(engine.install_seed(&SEED_B, false).is_ok());
        assert_eq!(engine.current_seed(), Some(SEED_B));
    }

    #[test]
    fn test_reseed_round_trip_reproduces_digest() {
        let engine = RandomXEngine::new();
        let input = b"reseed round trip input";
        let before = engine.hash_validate(input, &SEED_A).unwrap();
        let other = engine.hash_validate(input, &SEED_B).unwrap();
        assert_ne!(before, other);
        let after = engine.hash_validate(input, &SEED_A).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_shutdown_clears_state() {
        let engine = RandomXEngine::new();
        engine.install_seed(&SEED_A, false).unwrap();
        assert!(engine.is_initialized());
        engine.shutdown();
        assert!(!engine.is_initialized());
        assert_eq!(engine.dataset_progress(), (0, 0));
    }
}
