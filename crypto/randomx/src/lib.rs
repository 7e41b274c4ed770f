//! RandomX hash-engine lifecycle for Botcoin.
//!
//! RandomX needs heavyweight state before it can hash anything: a ~256 MiB
//! cache keyed by the epoch seed, and optionally a ~2 GiB dataset derived
//! from that cache for fast (mining) mode. This crate owns that state once
//! per process and hands out per-thread virtual machines that share it.
//!
//! Two hashing paths exist deliberately:
//!
//! - the **validation path** ([`RandomXEngine::hash_validate`]) serializes
//!   all callers behind the engine mutex and runs in light mode. Validation
//!   is rare relative to mining, so one mutex-guarded VM is enough.
//! - the **mining path** ([`MiningVm`]) gives each worker thread an
//!   exclusively-owned VM bound to the shared cache or dataset, so the hot
//!   loop never touches the engine mutex.
//!
//! Seeds are raw 32-byte keys here; mapping block heights to seed hashes is
//! consensus logic and lives upstream.

pub mod engine;
pub mod vm;

pub use engine::{CacheHandle, DatasetHandle, DatasetState, RandomXEngine};
pub use vm::MiningVm;

use randomx_rs::RandomXError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Cache, dataset, or VM allocation failed even after the JIT-less retry.
    #[error("randomx allocation failed after jit fallback: {0}")]
    ResourceExhausted(RandomXError),

    /// A different seed was requested while mining VMs still hold handles to
    /// the current cache or dataset. Retried by callers once workers rebind.
    #[error("seed swap rejected while mining handles are outstanding")]
    EngineBusy,

    /// No seed has been installed yet.
    #[error("randomx engine has no seed installed")]
    NotInitialized,

    /// Fast-mode hashing was requested but the dataset could not be built.
    #[error("randomx dataset unavailable")]
    DatasetUnavailable,

    #[error("randomx hashing failed: {0}")]
    Hash(RandomXError),

    #[error("randomx produced a digest of unexpected length")]
    DigestLength,
}
