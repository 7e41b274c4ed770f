//! Internal miner for Botcoin.
//!
//! One coordinator thread tracks the chain tip and turns templates from the
//! host's factory into immutable [`MiningContext`]s; N worker threads grind
//! nonces on per-thread RandomX VMs, partitioned by stride so no two workers
//! ever try the same nonce before the 32-bit space wraps.
//!
//! ## Module Organization
//!
//! - [`host`]: interfaces to the external node (chain index, template
//!   factory, network info, block submission, tip notifications)
//! - [`context`]: the published unit of mining work
//! - [`miner`]: the coordinator/worker machinery and statistics

pub mod context;
pub mod host;
pub mod miner;


pub use context::MiningContext;
pub use host::{
    BlockDisposition, BlockProcessor, BlockTemplate, ConnectionDirection, MinerHost, NetworkInfo,
    TemplateFactory, TipListener, ValidationSignals,
};
pub use miner::{InternalMiner, MinerConfig, MinerStats, MIN_PEERS_FOR_MINING};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MinerError {
    /// The chain index has no tip to build on.
    #[error("chain index has no tip")]
    NoChainTip,

    /// The template factory produced nothing; the miner backs off.
    #[error("template factory returned no template")]
    TemplateUnavailable,
}
