//! Seams to the host node.
//!
//! The miner does not own a mempool, a chainstate, or a peer set; it talks
//! to them through these traits. The host wires real implementations in,
//! tests wire in mocks.

use consensus_core::{Block, BlockIndexEntry};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub use consensus_core::ChainIndex;

/// A candidate block assembled by the host's template builder.
pub struct BlockTemplate {
    block: Block,
}

impl BlockTemplate {
    pub fn new(block: Block) -> Self {
        Self { block }
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn into_block(self) -> Block {
        self.block
    }
}

/// Assembles candidate blocks paying the given coinbase output script.
pub trait TemplateFactory: Send + Sync {
    fn create_template(&self, coinbase_script: &[u8]) -> Option<BlockTemplate>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionDirection {
    Inbound,
    Outbound,
    Both,
}

/// Peer-count oracle used for the mining liveness gate.
pub trait NetworkInfo: Send + Sync {
    fn peer_count(&self, direction: ConnectionDirection) -> usize;
}

/// Outcome classes for a submitted block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockDisposition {
    /// Accepted and extended the chain.
    AcceptedNew,
    /// Valid but already known.
    AcceptedDuplicate,
    /// Stale or invalid at submission time.
    Rejected,
}

/// Block submission entry point on the validation layer.
pub trait BlockProcessor: Send + Sync {
    fn process_new_block(
        &self,
        block: Block,
        force_processing: bool,
        min_pow_checked: bool,
    ) -> BlockDisposition;
}

/// Single-method listener for chain-tip updates.
pub trait TipListener: Send + Sync {
    fn on_tip_updated(&self, new_tip: &Arc<BlockIndexEntry>, fork: bool, initial_download: bool);
}

/// Registry the validation layer drives tip notifications through.
pub struct ValidationSignals {
    listeners: Mutex<Vec<(u64, Arc<dyn TipListener>)>>,
    next_id: AtomicU64,
}

impl ValidationSignals {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn TipListener>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(listener_id, _)| *listener_id != id);
    }

    pub fn notify_tip_updated(
        &self,
        new_tip: &Arc<BlockIndexEntry>,
        fork: bool,
        initial_download: bool,
    ) {
        // Snapshot so listeners can unsubscribe from inside the callback.
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for (_, listener) in listeners {
            listener.on_tip_updated(new_tip, fork, initial_download);
        }
    }
}

impl Default for ValidationSignals {
    fn default() -> Self {
        Self::new()
    }
}

/// Bundle of external collaborators handed to the miner at construction.
/// All of them must outlive the miner; `Arc` makes that trivially true.
#[derive(Clone)]
pub struct MinerHost {
    pub chain: Arc<dyn ChainIndex>,
    pub templates: Arc<dyn TemplateFactory>,
    /// Absent means no peer gate (e.g. a single-node regtest setup).
    pub network: Option<Arc<dyn NetworkInfo>>,
    pub processor: Arc<dyn BlockProcessor>,
    /// Absent means no event-driven refresh; the miner falls back to polling.
    pub signals: Option<Arc<ValidationSignals>>,
    /// Node-wide shutdown interrupt, checked alongside the running flag.
    pub interrupt: Arc<AtomicBool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use consensus_core::BlockHash;
    use std::sync::atomic::AtomicUsize;

    struct CountingListener(AtomicUsize);

    impl TipListener for CountingListener {
        fn on_tip_updated(&self, _: &Arc<BlockIndexEntry>, _: bool, _: bool) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn tip() -> Arc<BlockIndexEntry> {
        Arc::new(BlockIndexEntry {
            height: 1,
            time: 0,
            bits: 0x207fffff,
            block_hash: BlockHash::default(),
            prev: None,
        })
    }

    #[test]
    fn test_subscribe_notify_unsubscribe() {
        let signals = ValidationSignals::new();
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        let id = signals.subscribe(listener.clone());

        signals.notify_tip_updated(&tip(), false, false);
        assert_eq!(listener.0.load(Ordering::Relaxed), 1);

        signals.unsubscribe(id);
        signals.notify_tip_updated(&tip(), false, false);
        assert_eq!(listener.0.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_unsubscribe_unknown_id_is_noop() {
        let signals = ValidationSignals::new();
        signals.unsubscribe(42);
        signals.notify_tip_updated(&tip(), false, false);
    }
}
