//! Coordinator/worker mining machinery.
//!
//! The coordinator owns the template lifecycle: it watches the chain tip,
//! asks the host for a fresh template when the tip moves (or on a timer),
//! resolves the RandomX seed, and publishes an immutable [`MiningContext`].
//! Workers bind to the published context, pre-serialize the 80-byte header
//! once, and then only rewrite the four nonce bytes per attempt, hashing on
//! exclusively-owned RandomX VMs so the hot loop takes no locks at all.
//!
//! Nonces are stride-partitioned: worker `i` of `N` tries `i, i+N, i+2N, ...`
//! with natural 32-bit wraparound, so workers cover disjoint residue classes
//! until the space wraps.

use crate::context::MiningContext;
use crate::host::{BlockDisposition, ConnectionDirection, MinerHost, TipListener};
use crate::MinerError;
use consensus_core::{
    block_merkle_root, Block, BlockHash, BlockIndexEntry, Params, HEADER_SIZE, NONCE_OFFSET,
};
use pow::{check_pow, resolve_seed_hash};
use randomx_engine::{MiningVm, RandomXEngine};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Minimum peer count before the coordinator will create templates.
pub const MIN_PEERS_FOR_MINING: usize = 3;

/// Templates are rebuilt after this long even if the tip has not moved, so
/// fresh transactions and an updated timestamp make it into the block.
const TEMPLATE_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
/// How long `start` waits for the coordinator's first template.
const FIRST_TEMPLATE_WAIT: Duration = Duration::from_secs(30);
/// Coordinator wake cadence between templates.
const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Delay before a worker retries VM creation.
const VM_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Hashes a worker accumulates locally before flushing to the shared counter.
const HASH_BATCH_SIZE: u64 = 10_000;
/// Inner-loop length between full context refreshes.
const STALENESS_CHECK_INTERVAL: u64 = 1000;
/// Inner-loop cadence for job-id and shutdown re-checks.
const JOB_POLL_CADENCE: u64 = 100;
/// Caps the exponential backoff at 2^6 seconds.
const MAX_BACKOFF_LEVEL: u32 = 6;

/// Start-time configuration, immutable for the duration of mining.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MinerConfig {
    /// Number of worker threads; must be > 0.
    pub num_threads: usize,
    /// Coinbase output script; must be non-empty.
    pub coinbase_script: Vec<u8>,
    /// Full-dataset RandomX (~2 GiB) vs cache-only light mode (~256 MiB).
    pub fast_mode: bool,
    /// Run mining threads at low OS priority.
    pub low_priority: bool,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            num_threads: num_cpus::get(),
            coinbase_script: Vec::new(),
            fast_mode: true,
            low_priority: true,
        }
    }
}

/// Point-in-time snapshot of the miner's counters.
#[derive(Clone, Debug, Default)]
pub struct MinerStats {
    pub hash_count: u64,
    pub blocks_found: u64,
    pub stale_blocks: u64,
    pub template_count: u64,
    pub runtime_secs: i64,
    pub hash_rate: f64,
    pub backoff_level: u32,
    pub fast_mode: bool,
}

/// State shared between the public handle, the coordinator, the workers, and
/// the tip listener.
struct MinerShared {
    params: Params,
    host: MinerHost,

    running: AtomicBool,
    job_id: AtomicU64,
    context: Mutex<Option<Arc<MiningContext>>>,
    context_cv: Condvar,

    // Tip-notification edge: the listener sets the flag under the lock and
    // pokes the condvar the coordinator sleeps on.
    new_block_signal: AtomicBool,
    signal_lock: Mutex<()>,
    new_block_cv: Condvar,

    // Statistics. Relaxed atomics; advisory only.
    hash_count: AtomicU64,
    blocks_found: AtomicU64,
    stale_blocks: AtomicU64,
    template_count: AtomicU64,
    start_time: AtomicI64,
    backoff_level: AtomicU32,
    using_fast_mode: AtomicBool,
}

impl MinerShared {
    fn is_active(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.host.interrupt.load(Ordering::Acquire)
    }

    fn should_mine(&self) -> bool {
        // Deliberately no initial-block-download gate: a young chain whose
        // tip goes stale for a day would look like IBD forever and could
        // never mine its way out. The peer floor is the only liveness gate.
        match self.host.network.as_ref() {
            Some(network) => {
                network.peer_count(ConnectionDirection::Both) >= MIN_PEERS_FOR_MINING
            }
            None => true,
        }
    }

    /// Exponential backoff with jitter: 1s, 2s, 4s ... 64s, plus up to 25%.
    fn backoff_duration(&self) -> Duration {
        let level = self.backoff_level.load(Ordering::Relaxed).min(MAX_BACKOFF_LEVEL);
        let base_ms = 1000u64 << level;
        let jitter = rand::thread_rng().gen_range(0..=base_ms / 4);
        Duration::from_millis(base_ms + jitter)
    }

    /// Sleeps up to `timeout`, waking early on a tip notification or stop.
    /// Consumes the signal either way.
    fn wait_for_signal(&self, timeout: Duration) {
        let guard = self.signal_lock.lock().unwrap_or_else(|e| e.into_inner());
        let _guard = self
            .new_block_cv
            .wait_timeout_while(guard, timeout, |_| {
                !self.new_block_signal.load(Ordering::Acquire)
                    && self.running.load(Ordering::Acquire)
            })
            .unwrap_or_else(|e| e.into_inner());
        self.new_block_signal.store(false, Ordering::Release);
    }

    /// Builds a fresh mining context from the host's template factory.
    fn create_template(&self, coinbase_script: &[u8]) -> Result<Arc<MiningContext>, MinerError> {
        let tip = self.host.chain.tip().ok_or(MinerError::NoChainTip)?;
        let template = self
            .host
            .templates
            .create_template(coinbase_script)
            .ok_or(MinerError::TemplateUnavailable)?;

        let mut block = template.into_block();
        // A correct factory already set the merkle root; recompute anyway to
        // cover late coinbase edits.
        block.header.merkle_root = block_merkle_root(&block);

        let n_bits = block.header.bits;
        let job_id = self.job_id.fetch_add(1, Ordering::AcqRel) + 1;
        let height = tip.height + 1;
        let seed_hash = resolve_seed_hash(Some(&tip), self.params.seed_rotation);

        self.template_count.fetch_add(1, Ordering::Relaxed);

        Ok(Arc::new(MiningContext {
            block,
            seed_hash,
            n_bits,
            job_id,
            height,
        }))
    }

    /// Hands a solved block to the validation layer and records the outcome.
    fn submit_block(&self, block: Block) -> BlockDisposition {
        let disposition = self.host.processor.process_new_block(block, true, true);
        match disposition {
            BlockDisposition::AcceptedNew => {
                self.blocks_found.fetch_add(1, Ordering::Relaxed);
                log::info!("mined block accepted");
            }
            BlockDisposition::AcceptedDuplicate => {
                self.stale_blocks.fetch_add(1, Ordering::Relaxed);
                log::info!("mined block was a duplicate");
            }
            BlockDisposition::Rejected => {
                self.stale_blocks.fetch_add(1, Ordering::Relaxed);
                log::warn!("mined block rejected (stale or invalid)");
            }
        }
        disposition
    }
}

/// Wires tip notifications from the validation layer into the coordinator.
struct MinerTipListener {
    shared: Arc<MinerShared>,
}

impl TipListener for MinerTipListener {
    fn on_tip_updated(&self, _new_tip: &Arc<BlockIndexEntry>, _fork: bool, _initial_download: bool) {
        if !self.shared.running.load(Ordering::Acquire) {
            return;
        }
        {
            let _guard = self
                .shared
                .signal_lock
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            self.shared.new_block_signal.store(true, Ordering::Release);
        }
        self.shared.new_block_cv.notify_one();
        // A moving chain means conditions are good again.
        self.shared.backoff_level.store(0, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct MinerThreads {
    coordinator: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    listener_id: Option<u64>,
}

/// The internal miner: one coordinator plus N stride-partitioned workers.
pub struct InternalMiner {
    shared: Arc<MinerShared>,
    threads: Mutex<MinerThreads>,
}

impl InternalMiner {
    /// Constructs a miner. Does not start mining; call [`InternalMiner::start`].
    pub fn new(params: Params, host: MinerHost) -> Self {
        Self {
            shared: Arc::new(MinerShared {
                params,
                host,
                running: AtomicBool::new(false),
                job_id: AtomicU64::new(0),
                context: Mutex::new(None),
                context_cv: Condvar::new(),
                new_block_signal: AtomicBool::new(false),
                signal_lock: Mutex::new(()),
                new_block_cv: Condvar::new(),
                hash_count: AtomicU64::new(0),
                blocks_found: AtomicU64::new(0),
                stale_blocks: AtomicU64::new(0),
                template_count: AtomicU64::new(0),
                start_time: AtomicI64::new(0),
                backoff_level: AtomicU32::new(0),
                using_fast_mode: AtomicBool::new(false),
            }),
            threads: Mutex::new(MinerThreads::default()),
        }
    }

    /// Starts mining. Returns `false` on invalid configuration or when the
    /// miner is already running.
    pub fn start(&self, config: MinerConfig) -> bool {
        if config.num_threads == 0 {
            log::error!("miner start rejected: num_threads must be > 0");
            return false;
        }
        if config.coinbase_script.is_empty() {
            log::error!("miner start rejected: coinbase script is empty");
            return false;
        }
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::info!("miner already running");
            return false;
        }

        let shared = &self.shared;
        shared.hash_count.store(0, Ordering::Relaxed);
        shared.blocks_found.store(0, Ordering::Relaxed);
        shared.stale_blocks.store(0, Ordering::Relaxed);
        shared.template_count.store(0, Ordering::Relaxed);
        shared.start_time.store(unix_time(), Ordering::Relaxed);
        shared.job_id.store(0, Ordering::Relaxed);
        shared.backoff_level.store(0, Ordering::Relaxed);
        shared.using_fast_mode.store(config.fast_mode, Ordering::Relaxed);
        shared.new_block_signal.store(false, Ordering::Relaxed);

        log::info!(
            "internal miner starting: {} worker threads, stride nonces, {} mode, {} priority, {}-byte coinbase script",
            config.num_threads,
            if config.fast_mode { "fast (~2 GiB)" } else { "light (~256 MiB)" },
            if config.low_priority { "low" } else { "normal" },
            config.coinbase_script.len(),
        );

        // Event-driven refresh; the RandomX state itself initializes lazily
        // when workers see their first template, so it is keyed correctly.
        let listener_id = self.shared.host.signals.as_ref().map(|signals| {
            signals.subscribe(Arc::new(MinerTipListener {
                shared: Arc::clone(&self.shared),
            }))
        });

        let coordinator = {
            let shared = Arc::clone(&self.shared);
            let script = config.coinbase_script.clone();
            let low_priority = config.low_priority;
            thread::spawn(move || coordinator_loop(&shared, &script, low_priority))
        };

        // Give workers something to bind to before they spin up.
        {
            let guard = shared.context.lock().unwrap_or_else(|e| e.into_inner());
            let (guard, _timeout) = shared
                .context_cv
                .wait_timeout_while(guard, FIRST_TEMPLATE_WAIT, |ctx| {
                    ctx.is_none() && shared.running.load(Ordering::Acquire)
                })
                .unwrap_or_else(|e| e.into_inner());
            if guard.is_none() {
                // Not fatal; the coordinator keeps trying and workers wait.
                log::warn!("timed out waiting for the first mining template");
            }
        }

        let mut workers = Vec::with_capacity(config.num_threads);
        for thread_id in 0..config.num_threads {
            let shared = Arc::clone(&self.shared);
            let num_threads = config.num_threads;
            let fast_mode = config.fast_mode;
            let low_priority = config.low_priority;
            workers.push(thread::spawn(move || {
                worker_loop(&shared, thread_id, num_threads, fast_mode, low_priority)
            }));
        }

        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        threads.coordinator = Some(coordinator);
        threads.workers = workers;
        threads.listener_id = listener_id;

        log::info!(
            "internal miner started: coordinator + {} workers",
            config.num_threads
        );
        true
    }

    /// Stops mining and joins all threads. Idempotent.
    pub fn stop(&self) {
        if self
            .shared
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        log::info!("internal miner stopping");

        let (coordinator, workers, listener_id) = {
            let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
            (
                threads.coordinator.take(),
                std::mem::take(&mut threads.workers),
                threads.listener_id.take(),
            )
        };

        if let (Some(signals), Some(id)) = (self.shared.host.signals.as_ref(), listener_id) {
            signals.unsubscribe(id);
        }

        // Wake everything that might be parked on a condvar.
        drop(self.shared.signal_lock.lock().unwrap_or_else(|e| e.into_inner()));
        self.shared.new_block_cv.notify_all();
        drop(self.shared.context.lock().unwrap_or_else(|e| e.into_inner()));
        self.shared.context_cv.notify_all();

        // Workers first, then the coordinator.
        for handle in workers {
            if handle.join().is_err() {
                log::error!("mining worker panicked");
            }
        }
        if let Some(handle) = coordinator {
            if handle.join().is_err() {
                log::error!("mining coordinator panicked");
            }
        }

        *self.shared.context.lock().unwrap_or_else(|e| e.into_inner()) = None;

        let stats = self.stats();
        log::info!(
            "internal miner stopped: {}s runtime, {} hashes, {} blocks found, {} stale, {} templates, {:.2} H/s",
            stats.runtime_secs,
            stats.hash_count,
            stats.blocks_found,
            stats.stale_blocks,
            stats.template_count,
            stats.hash_rate,
        );
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Average hashrate since start, in hashes per second.
    pub fn hash_rate(&self) -> f64 {
        self.stats().hash_rate
    }

    /// Snapshot of all counters.
    pub fn stats(&self) -> MinerStats {
        let shared = &self.shared;
        let start = shared.start_time.load(Ordering::Relaxed);
        let runtime_secs = if start > 0 {
            (unix_time() - start).max(0)
        } else {
            0
        };
        let hash_count = shared.hash_count.load(Ordering::Relaxed);
        let hash_rate = if runtime_secs > 0 {
            hash_count as f64 / runtime_secs as f64
        } else {
            0.0
        };
        MinerStats {
            hash_count,
            blocks_found: shared.blocks_found.load(Ordering::Relaxed),
            stale_blocks: shared.stale_blocks.load(Ordering::Relaxed),
            template_count: shared.template_count.load(Ordering::Relaxed),
            runtime_secs,
            hash_rate,
            backoff_level: shared.backoff_level.load(Ordering::Relaxed),
            fast_mode: shared.using_fast_mode.load(Ordering::Relaxed),
        }
    }
}

impl Drop for InternalMiner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn unix_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(unix)]
fn apply_thread_priority(low_priority: bool) {
    if low_priority {
        // SAFETY: nice(2) only adjusts the calling thread's priority.
        let _ = unsafe { libc::nice(19) };
    }
}

#[cfg(not(unix))]
fn apply_thread_priority(_low_priority: bool) {}

/// Template lifecycle: refresh on tip change, on a 30 s timer, and on the
/// very first pass; back off exponentially when conditions are bad.
fn coordinator_loop(shared: &Arc<MinerShared>, coinbase_script: &[u8], low_priority: bool) {
    apply_thread_priority(low_priority);
    log::debug!("mining coordinator started");

    let mut last_tip: Option<BlockHash> = None;
    let mut last_template: Option<Instant> = None;

    while shared.is_active() {
        if !shared.should_mine() {
            let backoff = shared.backoff_duration();
            shared.backoff_level.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "mining conditions not met, backing off {}ms",
                backoff.as_millis()
            );
            shared.wait_for_signal(backoff);
            continue;
        }
        shared.backoff_level.store(0, Ordering::Relaxed);

        let current_tip = shared.host.chain.tip().map(|tip| tip.block_hash);
        let need_template = current_tip != last_tip
            || last_template.map_or(true, |at| at.elapsed() >= TEMPLATE_REFRESH_INTERVAL)
            || shared.job_id.load(Ordering::Relaxed) == 0;

        if need_template {
            match shared.create_template(coinbase_script) {
                Ok(ctx) => {
                    {
                        let mut guard =
                            shared.context.lock().unwrap_or_else(|e| e.into_inner());
                        *guard = Some(Arc::clone(&ctx));
                    }
                    shared.context_cv.notify_all();
                    last_tip = current_tip;
                    last_template = Some(Instant::now());
                    log::info!(
                        "new mining template #{} (height {}, bits 0x{:08x})",
                        ctx.job_id,
                        ctx.height,
                        ctx.n_bits
                    );
                }
                Err(e) => {
                    let backoff = shared.backoff_duration();
                    shared.backoff_level.fetch_add(1, Ordering::Relaxed);
                    log::warn!("template creation failed ({e}), backing off");
                    thread::sleep(backoff);
                    continue;
                }
            }
        }

        shared.wait_for_signal(SIGNAL_POLL_INTERVAL);
    }

    log::debug!("mining coordinator stopped");
}

/// Nonce grinding. The header is serialized once per template; each attempt
/// rewrites only bytes 76..80 and hashes on the worker's own VM.
fn worker_loop(
    shared: &Arc<MinerShared>,
    thread_id: usize,
    num_threads: usize,
    fast_mode: bool,
    low_priority: bool,
) {
    apply_thread_priority(low_priority);
    log::debug!("mining worker {thread_id} started");

    let mut vm: Option<MiningVm> = None;
    let mut ctx: Option<Arc<MiningContext>> = None;
    let mut header_buf = [0u8; HEADER_SIZE];
    let mut nonce_counter: u32 = 0;
    let mut local_hashes: u64 = 0;
    let mut last_job_id: u64 = 0;

    while shared.is_active() {
        let current_job = shared.job_id.load(Ordering::Acquire);
        if current_job != last_job_id || ctx.is_none() {
            // Take the published context, waiting for the first one.
            let published = {
                let guard = shared.context.lock().unwrap_or_else(|e| e.into_inner());
                let guard = shared
                    .context_cv
                    .wait_while(guard, |c| {
                        c.is_none() && shared.running.load(Ordering::Acquire)
                    })
                    .unwrap_or_else(|e| e.into_inner());
                guard.clone()
            };
            if !shared.running.load(Ordering::Acquire) {
                break;
            }
            let Some(current) = published else { continue };

            // (Re)create the VM when the epoch seed changed.
            if vm
                .as_ref()
                .map_or(true, |v| !v.matches(current.seed_hash.as_bytes()))
            {
                match MiningVm::create(
                    RandomXEngine::global(),
                    current.seed_hash.as_bytes(),
                    fast_mode,
                ) {
                    Ok(new_vm) => {
                        if fast_mode && !new_vm.is_fast() {
                            shared.using_fast_mode.store(false, Ordering::Relaxed);
                            log::warn!("worker {thread_id} running in light-mode fallback");
                        }
                        vm = Some(new_vm);
                    }
                    Err(e) => {
                        log::warn!("worker {thread_id} vm init failed ({e}), retrying");
                        thread::sleep(VM_RETRY_DELAY);
                        continue;
                    }
                }
            }

            header_buf = current.block.header.serialize();
            nonce_counter = thread_id as u32;
            last_job_id = current.job_id;
            ctx = Some(current);
        }

        let (Some(current), Some(worker_vm)) = (ctx.as_ref(), vm.as_ref()) else {
            continue;
        };

        let mut vm_failed = false;
        for iter in 0..STALENESS_CHECK_INTERVAL {
            header_buf[NONCE_OFFSET..NONCE_OFFSET + 4]
                .copy_from_slice(&nonce_counter.to_le_bytes());

            let digest = match worker_vm.hash(&header_buf) {
                Ok(digest) => BlockHash::new(digest),
                Err(e) => {
                    log::warn!("worker {thread_id} hash failed: {e}");
                    vm_failed = true;
                    break;
                }
            };
            local_hashes += 1;

            if check_pow(&digest, current.n_bits, &shared.params) {
                let mut block = current.block.clone();
                block.header.nonce = nonce_counter;
                log::info!(
                    "worker {thread_id} found block at height {} (nonce {}, pow hash {})",
                    current.height,
                    nonce_counter,
                    digest
                );
                shared.submit_block(block);

                shared.hash_count.fetch_add(local_hashes, Ordering::Relaxed);
                local_hashes = 0;
                // Force a context refresh before grinding again.
                last_job_id = 0;
                break;
            }

            // Stride to this worker's next residue; u32 wraparound intended.
            nonce_counter = nonce_counter.wrapping_add(num_threads as u32);

            if iter % JOB_POLL_CADENCE == JOB_POLL_CADENCE - 1
                && (shared.job_id.load(Ordering::Relaxed) != last_job_id
                    || !shared.running.load(Ordering::Relaxed))
            {
                break;
            }
        }

        if vm_failed {
            vm = None;
            last_job_id = 0;
            continue;
        }

        if local_hashes >= HASH_BATCH_SIZE {
            shared.hash_count.fetch_add(local_hashes, Ordering::Relaxed);
            local_hashes = 0;
        }
    }

    if local_hashes > 0 {
        shared.hash_count.fetch_add(local_hashes, Ordering::Relaxed);
    }
    log::debug!("mining worker {thread_id} stopped");
}
