//! Per-block difficulty retargeting.
//!
//! The active algorithm recalculates the target every block from a window of
//! recent timestamps and cumulative difficulties:
//!
//!   1. collect up to `difficulty_window` timestamps walking back from the
//!      previous block (the genesis timestamp is artificial and excluded)
//!   2. sort the timestamps and trim `difficulty_cut` outliers from each end
//!   3. next difficulty = total work in the trimmed span * target spacing
//!      / trimmed time span, rounded up
//!
//! The cut applies to timestamps only; the work term is the cumulative
//! difference over the same index range of the insertion-ordered window.
//! That approximation is consensus-critical and must not be "fixed".

use crate::compact::{compact_to_target, target_to_compact};
use consensus_core::{BlockIndexEntry, Params};
use primitive_types::{U256, U512};
use std::sync::Arc;

/// Computes the compact target the block after `prev` must meet.
pub fn next_work_required(prev: &Arc<BlockIndexEntry>, params: &Params) -> u32 {
    let pow_limit_bits = target_to_compact(params.pow_limit);
    if params.pow_no_retargeting {
        return prev.bits;
    }

    let window = params.difficulty_window;

    // Collect the window newest-first, then reverse so index 0 is oldest.
    let mut timestamps: Vec<i64> = Vec::with_capacity(window);
    let mut difficulties: Vec<U256> = Vec::with_capacity(window);
    let mut node = Some(Arc::clone(prev));
    while let Some(n) = node {
        if timestamps.len() >= window || n.height == 0 {
            break;
        }
        timestamps.push(n.time);
        let mut target = compact_to_target(n.bits);
        if target.is_zero() {
            target = U256::one();
        }
        let mut difficulty = params.pow_limit / target;
        if difficulty.is_zero() {
            difficulty = U256::one();
        }
        difficulties.push(difficulty);
        node = n.prev.clone();
    }

    let length = timestamps.len();
    if length <= 1 {
        return pow_limit_bits;
    }
    timestamps.reverse();
    difficulties.reverse();

    let mut cumulative = vec![U256::zero(); length];
    cumulative[0] = difficulties[0];
    for i in 1..length {
        cumulative[i] = cumulative[i - 1].saturating_add(difficulties[i]);
    }

    let mut sorted = timestamps;
    sorted.sort_unstable();

    let keep = params
        .difficulty_window
        .saturating_sub(2 * params.difficulty_cut);
    let (cut_begin, cut_end) = if length <= keep {
        (0, length)
    } else {
        let begin = (length - keep + 1) / 2;
        (begin, begin + keep)
    };
    if cut_begin + 2 > cut_end || cut_end > length {
        return pow_limit_bits;
    }

    let mut time_span = sorted[cut_end - 1] - sorted[cut_begin];
    if time_span <= 0 {
        time_span = 1;
    }

    let total_work = cumulative[cut_end - 1] - cumulative[cut_begin];
    if total_work.is_zero() {
        return pow_limit_bits;
    }

    // next_difficulty = ceil(total_work * spacing / time_span), widened so the
    // multiplication cannot truncate.
    let span = U512::from(time_span as u64);
    let spacing = U256::from(params.pow_target_spacing as u64);
    let mut next_difficulty = (total_work.full_mul(spacing) + span - U512::one()) / span;
    if next_difficulty.is_zero() {
        next_difficulty = U512::one();
    }

    let mut next_target =
        U256::try_from(U512::from(params.pow_limit) / next_difficulty).unwrap_or(params.pow_limit);
    if next_target > params.pow_limit {
        next_target = params.pow_limit;
    }
    if next_target.is_zero() {
        next_target = U256::one();
    }

    let result = target_to_compact(next_target);
    log::debug!(
        "lwma: length={} cut=[{},{}) time_span={} bits=0x{:08x}",
        length,
        cut_begin,
        cut_end,
        time_span,
        result
    );
    result
}

/// Legacy fixed-interval retarget, kept for compatibility tests: clamp the
/// observed timespan to [T/4, 4T] and scale the previous target by it.
pub fn classic_next_work_required(
    prev: &BlockIndexEntry,
    first_block_time: i64,
    params: &Params,
) -> u32 {
    if params.pow_no_retargeting {
        return prev.bits;
    }

    let timespan = params.pow_target_timespan;
    let mut actual = prev.time - first_block_time;
    if actual < timespan / 4 {
        actual = timespan / 4;
    }
    if actual > timespan * 4 {
        actual = timespan * 4;
    }

    let target = compact_to_target(prev.bits);
    let scaled = target.full_mul(U256::from(actual as u64)) / U512::from(timespan as u64);
    let mut next_target = U256::try_from(scaled).unwrap_or(params.pow_limit);
    if next_target > params.pow_limit {
        next_target = params.pow_limit;
    }
    target_to_compact(next_target)
}

/// With per-block retargeting every transition is legal; the window algorithm
/// self-regulates. Do not add a bounds check here.
pub fn permitted_transition(
    _params: &Params,
    _height: u64,
    _old_bits: u32,
    _new_bits: u32,
) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compact::decode_compact;
    use consensus_core::BlockHash;

    const STEADY_BITS: u32 = 0x1f7fffff; // pow_limit / 256 on mainnet

    fn build_chain(len: u64, spacing: i64, bits: u32) -> Arc<BlockIndexEntry> {
        let mut node = Arc::new(BlockIndexEntry {
            height: 0,
            time: 1_738_195_200,
            bits,
            block_hash: BlockHash::default(),
            prev: None,
        });
        for h in 1..=len {
            let mut hash = [0u8; 32];
            hash[..8].copy_from_slice(&h.to_le_bytes());
            node = Arc::new(BlockIndexEntry {
                height: h,
                time: 1_738_195_200 + h as i64 * spacing,
                bits,
                block_hash: BlockHash::new(hash),
                prev: Some(node),
            });
        }
        node
    }

    #[test]
    fn test_genesis_only_returns_pow_limit() {
        let params = Params::mainnet();
        let genesis = build_chain(0, 120, STEADY_BITS);
        assert_eq!(
            next_work_required(&genesis, &params),
            target_to_compact(params.pow_limit)
        );
    }

    #[test]
    fn test_single_block_window_returns_pow_limit() {
        let params = Params::mainnet();
        let tip = build_chain(1, 120, STEADY_BITS);
        assert_eq!(
            next_work_required(&tip, &params),
            target_to_compact(params.pow_limit)
        );
    }

    #[test]
    fn test_steady_state_is_idempotent() {
        let params = Params::mainnet();
        // Exactly on-target spacing at constant difficulty keeps the target.
        let tip = build_chain(720, params.pow_target_spacing, STEADY_BITS);
        assert_eq!(next_work_required(&tip, &params), STEADY_BITS);
    }

    #[test]
    fn test_steady_state_holds_for_short_chains() {
        let params = Params::mainnet();
        let tip = build_chain(5, params.pow_target_spacing, STEADY_BITS);
        assert_eq!(next_work_required(&tip, &params), STEADY_BITS);
    }

    #[test]
    fn test_faster_blocks_harden_the_target() {
        let params = Params::mainnet();
        let on_target = build_chain(720, 120, STEADY_BITS);
        let fast = build_chain(720, 60, STEADY_BITS);

        let slow_target = decode_compact(next_work_required(&on_target, &params)).unwrap();
        let fast_target = decode_compact(next_work_required(&fast, &params)).unwrap();
        assert!(fast_target < slow_target);
    }

    #[test]
    fn test_result_stays_within_bounds() {
        let params = Params::mainnet();
        // Zero elapsed time forces the span clamp and a very hard target.
        let tip = build_chain(720, 0, STEADY_BITS);
        let bits = next_work_required(&tip, &params);
        let target = decode_compact(bits).unwrap();
        assert!(target >= U256::one());
        assert!(target <= params.pow_limit);
        assert!(target < decode_compact(STEADY_BITS).unwrap());
    }

    #[test]
    fn test_no_retargeting_short_circuits() {
        let mut params = Params::mainnet();
        params.pow_no_retargeting = true;
        let tip = build_chain(720, 60, STEADY_BITS);
        assert_eq!(next_work_required(&tip, &params), STEADY_BITS);
    }

    #[test]
    fn test_classic_on_target_keeps_bits() {
        let params = Params::mainnet();
        let prev = BlockIndexEntry {
            height: 20159,
            time: 1_738_195_200 + params.pow_target_timespan,
            bits: 0x1e0377ae,
            block_hash: BlockHash::default(),
            prev: None,
        };
        assert_eq!(
            classic_next_work_required(&prev, 1_738_195_200, &params),
            0x1e0377ae
        );
    }

    #[test]
    fn test_classic_clamps_fast_timespan_to_quarter() {
        let params = Params::mainnet();
        let prev = BlockIndexEntry {
            height: 20159,
            time: 1_738_195_200 + 1, // far below timespan / 4
            bits: 0x1e0377ae,
            block_hash: BlockHash::default(),
            prev: None,
        };
        let new_bits = classic_next_work_required(&prev, 1_738_195_200, &params);
        let old_target = decode_compact(0x1e0377ae).unwrap();
        let new_target = decode_compact(new_bits).unwrap();
        assert!(new_target <= old_target / 4);
        assert!(new_target > old_target / 5);
    }

    #[test]
    fn test_classic_slow_timespan_caps_at_pow_limit() {
        let params = Params::mainnet();
        let prev = BlockIndexEntry {
            height: 20159,
            time: 1_738_195_200 + params.pow_target_timespan * 8,
            bits: target_to_compact(params.pow_limit),
            block_hash: BlockHash::default(),
            prev: None,
        };
        // Already at the limit; a 4x slowdown cannot go past it.
        assert_eq!(
            classic_next_work_required(&prev, 1_738_195_200, &params),
            target_to_compact(params.pow_limit)
        );
    }

    #[test]
    fn test_every_transition_is_permitted() {
        let params = Params::mainnet();
        assert!(permitted_transition(&params, 1, 0x207fffff, 0x01010000));
        assert!(permitted_transition(&params, 1, 0x01010000, 0x207fffff));
    }
}
