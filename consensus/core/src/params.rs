use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// RandomX seed schedule policy.
///
/// The deployed network pins every block to the genesis seed: rotating seeds
/// at epoch boundaries lets nodes on different forks disagree about the seed
/// block, which turns a temporary fork into a permanent one on a young chain.
/// The rotating schedule is kept selectable for networks willing to take that
/// trade for better ASIC resistance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedRotation {
    /// Epoch-based rotation: seed block advances every 2048 blocks, lagged 64.
    Rotating,
    /// Every block keyed to the genesis seed.
    #[default]
    FixedGenesis,
}

/// Consensus parameters consumed by the proof-of-work subsystem.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Params {
    /// Highest (easiest) admissible target.
    pub pow_limit: U256,
    /// Target seconds between blocks.
    pub pow_target_spacing: i64,
    /// Retarget period for the legacy adjustment path, in seconds.
    pub pow_target_timespan: i64,
    /// Number of recent blocks the difficulty window considers.
    pub difficulty_window: usize,
    /// Outlier timestamps trimmed from each end of the sorted window.
    pub difficulty_cut: usize,
    /// When set, every block inherits its parent's bits unchanged.
    pub pow_no_retargeting: bool,
    /// RandomX seed schedule.
    pub seed_rotation: SeedRotation,
}

impl Params {
    /// Main network parameters.
    pub fn mainnet() -> Self {
        Self {
            // Matches the genesis bits 0x207fffff.
            pow_limit: U256::from(0x007f_ffff) << 232,
            pow_target_spacing: 120,
            pow_target_timespan: 120,
            difficulty_window: 720,
            difficulty_cut: 60,
            pow_no_retargeting: false,
            seed_rotation: SeedRotation::FixedGenesis,
        }
    }

    /// Regression-test parameters: near-unlimited target, no retargeting.
    pub fn regtest() -> Self {
        Self {
            pow_limit: (U256::one() << 255) - 1,
            pow_target_spacing: 120,
            pow_target_timespan: 120,
            difficulty_window: 720,
            difficulty_cut: 60,
            pow_no_retargeting: true,
            seed_rotation: SeedRotation::FixedGenesis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mainnet_sanity() {
        let params = Params::mainnet();
        // timespan is an even multiple of spacing
        assert_eq!(params.pow_target_timespan % params.pow_target_spacing, 0);
        assert!(params.difficulty_window > 2 * params.difficulty_cut);
        assert!(!params.pow_limit.is_zero());
    }

    #[test]
    fn test_regtest_limit_is_half_range() {
        let params = Params::regtest();
        assert_eq!(params.pow_limit, (U256::one() << 255) - 1);
        assert!(params.pow_no_retargeting);
    }

    #[test]
    fn test_seed_rotation_default_is_fixed() {
        assert_eq!(SeedRotation::default(), SeedRotation::FixedGenesis);
    }
}
