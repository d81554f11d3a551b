use serde::{Deserialize, Serialize};

/// Protocol constants for the staking and fork-resolution core.
///
/// These parameters are locked at node initialization; changing them on a
/// live network requires coordinated rollout, so they are carried in one
/// struct rather than scattered as module constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Minimum self-stake required to register as a validator.
    ///
    /// Operator-confirmable: historical deployments used both 10,000 and
    /// 50,000. The default follows the current network parameters.
    pub min_validator_stake: u64,

    /// Minimum amount for a single delegation
    pub min_delegation: u64,

    /// Maximum number of simultaneously active validators
    pub max_active_validators: usize,

    /// Maximum validator commission, in percent
    pub max_commission_percent: f64,

    /// Lockup applied to self-stake and delegations, in seconds (21 days)
    pub lockup_secs: u64,

    /// Unbonding period reported on successful undelegation, in seconds
    pub unbonding_secs: u64,

    /// Behavioral-quality score required for consensus participation (0-100)
    pub behavioral_threshold: f64,

    /// Reputation floor for consensus eligibility (0-100)
    pub min_reputation: f64,

    /// Base token pool distributed each epoch
    pub base_reward_pool: f64,

    /// Behavioral-bonus token pool available each epoch
    pub behavioral_bonus_pool: f64,

    /// Flat block reward credited to a proposer
    pub block_reward_base: f64,

    /// Extra block reward per behavioral-score point above the threshold
    pub block_reward_coefficient: f64,

    /// Minimum interval between two slashes of the same offense kind on the
    /// same validator, in seconds
    pub offense_cooldown_secs: u64,

    /// Number of recent heights marked disputed on partition entry
    pub partition_dispute_window: u64,

    /// Age limit for re-resolving unresolved forks during partition healing,
    /// in seconds
    pub partition_heal_window_secs: u64,

    /// Tolerated future clock skew on block timestamps, in seconds
    pub clock_skew_tolerance_secs: u64,

    /// Validators with no activity for this long are decayed by the
    /// performance monitor, in seconds
    pub inactivity_window_secs: u64,

    /// Cadence of the slashing-condition scan, in seconds
    pub slashing_scan_secs: u64,

    /// Cadence of epoch reward distribution, in seconds
    pub epoch_secs: u64,

    /// Cadence of the performance monitor, in seconds
    pub performance_scan_secs: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            min_validator_stake: 50_000,
            min_delegation: 1_000,
            max_active_validators: 101,
            max_commission_percent: 20.0,
            lockup_secs: 21 * 24 * 3600,
            unbonding_secs: 21 * 24 * 3600,
            behavioral_threshold: 75.0,
            min_reputation: 50.0,
            base_reward_pool: 100_000.0,
            behavioral_bonus_pool: 50_000.0,
            block_reward_base: 50.0,
            block_reward_coefficient: 0.4,
            offense_cooldown_secs: 3_600,
            partition_dispute_window: 10,
            partition_heal_window_secs: 3_600,
            clock_skew_tolerance_secs: 30,
            inactivity_window_secs: 3_600,
            slashing_scan_secs: 60,
            epoch_secs: 300,
            performance_scan_secs: 3_600,
        }
    }
}

impl ConsensusConfig {
    /// Per-proposer reward for a block with the given behavioral score.
    pub fn block_reward(&self, behavioral_score: f64) -> f64 {
        let surplus = (behavioral_score - self.behavioral_threshold).max(0.0);
        self.block_reward_base + surplus * self.block_reward_coefficient
    }
}
