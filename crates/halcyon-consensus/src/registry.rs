use crate::config::ConsensusConfig;
use crate::error::StakingError;
use crate::slashing::SlashingEvent;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rolling performance aggregates for a validator, refreshed by the
/// performance monitor and consumed by the slashing-condition scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorPerformance {
    /// Uptime percentage (0-100)
    pub uptime_percent: f64,
    /// Rolling average of the behavioral-quality score (0-100)
    pub avg_behavioral_score: f64,
    /// Consensus participation percentage (0-100)
    pub participation_percent: f64,
    /// Blocks proposed over the validator's lifetime
    pub blocks_proposed: u64,
    /// Blocks validated over the validator's lifetime
    pub blocks_validated: u64,
    /// Consensus rounds missed since the last downtime review
    pub missed_consensus_rounds: u32,
}

impl Default for ValidatorPerformance {
    fn default() -> Self {
        ValidatorPerformance {
            uptime_percent: 100.0,
            avg_behavioral_score: 0.0,
            participation_percent: 100.0,
            blocks_proposed: 0,
            blocks_validated: 0,
            missed_consensus_rounds: 0,
        }
    }
}

/// The authoritative validator record.
///
/// Validators are deactivated rather than deleted so their slashing history
/// survives the full lifetime of the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validator {
    /// Unique validator identity
    pub id: String,

    /// Payout address for commissions and block rewards
    pub address: String,

    /// Aggregate stake: own stake plus all delegations
    pub stake: u64,

    /// Behavioral-quality score supplied by the external feed (0-100)
    pub behavioral_score: f64,

    /// Reputation (0-100); new validators start at 100
    pub reputation: f64,

    /// Whether the validator participates in consensus
    pub active: bool,

    /// Commission rate in percent (0-20)
    pub commission_percent: f64,

    /// Timestamp of the last observed activity (seconds since epoch)
    pub last_activity: u64,

    /// Cumulative rewards earned over the validator's lifetime
    pub lifetime_rewards: f64,

    /// Ordered slashing history (append-only)
    pub slashing_events: Vec<SlashingEvent>,

    /// Rolling performance aggregates
    pub performance: ValidatorPerformance,
}

/// Lifecycle of a delegation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakeStatus {
    Active,
    /// Fully withdrawn voluntarily, waiting out the unbonding period
    Unbonding,
    /// Driven to zero by a slashing penalty
    Slashed,
    Withdrawn,
}

/// A single (validator, delegator) stake position. A validator's self-stake
/// is an ordinary entry whose delegator is the validator itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeEntry {
    pub validator: String,
    pub delegator: String,
    pub amount: u64,
    /// Creation or last top-up timestamp (seconds since epoch)
    pub timestamp: u64,
    /// Lockup duration in seconds, measured from `timestamp`
    pub lockup_secs: u64,
    /// Rewards accrued but not yet claimed
    pub pending_rewards: f64,
    pub last_claim: u64,
    /// Behavioral multiplier derived from the validator's score (0.5-1.5)
    pub behavioral_multiplier: f64,
    pub status: StakeStatus,
}

impl StakeEntry {
    /// Seconds remaining until the lockup elapses, zero once free.
    pub fn lockup_remaining(&self, now: u64) -> u64 {
        (self.timestamp + self.lockup_secs).saturating_sub(now)
    }
}

/// Receipt returned on successful undelegation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnstakeReceipt {
    pub validator: String,
    pub delegator: String,
    pub amount: u64,
    /// Unstaking period before funds become liquid, in seconds
    pub unbonding_secs: u64,
}

/// Validator registry and delegation ledger.
///
/// All mutation goes through the single consensus-state owner; query
/// accessors return snapshots, never live references.
pub struct ValidatorRegistry {
    config: ConsensusConfig,
    validators: BTreeMap<String, Validator>,
    stakes: BTreeMap<(String, String), StakeEntry>,
}

impl ValidatorRegistry {
    pub fn new(config: ConsensusConfig) -> Self {
        ValidatorRegistry {
            config,
            validators: BTreeMap::new(),
            stakes: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Register a new validator with an initial self-stake.
    pub fn register_validator(
        &mut self,
        id: &str,
        address: &str,
        initial_stake: u64,
        commission_percent: f64,
        now: u64,
    ) -> Result<(), StakingError> {
        if self.validators.contains_key(id) {
            return Err(StakingError::ValidatorAlreadyExists(id.to_string()));
        }
        if initial_stake < self.config.min_validator_stake {
            return Err(StakingError::BelowMinimumStake {
                amount: initial_stake,
                minimum: self.config.min_validator_stake,
            });
        }
        if !(0.0..=self.config.max_commission_percent).contains(&commission_percent) {
            return Err(StakingError::CommissionOutOfRange(commission_percent));
        }
        let active_count = self.validators.values().filter(|v| v.active).count();
        if active_count >= self.config.max_active_validators {
            return Err(StakingError::CapacityExceeded(
                self.config.max_active_validators,
            ));
        }

        self.validators.insert(
            id.to_string(),
            Validator {
                id: id.to_string(),
                address: address.to_string(),
                stake: initial_stake,
                behavioral_score: 0.0,
                reputation: 100.0,
                active: true,
                commission_percent,
                last_activity: now,
                lifetime_rewards: 0.0,
                slashing_events: Vec::new(),
                performance: ValidatorPerformance::default(),
            },
        );

        // Self-stake is an ordinary ledger entry with the standard lockup.
        self.stakes.insert(
            (id.to_string(), id.to_string()),
            StakeEntry {
                validator: id.to_string(),
                delegator: id.to_string(),
                amount: initial_stake,
                timestamp: now,
                lockup_secs: self.config.lockup_secs,
                pending_rewards: 0.0,
                last_claim: now,
                behavioral_multiplier: 0.5,
                status: StakeStatus::Active,
            },
        );

        info!(
            "Registered validator {} with stake {} and commission {}%",
            id, initial_stake, commission_percent
        );
        Ok(())
    }

    /// Delegate stake to an active validator. Repeated delegation merges into
    /// the existing entry and refreshes its timestamp.
    pub fn delegate(
        &mut self,
        validator_id: &str,
        delegator: &str,
        amount: u64,
        lockup_secs: u64,
        now: u64,
    ) -> Result<(), StakingError> {
        if amount < self.config.min_delegation {
            return Err(StakingError::BelowMinimumDelegation {
                amount,
                minimum: self.config.min_delegation,
            });
        }
        let validator = self
            .validators
            .get_mut(validator_id)
            .ok_or_else(|| StakingError::ValidatorNotFound(validator_id.to_string()))?;
        if !validator.active {
            return Err(StakingError::ValidatorInactive(validator_id.to_string()));
        }

        let multiplier = behavioral_multiplier(validator.behavioral_score);
        let key = (validator_id.to_string(), delegator.to_string());
        let entry = self.stakes.entry(key).or_insert_with(|| StakeEntry {
            validator: validator_id.to_string(),
            delegator: delegator.to_string(),
            amount: 0,
            timestamp: now,
            lockup_secs,
            pending_rewards: 0.0,
            last_claim: now,
            behavioral_multiplier: multiplier,
            status: StakeStatus::Active,
        });
        entry.amount = entry.amount.saturating_add(amount);
        entry.timestamp = now;
        entry.lockup_secs = lockup_secs;
        entry.status = StakeStatus::Active;
        entry.behavioral_multiplier = multiplier;

        validator.stake = validator.stake.saturating_add(amount);
        debug!(
            "Delegated {} from {} to validator {} (aggregate stake {})",
            amount, delegator, validator_id, validator.stake
        );
        Ok(())
    }

    /// Withdraw delegated stake once its lockup has elapsed.
    pub fn undelegate(
        &mut self,
        validator_id: &str,
        delegator: &str,
        amount: u64,
        now: u64,
    ) -> Result<UnstakeReceipt, StakingError> {
        let key = (validator_id.to_string(), delegator.to_string());
        let entry = self
            .stakes
            .get_mut(&key)
            .ok_or_else(|| StakingError::StakeEntryNotFound {
                validator: validator_id.to_string(),
                delegator: delegator.to_string(),
            })?;

        if amount > entry.amount {
            return Err(StakingError::InsufficientStake {
                requested: amount,
                available: entry.amount,
            });
        }
        let remaining = entry.lockup_remaining(now);
        if remaining > 0 {
            return Err(StakingError::LockupActive {
                remaining_secs: remaining,
            });
        }

        entry.amount -= amount;
        if entry.amount == 0 {
            entry.status = StakeStatus::Unbonding;
        }

        if let Some(validator) = self.validators.get_mut(validator_id) {
            validator.stake = validator.stake.saturating_sub(amount);
            if validator.stake < self.config.min_validator_stake && validator.active {
                validator.active = false;
                warn!(
                    "Validator {} deactivated: stake {} fell below minimum {}",
                    validator_id, validator.stake, self.config.min_validator_stake
                );
            }
        }

        Ok(UnstakeReceipt {
            validator: validator_id.to_string(),
            delegator: delegator.to_string(),
            amount,
            unbonding_secs: self.config.unbonding_secs,
        })
    }

    /// Claim accrued rewards across all of a delegator's active entries,
    /// optionally restricted to one validator.
    pub fn claim_rewards(
        &mut self,
        delegator: &str,
        validator_filter: Option<&str>,
        now: u64,
    ) -> Result<f64, StakingError> {
        let mut total = 0.0;
        for entry in self.stakes.values_mut() {
            if entry.delegator != delegator || entry.status != StakeStatus::Active {
                continue;
            }
            if let Some(filter) = validator_filter {
                if entry.validator != filter {
                    continue;
                }
            }
            if entry.pending_rewards > 0.0 {
                total += entry.pending_rewards;
                entry.pending_rewards = 0.0;
                entry.last_claim = now;
            }
        }
        if total <= 0.0 {
            return Err(StakingError::NoRewardsToClaim(delegator.to_string()));
        }
        info!("Delegator {} claimed {:.4} in rewards", delegator, total);
        Ok(total)
    }

    /// Apply a behavioral-quality score from the external feed and refresh
    /// the delegation multipliers derived from it.
    pub fn update_behavioral_score(
        &mut self,
        validator_id: &str,
        score: f64,
        now: u64,
    ) -> Result<(), StakingError> {
        if !(0.0..=100.0).contains(&score) {
            return Err(StakingError::ScoreOutOfRange(score));
        }
        let validator = self
            .validators
            .get_mut(validator_id)
            .ok_or_else(|| StakingError::ValidatorNotFound(validator_id.to_string()))?;
        validator.behavioral_score = score;
        validator.last_activity = now;

        let multiplier = behavioral_multiplier(score);
        for entry in self.stakes.values_mut() {
            if entry.validator == validator_id {
                entry.behavioral_multiplier = multiplier;
            }
        }
        Ok(())
    }

    /// A validator may participate in consensus iff it is active, fully
    /// staked, behaviorally sound, and reputable.
    pub fn is_eligible(&self, validator_id: &str) -> bool {
        match self.validators.get(validator_id) {
            Some(v) => {
                v.active
                    && v.stake >= self.config.min_validator_stake
                    && v.behavioral_score >= self.config.behavioral_threshold
                    && v.reputation >= self.config.min_reputation
            }
            None => false,
        }
    }

    pub fn validator(&self, id: &str) -> Option<Validator> {
        self.validators.get(id).cloned()
    }

    pub(crate) fn validator_mut(&mut self, id: &str) -> Option<&mut Validator> {
        self.validators.get_mut(id)
    }

    /// Snapshot of all validators.
    pub fn validators(&self) -> Vec<Validator> {
        self.validators.values().cloned().collect()
    }

    /// Snapshot of the currently active validator set.
    pub fn active_validators(&self) -> Vec<Validator> {
        self.validators.values().filter(|v| v.active).cloned().collect()
    }

    /// Snapshot of all stake entries for one validator.
    pub fn stake_entries_for(&self, validator_id: &str) -> Vec<StakeEntry> {
        self.stakes
            .values()
            .filter(|e| e.validator == validator_id)
            .cloned()
            .collect()
    }

    /// Snapshot of all stake entries held by one delegator.
    pub fn stake_entries_by(&self, delegator: &str) -> Vec<StakeEntry> {
        self.stakes
            .values()
            .filter(|e| e.delegator == delegator)
            .cloned()
            .collect()
    }

    pub(crate) fn stake_entries_for_mut(
        &mut self,
        validator_id: &str,
    ) -> impl Iterator<Item = &mut StakeEntry> {
        let validator_id = validator_id.to_string();
        self.stakes
            .values_mut()
            .filter(move |e| e.validator == validator_id)
    }

    pub fn total_active_stake(&self) -> u64 {
        self.validators
            .values()
            .filter(|v| v.active)
            .map(|v| v.stake)
            .sum()
    }

    /// Record proposal/validation activity driven by accepted blocks.
    pub fn record_block_activity(&mut self, proposer: &str, now: u64) {
        if let Some(v) = self.validators.get_mut(proposer) {
            v.performance.blocks_proposed += 1;
            v.last_activity = now;
        }
    }

    /// Record attestation activity for a validator that took part in
    /// accepting a block it did not propose.
    pub fn record_validation_activity(&mut self, validator_id: &str, now: u64) {
        if let Some(v) = self.validators.get_mut(validator_id) {
            v.performance.blocks_validated += 1;
            v.last_activity = now;
        }
    }

    /// Record missed consensus rounds reported by the participation tracker.
    pub fn record_missed_rounds(&mut self, validator_id: &str, rounds: u32) {
        if let Some(v) = self.validators.get_mut(validator_id) {
            v.performance.missed_consensus_rounds =
                v.performance.missed_consensus_rounds.saturating_add(rounds);
        }
    }

    /// Refresh rolling performance aggregates for every validator.
    ///
    /// Validators with no observed activity inside the inactivity window
    /// have their uptime decayed; responsive validators recover toward full
    /// uptime. The behavioral average tracks the feed with a slow EMA.
    pub fn refresh_performance(&mut self, now: u64, inactivity_window_secs: u64) {
        for v in self.validators.values_mut() {
            if !v.active {
                continue;
            }
            let perf = &mut v.performance;
            if perf.avg_behavioral_score == 0.0 {
                perf.avg_behavioral_score = v.behavioral_score;
            } else {
                perf.avg_behavioral_score =
                    0.9 * perf.avg_behavioral_score + 0.1 * v.behavioral_score;
            }

            if now.saturating_sub(v.last_activity) > inactivity_window_secs {
                perf.uptime_percent = (perf.uptime_percent - 5.0).max(0.0);
                debug!(
                    "Validator {} inactive since {}, uptime decayed to {:.1}%",
                    v.id, v.last_activity, perf.uptime_percent
                );
            } else {
                perf.uptime_percent = (perf.uptime_percent + 1.0).min(100.0);
            }

            let total_rounds = perf.blocks_proposed
                + perf.blocks_validated
                + perf.missed_consensus_rounds as u64;
            if total_rounds > 0 {
                perf.participation_percent = 100.0
                    * (perf.blocks_proposed + perf.blocks_validated) as f64
                    / total_rounds as f64;
            }
        }
    }
}

/// Delegation reward multiplier derived from the validator's behavioral
/// score: `clamp(score / 100, 0.5, 1.5)`.
pub fn behavioral_multiplier(score: f64) -> f64 {
    (score / 100.0).clamp(0.5, 1.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: u64 = 24 * 3600;

    fn registry() -> ValidatorRegistry {
        ValidatorRegistry::new(ConsensusConfig::default())
    }

    #[test]
    fn registration_enforces_minimum_stake() {
        let mut reg = registry();
        let err = reg
            .register_validator("v1", "addr1", 40_000, 10.0, 0)
            .unwrap_err();
        assert_eq!(
            err,
            StakingError::BelowMinimumStake {
                amount: 40_000,
                minimum: 50_000
            }
        );
        assert!(reg.register_validator("v1", "addr1", 60_000, 10.0, 0).is_ok());
        let v = reg.validator("v1").unwrap();
        assert_eq!(v.reputation, 100.0);
        assert_eq!(v.stake, 60_000);
    }

    #[test]
    fn registration_rejects_duplicates_and_bad_commission() {
        let mut reg = registry();
        reg.register_validator("v1", "addr1", 60_000, 5.0, 0).unwrap();
        assert_eq!(
            reg.register_validator("v1", "addr1", 60_000, 5.0, 0),
            Err(StakingError::ValidatorAlreadyExists("v1".to_string()))
        );
        assert_eq!(
            reg.register_validator("v2", "addr2", 60_000, 25.0, 0),
            Err(StakingError::CommissionOutOfRange(25.0))
        );
    }

    #[test]
    fn registration_stops_at_the_active_set_cap() {
        let mut config = ConsensusConfig::default();
        config.max_active_validators = 2;
        let mut reg = ValidatorRegistry::new(config);
        reg.register_validator("v1", "addr1", 60_000, 5.0, 0).unwrap();
        reg.register_validator("v2", "addr2", 60_000, 5.0, 0).unwrap();
        assert_eq!(
            reg.register_validator("v3", "addr3", 60_000, 5.0, 0),
            Err(StakingError::CapacityExceeded(2))
        );

        // Only active validators count against the cap.
        reg.validator_mut("v1").unwrap().active = false;
        assert!(reg.register_validator("v3", "addr3", 60_000, 5.0, 0).is_ok());
    }

    #[test]
    fn self_stake_entry_is_created_with_lockup() {
        let mut reg = registry();
        reg.register_validator("v1", "addr1", 60_000, 5.0, 100).unwrap();
        let entries = reg.stake_entries_for("v1");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].delegator, "v1");
        assert_eq!(entries[0].amount, 60_000);
        assert_eq!(entries[0].lockup_secs, 21 * DAY);
    }

    #[test]
    fn delegation_merges_and_raises_aggregate_stake() {
        let mut reg = registry();
        reg.register_validator("v1", "addr1", 60_000, 5.0, 0).unwrap();
        reg.delegate("v1", "d1", 5_000, 7 * DAY, 10).unwrap();
        reg.delegate("v1", "d1", 2_000, 7 * DAY, 20).unwrap();

        let v = reg.validator("v1").unwrap();
        assert_eq!(v.stake, 67_000);

        let entries = reg.stake_entries_by("d1");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, 7_000);
        assert_eq!(entries[0].timestamp, 20);
    }

    #[test]
    fn delegation_below_minimum_fails() {
        let mut reg = registry();
        reg.register_validator("v1", "addr1", 60_000, 5.0, 0).unwrap();
        assert_eq!(
            reg.delegate("v1", "d1", 500, DAY, 0),
            Err(StakingError::BelowMinimumDelegation {
                amount: 500,
                minimum: 1_000
            })
        );
    }

    #[test]
    fn undelegate_before_lockup_fails_and_leaves_state_unchanged() {
        let mut reg = registry();
        reg.register_validator("v1", "addr1", 60_000, 5.0, 0).unwrap();
        reg.delegate("v1", "d1", 5_000, 21 * DAY, 0).unwrap();

        let err = reg.undelegate("v1", "d1", 5_000, 100).unwrap_err();
        match err {
            StakingError::LockupActive { remaining_secs } => {
                assert_eq!(remaining_secs, 21 * DAY - 100);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(reg.validator("v1").unwrap().stake, 65_000);
        assert_eq!(reg.stake_entries_by("d1")[0].amount, 5_000);
    }

    #[test]
    fn undelegate_after_lockup_reports_unbonding_period() {
        let mut reg = registry();
        reg.register_validator("v1", "addr1", 60_000, 5.0, 0).unwrap();
        reg.delegate("v1", "d1", 5_000, DAY, 0).unwrap();

        let receipt = reg.undelegate("v1", "d1", 5_000, DAY + 1).unwrap();
        assert_eq!(receipt.amount, 5_000);
        assert_eq!(receipt.unbonding_secs, 21 * DAY);
        assert_eq!(reg.stake_entries_by("d1")[0].status, StakeStatus::Unbonding);
        assert_eq!(reg.validator("v1").unwrap().stake, 60_000);
    }

    #[test]
    fn partial_undelegate_keeps_entry_active() {
        let mut reg = registry();
        reg.register_validator("v1", "addr1", 60_000, 5.0, 0).unwrap();
        reg.delegate("v1", "d1", 5_000, DAY, 0).unwrap();
        reg.undelegate("v1", "d1", 2_000, DAY + 1).unwrap();
        let entry = &reg.stake_entries_by("d1")[0];
        assert_eq!(entry.amount, 3_000);
        assert_eq!(entry.status, StakeStatus::Active);
    }

    #[test]
    fn claim_without_accrual_fails() {
        let mut reg = registry();
        reg.register_validator("v1", "addr1", 60_000, 5.0, 0).unwrap();
        reg.delegate("v1", "d1", 5_000, DAY, 0).unwrap();
        assert_eq!(
            reg.claim_rewards("d1", None, 10),
            Err(StakingError::NoRewardsToClaim("d1".to_string()))
        );
    }

    #[test]
    fn score_update_refreshes_multipliers() {
        let mut reg = registry();
        reg.register_validator("v1", "addr1", 60_000, 5.0, 0).unwrap();
        reg.delegate("v1", "d1", 5_000, DAY, 0).unwrap();

        reg.update_behavioral_score("v1", 90.0, 50).unwrap();
        for entry in reg.stake_entries_for("v1") {
            assert_eq!(entry.behavioral_multiplier, 0.9);
        }
        assert_eq!(reg.validator("v1").unwrap().last_activity, 50);

        // Clamped at both ends
        reg.update_behavioral_score("v1", 20.0, 60).unwrap();
        assert_eq!(reg.stake_entries_by("d1")[0].behavioral_multiplier, 0.5);
    }

    #[test]
    fn eligibility_requires_all_conditions() {
        let mut reg = registry();
        reg.register_validator("v1", "addr1", 60_000, 5.0, 0).unwrap();
        assert!(!reg.is_eligible("v1")); // score still 0

        reg.update_behavioral_score("v1", 80.0, 0).unwrap();
        assert!(reg.is_eligible("v1"));

        reg.validator_mut("v1").unwrap().reputation = 40.0;
        assert!(!reg.is_eligible("v1"));
    }

    #[test]
    fn validation_activity_feeds_participation() {
        let mut reg = registry();
        reg.register_validator("v1", "addr1", 60_000, 5.0, 0).unwrap();
        reg.record_validation_activity("v1", 10);
        reg.record_validation_activity("v1", 20);
        reg.record_missed_rounds("v1", 2);
        reg.refresh_performance(30, DAY);

        let v = reg.validator("v1").unwrap();
        assert_eq!(v.performance.blocks_validated, 2);
        assert_eq!(v.last_activity, 20);
        assert!((v.performance.participation_percent - 50.0).abs() < 1e-9);
    }

    #[test]
    fn multiplier_clamps() {
        assert_eq!(behavioral_multiplier(0.0), 0.5);
        assert_eq!(behavioral_multiplier(75.0), 0.75);
        assert_eq!(behavioral_multiplier(100.0), 1.0);
    }
}
