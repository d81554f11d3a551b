use crate::registry::{StakeStatus, ValidatorRegistry};
use crate::weight::{adjusted_weight, WeightAdjuster};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable record of one epoch's reward distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardDistribution {
    pub epoch: u64,
    pub timestamp: u64,
    /// Base pool plus behavioral-bonus pool
    pub total_pool: f64,
    /// Commission credited to each validator
    pub validator_rewards: BTreeMap<String, f64>,
    /// Share credited to each delegator across all its entries
    pub delegator_rewards: BTreeMap<String, f64>,
    /// Flat behavioral bonus credited to each qualifying validator
    pub behavioral_bonuses: BTreeMap<String, f64>,
    pub base_pool: f64,
    pub bonus_pool: f64,
}

/// Epoch reward engine.
///
/// Runs once per epoch under the consensus-state owner. Weight-proportional
/// shares of the base pool are modulated by behavioral quality, split between
/// validator commission and delegators, and recorded as an immutable
/// `RewardDistribution`.
pub struct RewardEngine {
    next_epoch: u64,
    history: Vec<RewardDistribution>,
}

impl RewardEngine {
    pub fn new() -> Self {
        RewardEngine {
            next_epoch: 0,
            history: Vec::new(),
        }
    }

    /// Distribute the epoch pool across the active validator set.
    pub fn distribute_epoch(
        &mut self,
        registry: &mut ValidatorRegistry,
        adjuster: Option<&dyn WeightAdjuster>,
        now: u64,
    ) -> RewardDistribution {
        let config = registry.config().clone();
        let epoch = self.next_epoch;
        self.next_epoch += 1;

        let mut distribution = RewardDistribution {
            epoch,
            timestamp: now,
            total_pool: config.base_reward_pool + config.behavioral_bonus_pool,
            validator_rewards: BTreeMap::new(),
            delegator_rewards: BTreeMap::new(),
            behavioral_bonuses: BTreeMap::new(),
            base_pool: config.base_reward_pool,
            bonus_pool: config.behavioral_bonus_pool,
        };

        let active = registry.active_validators();
        let weights: Vec<(String, f64)> = active
            .iter()
            .map(|v| {
                (
                    v.id.clone(),
                    adjusted_weight(v, config.behavioral_threshold, adjuster),
                )
            })
            .collect();
        let total_weight: f64 = weights.iter().map(|(_, w)| w).sum();

        if active.is_empty() || total_weight <= 0.0 {
            info!("Epoch {}: no weighted active validators, nothing to distribute", epoch);
            self.history.push(distribution.clone());
            return distribution;
        }

        let mut bonus_remaining = config.behavioral_bonus_pool;

        for (validator_id, weight) in &weights {
            let base_reward = (weight / total_weight) * config.base_reward_pool;
            let (score, commission_percent) = match registry.validator(validator_id) {
                Some(v) => (v.behavioral_score, v.commission_percent),
                None => continue,
            };

            let multiplier = behavioral_reward_multiplier(score, config.behavioral_threshold);
            let adjusted_reward = base_reward * multiplier;

            let commission = adjusted_reward * commission_percent / 100.0;
            let delegator_share = adjusted_reward - commission;

            // Delegator share is split across active entries weighted by
            // amount x behavioral multiplier.
            let entry_weights: Vec<(String, f64)> = registry
                .stake_entries_for(validator_id)
                .into_iter()
                .filter(|e| e.status == StakeStatus::Active && e.amount > 0)
                .map(|e| (e.delegator.clone(), e.amount as f64 * e.behavioral_multiplier))
                .collect();
            let entry_total: f64 = entry_weights.iter().map(|(_, w)| w).sum();

            let mut validator_credit = commission;
            if entry_total > 0.0 {
                for (delegator, entry_weight) in &entry_weights {
                    let share = delegator_share * entry_weight / entry_total;
                    for entry in registry.stake_entries_for_mut(validator_id) {
                        if &entry.delegator == delegator && entry.status == StakeStatus::Active {
                            entry.pending_rewards += share;
                        }
                    }
                    *distribution
                        .delegator_rewards
                        .entry(delegator.clone())
                        .or_insert(0.0) += share;
                }
            } else {
                // No live entries to pay; the whole reward stays with the
                // validator.
                validator_credit += delegator_share;
            }

            // Flat behavioral bonus for clearly above-threshold validators,
            // funded by (and capped at) the bonus pool.
            let mut bonus = 0.0;
            if score > config.behavioral_threshold + 10.0 {
                bonus = ((score - config.behavioral_threshold) * 100.0).min(bonus_remaining);
                bonus_remaining -= bonus;
                distribution
                    .behavioral_bonuses
                    .insert(validator_id.clone(), bonus);
            }

            if let Some(v) = registry.validator_mut(validator_id) {
                v.lifetime_rewards += validator_credit + bonus;
            }
            distribution
                .validator_rewards
                .insert(validator_id.clone(), validator_credit);

            debug!(
                "Epoch {}: validator {} base {:.2} x{:.3} -> commission {:.2}, delegators {:.2}, bonus {:.2}",
                epoch, validator_id, base_reward, multiplier, commission, delegator_share, bonus
            );
        }

        info!(
            "Epoch {} distributed: {:.2} to validators, {:.2} to delegators, {:.2} in bonuses",
            epoch,
            distribution.validator_rewards.values().sum::<f64>(),
            distribution.delegator_rewards.values().sum::<f64>(),
            distribution.behavioral_bonuses.values().sum::<f64>(),
        );

        self.history.push(distribution.clone());
        distribution
    }

    /// All recorded distributions, oldest first.
    pub fn history(&self) -> &[RewardDistribution] {
        &self.history
    }

    pub fn current_epoch(&self) -> u64 {
        self.next_epoch
    }
}

impl Default for RewardEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Behavioral modulation of the base reward: up to -50% proportional to the
/// shortfall below the threshold, up to +30% proportional to the surplus
/// above it.
pub fn behavioral_reward_multiplier(score: f64, threshold: f64) -> f64 {
    if score < threshold {
        1.0 - 0.5 * (threshold - score) / threshold
    } else {
        1.0 + 0.3 * (score - threshold) / (100.0 - threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsensusConfig;
    use approx::assert_relative_eq;

    fn setup() -> (ValidatorRegistry, RewardEngine) {
        (
            ValidatorRegistry::new(ConsensusConfig::default()),
            RewardEngine::new(),
        )
    }

    #[test]
    fn multiplier_endpoints() {
        assert_relative_eq!(behavioral_reward_multiplier(0.0, 75.0), 0.5);
        assert_relative_eq!(behavioral_reward_multiplier(75.0, 75.0), 1.0);
        assert_relative_eq!(behavioral_reward_multiplier(100.0, 75.0), 1.3);
    }

    #[test]
    fn base_pool_splits_proportionally_to_weight() {
        let (mut reg, mut engine) = setup();
        // Equal reputation and at-threshold scores so weights reduce to
        // sqrt(stake): 100_000 -> ~316.2, 900_000 -> ~948.7 (ratio 1:3).
        reg.register_validator("v1", "a1", 100_000, 0.0, 0).unwrap();
        reg.register_validator("v2", "a2", 900_000, 0.0, 0).unwrap();
        reg.update_behavioral_score("v1", 75.0, 0).unwrap();
        reg.update_behavioral_score("v2", 75.0, 0).unwrap();

        let dist = engine.distribute_epoch(&mut reg, None, 100);

        // Zero commission: everything lands on the self-stake entries.
        let d1 = dist.delegator_rewards["v1"];
        let d2 = dist.delegator_rewards["v2"];
        assert_relative_eq!(d1, 25_000.0, epsilon = 1e-6);
        assert_relative_eq!(d2, 75_000.0, epsilon = 1e-6);
    }

    #[test]
    fn commission_and_delegators_partition_the_reward() {
        let (mut reg, mut engine) = setup();
        reg.register_validator("v1", "a1", 100_000, 10.0, 0).unwrap();
        reg.update_behavioral_score("v1", 75.0, 0).unwrap();
        reg.delegate("v1", "d1", 50_000, 3600, 0).unwrap();

        let dist = engine.distribute_epoch(&mut reg, None, 100);

        let commission = dist.validator_rewards["v1"];
        let delegated: f64 = dist.delegator_rewards.values().sum();
        // Single validator at threshold: adjusted reward is the whole pool.
        assert_relative_eq!(commission + delegated, 100_000.0, epsilon = 1e-6);
        assert_relative_eq!(commission, 10_000.0, epsilon = 1e-6);
    }

    #[test]
    fn delegator_split_weights_amount_by_multiplier() {
        let (mut reg, mut engine) = setup();
        reg.register_validator("v1", "a1", 100_000, 0.0, 0).unwrap();
        reg.update_behavioral_score("v1", 75.0, 0).unwrap();
        reg.delegate("v1", "d1", 100_000, 3600, 0).unwrap();

        let dist = engine.distribute_epoch(&mut reg, None, 100);

        // Self-stake and d1 hold equal amounts and identical multipliers,
        // so they split the delegator share evenly.
        assert_relative_eq!(
            dist.delegator_rewards["v1"],
            dist.delegator_rewards["d1"],
            epsilon = 1e-6
        );
    }

    #[test]
    fn below_threshold_reward_is_cut() {
        let (mut reg, mut engine) = setup();
        reg.register_validator("v1", "a1", 100_000, 0.0, 0).unwrap();
        reg.update_behavioral_score("v1", 37.5, 0).unwrap();

        let dist = engine.distribute_epoch(&mut reg, None, 100);
        let total: f64 = dist.delegator_rewards.values().sum::<f64>()
            + dist.validator_rewards.values().sum::<f64>();
        // Halfway to the threshold costs a quarter of the reward.
        assert_relative_eq!(total, 75_000.0, epsilon = 1e-6);
    }

    #[test]
    fn flat_bonus_requires_clear_surplus() {
        let (mut reg, mut engine) = setup();
        reg.register_validator("v1", "a1", 100_000, 0.0, 0).unwrap();
        reg.register_validator("v2", "a2", 100_000, 0.0, 0).unwrap();
        reg.update_behavioral_score("v1", 95.0, 0).unwrap();
        reg.update_behavioral_score("v2", 80.0, 0).unwrap(); // surplus but <= threshold + 10

        let dist = engine.distribute_epoch(&mut reg, None, 100);
        assert_relative_eq!(dist.behavioral_bonuses["v1"], 2_000.0, epsilon = 1e-9);
        assert!(!dist.behavioral_bonuses.contains_key("v2"));

        let v1 = reg.validator("v1").unwrap();
        assert!(v1.lifetime_rewards >= 2_000.0);
    }

    #[test]
    fn claims_drain_accrued_rewards() {
        let (mut reg, mut engine) = setup();
        reg.register_validator("v1", "a1", 100_000, 0.0, 0).unwrap();
        reg.update_behavioral_score("v1", 75.0, 0).unwrap();
        reg.delegate("v1", "d1", 50_000, 3600, 0).unwrap();
        engine.distribute_epoch(&mut reg, None, 100);

        let claimed = reg.claim_rewards("d1", Some("v1"), 200).unwrap();
        assert!(claimed > 0.0);
        assert_eq!(
            reg.claim_rewards("d1", Some("v1"), 300),
            Err(crate::error::StakingError::NoRewardsToClaim("d1".to_string()))
        );
    }

    #[test]
    fn empty_active_set_records_empty_distribution() {
        let (mut reg, mut engine) = setup();
        let dist = engine.distribute_epoch(&mut reg, None, 100);
        assert!(dist.validator_rewards.is_empty());
        assert_eq!(engine.history().len(), 1);
        assert_eq!(engine.current_epoch(), 1);
    }
}
