use crate::config::ConsensusConfig;
use crate::error::{ForkError, StakingError};
use crate::fork::{BlockOutcome, ChainIntegrityReport, ForkInfo, ForkResolution, ForkResolver};
use crate::registry::{StakeEntry, UnstakeReceipt, Validator, ValidatorPerformance, ValidatorRegistry};
use crate::rewards::{RewardDistribution, RewardEngine};
use crate::slashing::{OffenseObservation, SlashingEngine, SlashingEvent};
use crate::weight::WeightAdjuster;
use chrono::Utc;
use halcyon_core::{Block, BlockStore, TransactionPool};
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// The single owner of all consensus state.
///
/// Every intake path (block arrival, staking operations, scheduled jobs)
/// goes through one `Mutex<ConsensusState>`, so a slash can never observe a
/// half-applied reward distribution and a reorg can never race a revert.
/// Only block-storage and pool calls suspend; the staking arithmetic runs to
/// completion inside the exclusive region.
pub struct ConsensusState {
    config: ConsensusConfig,
    registry: ValidatorRegistry,
    slashing: SlashingEngine,
    rewards: RewardEngine,
    forks: ForkResolver,
    adjuster: Option<Box<dyn WeightAdjuster>>,
    store: Arc<dyn BlockStore>,
}

impl ConsensusState {
    pub fn new(
        config: ConsensusConfig,
        store: Arc<dyn BlockStore>,
        pool: Arc<TransactionPool>,
    ) -> Self {
        ConsensusState {
            registry: ValidatorRegistry::new(config.clone()),
            slashing: SlashingEngine::new(),
            rewards: RewardEngine::new(),
            forks: ForkResolver::new(config.clone(), store.clone(), pool),
            adjuster: None,
            store,
            config,
        }
    }

    /// Install an advisory weight adjuster. Absent one, unadjusted weights
    /// are used everywhere.
    pub fn set_weight_adjuster(&mut self, adjuster: Box<dyn WeightAdjuster>) {
        self.adjuster = Some(adjuster);
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    fn now() -> u64 {
        Utc::now().timestamp() as u64
    }

    // --- Staking surface ---

    pub fn register_validator(
        &mut self,
        id: &str,
        address: &str,
        initial_stake: u64,
        commission_percent: f64,
    ) -> Result<(), StakingError> {
        self.registry
            .register_validator(id, address, initial_stake, commission_percent, Self::now())
    }

    pub fn delegate(
        &mut self,
        validator: &str,
        delegator: &str,
        amount: u64,
        lockup_secs: u64,
    ) -> Result<(), StakingError> {
        self.registry
            .delegate(validator, delegator, amount, lockup_secs, Self::now())
    }

    pub fn undelegate(
        &mut self,
        validator: &str,
        delegator: &str,
        amount: u64,
    ) -> Result<UnstakeReceipt, StakingError> {
        self.registry
            .undelegate(validator, delegator, amount, Self::now())
    }

    pub fn claim_rewards(
        &mut self,
        delegator: &str,
        validator_filter: Option<&str>,
    ) -> Result<f64, StakingError> {
        self.registry
            .claim_rewards(delegator, validator_filter, Self::now())
    }

    pub fn update_behavioral_score(
        &mut self,
        validator: &str,
        score: f64,
    ) -> Result<(), StakingError> {
        self.registry
            .update_behavioral_score(validator, score, Self::now())
    }

    pub fn is_eligible(&self, validator: &str) -> bool {
        self.registry.is_eligible(validator)
    }

    // --- Queries (snapshots) ---

    pub fn validator(&self, id: &str) -> Option<Validator> {
        self.registry.validator(id)
    }

    pub fn validators(&self) -> Vec<Validator> {
        self.registry.validators()
    }

    pub fn stake_entries_for(&self, validator: &str) -> Vec<StakeEntry> {
        self.registry.stake_entries_for(validator)
    }

    pub fn stake_entries_by(&self, delegator: &str) -> Vec<StakeEntry> {
        self.registry.stake_entries_by(delegator)
    }

    pub fn validator_metrics(&self, id: &str) -> Option<ValidatorPerformance> {
        self.registry.validator(id).map(|v| v.performance)
    }

    pub fn total_active_stake(&self) -> u64 {
        self.registry.total_active_stake()
    }

    pub fn slashing_history(&self) -> Vec<SlashingEvent> {
        self.slashing.history().to_vec()
    }

    pub fn slashing_history_for(&self, validator: &str) -> Vec<SlashingEvent> {
        self.slashing.history_for(validator)
    }

    pub fn reward_history(&self) -> Vec<RewardDistribution> {
        self.rewards.history().to_vec()
    }

    // --- Scheduled jobs (also operator-invokable) ---

    /// Epoch tick: distribute the reward pools across the active set.
    pub fn process_epoch_rewards(&mut self) -> RewardDistribution {
        self.rewards
            .distribute_epoch(&mut self.registry, self.adjuster.as_deref(), Self::now())
    }

    /// Slashing tick: scan active validators for observable conditions.
    pub fn run_slashing_scan(&mut self) -> Vec<SlashingEvent> {
        self.slashing.scan(&mut self.registry, Self::now())
    }

    /// Externally evidenced offense (double signing, invalid attestation).
    pub fn report_offense(
        &mut self,
        validator: &str,
        observation: OffenseObservation,
        evidence: serde_json::Value,
    ) -> Result<SlashingEvent, StakingError> {
        self.slashing
            .report_offense(&mut self.registry, validator, observation, evidence, Self::now())
    }

    /// Performance tick: refresh rolling aggregates and decay idle
    /// validators.
    pub fn run_performance_monitor(&mut self) {
        self.registry
            .refresh_performance(Self::now(), self.config.inactivity_window_secs);
    }

    // --- Chain surface ---

    /// Store the genesis block directly; fork evaluation starts from the
    /// first descendant.
    pub async fn bootstrap_genesis(&mut self, block: Block) -> Result<(), ForkError> {
        self.store.store_block(block).await?;
        Ok(())
    }

    /// Feed an observed block through fork evaluation, tracking proposer and
    /// attester activity for accepted tips.
    pub async fn submit_block(&mut self, block: Block) -> Result<BlockOutcome, ForkError> {
        let proposer = block.proposer.clone();
        let outcome = self.forks.observe_block(block, Self::now()).await?;
        match outcome {
            BlockOutcome::Extended
            | BlockOutcome::ForkDetected {
                resolution: ForkResolution::AlternativeChain,
                ..
            } => {
                let now = Self::now();
                self.registry.record_block_activity(&proposer, now);
                // The rest of the active set attested the accepted block.
                let attesters: Vec<String> = self
                    .registry
                    .active_validators()
                    .into_iter()
                    .filter(|v| v.id != proposer)
                    .map(|v| v.id)
                    .collect();
                for id in attesters {
                    self.registry.record_validation_activity(&id, now);
                }
            }
            _ => {}
        }
        Ok(outcome)
    }

    pub fn fork_state(&self) -> Vec<ForkInfo> {
        self.forks.forks()
    }

    pub fn orphan_blocks(&self) -> Vec<Block> {
        self.forks.orphans()
    }

    pub async fn enter_partition(&mut self) -> Result<(), ForkError> {
        self.forks.enter_partition().await
    }

    pub async fn heal_partition(&mut self) -> Result<Vec<(u64, ForkResolution)>, ForkError> {
        self.forks.heal_partition(Self::now()).await
    }

    pub async fn emergency_reset(&mut self, target_height: u64) -> Result<u64, ForkError> {
        self.forks.emergency_reset(target_height).await
    }

    pub async fn validate_chain_integrity(&self) -> Result<ChainIntegrityReport, ForkError> {
        self.forks.validate_chain_integrity().await
    }
}

/// Periodic-job scheduler around the consensus-state owner.
///
/// The slashing detector, epoch reward job, and performance monitor are
/// independent triggers that all serialize through the same mutex; none of
/// them ever observes another job's partial update.
pub struct ConsensusEngine {
    state: Arc<Mutex<ConsensusState>>,
}

impl ConsensusEngine {
    pub fn new(
        config: ConsensusConfig,
        store: Arc<dyn BlockStore>,
        pool: Arc<TransactionPool>,
    ) -> Self {
        ConsensusEngine {
            state: Arc::new(Mutex::new(ConsensusState::new(config, store, pool))),
        }
    }

    /// Handle to the consensus-state owner for API/CLI layers.
    pub fn state(&self) -> Arc<Mutex<ConsensusState>> {
        self.state.clone()
    }

    /// Spawn the periodic jobs. The returned handles run until aborted.
    pub async fn start(&self) -> Vec<JoinHandle<()>> {
        let (slashing_secs, epoch_secs, performance_secs) = {
            let state = self.state.lock().await;
            let c = state.config();
            (c.slashing_scan_secs, c.epoch_secs, c.performance_scan_secs)
        };

        let slashing_state = self.state.clone();
        let slashing_job = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(slashing_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let events = slashing_state.lock().await.run_slashing_scan();
                if !events.is_empty() {
                    info!("Slashing scan applied {} penalty(ies)", events.len());
                }
            }
        });

        let epoch_state = self.state.clone();
        let epoch_job = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(epoch_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let distribution = epoch_state.lock().await.process_epoch_rewards();
                info!(
                    "Epoch {} rewards distributed to {} validator(s)",
                    distribution.epoch,
                    distribution.validator_rewards.len()
                );
            }
        });

        let perf_state = self.state.clone();
        let perf_job = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(performance_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                perf_state.lock().await.run_performance_monitor();
            }
        });

        info!(
            "Consensus jobs started (slashing {}s, epoch {}s, performance {}s)",
            slashing_secs, epoch_secs, performance_secs
        );
        vec![slashing_job, epoch_job, perf_job]
    }
}
