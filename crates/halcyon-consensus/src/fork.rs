use crate::config::ConsensusConfig;
use crate::error::ForkError;
use halcyon_core::{Block, BlockStore, TransactionPool};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// How a detected fork was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForkResolution {
    /// The existing main chain scored highest and was retained
    MainChain,
    /// An alternative branch won and the chain was reorganized onto it
    AlternativeChain,
    /// Resolution deferred to an operator (disputed heights during a
    /// network partition)
    ManualIntervention,
}

/// Record of competing branches diverging at one height.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkInfo {
    /// First divergent height
    pub fork_height: u64,
    /// Main-chain blocks from the fork height at resolution time
    pub main_branch: Vec<Block>,
    /// Competing branches observed at this height
    pub alternatives: Vec<Vec<Block>>,
    /// Detection timestamp (seconds since epoch)
    pub detected_at: u64,
    pub resolved: bool,
    pub resolution: Option<ForkResolution>,
}

/// Outcome of feeding one observed block into fork resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOutcome {
    /// No local chain yet; nothing to attach to (genesis bootstrap path)
    EmptyChain,
    /// The block extended the current tip and was applied
    Extended,
    /// The block is already stored
    Duplicate,
    /// Parent unknown; buffered until it arrives
    Orphaned,
    /// Parent known but not the tip; a fork was recorded and scored
    ForkDetected {
        fork_height: u64,
        resolution: ForkResolution,
    },
}

/// Result of a full-chain integrity walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainIntegrityReport {
    pub valid: bool,
    /// Highest height verified contiguous and correctly linked from genesis
    pub last_valid_height: u64,
    pub discrepancies: Vec<String>,
}

// Branch scoring coefficients for the fork-choice rule.
const LENGTH_WEIGHT: f64 = 10.0;
const BEHAVIORAL_WEIGHT: f64 = 0.5;
const CONSENSUS_WEIGHT: f64 = 2.0;
const DIVERSITY_WEIGHT: f64 = 5.0;
const PENALTY_FAST_BLOCK: f64 = 5.0;
const PENALTY_SLOW_BLOCK: f64 = 10.0;
const PENALTY_FUTURE_BLOCK: f64 = 20.0;
const PENALTY_MISSING_METADATA: f64 = 15.0;
const PENALTY_FEW_PARTICIPANTS: f64 = 10.0;
const PENALTY_WEAK_CONSENSUS: f64 = 15.0;
const PENALTY_LOW_FITNESS: f64 = 8.0;
const MIN_PARTICIPANTS: u32 = 10;
const MIN_CONSENSUS_STRENGTH: f64 = 67.0;
const MIN_BEHAVIORAL_FITNESS: f64 = 75.0;

/// Fork detection, branch scoring, and safe chain reorganization.
///
/// Owns the fork records, the orphan pool, and the disputed-height set; the
/// chain itself and account balances live behind the `BlockStore`
/// collaborator and pending transactions behind the pool.
pub struct ForkResolver {
    config: ConsensusConfig,
    store: Arc<dyn BlockStore>,
    pool: Arc<TransactionPool>,
    forks: BTreeMap<u64, ForkInfo>,
    orphans: HashMap<String, Block>,
    disputed_heights: BTreeSet<u64>,
}

impl ForkResolver {
    pub fn new(config: ConsensusConfig, store: Arc<dyn BlockStore>, pool: Arc<TransactionPool>) -> Self {
        ForkResolver {
            config,
            store,
            pool,
            forks: BTreeMap::new(),
            orphans: HashMap::new(),
            disputed_heights: BTreeSet::new(),
        }
    }

    /// Feed a newly observed block through the fork state machine, then
    /// reattach any orphans that the acceptance connected.
    pub async fn observe_block(&mut self, block: Block, now: u64) -> Result<BlockOutcome, ForkError> {
        let outcome = self.process_block(block, now).await?;

        // Orphan reconciliation: every acceptance may connect buffered
        // children, which are replayed through the same state machine.
        loop {
            let tip = match self.store.latest_block().await? {
                Some(tip) => tip,
                None => break,
            };
            let child = self
                .orphans
                .values()
                .find(|b| b.previous_hash == tip.hash)
                .cloned();
            match child {
                Some(child) => {
                    self.orphans.remove(&child.hash);
                    debug!("Reattaching orphan {} at height {}", child.hash, child.height);
                    self.process_block(child, now).await?;
                }
                None => break,
            }
        }

        Ok(outcome)
    }

    async fn process_block(&mut self, block: Block, now: u64) -> Result<BlockOutcome, ForkError> {
        let tip = match self.store.latest_block().await? {
            Some(tip) => tip,
            // Genesis case: nothing to fork from, terminal early return.
            None => return Ok(BlockOutcome::EmptyChain),
        };

        if self.store.block_by_hash(&block.hash).await?.is_some() {
            return Ok(BlockOutcome::Duplicate);
        }

        if block.previous_hash == tip.hash {
            self.apply_block(&block).await?;
            return Ok(BlockOutcome::Extended);
        }

        let parent = match self.store.block_by_hash(&block.previous_hash).await? {
            Some(parent) => parent,
            None => {
                debug!("Buffering orphan {} (parent {} unknown)", block.hash, block.previous_hash);
                self.orphans.insert(block.hash.clone(), block);
                return Ok(BlockOutcome::Orphaned);
            }
        };

        // Parent known but not the tip: a competing branch diverges right
        // after the parent.
        let fork_height = parent.height + 1;
        let branch = self.assemble_branch(block);
        let entry = self.forks.entry(fork_height).or_insert_with(|| ForkInfo {
            fork_height,
            main_branch: Vec::new(),
            alternatives: Vec::new(),
            detected_at: now,
            resolved: false,
            resolution: None,
        });
        if entry.resolved {
            // A later divergence at the same height is a new fork event.
            *entry = ForkInfo {
                fork_height,
                main_branch: Vec::new(),
                alternatives: Vec::new(),
                detected_at: now,
                resolved: false,
                resolution: None,
            };
        }
        entry.alternatives.push(branch);
        info!(
            "Fork detected at height {} ({} competing branch(es))",
            fork_height,
            self.forks[&fork_height].alternatives.len()
        );

        let resolution = self.resolve_fork(fork_height, now).await?;
        Ok(BlockOutcome::ForkDetected {
            fork_height,
            resolution,
        })
    }

    /// Extend a pending branch with buffered orphans that chain onto it.
    fn assemble_branch(&mut self, first: Block) -> Vec<Block> {
        let mut branch = vec![first];
        loop {
            let last_hash = branch[branch.len() - 1].hash.clone();
            let next = self
                .orphans
                .values()
                .find(|b| b.previous_hash == last_hash)
                .cloned();
            match next {
                Some(next) => {
                    self.orphans.remove(&next.hash);
                    branch.push(next);
                }
                None => break,
            }
        }
        branch
    }

    /// Score all branches at a fork height and settle on a winner.
    ///
    /// Re-resolving an already-resolved fork is a no-op returning the
    /// recorded outcome. Disputed heights defer to manual intervention.
    pub async fn resolve_fork(&mut self, fork_height: u64, now: u64) -> Result<ForkResolution, ForkError> {
        {
            let info = self
                .forks
                .get(&fork_height)
                .ok_or(ForkError::ForkNotFound(fork_height))?;
            if info.resolved {
                return Ok(info.resolution.unwrap_or(ForkResolution::MainChain));
            }
        }

        if self.disputed_heights.contains(&fork_height) {
            warn!(
                "Fork at height {} spans disputed heights, deferring to manual intervention",
                fork_height
            );
            return Ok(ForkResolution::ManualIntervention);
        }

        let main_branch = self.main_branch_from(fork_height).await?;
        let alternatives = self
            .forks
            .get(&fork_height)
            .map(|info| info.alternatives.clone())
            .unwrap_or_default();

        let main_score = chain_score(&main_branch, now, &self.config);
        let mut winner: Option<(usize, f64)> = None;
        for (i, branch) in alternatives.iter().enumerate() {
            let score = chain_score(branch, now, &self.config);
            debug!(
                "Fork {}: branch {} scores {:.2} (main {:.2})",
                fork_height, i, score, main_score
            );
            // Strictly higher wins; ties favor the main chain.
            if score > main_score && winner.map_or(true, |(_, best)| score > best) {
                winner = Some((i, score));
            }
        }

        let resolution = match winner {
            None => {
                // Main chain retained: losing branches are rejected into the
                // orphan pool, not discarded, in case a later branch extends
                // them.
                for branch in &alternatives {
                    for block in branch {
                        self.orphans.insert(block.hash.clone(), block.clone());
                    }
                }
                info!(
                    "Fork at height {} resolved: main chain retained (score {:.2})",
                    fork_height, main_score
                );
                ForkResolution::MainChain
            }
            Some((winner_idx, score)) => {
                info!(
                    "Fork at height {} resolved: reorganizing onto branch {} (score {:.2} > {:.2})",
                    fork_height, winner_idx, score, main_score
                );
                self.reorganize(&main_branch, &alternatives[winner_idx]).await?;
                for (i, branch) in alternatives.iter().enumerate() {
                    if i == winner_idx {
                        continue;
                    }
                    for block in branch {
                        self.orphans.insert(block.hash.clone(), block.clone());
                    }
                }
                ForkResolution::AlternativeChain
            }
        };

        if let Some(info) = self.forks.get_mut(&fork_height) {
            info.main_branch = main_branch;
            info.resolved = true;
            info.resolution = Some(resolution);
        }
        Ok(resolution)
    }

    /// Main-chain blocks from the fork height to the tip, in height order.
    async fn main_branch_from(&self, fork_height: u64) -> Result<Vec<Block>, ForkError> {
        let mut branch = Vec::new();
        let tip = match self.store.latest_block().await? {
            Some(tip) => tip,
            None => return Ok(branch),
        };
        for height in fork_height..=tip.height {
            if let Some(block) = self.store.block_by_height(height).await? {
                branch.push(block);
            }
        }
        Ok(branch)
    }

    /// Revert the main chain back to the fork point and apply the winning
    /// branch, with reward payouts mirrored on both sides.
    async fn reorganize(&mut self, reverted: &[Block], winning: &[Block]) -> Result<(), ForkError> {
        // Revert in reverse height order.
        for block in reverted.iter().rev() {
            self.revert_block(block).await?;
            // Rejected, not discarded.
            self.orphans.insert(block.hash.clone(), block.clone());
        }
        // Apply forward in height order.
        for block in winning {
            self.apply_block(block).await?;
        }
        Ok(())
    }

    /// Store a block, drop its transactions from the pending pool, and credit
    /// the proposer's block reward.
    async fn apply_block(&self, block: &Block) -> Result<(), ForkError> {
        self.store.store_block(block.clone()).await?;
        for tx in &block.transactions {
            self.pool.remove_transaction(&tx.hash()).await;
        }
        let reward = self.config.block_reward(block.behavioral_score);
        self.store.adjust_balance(&block.proposer, reward).await?;
        debug!(
            "Applied block {} at height {} (reward {:.2} to {})",
            block.hash, block.height, reward, block.proposer
        );
        Ok(())
    }

    /// Mirror image of `apply_block`: transactions return to the pending
    /// pool, the block leaves storage, and the proposer's reward is reversed.
    async fn revert_block(&self, block: &Block) -> Result<(), ForkError> {
        for tx in &block.transactions {
            // Already validated at block inclusion, so reinsertion must not
            // fail on the pool's intake gates.
            self.pool.reinstate(tx.clone()).await;
        }
        self.store.remove_block(&block.hash).await?;
        let reward = self.config.block_reward(block.behavioral_score);
        self.store.adjust_balance(&block.proposer, -reward).await?;
        debug!("Reverted block {} at height {}", block.hash, block.height);
        Ok(())
    }

    /// Network-partition entry: mark the most recent heights disputed so
    /// their forks wait for healing instead of auto-resolving. Does not halt
    /// block intake.
    pub async fn enter_partition(&mut self) -> Result<(), ForkError> {
        let tip = match self.store.latest_block().await? {
            Some(tip) => tip,
            None => return Ok(()),
        };
        let from = tip
            .height
            .saturating_sub(self.config.partition_dispute_window.saturating_sub(1));
        for height in from..=tip.height {
            self.disputed_heights.insert(height);
        }
        warn!(
            "Network partition: heights {}..={} marked disputed",
            from, tip.height
        );
        Ok(())
    }

    /// Partition healing: clear disputed heights and re-resolve forks left
    /// unresolved within the healing window.
    pub async fn heal_partition(&mut self, now: u64) -> Result<Vec<(u64, ForkResolution)>, ForkError> {
        self.disputed_heights.clear();
        let pending: Vec<u64> = self
            .forks
            .values()
            .filter(|f| {
                !f.resolved && now.saturating_sub(f.detected_at) <= self.config.partition_heal_window_secs
            })
            .map(|f| f.fork_height)
            .collect();

        let mut outcomes = Vec::new();
        for height in pending {
            let resolution = self.resolve_fork(height, now).await?;
            outcomes.push((height, resolution));
        }
        info!("Partition healed: {} fork(s) re-resolved", outcomes.len());
        Ok(outcomes)
    }

    /// Operator-invoked remediation: revert every block above the target
    /// height and clear all fork and orphan state.
    pub async fn emergency_reset(&mut self, target_height: u64) -> Result<u64, ForkError> {
        let tip = match self.store.latest_block().await? {
            Some(tip) => tip,
            None => return Ok(0),
        };
        if target_height > tip.height {
            return Err(ForkError::ResetAboveTip {
                target: target_height,
                tip: tip.height,
            });
        }

        let mut reverted = 0u64;
        for height in ((target_height + 1)..=tip.height).rev() {
            if let Some(block) = self.store.block_by_height(height).await? {
                self.revert_block(&block).await?;
                reverted += 1;
            }
        }
        self.forks.clear();
        self.orphans.clear();
        self.disputed_heights.clear();
        warn!(
            "Emergency reset to height {}: {} block(s) reverted, fork/orphan state cleared",
            target_height, reverted
        );
        Ok(reverted)
    }

    /// Walk the chain from genesis verifying height contiguity and
    /// previous-hash linkage.
    pub async fn validate_chain_integrity(&self) -> Result<ChainIntegrityReport, ForkError> {
        let mut report = ChainIntegrityReport {
            valid: true,
            last_valid_height: 0,
            discrepancies: Vec::new(),
        };
        let tip = match self.store.latest_block().await? {
            Some(tip) => tip,
            None => return Ok(report),
        };

        let mut previous: Option<Block> = None;
        for height in 0..=tip.height {
            let block = self.store.block_by_height(height).await?;
            match (block, &previous) {
                (Some(block), Some(prev)) => {
                    if block.previous_hash != prev.hash {
                        report.discrepancies.push(format!(
                            "broken link at height {}: previous_hash {} does not match {}",
                            height, block.previous_hash, prev.hash
                        ));
                    } else if report.discrepancies.is_empty() {
                        report.last_valid_height = height;
                    }
                    previous = Some(block);
                }
                (Some(block), None) => {
                    // First stored block anchors the walk.
                    if height > 0 {
                        report
                            .discrepancies
                            .push(format!("chain starts at height {} instead of 0", height));
                    }
                    if report.discrepancies.is_empty() {
                        report.last_valid_height = height;
                    }
                    previous = Some(block);
                }
                (None, Some(_)) => {
                    report
                        .discrepancies
                        .push(format!("missing block at height {}", height));
                }
                (None, None) => {
                    report
                        .discrepancies
                        .push(format!("missing block at height {}", height));
                }
            }
        }

        report.valid = report.discrepancies.is_empty();
        Ok(report)
    }

    /// Snapshot of all fork records.
    pub fn forks(&self) -> Vec<ForkInfo> {
        self.forks.values().cloned().collect()
    }

    pub fn fork_at(&self, height: u64) -> Option<ForkInfo> {
        self.forks.get(&height).cloned()
    }

    /// Snapshot of the orphan pool.
    pub fn orphans(&self) -> Vec<Block> {
        self.orphans.values().cloned().collect()
    }

    pub fn disputed_heights(&self) -> Vec<u64> {
        self.disputed_heights.iter().copied().collect()
    }
}

/// Byzantine-aware branch score.
///
/// `10*length + 0.5*sum(behavioral) + 2*avg(consensus strength)
///  + 5*distinct proposers - temporal penalty - byzantine penalty`
pub fn chain_score(blocks: &[Block], now: u64, config: &ConsensusConfig) -> f64 {
    if blocks.is_empty() {
        return 0.0;
    }

    let length_score = LENGTH_WEIGHT * blocks.len() as f64;
    let behavioral_score: f64 =
        BEHAVIORAL_WEIGHT * blocks.iter().map(|b| b.behavioral_score).sum::<f64>();

    let strengths: Vec<f64> = blocks
        .iter()
        .filter_map(|b| b.consensus_data.map(|c| c.consensus_strength))
        .collect();
    let consensus_score = if strengths.is_empty() {
        0.0
    } else {
        CONSENSUS_WEIGHT * strengths.iter().sum::<f64>() / strengths.len() as f64
    };

    let distinct_proposers = blocks
        .iter()
        .map(|b| b.proposer.as_str())
        .collect::<BTreeSet<_>>()
        .len();
    let diversity_score = DIVERSITY_WEIGHT * distinct_proposers as f64;

    let mut temporal_penalty = 0.0;
    for pair in blocks.windows(2) {
        let gap = pair[1].timestamp.saturating_sub(pair[0].timestamp);
        if gap < 10 {
            temporal_penalty += PENALTY_FAST_BLOCK;
        } else if gap > 60 {
            temporal_penalty += PENALTY_SLOW_BLOCK;
        }
    }
    for block in blocks {
        if block.timestamp > now + config.clock_skew_tolerance_secs {
            temporal_penalty += PENALTY_FUTURE_BLOCK;
        }
    }

    let mut byzantine_penalty = 0.0;
    for block in blocks {
        match block.consensus_data {
            None => byzantine_penalty += PENALTY_MISSING_METADATA,
            Some(data) => {
                if data.participant_count < MIN_PARTICIPANTS {
                    byzantine_penalty += PENALTY_FEW_PARTICIPANTS;
                }
                if data.consensus_strength < MIN_CONSENSUS_STRENGTH {
                    byzantine_penalty += PENALTY_WEAK_CONSENSUS;
                }
                if data.behavioral_fitness < MIN_BEHAVIORAL_FITNESS {
                    byzantine_penalty += PENALTY_LOW_FITNESS;
                }
            }
        }
    }

    length_score + behavioral_score + consensus_score + diversity_score
        - temporal_penalty
        - byzantine_penalty
}
