use halcyon_consensus::{
    BlockOutcome, ConsensusConfig, ConsensusEngine, ForkResolution, OffenseKind, Severity,
    StakingError,
};
use halcyon_core::{Block, ConsensusData, MemoryBlockStore, TransactionPool};
use std::sync::Arc;

const DAY: u64 = 24 * 3600;

fn engine() -> ConsensusEngine {
    ConsensusEngine::new(
        ConsensusConfig::default(),
        Arc::new(MemoryBlockStore::new()),
        TransactionPool::new(1024),
    )
}

fn block(height: u64, prev: &str, proposer: &str, score: f64, metadata: bool) -> Block {
    Block::new(
        height,
        prev.to_string(),
        proposer.to_string(),
        score,
        vec![],
        metadata.then_some(ConsensusData {
            participant_count: 15,
            consensus_strength: 88.0,
            behavioral_fitness: 82.0,
        }),
    )
}

#[tokio::test]
async fn registration_above_minimum_succeeds_with_full_reputation() {
    let engine = engine();
    let state = engine.state();
    let mut guard = state.lock().await;

    guard.register_validator("v1", "addr1", 60_000, 10.0).unwrap();
    let v = guard.validator("v1").unwrap();
    assert_eq!(v.reputation, 100.0);
    assert_eq!(v.stake, 60_000);
    assert!(v.active);
    assert!(v.slashing_events.is_empty());
}

#[tokio::test]
async fn immediate_undelegation_fails_with_three_week_lockup() {
    let engine = engine();
    let state = engine.state();
    let mut guard = state.lock().await;

    guard.register_validator("v1", "addr1", 60_000, 10.0).unwrap();
    guard.delegate("v1", "d1", 5_000, 21 * DAY).unwrap();

    let err = guard.undelegate("v1", "d1", 5_000).unwrap_err();
    match err {
        StakingError::LockupActive { remaining_secs } => {
            // ~21 days remain, give or take clock resolution.
            assert!(remaining_secs > 21 * DAY - 60);
            assert!(remaining_secs <= 21 * DAY);
        }
        other => panic!("expected lockup failure, got {other:?}"),
    }
    // State unchanged.
    assert_eq!(guard.validator("v1").unwrap().stake, 65_000);
    assert_eq!(guard.stake_entries_by("d1")[0].amount, 5_000);
}

#[tokio::test]
async fn low_behavioral_score_is_slashed_as_critical() {
    let engine = engine();
    let state = engine.state();
    let mut guard = state.lock().await;

    guard.register_validator("v1", "addr1", 100_000, 10.0).unwrap();
    guard.update_behavioral_score("v1", 35.0).unwrap();

    let events = guard.run_slashing_scan();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].offense, OffenseKind::PoorBehavioralQuality);
    assert_eq!(events[0].severity, Severity::Critical);
    assert_eq!(events[0].amount, 15_000);

    let v = guard.validator("v1").unwrap();
    assert_eq!(v.stake, 85_000);
    assert_eq!(v.reputation, 80.0);
    assert_eq!(v.slashing_events.len(), 1);
}

#[tokio::test]
async fn diverse_branch_wins_fork_over_byzantine_branch() {
    let engine = engine();
    let state = engine.state();
    let mut guard = state.lock().await;

    let genesis = block(0, "genesis-parent", "g", 80.0, true);
    guard.bootstrap_genesis(genesis.clone()).await.unwrap();

    // Main chain: heights 1-2, single proposer.
    let m1 = block(1, &genesis.hash, "m", 80.0, true);
    let m2 = block(2, &m1.hash, "m", 80.0, true);
    assert_eq!(guard.submit_block(m1.clone()).await.unwrap(), BlockOutcome::Extended);
    assert_eq!(guard.submit_block(m2.clone()).await.unwrap(), BlockOutcome::Extended);

    // Competing branch from height 1: three blocks, three distinct
    // proposers, strong metadata.
    let a1 = block(1, &genesis.hash, "p1", 85.0, true);
    let a2 = block(2, &a1.hash, "p2", 85.0, true);
    let a3 = block(3, &a2.hash, "p3", 85.0, true);

    assert_eq!(guard.submit_block(a2.clone()).await.unwrap(), BlockOutcome::Orphaned);
    assert_eq!(guard.submit_block(a3.clone()).await.unwrap(), BlockOutcome::Orphaned);
    let outcome = guard.submit_block(a1.clone()).await.unwrap();
    assert_eq!(
        outcome,
        BlockOutcome::ForkDetected {
            fork_height: 1,
            resolution: ForkResolution::AlternativeChain
        }
    );

    // Reverted main blocks wait in the orphan pool.
    let orphans = guard.orphan_blocks();
    assert!(orphans.iter().any(|b| b.hash == m1.hash));
    assert!(orphans.iter().any(|b| b.hash == m2.hash));

    let forks = guard.fork_state();
    assert_eq!(forks.len(), 1);
    assert!(forks[0].resolved);
}

#[tokio::test]
async fn single_proposer_branch_without_metadata_loses() {
    let engine = engine();
    let state = engine.state();
    let mut guard = state.lock().await;

    let genesis = block(0, "genesis-parent", "g", 80.0, true);
    guard.bootstrap_genesis(genesis.clone()).await.unwrap();

    let m1 = block(1, &genesis.hash, "p1", 85.0, true);
    let m2 = block(2, &m1.hash, "p2", 85.0, true);
    let m3 = block(3, &m2.hash, "p3", 85.0, true);
    for b in [&m1, &m2, &m3] {
        guard.submit_block(b.clone()).await.unwrap();
    }

    let b1 = block(1, &genesis.hash, "solo", 60.0, false);
    let b2 = block(2, &b1.hash, "solo", 60.0, false);
    guard.submit_block(b2.clone()).await.unwrap();
    let outcome = guard.submit_block(b1.clone()).await.unwrap();
    assert_eq!(
        outcome,
        BlockOutcome::ForkDetected {
            fork_height: 1,
            resolution: ForkResolution::MainChain
        }
    );

    // Byzantine branch rejected into the orphan pool; main chain intact.
    assert!(guard.orphan_blocks().iter().any(|b| b.hash == b1.hash));
    let report = guard.validate_chain_integrity().await.unwrap();
    assert!(report.valid);
    assert_eq!(report.last_valid_height, 3);
}

#[tokio::test]
async fn chain_built_through_submissions_validates_end_to_end() {
    let engine = engine();
    let state = engine.state();
    let mut guard = state.lock().await;

    let genesis = block(0, "genesis-parent", "g", 80.0, true);
    guard.bootstrap_genesis(genesis.clone()).await.unwrap();

    let mut prev = genesis.hash.clone();
    for height in 1..=6 {
        let b = block(height, &prev, &format!("p{}", height % 3), 80.0, true);
        prev = b.hash.clone();
        assert_eq!(guard.submit_block(b).await.unwrap(), BlockOutcome::Extended);
    }

    let report = guard.validate_chain_integrity().await.unwrap();
    assert!(report.valid);
    assert_eq!(report.last_valid_height, 6);
    assert!(report.discrepancies.is_empty());
}

#[tokio::test]
async fn emergency_reset_clears_fork_and_orphan_state() {
    let engine = engine();
    let state = engine.state();
    let mut guard = state.lock().await;

    let genesis = block(0, "genesis-parent", "g", 80.0, true);
    guard.bootstrap_genesis(genesis.clone()).await.unwrap();

    let m1 = block(1, &genesis.hash, "m", 80.0, true);
    let m2 = block(2, &m1.hash, "m", 80.0, true);
    guard.submit_block(m1.clone()).await.unwrap();
    guard.submit_block(m2).await.unwrap();

    // An orphan sits in the pool.
    let stray = block(9, "unknown-parent", "x", 50.0, false);
    assert_eq!(guard.submit_block(stray).await.unwrap(), BlockOutcome::Orphaned);

    let reverted = guard.emergency_reset(0).await.unwrap();
    assert_eq!(reverted, 2);
    assert!(guard.fork_state().is_empty());
    assert!(guard.orphan_blocks().is_empty());

    let report = guard.validate_chain_integrity().await.unwrap();
    assert!(report.valid);
    assert_eq!(report.last_valid_height, 0);
}

#[tokio::test]
async fn slash_conserves_total_stake_across_the_set() {
    let engine = engine();
    let state = engine.state();
    let mut guard = state.lock().await;

    guard.register_validator("bad", "a1", 100_000, 5.0).unwrap();
    guard.register_validator("v2", "a2", 200_000, 5.0).unwrap();
    guard.register_validator("v3", "a3", 300_000, 5.0).unwrap();
    guard.update_behavioral_score("v2", 85.0).unwrap();
    guard.update_behavioral_score("v3", 85.0).unwrap();
    let before = guard.total_active_stake();

    guard.update_behavioral_score("bad", 30.0).unwrap();
    let events = guard.run_slashing_scan();
    assert_eq!(events.len(), 1);

    // The slashed amount moved, it did not vanish: offender lost it and the
    // remaining active validators gained exactly that much.
    let after = guard.total_active_stake();
    assert_eq!(before, after);
}

#[tokio::test]
async fn epoch_rewards_split_one_to_three_by_weight() {
    let engine = engine();
    let state = engine.state();
    let mut guard = state.lock().await;

    // sqrt(100_000) : sqrt(900_000) = 1 : 3 at equal score and reputation.
    guard.register_validator("v1", "a1", 100_000, 0.0).unwrap();
    guard.register_validator("v2", "a2", 900_000, 0.0).unwrap();
    guard.update_behavioral_score("v1", 75.0).unwrap();
    guard.update_behavioral_score("v2", 75.0).unwrap();

    let dist = guard.process_epoch_rewards();
    let r1 = dist.delegator_rewards["v1"];
    let r2 = dist.delegator_rewards["v2"];
    assert!((r1 - 25_000.0).abs() < 1e-6);
    assert!((r2 - 75_000.0).abs() < 1e-6);

    // Distribution is immutable history.
    assert_eq!(guard.reward_history().len(), 1);
    let next = guard.process_epoch_rewards();
    assert_eq!(next.epoch, 1);
    assert_eq!(guard.reward_history()[0].epoch, 0);
}

#[tokio::test]
async fn partition_entry_and_healing_round_trip() {
    let engine = engine();
    let state = engine.state();
    let mut guard = state.lock().await;

    let genesis = block(0, "genesis-parent", "g", 80.0, true);
    guard.bootstrap_genesis(genesis.clone()).await.unwrap();
    let m1 = block(1, &genesis.hash, "m", 80.0, true);
    guard.submit_block(m1.clone()).await.unwrap();

    guard.enter_partition().await.unwrap();

    let alt = block(1, &genesis.hash, "other", 90.0, true);
    let outcome = guard.submit_block(alt).await.unwrap();
    assert_eq!(
        outcome,
        BlockOutcome::ForkDetected {
            fork_height: 1,
            resolution: ForkResolution::ManualIntervention
        }
    );

    let outcomes = guard.heal_partition().await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(guard.fork_state()[0].resolved);
}
