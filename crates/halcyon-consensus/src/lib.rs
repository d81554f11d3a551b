pub mod config;
pub mod engine;
pub mod error;
pub mod fork;
pub mod registry;
pub mod rewards;
pub mod slashing;
pub mod weight;

pub use config::ConsensusConfig;
pub use engine::{ConsensusEngine, ConsensusState};
pub use error::{ForkError, StakingError};
pub use fork::{BlockOutcome, ChainIntegrityReport, ForkInfo, ForkResolution, ForkResolver};
pub use registry::{
    StakeEntry, StakeStatus, UnstakeReceipt, Validator, ValidatorPerformance, ValidatorRegistry,
};
pub use rewards::{RewardDistribution, RewardEngine};
pub use slashing::{OffenseKind, OffenseObservation, Severity, SlashingEngine, SlashingEvent};
pub use weight::{adjusted_weight, consensus_weight, WeightAdjuster};
