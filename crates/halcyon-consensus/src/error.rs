use halcyon_core::StorageError;
use thiserror::Error;

/// Failures of registry, delegation, reward, and slashing operations.
///
/// Every variant is a recoverable validation result surfaced to the caller;
/// none of them abort the node.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StakingError {
    #[error("validator {0} is already registered")]
    ValidatorAlreadyExists(String),

    #[error("validator {0} not found")]
    ValidatorNotFound(String),

    #[error("validator {0} is not active")]
    ValidatorInactive(String),

    #[error("stake {amount} is below the required minimum {minimum}")]
    BelowMinimumStake { amount: u64, minimum: u64 },

    #[error("delegation {amount} is below the required minimum {minimum}")]
    BelowMinimumDelegation { amount: u64, minimum: u64 },

    #[error("commission {0}% is outside the allowed range")]
    CommissionOutOfRange(f64),

    #[error("active validator capacity ({0}) reached")]
    CapacityExceeded(usize),

    #[error("no stake entry for delegator {delegator} on validator {validator}")]
    StakeEntryNotFound { validator: String, delegator: String },

    #[error("undelegation {requested} exceeds staked balance {available}")]
    InsufficientStake { requested: u64, available: u64 },

    #[error("stake is locked for another {remaining_secs} seconds")]
    LockupActive { remaining_secs: u64 },

    #[error("no rewards accrued for delegator {0}")]
    NoRewardsToClaim(String),

    #[error("behavioral score {0} is outside the 0-100 range")]
    ScoreOutOfRange(f64),

    #[error("no slashable offense for validator {0}")]
    NoOffense(String),
}

/// Failures of fork detection, reorganization, and chain maintenance.
#[derive(Debug, Error)]
pub enum ForkError {
    #[error("storage operation failed: {0}")]
    Storage(#[from] StorageError),

    #[error("no fork recorded at height {0}")]
    ForkNotFound(u64),

    #[error("reset target height {target} is above the chain tip {tip}")]
    ResetAboveTip { target: u64, tip: u64 },
}
