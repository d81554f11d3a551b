use crate::error::StakingError;
use crate::registry::{StakeStatus, ValidatorRegistry};
use crate::weight::consensus_weight;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;

/// Slashable offense kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OffenseKind {
    PoorBehavioralQuality,
    MissedConsensus,
    InvalidAttestation,
    DoubleSigning,
    Downtime,
}

impl fmt::Display for OffenseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OffenseKind::PoorBehavioralQuality => "poor_behavioral_quality",
            OffenseKind::MissedConsensus => "missed_consensus",
            OffenseKind::InvalidAttestation => "invalid_attestation",
            OffenseKind::DoubleSigning => "double_signing",
            OffenseKind::Downtime => "downtime",
        };
        f.write_str(name)
    }
}

/// Graduated severity tiers with their slashing rates and reputation
/// penalties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

impl Severity {
    /// Fraction of current stake forfeited.
    pub fn slash_rate(&self) -> f64 {
        match self {
            Severity::Minor => 0.01,
            Severity::Major => 0.05,
            Severity::Critical => 0.15,
        }
    }

    /// Reputation points deducted.
    pub fn reputation_penalty(&self) -> f64 {
        match self {
            Severity::Minor => 5.0,
            Severity::Major => 10.0,
            Severity::Critical => 20.0,
        }
    }
}

/// A measured slashing condition for one validator.
///
/// `classify` is the single source of truth for the graduated severity
/// thresholds; returning `None` means the measurement is not an offense.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OffenseObservation {
    PoorBehavioralQuality { score: f64 },
    Downtime { uptime_percent: f64 },
    MissedConsensus { missed_rounds: u32 },
    InvalidAttestation { authenticity: f64, spoof_detected: bool },
    DoubleSigning,
}

impl OffenseObservation {
    pub fn kind(&self) -> OffenseKind {
        match self {
            OffenseObservation::PoorBehavioralQuality { .. } => OffenseKind::PoorBehavioralQuality,
            OffenseObservation::Downtime { .. } => OffenseKind::Downtime,
            OffenseObservation::MissedConsensus { .. } => OffenseKind::MissedConsensus,
            OffenseObservation::InvalidAttestation { .. } => OffenseKind::InvalidAttestation,
            OffenseObservation::DoubleSigning => OffenseKind::DoubleSigning,
        }
    }

    /// Classify the observation against the graduated three-tier table.
    pub fn classify(&self, behavioral_threshold: f64) -> Option<Severity> {
        match *self {
            OffenseObservation::PoorBehavioralQuality { score } => {
                if score < 40.0 {
                    Some(Severity::Critical)
                } else if score < 55.0 {
                    Some(Severity::Major)
                } else if score < behavioral_threshold {
                    Some(Severity::Minor)
                } else {
                    None
                }
            }
            OffenseObservation::Downtime { uptime_percent } => {
                if uptime_percent < 85.0 {
                    Some(Severity::Critical)
                } else if uptime_percent < 95.0 {
                    Some(Severity::Major)
                } else if uptime_percent < 98.0 {
                    Some(Severity::Minor)
                } else {
                    None
                }
            }
            OffenseObservation::MissedConsensus { missed_rounds } => {
                if missed_rounds > 20 {
                    Some(Severity::Critical)
                } else if missed_rounds > 10 {
                    Some(Severity::Major)
                } else if missed_rounds > 0 {
                    Some(Severity::Minor)
                } else {
                    None
                }
            }
            OffenseObservation::InvalidAttestation {
                authenticity,
                spoof_detected,
            } => {
                if spoof_detected {
                    Some(Severity::Critical)
                } else if authenticity < 0.70 {
                    Some(Severity::Major)
                } else if authenticity < 0.90 {
                    Some(Severity::Minor)
                } else {
                    None
                }
            }
            OffenseObservation::DoubleSigning => Some(Severity::Critical),
        }
    }
}

/// Immutable record of an applied slash (append-only audit trail).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlashingEvent {
    pub id: String,
    pub validator: String,
    pub offense: OffenseKind,
    pub severity: Severity,
    /// Slashing rate applied to the stake
    pub slash_rate: f64,
    /// Absolute amount removed from the validator's aggregate stake
    pub amount: u64,
    pub timestamp: u64,
    /// Opaque evidence payload supplied by the detector
    pub evidence: serde_json::Value,
    /// Whether the slashed amount was redistributed to the active set
    pub redistributed: bool,
}

/// Slashing engine: periodic condition detection plus penalty application.
pub struct SlashingEngine {
    history: Vec<SlashingEvent>,
}

impl SlashingEngine {
    pub fn new() -> Self {
        SlashingEngine { history: Vec::new() }
    }

    /// Periodic scan of every active validator for conditions observable from
    /// registry state: behavioral quality, downtime, and missed consensus
    /// rounds. Externally evidenced offenses (double signing, invalid
    /// attestations) arrive through `report_offense` instead.
    pub fn scan(&mut self, registry: &mut ValidatorRegistry, now: u64) -> Vec<SlashingEvent> {
        let mut events = Vec::new();
        let snapshot = registry.active_validators();
        for validator in snapshot {
            let observations = [
                OffenseObservation::PoorBehavioralQuality {
                    score: validator.behavioral_score,
                },
                OffenseObservation::Downtime {
                    uptime_percent: validator.performance.uptime_percent,
                },
                OffenseObservation::MissedConsensus {
                    missed_rounds: validator.performance.missed_consensus_rounds,
                },
            ];
            for observation in observations {
                let evidence = match serde_json::to_value(&observation) {
                    Ok(value) => value,
                    Err(_) => serde_json::Value::Null,
                };
                match self.report_offense(registry, &validator.id, observation, evidence, now) {
                    Ok(event) => events.push(event),
                    Err(StakingError::NoOffense(_)) => {}
                    Err(err) => warn!("Slashing scan skipped {}: {}", validator.id, err),
                }
            }
        }
        events
    }

    /// Apply a slash for an observed offense.
    ///
    /// Deducts stake from the validator and proportionally from every active
    /// delegation, reduces reputation, records the event, deactivates the
    /// validator if its remaining stake falls below the registration minimum,
    /// and redistributes the recovered amount across the remaining active set
    /// weight-proportionally.
    pub fn report_offense(
        &mut self,
        registry: &mut ValidatorRegistry,
        validator_id: &str,
        observation: OffenseObservation,
        evidence: serde_json::Value,
        now: u64,
    ) -> Result<SlashingEvent, StakingError> {
        let config = registry.config().clone();
        let kind = observation.kind();
        let severity = observation
            .classify(config.behavioral_threshold)
            .ok_or_else(|| StakingError::NoOffense(validator_id.to_string()))?;

        {
            let validator = registry
                .validator(validator_id)
                .ok_or_else(|| StakingError::ValidatorNotFound(validator_id.to_string()))?;
            if !validator.active {
                return Err(StakingError::ValidatorInactive(validator_id.to_string()));
            }
            // One slash per offense kind per cooldown window, so a persistent
            // condition is not re-penalized on every scan tick.
            if validator.slashing_events.iter().any(|e| {
                e.offense == kind && e.timestamp + config.offense_cooldown_secs > now
            }) {
                return Err(StakingError::NoOffense(validator_id.to_string()));
            }
        }

        let rate = severity.slash_rate();
        let (amount, remaining_stake) = {
            let validator = registry
                .validator_mut(validator_id)
                .ok_or_else(|| StakingError::ValidatorNotFound(validator_id.to_string()))?;
            let amount = ((validator.stake as f64 * rate).round() as u64).min(validator.stake);
            validator.stake = validator.stake.saturating_sub(amount);
            validator.reputation = (validator.reputation - severity.reputation_penalty()).max(0.0);
            (amount, validator.stake)
        };

        // Delegations are slashed at the same rate; entries driven to zero
        // are marked Slashed, not removed.
        for entry in registry.stake_entries_for_mut(validator_id) {
            if entry.status != StakeStatus::Active {
                continue;
            }
            let cut = ((entry.amount as f64 * rate).round() as u64).min(entry.amount);
            entry.amount -= cut;
            if entry.amount == 0 {
                entry.status = StakeStatus::Slashed;
            }
        }

        if remaining_stake < config.min_validator_stake {
            if let Some(validator) = registry.validator_mut(validator_id) {
                validator.active = false;
            }
            warn!(
                "Validator {} deactivated after {} slash: stake {} below minimum {}",
                validator_id, kind, remaining_stake, config.min_validator_stake
            );
        }

        // Fix missed-round counting so the same rounds are not re-punished.
        if kind == OffenseKind::MissedConsensus {
            if let Some(validator) = registry.validator_mut(validator_id) {
                validator.performance.missed_consensus_rounds = 0;
            }
        }

        let redistributed =
            redistribute_slash(registry, validator_id, amount, config.behavioral_threshold);

        let event = SlashingEvent {
            id: event_id(validator_id, kind, now),
            validator: validator_id.to_string(),
            offense: kind,
            severity,
            slash_rate: rate,
            amount,
            timestamp: now,
            evidence,
            redistributed,
        };

        if let Some(validator) = registry.validator_mut(validator_id) {
            validator.slashing_events.push(event.clone());
        }
        self.history.push(event.clone());

        info!(
            "Slashed validator {} for {} ({:?}): {} at rate {:.2}, redistributed: {}",
            validator_id, kind, severity, amount, rate, redistributed
        );
        Ok(event)
    }

    /// Global append-only audit trail.
    pub fn history(&self) -> &[SlashingEvent] {
        &self.history
    }

    /// History restricted to one validator.
    pub fn history_for(&self, validator_id: &str) -> Vec<SlashingEvent> {
        self.history
            .iter()
            .filter(|e| e.validator == validator_id)
            .cloned()
            .collect()
    }

    pub fn total_slashed(&self) -> u64 {
        self.history.iter().map(|e| e.amount).sum()
    }
}

impl Default for SlashingEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Redistribute a slashed amount across the remaining active validators
/// proportionally to their consensus weight, increasing both stake and
/// lifetime rewards. With no eligible recipients this is a no-op, not an
/// error.
fn redistribute_slash(
    registry: &mut ValidatorRegistry,
    offender: &str,
    amount: u64,
    threshold: f64,
) -> bool {
    if amount == 0 {
        return false;
    }
    let recipients: Vec<(String, f64)> = registry
        .active_validators()
        .into_iter()
        .filter(|v| v.id != offender)
        .map(|v| (v.id.clone(), consensus_weight(&v, threshold)))
        .collect();
    let total_weight: f64 = recipients.iter().map(|(_, w)| w).sum();
    if recipients.is_empty() || total_weight <= 0.0 {
        return false;
    }

    // The last recipient absorbs the rounding remainder so the shares sum to
    // exactly the slashed amount.
    let mut distributed = 0u64;
    let count = recipients.len();
    for (i, (id, weight)) in recipients.iter().enumerate() {
        let share = if i == count - 1 {
            amount - distributed
        } else {
            ((amount as f64) * weight / total_weight).floor() as u64
        };
        distributed += share;
        if let Some(v) = registry.validator_mut(id) {
            v.stake = v.stake.saturating_add(share);
            v.lifetime_rewards += share as f64;
        }
    }
    true
}

fn event_id(validator_id: &str, kind: OffenseKind, now: u64) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(format!("{validator_id}{kind}{now}{}", rand::random::<u64>()));
    hex::encode(hasher.finalize())
}
