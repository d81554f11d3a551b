use crate::registry::Validator;

/// Consensus weight of a validator.
///
/// `weight = sqrt(stake) * (1 + max(0, (score - threshold) / 100)) * (reputation / 100)`
///
/// The square root suppresses dominance by large stakers, the bonus term
/// rewards behavioral quality above the threshold, and reputation linearly
/// scales down compromised validators. The function is pure and is always
/// recomputed on demand; callers must not cache it across state mutations.
pub fn consensus_weight(validator: &Validator, threshold: f64) -> f64 {
    let stake_component = (validator.stake as f64).sqrt();
    let quality_bonus = 1.0 + ((validator.behavioral_score - threshold) / 100.0).max(0.0);
    let reputation_factor = validator.reputation / 100.0;
    stake_component * quality_bonus * reputation_factor
}

/// Optional advisory adjustment to a validator's weight, supplied by an
/// external model. The input is untrusted: implementations may scale or shift
/// the base weight, but the result is clamped to be non-negative, and when no
/// adjuster is configured the unadjusted weight is used.
pub trait WeightAdjuster: Send + Sync {
    fn adjust(&self, validator_id: &str, base_weight: f64) -> f64;
}

/// Weight after applying an optional adjuster, never negative.
pub fn adjusted_weight(
    validator: &Validator,
    threshold: f64,
    adjuster: Option<&dyn WeightAdjuster>,
) -> f64 {
    let base = consensus_weight(validator, threshold);
    match adjuster {
        Some(adjuster) => adjuster.adjust(&validator.id, base).max(0.0),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsensusConfig;
    use crate::registry::ValidatorRegistry;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn validator(stake: u64, score: f64, reputation: f64) -> Validator {
        let mut reg = ValidatorRegistry::new(ConsensusConfig::default());
        reg.register_validator("v", "addr", stake.max(50_000), 0.0, 0).unwrap();
        let mut v = reg.validator("v").unwrap();
        v.stake = stake;
        v.behavioral_score = score;
        v.reputation = reputation;
        v
    }

    #[test]
    fn weight_matches_closed_form() {
        let v = validator(90_000, 85.0, 100.0);
        assert_relative_eq!(consensus_weight(&v, 75.0), 300.0 * 1.1, epsilon = 1e-9);
    }

    #[test]
    fn score_below_threshold_earns_no_bonus() {
        let v = validator(90_000, 40.0, 100.0);
        assert_relative_eq!(consensus_weight(&v, 75.0), 300.0, epsilon = 1e-9);
    }

    #[test]
    fn reputation_scales_linearly() {
        let v = validator(90_000, 40.0, 50.0);
        assert_relative_eq!(consensus_weight(&v, 75.0), 150.0, epsilon = 1e-9);
    }

    struct Halver;
    impl WeightAdjuster for Halver {
        fn adjust(&self, _id: &str, base: f64) -> f64 {
            base * 0.5
        }
    }

    struct Hostile;
    impl WeightAdjuster for Hostile {
        fn adjust(&self, _id: &str, _base: f64) -> f64 {
            -10.0
        }
    }

    #[test]
    fn adjuster_is_advisory_and_clamped() {
        let v = validator(90_000, 40.0, 100.0);
        assert_relative_eq!(adjusted_weight(&v, 75.0, None), 300.0, epsilon = 1e-9);
        assert_relative_eq!(
            adjusted_weight(&v, 75.0, Some(&Halver)),
            150.0,
            epsilon = 1e-9
        );
        assert_eq!(adjusted_weight(&v, 75.0, Some(&Hostile)), 0.0);
    }

    proptest! {
        // Monotone in stake for fixed score and reputation.
        #[test]
        fn weight_monotone_in_stake(a in 0u64..10_000_000, b in 0u64..10_000_000,
                                    score in 0.0f64..100.0, rep in 0.0f64..100.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let mut v_lo = validator(lo, score, rep);
            let mut v_hi = validator(hi, score, rep);
            v_lo.stake = lo;
            v_hi.stake = hi;
            prop_assert!(consensus_weight(&v_hi, 75.0) >= consensus_weight(&v_lo, 75.0));
        }
    }
}
