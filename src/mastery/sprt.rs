//! Sequential Probability Ratio Test over recent binary outcomes.
//!
//! Λ = Π P(x|p_h1) / P(x|p_h0), P(x|p) = p if x = 1 else 1 - p
//!
//! Λ ≤ A → not mastered, Λ ≥ B → mastered, otherwise keep probing.
//! The product is accumulated in log space.

use crate::mastery::config::SprtParams;
use crate::mastery::types::MasteryStatus;

const PROBABILITY_FLOOR: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hypotheses {
    pub p_h0: f64,
    pub p_h1: f64,
}

impl Hypotheses {
    /// H1 is the current estimate, H0 a meaningfully lower one.
    pub fn around(p_h1: f64, params: &SprtParams) -> Self {
        let p_h1 = p_h1.clamp(0.0, 1.0);
        Self {
            p_h0: (p_h1 - params.h0_gap).max(params.h0_floor),
            p_h1,
        }
    }

    pub fn is_separable(&self) -> bool {
        (0.0..=1.0).contains(&self.p_h0)
            && (0.0..=1.0).contains(&self.p_h1)
            && self.p_h0 < self.p_h1
    }
}

fn likelihood(x: u8, p: f64) -> f64 {
    if x >= 1 {
        p
    } else {
        1.0 - p
    }
}

pub fn likelihood_ratio(outcomes: &[u8], p_h0: f64, p_h1: f64) -> f64 {
    let log_lambda: f64 = outcomes
        .iter()
        .map(|&x| {
            let numerator = likelihood(x, p_h1).max(0.0);
            let denominator = likelihood(x, p_h0).max(PROBABILITY_FLOOR);
            if numerator <= 0.0 {
                f64::NEG_INFINITY
            } else {
                numerator.ln() - denominator.ln()
            }
        })
        .sum();
    log_lambda.exp()
}

/// Raw Wald decision; callers enforce the minimum sample size.
pub fn classify(outcomes: &[u8], p_h0: f64, p_h1: f64, lower: f64, upper: f64) -> MasteryStatus {
    let hypotheses = Hypotheses { p_h0, p_h1 };
    if !hypotheses.is_separable() {
        return MasteryStatus::Continue;
    }

    let lambda = likelihood_ratio(outcomes, p_h0, p_h1);
    if lambda <= lower {
        MasteryStatus::NotMastered
    } else if lambda >= upper {
        MasteryStatus::Mastered
    } else {
        MasteryStatus::Continue
    }
}

#[derive(Debug, Clone)]
pub struct MasteryClassifier {
    params: SprtParams,
}

impl MasteryClassifier {
    pub fn new(params: SprtParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SprtParams {
        &self.params
    }

    /// `outcomes` are the recent in-window outcomes, newest first.
    pub fn classify(&self, outcomes: &[u8], mastery: f64) -> MasteryStatus {
        if outcomes.len() < self.params.min_samples {
            return MasteryStatus::Continue;
        }
        let window = &outcomes[..outcomes.len().min(self.params.window)];
        let hypotheses = Hypotheses::around(mastery, &self.params);
        classify(
            window,
            hypotheses.p_h0,
            hypotheses.p_h1,
            self.params.lower,
            self.params.upper,
        )
    }
}

impl Default for MasteryClassifier {
    fn default() -> Self {
        Self::new(SprtParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_successes_wide_gap_is_mastered() {
        assert_eq!(
            classify(&[1, 1, 1, 1, 1], 0.3, 0.8, 0.05, 20.0),
            MasteryStatus::Mastered
        );
    }

    #[test]
    fn test_five_failures_is_not_mastered() {
        // (0.2 / 0.7)^5 ≈ 0.0019
        assert_eq!(
            classify(&[0, 0, 0, 0, 0], 0.3, 0.8, 0.05, 20.0),
            MasteryStatus::NotMastered
        );
    }

    #[test]
    fn test_mixed_outcomes_continue() {
        assert_eq!(
            classify(&[1, 0, 1, 0, 1], 0.3, 0.8, 0.05, 20.0),
            MasteryStatus::Continue
        );
    }

    #[test]
    fn test_certain_h0_denominator_is_floored() {
        let lambda = likelihood_ratio(&[1], 0.0, 0.5);
        assert!(lambda.is_finite());
        assert!(lambda > 1.0);
    }

    #[test]
    fn test_invalid_hypotheses_continue() {
        assert_eq!(
            classify(&[1, 1, 1, 1, 1, 1], 0.8, 0.3, 0.05, 20.0),
            MasteryStatus::Continue
        );
    }

    #[test]
    fn test_insufficient_samples_always_continue() {
        let classifier = MasteryClassifier::default();
        assert_eq!(classifier.classify(&[1, 1, 1, 1], 0.95), MasteryStatus::Continue);
        assert_eq!(classifier.classify(&[0, 0, 0, 0], 0.95), MasteryStatus::Continue);
        assert_eq!(classifier.classify(&[], 0.5), MasteryStatus::Continue);
    }

    #[test]
    fn test_high_estimate_confirmed_by_streak() {
        // p_h1 = 0.9, p_h0 = 0.8: (9/8)^n crosses 20 only after ~26 successes,
        // so a window of 20 cannot confirm a narrow gap.
        let classifier = MasteryClassifier::default();
        assert_eq!(classifier.classify(&[1; 20], 0.9), MasteryStatus::Continue);

        // Failures against a high estimate are decisive: (0.1/0.2)^5 ≈ 0.03.
        assert_eq!(classifier.classify(&[0; 5], 0.9), MasteryStatus::NotMastered);
    }

    #[test]
    fn test_window_truncates_to_newest() {
        let params = SprtParams {
            window: 5,
            ..SprtParams::default()
        };
        let classifier = MasteryClassifier::new(params);
        let mut outcomes = vec![0u8; 5];
        outcomes.extend([1u8; 30]);
        assert_eq!(classifier.classify(&outcomes, 0.9), MasteryStatus::NotMastered);
    }

    #[test]
    fn test_low_estimate_not_separable() {
        let hypotheses = Hypotheses::around(0.05, &SprtParams::default());
        assert!(!hypotheses.is_separable());
        let classifier = MasteryClassifier::default();
        assert_eq!(classifier.classify(&[1; 10], 0.05), MasteryStatus::Continue);
    }
}
