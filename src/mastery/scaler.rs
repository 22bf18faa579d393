use crate::mastery::config::ScalerParams;
use crate::mastery::types::{AttemptOutcome, BeliefDelta, Difficulty, ScalingType};

pub fn difficulty_weight(difficulty: Difficulty, scaling: ScalingType) -> f64 {
    let d = difficulty.value() as f64;
    match scaling {
        ScalingType::Linear => d,
        ScalingType::Exponential => 2f64.powf(d - 1.0),
    }
}

/// Converts a scored attempt into the pseudo-count increment for one entity.
///
/// A partial score counts as weak positive evidence. Slow answers weaken
/// positive evidence only; failures are never discounted by duration.
pub fn scale(outcome: &AttemptOutcome, params: &ScalerParams) -> BeliefDelta {
    let weight = difficulty_weight(outcome.difficulty, params.scaling);

    let (mut delta_alpha, delta_beta) = match outcome.score.value() {
        0 => (0.0, weight),
        1 => (params.partial_credit * weight, 0.0),
        _ => (weight, 0.0),
    };

    if outcome.duration_secs > params.duration_threshold_secs {
        delta_alpha *= params.slow_answer_factor;
    }

    BeliefDelta {
        delta_alpha,
        delta_beta,
    }
}
