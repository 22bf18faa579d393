//! Time decay of belief evidence.
//!
//! w = e^(-λ × Δdays), (α, β) ↦ (α·w, β·w)
//!
//! The ratio α/(α+β) is left untouched; only the evidence mass shrinks, so a
//! learner returning after a long gap is swayed more easily by new answers.

use chrono::{DateTime, Utc};

use crate::mastery::types::Belief;

const SECONDS_PER_DAY: f64 = 86_400.0;

pub fn elapsed_days(t_current: DateTime<Utc>, t_last_attempt: DateTime<Utc>) -> f64 {
    let millis = (t_current - t_last_attempt).num_milliseconds();
    (millis as f64 / 1000.0 / SECONDS_PER_DAY).max(0.0)
}

pub fn decay_weight(delta_days: f64, lambda: f64) -> f64 {
    (-lambda * delta_days).exp().clamp(f64::MIN_POSITIVE, 1.0)
}

pub fn decay(
    belief: Belief,
    t_current: DateTime<Utc>,
    t_last_attempt: Option<DateTime<Utc>>,
    lambda: f64,
) -> Belief {
    let Some(last) = t_last_attempt else {
        return belief;
    };
    let w = decay_weight(elapsed_days(t_current, last), lambda);
    Belief::new(belief.alpha * w, belief.beta * w)
}
