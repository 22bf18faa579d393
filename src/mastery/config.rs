use serde::{Deserialize, Serialize};

use crate::mastery::types::{Belief, ScalingType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecayParams {
    /// Forgetting rate per day.
    pub lambda: f64,
}

impl Default for DecayParams {
    fn default() -> Self {
        Self { lambda: 0.02 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerParams {
    pub scaling: ScalingType,
    pub duration_threshold_secs: f64,
    pub slow_answer_factor: f64,
    pub partial_credit: f64,
}

impl Default for ScalerParams {
    fn default() -> Self {
        Self {
            scaling: ScalingType::Linear,
            duration_threshold_secs: 500.0,
            slow_answer_factor: 0.7,
            partial_credit: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CusumParams {
    pub k: f64,
    pub h: f64,
    pub boost: f64,
}

impl Default for CusumParams {
    fn default() -> Self {
        Self {
            k: 0.5,
            h: 3.0,
            boost: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SprtParams {
    pub lower: f64,
    pub upper: f64,
    pub min_samples: usize,
    pub window: usize,
    pub window_days: i64,
    pub h0_gap: f64,
    pub h0_floor: f64,
}

impl Default for SprtParams {
    fn default() -> Self {
        Self {
            lower: 0.05,
            upper: 20.0,
            min_samples: 5,
            window: 20,
            window_days: 90,
            h0_gap: 0.1,
            h0_floor: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationParams {
    pub threshold: f64,
    pub reset_alpha: f64,
    pub reset_beta: f64,
}

impl RemediationParams {
    pub fn reset_belief(&self) -> Belief {
        Belief::new(self.reset_alpha, self.reset_beta)
    }
}

impl Default for RemediationParams {
    fn default() -> Self {
        Self {
            threshold: 0.2,
            reset_alpha: 11.0,
            reset_beta: 40.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryParams {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
}

impl Default for RetryParams {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasteryConfig {
    pub decay: DecayParams,
    pub scaler: ScalerParams,
    pub cusum: CusumParams,
    pub sprt: SprtParams,
    pub remediation: RemediationParams,
    pub retry: RetryParams,
}

impl MasteryConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_parse("MASTERY_LAMBDA_DECAY") {
            config.decay.lambda = val;
        }
        if let Some(val) = std::env::var("MASTERY_SCALING")
            .ok()
            .as_deref()
            .and_then(ScalingType::parse)
        {
            config.scaler.scaling = val;
        }
        if let Some(val) = env_parse("MASTERY_DURATION_THRESHOLD_SECS") {
            config.scaler.duration_threshold_secs = val;
        }
        if let Some(val) = env_parse("MASTERY_CUSUM_K") {
            config.cusum.k = val;
        }
        if let Some(val) = env_parse("MASTERY_CUSUM_H") {
            config.cusum.h = val;
        }
        if let Some(val) = env_parse("MASTERY_SPRT_A") {
            config.sprt.lower = val;
        }
        if let Some(val) = env_parse("MASTERY_SPRT_B") {
            config.sprt.upper = val;
        }
        if let Some(val) = env_parse("MASTERY_SPRT_MIN_SAMPLES") {
            config.sprt.min_samples = val;
        }
        if let Some(val) = env_parse("MASTERY_SPRT_WINDOW") {
            config.sprt.window = val;
        }
        if let Some(val) = env_parse("MASTERY_SPRT_WINDOW_DAYS") {
            config.sprt.window_days = val;
        }
        if let Some(val) = env_parse("MASTERY_REMEDIATION_THRESHOLD") {
            config.remediation.threshold = val;
        }
        if let Some(val) = env_parse("MASTERY_MAX_RETRIES") {
            config.retry.max_attempts = val;
        }

        config.sanitized()
    }

    /// Clamps values that would break the estimator into their usable range.
    pub fn sanitized(mut self) -> Self {
        if !self.decay.lambda.is_finite() || self.decay.lambda < 0.0 {
            tracing::warn!(lambda = self.decay.lambda, "invalid decay rate, using default");
            self.decay.lambda = DecayParams::default().lambda;
        }
        if !(self.sprt.lower > 0.0 && self.sprt.lower < 1.0 && self.sprt.upper > 1.0) {
            tracing::warn!(
                lower = self.sprt.lower,
                upper = self.sprt.upper,
                "invalid SPRT thresholds, using defaults"
            );
            let defaults = SprtParams::default();
            self.sprt.lower = defaults.lower;
            self.sprt.upper = defaults.upper;
        }
        self.sprt.min_samples = self.sprt.min_samples.max(1);
        self.sprt.window = self.sprt.window.max(self.sprt.min_samples);
        self.retry.max_attempts = self.retry.max_attempts.max(1);
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|value| value.trim().parse().ok())
}
