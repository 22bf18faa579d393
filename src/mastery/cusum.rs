//! One-sided CUSUM drift detector.
//!
//! s' = max(0, s + (x - k)); crossing h boosts alpha and restarts the chart.
//! The lower branch is kept for parity with the two-sided formulation but
//! cannot fire while s is clamped at zero.

use serde::Serialize;

use crate::mastery::config::CusumParams;
use crate::mastery::types::BeliefDelta;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "amount", rename_all = "snake_case")]
pub enum CusumAdjustment {
    None,
    BoostAlpha(f64),
    BoostBeta(f64),
}

impl CusumAdjustment {
    pub fn as_delta(self) -> BeliefDelta {
        match self {
            CusumAdjustment::None => BeliefDelta {
                delta_alpha: 0.0,
                delta_beta: 0.0,
            },
            CusumAdjustment::BoostAlpha(amount) => BeliefDelta {
                delta_alpha: amount,
                delta_beta: 0.0,
            },
            CusumAdjustment::BoostBeta(amount) => BeliefDelta {
                delta_alpha: 0.0,
                delta_beta: amount,
            },
        }
    }

    pub fn fired(self) -> bool {
        !matches!(self, CusumAdjustment::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CusumStep {
    pub s: f64,
    pub adjustment: CusumAdjustment,
}

#[derive(Debug, Clone)]
pub struct CusumDetector {
    params: CusumParams,
}

impl CusumDetector {
    pub fn new(params: CusumParams) -> Self {
        Self { params }
    }

    pub fn step(&self, s: f64, x: u8) -> CusumStep {
        let x = f64::from(x.min(1));
        let next = (s + (x - self.params.k)).max(0.0);

        if next > self.params.h {
            CusumStep {
                s: 0.0,
                adjustment: CusumAdjustment::BoostAlpha(self.params.boost),
            }
        } else if next < -self.params.h {
            CusumStep {
                s: 0.0,
                adjustment: CusumAdjustment::BoostBeta(self.params.boost),
            }
        } else {
            CusumStep {
                s: next,
                adjustment: CusumAdjustment::None,
            }
        }
    }
}

impl Default for CusumDetector {
    fn default() -> Self {
        Self::new(CusumParams::default())
    }
}
