//! Bayesian mastery estimation.
//!
//! Every scored attempt flows through the same pipeline per bound entity:
//! time decay of the stored Beta belief, outcome scaling, CUSUM drift check,
//! then one optimistic write. Classification (SPRT) and topic aggregation are
//! read paths over the stored beliefs and outcome history.

pub mod config;
pub mod cusum;
pub mod decay;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod remediation;
pub mod retry;
pub mod scaler;
pub mod sprt;
pub mod topic;
pub mod types;
pub mod updater;

pub use config::MasteryConfig;
pub use cusum::{CusumAdjustment, CusumDetector};
pub use engine::{CompletionReport, EntityUpdateReport, EntityVerdict, MasteryEngine};
pub use error::EngineError;
pub use lifecycle::CompletionInput;
pub use remediation::RemediationPolicy;
pub use sprt::MasteryClassifier;
pub use topic::{TopicAggregator, TopicVerdict};
pub use types::{
    Attempt, AttemptOutcome, Belief, Difficulty, EntityKey, EntityType, MasteryEstimate,
    MasteryRecord, MasteryStatus, Score, ScalingType,
};
pub use updater::{AppliedUpdate, BayesianUpdater, BeliefUpdate};
