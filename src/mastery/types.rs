use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mastery::error::EngineError;

pub const DEFAULT_ALPHA: f64 = 1.0;
pub const DEFAULT_BETA: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Skill,
    ProblemNumberType,
    Topic,
}

impl EntityType {
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityType::Skill => "skill",
            EntityType::ProblemNumberType => "problem_number_type",
            EntityType::Topic => "topic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "skill" => Some(EntityType::Skill),
            "problem_number_type" => Some(EntityType::ProblemNumberType),
            "topic" => Some(EntityType::Topic),
            _ => None,
        }
    }

    /// Topic rows only carry a status; their belief is derived from skills.
    pub const fn carries_belief(self) -> bool {
        !matches!(self, EntityType::Topic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasteryStatus {
    #[default]
    Continue,
    Mastered,
    NotMastered,
}

impl MasteryStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            MasteryStatus::Continue => "continue",
            MasteryStatus::Mastered => "mastered",
            MasteryStatus::NotMastered => "not_mastered",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "mastered" => MasteryStatus::Mastered,
            "not_mastered" => MasteryStatus::NotMastered,
            _ => MasteryStatus::Continue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityKey {
    pub user_id: String,
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub course_id: String,
}

impl EntityKey {
    pub fn new(
        user_id: impl Into<String>,
        entity_type: EntityType,
        entity_id: i64,
        course_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            entity_type,
            entity_id,
            course_id: course_id.into(),
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        validate_identifier("userId", &self.user_id)?;
        validate_identifier("courseId", &self.course_id)?;
        if self.entity_id < 0 {
            return Err(EngineError::validation(format!(
                "entityId must be non-negative, got {}",
                self.entity_id
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}:{}/{}",
            self.user_id,
            self.entity_type.as_str(),
            self.entity_id,
            self.course_id
        )
    }
}

pub fn validate_identifier(field: &str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::validation(format!("{field} must not be empty")));
    }
    if value.len() > 128 {
        return Err(EngineError::validation(format!("{field} is too long")));
    }
    Ok(())
}

/// Beta-distribution pseudo-counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Belief {
    pub alpha: f64,
    pub beta: f64,
}

impl Belief {
    pub const fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }

    pub const fn cold_start() -> Self {
        Self::new(DEFAULT_ALPHA, DEFAULT_BETA)
    }

    pub fn mastery(&self) -> f64 {
        let total = self.alpha + self.beta;
        if total <= 0.0 {
            return 0.0;
        }
        self.alpha / total
    }
}

impl Default for Belief {
    fn default() -> Self {
        Self::cold_start()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryRecord {
    pub key: EntityKey,
    pub alpha: f64,
    pub beta: f64,
    pub cusum_s: f64,
    pub status: MasteryStatus,
    pub updated_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl MasteryRecord {
    pub fn cold_start(key: EntityKey, now: DateTime<Utc>) -> Self {
        let belief = Belief::cold_start();
        Self {
            key,
            alpha: belief.alpha,
            beta: belief.beta,
            cusum_s: 0.0,
            status: MasteryStatus::Continue,
            updated_at: now,
            last_attempt_at: None,
            version: 0,
        }
    }

    pub fn belief(&self) -> Belief {
        Belief::new(self.alpha, self.beta)
    }

    pub fn mastery(&self) -> f64 {
        self.belief().mastery()
    }
}

/// Partial score on the 0–2 scale used by graded exam tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Score(u8);

impl Score {
    pub const WRONG: Score = Score(0);
    pub const PARTIAL: Score = Score(1);
    pub const FULL: Score = Score(2);

    pub fn new(value: u8) -> Result<Self, EngineError> {
        if value > 2 {
            return Err(EngineError::validation(format!(
                "score must be 0, 1 or 2, got {value}"
            )));
        }
        Ok(Score(value))
    }

    pub const fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Score {
    type Error = EngineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Score::new(value)
    }
}

impl From<Score> for u8 {
    fn from(score: Score) -> Self {
        score.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Difficulty(u8);

impl Difficulty {
    pub const DEFAULT: Difficulty = Difficulty(3);

    pub fn new(value: u8) -> Result<Self, EngineError> {
        if !(1..=5).contains(&value) {
            return Err(EngineError::validation(format!(
                "difficulty must be within 1..=5, got {value}"
            )));
        }
        Ok(Difficulty(value))
    }

    pub const fn value(self) -> u8 {
        self.0
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u8> for Difficulty {
    type Error = EngineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Difficulty::new(value)
    }
}

impl From<Difficulty> for u8 {
    fn from(difficulty: Difficulty) -> Self {
        difficulty.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingType {
    #[default]
    Linear,
    Exponential,
}

impl ScalingType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "linear" => Some(ScalingType::Linear),
            "exponential" | "exp" => Some(ScalingType::Exponential),
            _ => None,
        }
    }
}

/// Scored result of one completed attempt, as fed to every bound entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttemptOutcome {
    pub score: Score,
    pub difficulty: Difficulty,
    pub duration_secs: f64,
    pub is_correct: bool,
}

impl AttemptOutcome {
    /// Binary observation consumed by CUSUM and SPRT.
    pub fn binary(&self) -> u8 {
        u8::from(self.is_correct)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeliefDelta {
    pub delta_alpha: f64,
    pub delta_beta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub id: String,
    pub user_id: String,
    pub question_id: String,
    pub course_id: String,
    pub skills: Vec<i64>,
    pub topics: Vec<i64>,
    pub problem_number_type: Option<i64>,
    pub difficulty: Difficulty,
    pub answer_time_start: DateTime<Utc>,
    pub finished_or_not: bool,
    pub is_correct: Option<bool>,
    pub scores_fipi: Option<Score>,
    pub duration_answer: Option<f64>,
    pub completed_at: Option<DateTime<Utc>>,
    pub scored: bool,
}

impl Attempt {
    /// Entities that receive a Bayesian update when this attempt is scored.
    pub fn belief_entities(&self) -> Vec<(EntityType, i64)> {
        let mut entities: Vec<(EntityType, i64)> = self
            .skills
            .iter()
            .map(|id| (EntityType::Skill, *id))
            .collect();
        if let Some(pnt) = self.problem_number_type {
            entities.push((EntityType::ProblemNumberType, pnt));
        }
        entities.sort_unstable_by_key(|(kind, id)| (kind.as_str(), *id));
        entities.dedup();
        entities
    }

    pub fn is_closed(&self) -> bool {
        self.completed_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryEstimate {
    pub mastery: f64,
    /// Absent for topics, whose estimate is a mean over skills.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beta: Option<f64>,
}
