use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mastery::error::EngineError;
use crate::mastery::types::{Attempt, AttemptOutcome, Score};

/// Caller-reported result of an attempt.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionInput {
    pub finished: bool,
    #[serde(default)]
    pub is_correct: Option<bool>,
    #[serde(default)]
    pub score: Option<u8>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

/// Normalized completion: the values stored on the attempt row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedCompletion {
    pub finished: bool,
    pub is_correct: Option<bool>,
    pub score: Option<Score>,
    pub duration_secs: f64,
}

impl ResolvedCompletion {
    pub fn outcome(&self, attempt: &Attempt) -> Option<AttemptOutcome> {
        if !self.finished {
            return None;
        }
        Some(AttemptOutcome {
            score: self.score?,
            difficulty: attempt.difficulty,
            duration_secs: self.duration_secs,
            is_correct: self.is_correct?,
        })
    }

    /// Rebuilds the completion persisted by an earlier, partially applied call.
    pub fn from_attempt(attempt: &Attempt) -> Self {
        Self {
            finished: attempt.finished_or_not,
            is_correct: attempt.is_correct,
            score: attempt.scores_fipi,
            duration_secs: attempt.duration_answer.unwrap_or_default(),
        }
    }
}

/// Validates a completion and fills in whichever of correctness and score
/// was left out. Abandoned attempts carry no evidence.
pub fn resolve_completion(
    attempt: &Attempt,
    input: &CompletionInput,
    completed_at: DateTime<Utc>,
) -> Result<ResolvedCompletion, EngineError> {
    let duration_secs = match input.duration_secs {
        Some(d) if !d.is_finite() || d < 0.0 => {
            return Err(EngineError::validation(format!(
                "durationSecs must be a non-negative number, got {d}"
            )))
        }
        Some(d) => d,
        None => {
            let millis = (completed_at - attempt.answer_time_start).num_milliseconds();
            (millis as f64 / 1000.0).max(0.0)
        }
    };

    let score = input.score.map(Score::new).transpose()?;

    if !input.finished {
        return Ok(ResolvedCompletion {
            finished: false,
            is_correct: input.is_correct,
            score,
            duration_secs,
        });
    }

    let (score, is_correct) = match (score, input.is_correct) {
        (Some(score), Some(correct)) => {
            if (correct && score == Score::WRONG) || (!correct && score == Score::FULL) {
                return Err(EngineError::validation(format!(
                    "isCorrect={correct} contradicts score={}",
                    score.value()
                )));
            }
            (score, correct)
        }
        (Some(score), None) => (score, score == Score::FULL),
        (None, Some(correct)) => (if correct { Score::FULL } else { Score::WRONG }, correct),
        (None, None) => {
            return Err(EngineError::validation(
                "a finished attempt needs isCorrect or score",
            ))
        }
    };

    Ok(ResolvedCompletion {
        finished: true,
        is_correct: Some(is_correct),
        score: Some(score),
        duration_secs,
    })
}
