use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Sqlite, Transaction};

use crate::db::operations::{
    get_mastery_record, is_update_applied, record_update_applied, write_mastery_record,
};
use crate::db::DatabaseProxy;
use crate::mastery::config::{DecayParams, MasteryConfig, RetryParams, ScalerParams};
use crate::mastery::cusum::{CusumAdjustment, CusumDetector};
use crate::mastery::decay::decay;
use crate::mastery::error::EngineError;
use crate::mastery::retry::{retry_optimistic, TxOutcome};
use crate::mastery::scaler::scale;
use crate::mastery::types::{AttemptOutcome, Belief, BeliefDelta, EntityKey, MasteryRecord};

/// Keeps `alpha > 0 && beta > 0` after extreme decay.
const MIN_PSEUDO_COUNT: f64 = 1e-6;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeliefUpdate {
    pub record: MasteryRecord,
    pub decayed: Belief,
    pub delta: BeliefDelta,
    pub cusum: CusumAdjustment,
}

#[derive(Debug, Clone)]
pub enum AppliedUpdate {
    Applied(BeliefUpdate),
    AlreadyApplied,
}

#[derive(Debug, Clone)]
pub struct BayesianUpdater {
    decay: DecayParams,
    scaler: ScalerParams,
    detector: CusumDetector,
    retry: RetryParams,
}

impl BayesianUpdater {
    pub fn new(config: &MasteryConfig) -> Self {
        Self {
            decay: config.decay.clone(),
            scaler: config.scaler.clone(),
            detector: CusumDetector::new(config.cusum.clone()),
            retry: config.retry.clone(),
        }
    }

    /// decay → scale → cusum, in that order, on a snapshot of the record.
    pub fn apply(
        &self,
        current: &MasteryRecord,
        outcome: &AttemptOutcome,
        now: DateTime<Utc>,
    ) -> BeliefUpdate {
        let decayed = decay(current.belief(), now, current.last_attempt_at, self.decay.lambda);
        let decayed = Belief::new(
            decayed.alpha.max(MIN_PSEUDO_COUNT),
            decayed.beta.max(MIN_PSEUDO_COUNT),
        );

        let delta = scale(outcome, &self.scaler);
        let step = self.detector.step(current.cusum_s, outcome.binary());
        let boost = step.adjustment.as_delta();

        let record = MasteryRecord {
            key: current.key.clone(),
            alpha: decayed.alpha + delta.delta_alpha + boost.delta_alpha,
            beta: decayed.beta + delta.delta_beta + boost.delta_beta,
            cusum_s: step.s,
            status: current.status,
            updated_at: now,
            last_attempt_at: Some(now),
            version: current.version,
        };

        BeliefUpdate {
            record,
            decayed,
            delta,
            cusum: step.adjustment,
        }
    }

    /// Applies one outcome to one entity outside any attempt bookkeeping.
    pub async fn update(
        &self,
        db: &DatabaseProxy,
        key: &EntityKey,
        outcome: &AttemptOutcome,
        now: DateTime<Utc>,
    ) -> Result<BeliefUpdate, EngineError> {
        Self::check_key(key)?;
        let label = key.to_string();
        let update = retry_optimistic(&self.retry, &label, move || async move {
            let mut tx = db.pool().begin().await?;
            let Some(update) = self.write_update(&mut tx, key, outcome, now).await? else {
                tx.rollback().await?;
                return Ok(TxOutcome::Conflict);
            };
            tx.commit().await?;
            Ok::<_, sqlx::Error>(TxOutcome::Committed(update))
        })
        .await?;

        log_update(&label, &update);
        Ok(update)
    }

    /// Applies an attempt's outcome to one entity at most once.
    pub async fn update_for_attempt(
        &self,
        db: &DatabaseProxy,
        attempt_id: &str,
        key: &EntityKey,
        outcome: &AttemptOutcome,
        now: DateTime<Utc>,
    ) -> Result<AppliedUpdate, EngineError> {
        Self::check_key(key)?;
        let label = key.to_string();
        let applied = retry_optimistic(&self.retry, &label, move || {
            self.try_update_for_attempt(db, attempt_id, key, outcome, now)
        })
        .await?;

        match &applied {
            AppliedUpdate::Applied(update) => log_update(&label, update),
            AppliedUpdate::AlreadyApplied => {
                tracing::debug!(key = %label, attempt_id, "update already applied, skipping");
            }
        }

        Ok(applied)
    }

    fn check_key(key: &EntityKey) -> Result<(), EngineError> {
        key.validate()?;
        if !key.entity_type.carries_belief() {
            return Err(EngineError::validation(format!(
                "{} entities do not carry a belief",
                key.entity_type.as_str()
            )));
        }
        Ok(())
    }

    async fn try_update_for_attempt(
        &self,
        db: &DatabaseProxy,
        attempt_id: &str,
        key: &EntityKey,
        outcome: &AttemptOutcome,
        now: DateTime<Utc>,
    ) -> Result<TxOutcome<AppliedUpdate>, sqlx::Error> {
        let mut tx = db.pool().begin().await?;

        if is_update_applied(&mut *tx, attempt_id, key.entity_type, key.entity_id).await? {
            tx.rollback().await?;
            return Ok(TxOutcome::Committed(AppliedUpdate::AlreadyApplied));
        }

        let Some(update) = self.write_update(&mut tx, key, outcome, now).await? else {
            tx.rollback().await?;
            return Ok(TxOutcome::Conflict);
        };

        if !record_update_applied(&mut *tx, attempt_id, key.entity_type, key.entity_id, now).await? {
            tx.rollback().await?;
            return Ok(TxOutcome::Committed(AppliedUpdate::AlreadyApplied));
        }

        tx.commit().await?;
        Ok(TxOutcome::Committed(AppliedUpdate::Applied(update)))
    }

    /// Read, apply and compare-and-swap inside `tx`. `None` means another
    /// writer bumped the version first.
    async fn write_update(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        key: &EntityKey,
        outcome: &AttemptOutcome,
        now: DateTime<Utc>,
    ) -> Result<Option<BeliefUpdate>, sqlx::Error> {
        let current = get_mastery_record(&mut **tx, key)
            .await?
            .unwrap_or_else(|| MasteryRecord::cold_start(key.clone(), now));
        let mut update = self.apply(&current, outcome, now);

        if !write_mastery_record(&mut **tx, &update.record, current.version).await? {
            return Ok(None);
        }

        update.record.version = current.version + 1;
        Ok(Some(update))
    }
}

fn log_update(label: &str, update: &BeliefUpdate) {
    tracing::debug!(
        key = %label,
        alpha = update.record.alpha,
        beta = update.record.beta,
        cusum_s = update.record.cusum_s,
        "belief updated"
    );
    if update.cusum.fired() {
        tracing::info!(key = %label, adjustment = ?update.cusum, "cusum drift detected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mastery::types::{Difficulty, EntityType, Score};
    use chrono::Duration;

    fn key() -> EntityKey {
        EntityKey::new("learner-1", EntityType::Skill, 7, "math")
    }

    fn outcome(score: Score, difficulty: u8, duration_secs: f64) -> AttemptOutcome {
        AttemptOutcome {
            score,
            difficulty: Difficulty::new(difficulty).unwrap(),
            duration_secs,
            is_correct: score == Score::FULL,
        }
    }

    #[test]
    fn test_cold_start_correct_answer() {
        let updater = BayesianUpdater::new(&MasteryConfig::default());
        let now = Utc::now();
        let current = MasteryRecord::cold_start(key(), now);
        let update = updater.apply(&current, &outcome(Score::FULL, 3, 60.0), now);

        assert_eq!(update.record.alpha, 4.0);
        assert_eq!(update.record.beta, 40.0);
        assert_eq!(update.record.cusum_s, 0.5);
        assert_eq!(update.cusum, CusumAdjustment::None);
        assert!((update.record.mastery() - 4.0 / 44.0).abs() < 1e-12);
        assert_eq!(update.record.last_attempt_at, Some(now));
    }

    #[test]
    fn test_decay_applied_before_increment() {
        let updater = BayesianUpdater::new(&MasteryConfig::default());
        let now = Utc::now();
        let mut current = MasteryRecord::cold_start(key(), now);
        current.alpha = 20.0;
        current.beta = 20.0;
        current.last_attempt_at = Some(now - Duration::days(10));

        let update = updater.apply(&current, &outcome(Score::WRONG, 2, 30.0), now);
        let w = (-0.02f64 * 10.0).exp();
        assert!((update.decayed.alpha - 20.0 * w).abs() < 1e-9);
        assert!((update.record.beta - (20.0 * w + 2.0)).abs() < 1e-9);
        assert_eq!(update.record.cusum_s, 0.0);
    }

    #[test]
    fn test_cusum_boost_lands_in_same_write() {
        let updater = BayesianUpdater::new(&MasteryConfig::default());
        let now = Utc::now();
        let mut current = MasteryRecord::cold_start(key(), now);
        current.cusum_s = 3.0;

        let update = updater.apply(&current, &outcome(Score::FULL, 1, 10.0), now);
        assert_eq!(update.cusum, CusumAdjustment::BoostAlpha(0.5));
        assert_eq!(update.record.alpha, 1.0 + 1.0 + 0.5);
        assert_eq!(update.record.cusum_s, 0.0);
    }

    #[test]
    fn test_correct_answer_never_lowers_ratio() {
        let updater = BayesianUpdater::new(&MasteryConfig::default());
        let now = Utc::now();
        let mut record = MasteryRecord::cold_start(key(), now);
        for difficulty in [1, 5, 3, 2, 4, 5, 1] {
            let before = record.mastery();
            record = updater
                .apply(&record, &outcome(Score::FULL, difficulty, 700.0), now)
                .record;
            assert!(record.mastery() >= before);
        }
    }
}
