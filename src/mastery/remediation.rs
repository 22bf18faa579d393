use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::catalog::Catalog;
use crate::db::operations::{get_mastery_record, write_mastery_record};
use crate::db::DatabaseProxy;
use crate::mastery::config::{MasteryConfig, RemediationParams, RetryParams};
use crate::mastery::error::EngineError;
use crate::mastery::retry::{retry_optimistic, TxOutcome};
use crate::mastery::types::{Belief, EntityKey, EntityType, MasteryRecord, MasteryStatus};

/// Sends weak skills of a finished unit back to focused practice.
///
/// The reset prior (11, 40) sits above cold start but below the threshold
/// boundary, so running the policy twice leaves the second pass a no-op.
#[derive(Debug, Clone)]
pub struct RemediationPolicy {
    params: RemediationParams,
    retry: RetryParams,
}

impl RemediationPolicy {
    pub fn new(config: &MasteryConfig) -> Self {
        Self {
            params: config.remediation.clone(),
            retry: config.retry.clone(),
        }
    }

    pub fn needs_reset(&self, belief: Belief) -> bool {
        belief.mastery() <= self.params.threshold
    }

    /// The reset prior starts a fresh forgetting clock at `now`.
    pub fn reset(&self, current: &MasteryRecord, now: DateTime<Utc>) -> MasteryRecord {
        let prior = self.params.reset_belief();
        MasteryRecord {
            key: current.key.clone(),
            alpha: prior.alpha,
            beta: prior.beta,
            cusum_s: 0.0,
            status: MasteryStatus::Continue,
            updated_at: now,
            last_attempt_at: Some(now),
            version: current.version,
        }
    }

    pub async fn remediate(
        &self,
        db: &DatabaseProxy,
        catalog: &Catalog,
        user_id: &str,
        course_id: &str,
        topics: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>, EngineError> {
        let mut skills = BTreeSet::new();
        for topic in topics {
            skills.extend(catalog.topic_skills(course_id, *topic)?.iter().copied());
        }

        let mut reset = Vec::new();
        for skill in skills {
            let key = EntityKey::new(user_id, EntityType::Skill, skill, course_id);
            key.validate()?;
            let label = key.to_string();
            let key_ref = &key;
            let was_reset = retry_optimistic(&self.retry, &label, move || {
                self.try_reset(db, key_ref, now)
            })
            .await?;
            if was_reset {
                reset.push(skill);
            }
        }

        tracing::info!(
            user_id,
            course_id,
            topics = ?topics,
            reset = ?reset,
            "remediation applied"
        );

        Ok(reset)
    }

    async fn try_reset(
        &self,
        db: &DatabaseProxy,
        key: &EntityKey,
        now: DateTime<Utc>,
    ) -> Result<TxOutcome<bool>, sqlx::Error> {
        let mut tx = db.pool().begin().await?;

        let current = get_mastery_record(&mut *tx, key)
            .await?
            .unwrap_or_else(|| MasteryRecord::cold_start(key.clone(), now));

        if !self.needs_reset(current.belief()) {
            tx.rollback().await?;
            return Ok(TxOutcome::Committed(false));
        }

        let next = self.reset(&current, now);
        if !write_mastery_record(&mut *tx, &next, current.version).await? {
            tx.rollback().await?;
            return Ok(TxOutcome::Conflict);
        }

        tx.commit().await?;
        Ok(TxOutcome::Committed(true))
    }
}
