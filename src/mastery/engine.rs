use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::catalog::Catalog;
use crate::db::operations::{
    close_attempt, get_attempt, get_mastery_record, insert_attempt, insert_mastery_record,
    list_mastery_records, mark_attempt_scored, recent_outcomes, upsert_status, AttemptClosure,
};
use crate::db::DatabaseProxy;
use crate::mastery::config::MasteryConfig;
use crate::mastery::cusum::CusumAdjustment;
use crate::mastery::decay::decay;
use crate::mastery::error::EngineError;
use crate::mastery::lifecycle::{resolve_completion, CompletionInput, ResolvedCompletion};
use crate::mastery::remediation::RemediationPolicy;
use crate::mastery::retry::{retry_optimistic, TxOutcome};
use crate::mastery::sprt::MasteryClassifier;
use crate::mastery::topic::{TopicAggregator, TopicVerdict};
use crate::mastery::types::{
    validate_identifier, Attempt, EntityKey, EntityType, MasteryEstimate, MasteryRecord,
    MasteryStatus,
};
use crate::mastery::updater::{AppliedUpdate, BayesianUpdater};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityUpdateReport {
    pub entity_type: EntityType,
    pub entity_id: i64,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub belief: Option<MasteryEstimate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cusum: Option<CusumAdjustment>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReport {
    pub attempt_id: String,
    pub scored: bool,
    pub updates: Vec<EntityUpdateReport>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityVerdict {
    pub key: EntityKey,
    pub mastery: f64,
    pub status: MasteryStatus,
    pub samples: usize,
}

/// Entry point used by the HTTP layer and by embedding applications.
pub struct MasteryEngine {
    config: MasteryConfig,
    db: Arc<DatabaseProxy>,
    catalog: Arc<Catalog>,
    updater: BayesianUpdater,
    classifier: MasteryClassifier,
    topics: TopicAggregator,
    remediation: RemediationPolicy,
}

impl MasteryEngine {
    pub fn new(config: MasteryConfig, db: Arc<DatabaseProxy>, catalog: Arc<Catalog>) -> Self {
        Self {
            updater: BayesianUpdater::new(&config),
            classifier: MasteryClassifier::new(config.sprt.clone()),
            topics: TopicAggregator::new(&config),
            remediation: RemediationPolicy::new(&config),
            config,
            db,
            catalog,
        }
    }

    pub fn config(&self) -> &MasteryConfig {
        &self.config
    }

    pub fn db(&self) -> Arc<DatabaseProxy> {
        Arc::clone(&self.db)
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog)
    }

    pub async fn record_attempt_start(
        &self,
        user_id: &str,
        question_id: &str,
        course_id: &str,
    ) -> Result<String, EngineError> {
        self.record_attempt_start_at(user_id, question_id, course_id, Utc::now())
            .await
            .map(|attempt| attempt.id)
    }

    pub async fn record_attempt_start_at(
        &self,
        user_id: &str,
        question_id: &str,
        course_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Attempt, EngineError> {
        validate_identifier("userId", user_id)?;
        validate_identifier("questionId", question_id)?;
        validate_identifier("courseId", course_id)?;

        let binding = self.catalog.question(course_id, question_id)?;

        let attempt = Attempt {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            question_id: question_id.to_string(),
            course_id: course_id.to_string(),
            skills: binding.skills.clone(),
            topics: binding.topics.clone(),
            problem_number_type: binding.problem_number_type,
            difficulty: binding.difficulty,
            answer_time_start: now,
            finished_or_not: false,
            is_correct: None,
            scores_fipi: None,
            duration_answer: None,
            completed_at: None,
            scored: false,
        };

        insert_attempt(self.db.pool(), &attempt).await?;

        tracing::debug!(
            attempt_id = %attempt.id,
            user_id,
            question_id,
            course_id,
            skills = ?attempt.skills,
            "attempt started"
        );

        Ok(attempt)
    }

    pub async fn record_attempt_complete(
        &self,
        attempt_id: &str,
        input: CompletionInput,
    ) -> Result<CompletionReport, EngineError> {
        self.record_attempt_complete_at(attempt_id, input, Utc::now())
            .await
    }

    /// Scores an attempt exactly once.
    ///
    /// A call that failed halfway leaves the attempt closed but unscored; the
    /// next call resumes with the stored outcome and only touches entities the
    /// ledger has not seen yet.
    pub async fn record_attempt_complete_at(
        &self,
        attempt_id: &str,
        input: CompletionInput,
        now: DateTime<Utc>,
    ) -> Result<CompletionReport, EngineError> {
        validate_identifier("attemptId", attempt_id)?;
        let pool = self.db.pool();

        let mut attempt = get_attempt(pool, attempt_id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("attempt {attempt_id}")))?;

        let resolved = if attempt.is_closed() {
            Self::resumable(&attempt)?
        } else {
            let resolved = resolve_completion(&attempt, &input, now)?;
            let closure = AttemptClosure {
                finished: resolved.finished,
                is_correct: resolved.is_correct,
                score: resolved.score,
                duration_secs: Some(resolved.duration_secs),
                completed_at: now,
            };
            if close_attempt(pool, attempt_id, &closure).await? {
                attempt.completed_at = Some(now);
                resolved
            } else {
                attempt = get_attempt(pool, attempt_id)
                    .await?
                    .ok_or_else(|| EngineError::not_found(format!("attempt {attempt_id}")))?;
                Self::resumable(&attempt)?
            }
        };

        let Some(outcome) = resolved.outcome(&attempt) else {
            tracing::info!(attempt_id, "attempt closed without an answer, no evidence recorded");
            return Ok(CompletionReport {
                attempt_id: attempt_id.to_string(),
                scored: false,
                updates: Vec::new(),
            });
        };

        let evidence_at = attempt.completed_at.unwrap_or(now);
        let entities = attempt.belief_entities();
        let updates = entities.iter().map(|(entity_type, entity_id)| {
            let key = EntityKey::new(
                attempt.user_id.clone(),
                *entity_type,
                *entity_id,
                attempt.course_id.clone(),
            );
            let outcome = &outcome;
            async move {
                let applied = self
                    .updater
                    .update_for_attempt(&self.db, attempt_id, &key, outcome, evidence_at)
                    .await;
                (key, applied)
            }
        });
        let results = futures::future::join_all(updates).await;

        let mut reports = Vec::with_capacity(results.len());
        for (key, applied) in results {
            match applied {
                Ok(AppliedUpdate::Applied(update)) => reports.push(EntityUpdateReport {
                    entity_type: key.entity_type,
                    entity_id: key.entity_id,
                    applied: true,
                    belief: Some(MasteryEstimate {
                        mastery: update.record.mastery(),
                        alpha: Some(update.record.alpha),
                        beta: Some(update.record.beta),
                    }),
                    cusum: Some(update.cusum),
                }),
                Ok(AppliedUpdate::AlreadyApplied) => reports.push(EntityUpdateReport {
                    entity_type: key.entity_type,
                    entity_id: key.entity_id,
                    applied: false,
                    belief: None,
                    cusum: None,
                }),
                Err(err) => {
                    tracing::warn!(
                        attempt_id,
                        key = %key,
                        error = %err,
                        "belief update failed, attempt left unscored"
                    );
                    return Err(err);
                }
            }
        }

        mark_attempt_scored(pool, attempt_id).await?;

        tracing::info!(
            attempt_id,
            user_id = %attempt.user_id,
            score = outcome.score.value(),
            entities = reports.len(),
            "attempt scored"
        );

        Ok(CompletionReport {
            attempt_id: attempt_id.to_string(),
            scored: true,
            updates: reports,
        })
    }

    fn resumable(attempt: &Attempt) -> Result<ResolvedCompletion, EngineError> {
        if attempt.scored || !attempt.finished_or_not {
            return Err(EngineError::AlreadyCompleted(attempt.id.clone()));
        }
        Ok(ResolvedCompletion::from_attempt(attempt))
    }

    async fn existing_record(&self, key: &EntityKey) -> Result<MasteryRecord, EngineError> {
        key.validate()?;
        get_mastery_record(self.db.pool(), key)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("no belief recorded for {key}")))
    }

    pub async fn get_mastery(&self, key: &EntityKey) -> Result<f64, EngineError> {
        self.get_estimate_at(key, Utc::now())
            .await
            .map(|estimate| estimate.mastery)
    }

    /// Decayed pseudo-counts alongside the point estimate, as progress bars
    /// read them.
    pub async fn get_estimate_at(
        &self,
        key: &EntityKey,
        now: DateTime<Utc>,
    ) -> Result<MasteryEstimate, EngineError> {
        if key.entity_type == EntityType::Topic {
            key.validate()?;
            let mastery = self
                .topics
                .topic_mastery(&self.db, &self.catalog, &key.user_id, &key.course_id, key.entity_id, now)
                .await?
                .ok_or_else(|| EngineError::not_found(format!("no skill evidence for {key}")))?;
            return Ok(MasteryEstimate {
                mastery,
                alpha: None,
                beta: None,
            });
        }

        let record = self.existing_record(key).await?;
        let decayed = decay(record.belief(), now, record.last_attempt_at, self.config.decay.lambda);
        Ok(MasteryEstimate {
            mastery: decayed.mastery(),
            alpha: Some(decayed.alpha),
            beta: Some(decayed.beta),
        })
    }

    pub async fn get_status(&self, key: &EntityKey) -> Result<MasteryStatus, EngineError> {
        if key.entity_type == EntityType::Topic {
            return self.topic_status_at(key, Utc::now()).await.map(|v| v.status);
        }
        self.classify_entity_at(key, Utc::now())
            .await
            .map(|verdict| verdict.status)
    }

    /// Runs the SPRT for one skill or problem-number type and stores the
    /// verdict in its status column.
    pub async fn classify_entity_at(
        &self,
        key: &EntityKey,
        now: DateTime<Utc>,
    ) -> Result<EntityVerdict, EngineError> {
        let record = self.existing_record(key).await?;
        let mastery = decay(record.belief(), now, record.last_attempt_at, self.config.decay.lambda)
            .mastery();

        let params = self.classifier.params();
        let since = now - Duration::days(params.window_days);
        let samples = recent_outcomes(
            self.db.pool(),
            &key.user_id,
            &key.course_id,
            key.entity_type,
            &[key.entity_id],
            since,
            params.window,
        )
        .await?;
        let outcomes: Vec<u8> = samples.iter().map(|s| u8::from(s.is_correct)).collect();
        let status = self.classifier.classify(&outcomes, mastery);

        if status != record.status {
            upsert_status(self.db.pool(), key, status, now).await?;
            tracing::info!(
                key = %key,
                from = record.status.as_str(),
                to = status.as_str(),
                mastery,
                "mastery status changed"
            );
        }

        Ok(EntityVerdict {
            key: key.clone(),
            mastery,
            status,
            samples: outcomes.len(),
        })
    }

    pub async fn topic_mastery(
        &self,
        user_id: &str,
        course_id: &str,
        topic_id: i64,
    ) -> Result<Option<f64>, EngineError> {
        validate_identifier("userId", user_id)?;
        validate_identifier("courseId", course_id)?;
        self.topics
            .topic_mastery(&self.db, &self.catalog, user_id, course_id, topic_id, Utc::now())
            .await
    }

    pub async fn topic_status_at(
        &self,
        key: &EntityKey,
        now: DateTime<Utc>,
    ) -> Result<TopicVerdict, EngineError> {
        key.validate()?;
        self.topics
            .topic_status(&self.db, &self.catalog, &key.user_id, &key.course_id, key.entity_id, now)
            .await
    }

    /// Seeds the cold-start prior for every entity of the course that has no
    /// record yet. Existing evidence is never overwritten.
    pub async fn initialize_priors(&self, user_id: &str, course_id: &str) -> Result<usize, EngineError> {
        validate_identifier("userId", user_id)?;
        validate_identifier("courseId", course_id)?;
        let entities = self.catalog.course(course_id)?.entities();
        let now = Utc::now();
        let label = format!("{user_id}/{course_id}");
        let db = &self.db;
        let entities = &entities;

        let seeded = retry_optimistic(&self.config.retry, &label, move || async move {
            let mut tx = db.pool().begin().await?;
            let mut seeded = 0usize;
            for (entity_type, entity_id) in entities {
                let key = EntityKey::new(user_id, *entity_type, *entity_id, course_id);
                if insert_mastery_record(&mut *tx, &MasteryRecord::cold_start(key, now)).await? {
                    seeded += 1;
                }
            }
            tx.commit().await?;
            Ok::<_, sqlx::Error>(TxOutcome::Committed(seeded))
        })
        .await?;

        tracing::info!(user_id, course_id, seeded, total = entities.len(), "priors initialized");
        Ok(seeded)
    }

    pub async fn remediate_topics(
        &self,
        user_id: &str,
        course_id: &str,
        topics: &[i64],
    ) -> Result<Vec<i64>, EngineError> {
        validate_identifier("userId", user_id)?;
        validate_identifier("courseId", course_id)?;
        self.remediation
            .remediate(&self.db, &self.catalog, user_id, course_id, topics, Utc::now())
            .await
    }

    pub async fn list_beliefs(
        &self,
        user_id: &str,
        course_id: &str,
    ) -> Result<Vec<MasteryRecord>, EngineError> {
        validate_identifier("userId", user_id)?;
        validate_identifier("courseId", course_id)?;
        Ok(list_mastery_records(self.db.pool(), user_id, course_id).await?)
    }
}
