use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::catalog::Catalog;
use crate::db::operations::{
    entities_with_evidence, get_mastery_record, recent_outcomes, upsert_status,
};
use crate::db::DatabaseProxy;
use crate::mastery::config::{DecayParams, MasteryConfig};
use crate::mastery::decay::decay;
use crate::mastery::error::EngineError;
use crate::mastery::sprt::MasteryClassifier;
use crate::mastery::types::{EntityKey, EntityType, MasteryRecord, MasteryStatus};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicVerdict {
    pub topic_id: i64,
    pub mastery: Option<f64>,
    pub status: MasteryStatus,
    pub samples: usize,
    pub skills_with_evidence: usize,
}

/// Topic-level view over skill beliefs.
///
/// The point estimate averages per-skill probabilities, while the SPRT runs on
/// the raw outcomes pooled across the topic's skills. Seeded or remediated
/// rows alone are not evidence: a topic none of whose skills was ever
/// updated by an attempt has no estimate.
#[derive(Debug, Clone)]
pub struct TopicAggregator {
    decay: DecayParams,
    classifier: MasteryClassifier,
}

impl TopicAggregator {
    pub fn new(config: &MasteryConfig) -> Self {
        Self {
            decay: config.decay.clone(),
            classifier: MasteryClassifier::new(config.sprt.clone()),
        }
    }

    pub fn mean_mastery(&self, records: &[MasteryRecord], now: DateTime<Utc>) -> Option<f64> {
        if records.is_empty() {
            return None;
        }
        let sum: f64 = records
            .iter()
            .map(|r| decay(r.belief(), now, r.last_attempt_at, self.decay.lambda).mastery())
            .sum();
        Some(sum / records.len() as f64)
    }

    async fn skill_records(
        &self,
        db: &DatabaseProxy,
        user_id: &str,
        course_id: &str,
        skills: &[i64],
    ) -> Result<Vec<MasteryRecord>, EngineError> {
        let mut records = Vec::with_capacity(skills.len());
        for skill in skills {
            let key = EntityKey::new(user_id, EntityType::Skill, *skill, course_id);
            if let Some(record) = get_mastery_record(db.pool(), &key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Mean decayed mastery and the number of skills with attempt evidence.
    async fn estimate(
        &self,
        db: &DatabaseProxy,
        user_id: &str,
        course_id: &str,
        skills: &[i64],
        now: DateTime<Utc>,
    ) -> Result<(Option<f64>, usize), EngineError> {
        let evidenced =
            entities_with_evidence(db.pool(), user_id, course_id, EntityType::Skill, skills)
                .await?;
        if evidenced.is_empty() {
            return Ok((None, 0));
        }
        let records = self.skill_records(db, user_id, course_id, skills).await?;
        Ok((self.mean_mastery(&records, now), evidenced.len()))
    }

    pub async fn topic_mastery(
        &self,
        db: &DatabaseProxy,
        catalog: &Catalog,
        user_id: &str,
        course_id: &str,
        topic_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>, EngineError> {
        let skills = catalog.topic_skills(course_id, topic_id)?;
        let (mastery, _) = self.estimate(db, user_id, course_id, skills, now).await?;
        Ok(mastery)
    }

    /// Runs the topic SPRT and stores the verdict in the topic's status row.
    pub async fn topic_status(
        &self,
        db: &DatabaseProxy,
        catalog: &Catalog,
        user_id: &str,
        course_id: &str,
        topic_id: i64,
        now: DateTime<Utc>,
    ) -> Result<TopicVerdict, EngineError> {
        let skills = catalog.topic_skills(course_id, topic_id)?;
        let (mastery, skills_with_evidence) =
            self.estimate(db, user_id, course_id, skills, now).await?;

        let params = self.classifier.params();
        let since = now - Duration::days(params.window_days);
        let samples = recent_outcomes(
            db.pool(),
            user_id,
            course_id,
            EntityType::Skill,
            skills,
            since,
            params.window,
        )
        .await?;
        let outcomes: Vec<u8> = samples.iter().map(|s| u8::from(s.is_correct)).collect();

        let status = match mastery {
            Some(p) => self.classifier.classify(&outcomes, p),
            None => MasteryStatus::Continue,
        };

        let key = EntityKey::new(user_id, EntityType::Topic, topic_id, course_id);
        upsert_status(db.pool(), &key, status, now).await?;

        tracing::debug!(
            topic_id,
            course_id,
            samples = outcomes.len(),
            status = status.as_str(),
            "topic classified"
        );

        Ok(TopicVerdict {
            topic_id,
            mastery,
            status,
            samples: outcomes.len(),
            skills_with_evidence,
        })
    }
}
