//! Course catalog: which skills, topics and problem-number types exist per
//! course, and which of them each question exercises.
//!
//! The catalog is owned by the content service; this crate only reads the
//! JSON export it publishes.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mastery::error::EngineError;
use crate::mastery::types::{Difficulty, EntityType};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionBinding {
    #[serde(default)]
    pub skills: Vec<i64>,
    #[serde(default)]
    pub topics: Vec<i64>,
    #[serde(default)]
    pub problem_number_type: Option<i64>,
    #[serde(default)]
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseCatalog {
    #[serde(default)]
    pub skills: Vec<i64>,
    #[serde(default)]
    pub problem_number_types: Vec<i64>,
    #[serde(default)]
    pub topics: HashMap<i64, Vec<i64>>,
    #[serde(default)]
    pub questions: HashMap<String, QuestionBinding>,
}

impl CourseCatalog {
    /// Every belief-carrying entity of the course, including skills only
    /// referenced through topics or questions.
    pub fn entities(&self) -> Vec<(EntityType, i64)> {
        let mut skills: BTreeSet<i64> = self.skills.iter().copied().collect();
        skills.extend(self.topics.values().flatten().copied());
        skills.extend(self.questions.values().flat_map(|q| q.skills.iter().copied()));

        let mut pnts: BTreeSet<i64> = self.problem_number_types.iter().copied().collect();
        pnts.extend(self.questions.values().filter_map(|q| q.problem_number_type));

        skills
            .into_iter()
            .map(|id| (EntityType::Skill, id))
            .chain(pnts.into_iter().map(|id| (EntityType::ProblemNumberType, id)))
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub courses: HashMap<String, CourseCatalog>,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let catalog = Self::from_json(&raw)?;
        tracing::info!(
            path = %path.display(),
            courses = catalog.courses.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn course(&self, course_id: &str) -> Result<&CourseCatalog, EngineError> {
        self.courses
            .get(course_id)
            .ok_or_else(|| EngineError::not_found(format!("course {course_id}")))
    }

    pub fn question(&self, course_id: &str, question_id: &str) -> Result<&QuestionBinding, EngineError> {
        self.course(course_id)?
            .questions
            .get(question_id)
            .ok_or_else(|| {
                EngineError::not_found(format!("question {question_id} in course {course_id}"))
            })
    }

    pub fn topic_skills(&self, course_id: &str, topic_id: i64) -> Result<&[i64], EngineError> {
        self.course(course_id)?
            .topics
            .get(&topic_id)
            .map(Vec::as_slice)
            .ok_or_else(|| EngineError::not_found(format!("topic {topic_id} in course {course_id}")))
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid catalog: {0}")]
    Parse(#[from] serde_json::Error),
}
