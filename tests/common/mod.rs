#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use mastery_engine::catalog::Catalog;
use mastery_engine::db::config::DbConfig;
use mastery_engine::db::DatabaseProxy;
use mastery_engine::mastery::{MasteryConfig, MasteryEngine};

pub const COURSE: &str = "math-ege";
pub const USER: &str = "learner-42";

/// Course with two topics. Topic 100 covers skills 1-3, topic 200 covers 4.
/// `q-easy` and `q-pair` both hit skill 1; `q-pair` also hits skill 2.
pub const CATALOG: &str = r#"{
    "courses": {
        "math-ege": {
            "skills": [1, 2, 3, 4],
            "problemNumberTypes": [5, 6],
            "topics": { "100": [1, 2, 3], "200": [4] },
            "questions": {
                "q-mid": { "skills": [1], "topics": [100], "problemNumberType": 5, "difficulty": 3 },
                "q-easy": { "skills": [1], "topics": [100], "problemNumberType": 5, "difficulty": 1 },
                "q-pair": { "skills": [1, 2], "topics": [100], "problemNumberType": 6, "difficulty": 2 },
                "q-hard": { "skills": [4], "topics": [200], "difficulty": 5 }
            }
        }
    }
}"#;

pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0)
        .single()
        .expect("valid fixed timestamp")
}

pub struct TestEnv {
    pub dir: TempDir,
    pub db: Arc<DatabaseProxy>,
    pub catalog: Arc<Catalog>,
    pub engine: Arc<MasteryEngine>,
}

pub async fn setup() -> TestEnv {
    setup_with(MasteryConfig::default()).await
}

pub async fn setup_with(config: MasteryConfig) -> TestEnv {
    let dir = TempDir::new().expect("failed to create temp dir");
    let db = DatabaseProxy::connect(DbConfig::for_path(&dir.path().join("mastery.db")))
        .await
        .expect("failed to open test database");
    let catalog = Arc::new(Catalog::from_json(CATALOG).expect("valid test catalog"));
    let engine = Arc::new(MasteryEngine::new(config, Arc::clone(&db), Arc::clone(&catalog)));

    TestEnv {
        dir,
        db,
        catalog,
        engine,
    }
}

pub fn create_test_app(env: &TestEnv) -> Router {
    mastery_engine::create_app(
        Arc::clone(&env.db),
        Arc::clone(&env.catalog),
        MasteryConfig::default(),
    )
}
