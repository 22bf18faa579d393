use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::db::DatabaseProxy;
use crate::mastery::MasteryEngine;

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    started_at_system: SystemTime,
    engine: Arc<MasteryEngine>,
}

impl AppState {
    pub fn new(engine: Arc<MasteryEngine>) -> Self {
        Self {
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
            engine,
        }
    }

    pub fn engine(&self) -> &MasteryEngine {
        &self.engine
    }

    pub fn db(&self) -> Arc<DatabaseProxy> {
        self.engine.db()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }
}
