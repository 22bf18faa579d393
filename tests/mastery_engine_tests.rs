use chrono::{Duration, Utc};

use mastery_engine::db::operations::{get_attempt, get_mastery_record, write_mastery_record};
use mastery_engine::mastery::updater::AppliedUpdate;
use mastery_engine::mastery::{
    AttemptOutcome, BayesianUpdater, CompletionInput, Difficulty, EngineError, EntityKey,
    EntityType, MasteryConfig, MasteryRecord, MasteryStatus, Score,
};

mod common;

use common::{fixed_time, setup, setup_with, COURSE, USER};

fn skill(id: i64) -> EntityKey {
    EntityKey::new(USER, EntityType::Skill, id, COURSE)
}

fn correct() -> CompletionInput {
    CompletionInput {
        finished: true,
        is_correct: Some(true),
        score: Some(2),
        duration_secs: None,
    }
}

fn wrong() -> CompletionInput {
    CompletionInput {
        finished: true,
        is_correct: Some(false),
        ..Default::default()
    }
}

/// Starts and completes one attempt, one minute apart, at `offset_min`.
async fn answer(
    env: &common::TestEnv,
    question: &str,
    input: CompletionInput,
    offset_min: i64,
) -> mastery_engine::mastery::CompletionReport {
    let started = fixed_time() + Duration::minutes(offset_min);
    let attempt = env
        .engine
        .record_attempt_start_at(USER, question, COURSE, started)
        .await
        .unwrap();
    env.engine
        .record_attempt_complete_at(&attempt.id, input, started + Duration::seconds(60))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_cold_start_correct_answer_scenario() {
    let env = setup().await;
    let started = fixed_time();
    let attempt = env
        .engine
        .record_attempt_start_at(USER, "q-mid", COURSE, started)
        .await
        .unwrap();
    assert_eq!(attempt.skills, vec![1]);
    assert_eq!(attempt.problem_number_type, Some(5));

    let done = started + Duration::seconds(60);
    let report = env
        .engine
        .record_attempt_complete_at(&attempt.id, correct(), done)
        .await
        .unwrap();
    assert!(report.scored);
    assert_eq!(report.updates.len(), 2);
    assert!(report.updates.iter().all(|u| u.applied));

    let estimate = env.engine.get_estimate_at(&skill(1), done).await.unwrap();
    assert_eq!(estimate.alpha, Some(4.0));
    assert_eq!(estimate.beta, Some(40.0));
    assert!((estimate.mastery - 4.0 / 44.0).abs() < 1e-9);
    assert!((estimate.mastery - 0.091).abs() < 1e-3);

    let verdict = env.engine.classify_entity_at(&skill(1), done).await.unwrap();
    assert_eq!(verdict.status, MasteryStatus::Continue);
    assert_eq!(verdict.samples, 1);

    let pnt = EntityKey::new(USER, EntityType::ProblemNumberType, 5, COURSE);
    let estimate = env.engine.get_estimate_at(&pnt, done).await.unwrap();
    assert_eq!(estimate.alpha, Some(4.0));
}

#[tokio::test]
async fn test_second_completion_is_rejected_without_reapplying() {
    let env = setup().await;
    let started = fixed_time();
    let attempt = env
        .engine
        .record_attempt_start_at(USER, "q-mid", COURSE, started)
        .await
        .unwrap();
    let done = started + Duration::seconds(30);

    env.engine
        .record_attempt_complete_at(&attempt.id, correct(), done)
        .await
        .unwrap();
    let second = env
        .engine
        .record_attempt_complete_at(&attempt.id, correct(), done)
        .await;
    assert!(matches!(second, Err(EngineError::AlreadyCompleted(_))));

    let record = get_mastery_record(env.db.pool(), &skill(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!((record.alpha, record.beta), (4.0, 40.0));
    assert_eq!(record.version, 1);
}

#[tokio::test]
async fn test_completion_resumes_after_partial_failure() {
    let env = setup().await;
    let started = fixed_time();
    let attempt = env
        .engine
        .record_attempt_start_at(USER, "q-pair", COURSE, started)
        .await
        .unwrap();
    let done = started + Duration::seconds(40);

    // First call closed the attempt and updated only skill 1 before failing.
    mastery_engine::db::operations::close_attempt(
        env.db.pool(),
        &attempt.id,
        &mastery_engine::db::operations::AttemptClosure {
            finished: true,
            is_correct: Some(true),
            score: Some(Score::FULL),
            duration_secs: Some(40.0),
            completed_at: done,
        },
    )
    .await
    .unwrap();
    let updater = BayesianUpdater::new(&MasteryConfig::default());
    let outcome = AttemptOutcome {
        score: Score::FULL,
        difficulty: Difficulty::new(2).unwrap(),
        duration_secs: 40.0,
        is_correct: true,
    };
    let first = updater
        .update_for_attempt(&env.db, &attempt.id, &skill(1), &outcome, done)
        .await
        .unwrap();
    assert!(matches!(first, AppliedUpdate::Applied(_)));

    // Retried call: the input is ignored in favour of the stored outcome.
    let report = env
        .engine
        .record_attempt_complete_at(&attempt.id, wrong(), done + Duration::seconds(5))
        .await
        .unwrap();
    assert!(report.scored);

    let skill_one = report
        .updates
        .iter()
        .find(|u| u.entity_type == EntityType::Skill && u.entity_id == 1)
        .unwrap();
    assert!(!skill_one.applied);
    let skill_two = report
        .updates
        .iter()
        .find(|u| u.entity_type == EntityType::Skill && u.entity_id == 2)
        .unwrap();
    assert!(skill_two.applied);

    for id in [1, 2] {
        let record = get_mastery_record(env.db.pool(), &skill(id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!((record.alpha, record.beta), (3.0, 40.0));
    }

    let stored = get_attempt(env.db.pool(), &attempt.id).await.unwrap().unwrap();
    assert!(stored.scored);
}

#[tokio::test]
async fn test_abandoned_attempt_carries_no_evidence() {
    let env = setup().await;
    let started = fixed_time();
    let attempt = env
        .engine
        .record_attempt_start_at(USER, "q-mid", COURSE, started)
        .await
        .unwrap();

    let report = env
        .engine
        .record_attempt_complete_at(&attempt.id, CompletionInput::default(), started)
        .await
        .unwrap();
    assert!(!report.scored);
    assert!(report.updates.is_empty());

    assert!(matches!(
        env.engine.get_estimate_at(&skill(1), started).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        env.engine
            .record_attempt_complete_at(&attempt.id, correct(), started)
            .await,
        Err(EngineError::AlreadyCompleted(_))
    ));
}

#[tokio::test]
async fn test_invalid_completion_leaves_attempt_open() {
    let env = setup().await;
    let started = fixed_time();
    let attempt = env
        .engine
        .record_attempt_start_at(USER, "q-mid", COURSE, started)
        .await
        .unwrap();

    let bad = CompletionInput {
        finished: true,
        score: Some(7),
        ..Default::default()
    };
    assert!(matches!(
        env.engine
            .record_attempt_complete_at(&attempt.id, bad, started)
            .await,
        Err(EngineError::Validation(_))
    ));

    let report = env
        .engine
        .record_attempt_complete_at(&attempt.id, correct(), started)
        .await
        .unwrap();
    assert!(report.scored);
}

#[tokio::test]
async fn test_start_validation_and_lookup_errors() {
    let env = setup().await;
    assert!(matches!(
        env.engine
            .record_attempt_start_at("", "q-mid", COURSE, fixed_time())
            .await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        env.engine
            .record_attempt_start_at(USER, "q-missing", COURSE, fixed_time())
            .await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        env.engine
            .record_attempt_complete_at("no-such-attempt", correct(), fixed_time())
            .await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        env.engine.get_estimate_at(&skill(3), fixed_time()).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_streak_of_easy_answers_reaches_mastered() {
    let env = setup().await;

    // Skill 1 goes 1 → 7 over six answers; the seventh also fires the CUSUM
    // boost, landing at 8.5 against beta 40.
    for i in 0..6 {
        answer(&env, "q-easy", correct(), i * 10).await;
    }
    let at = fixed_time() + Duration::minutes(61);
    let verdict = env.engine.classify_entity_at(&skill(1), at).await.unwrap();
    assert_eq!(verdict.samples, 6);
    assert_eq!(verdict.status, MasteryStatus::Continue);

    let report = answer(&env, "q-easy", correct(), 70).await;
    let update = report
        .updates
        .iter()
        .find(|u| u.entity_type == EntityType::Skill)
        .unwrap();
    assert!(update.cusum.unwrap().fired());

    let at = fixed_time() + Duration::minutes(75);
    let verdict = env.engine.classify_entity_at(&skill(1), at).await.unwrap();
    assert_eq!(verdict.samples, 7);
    assert_eq!(verdict.status, MasteryStatus::Mastered);

    let record = get_mastery_record(env.db.pool(), &skill(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, MasteryStatus::Mastered);
    assert!((record.alpha - 8.5).abs() < 0.01);
    assert_eq!(record.cusum_s, 0.0);
}

#[tokio::test]
async fn test_decay_shrinks_counts_but_keeps_mastery() {
    let env = setup().await;
    answer(&env, "q-mid", correct(), 0).await;

    let done = fixed_time() + Duration::seconds(60);
    let fresh = env.engine.get_estimate_at(&skill(1), done).await.unwrap();
    let later = env
        .engine
        .get_estimate_at(&skill(1), done + Duration::days(30))
        .await
        .unwrap();

    let w = (-0.02f64 * 30.0).exp();
    assert!((later.alpha.unwrap() - 4.0 * w).abs() < 1e-9);
    assert!((later.beta.unwrap() - 40.0 * w).abs() < 1e-9);
    assert!((later.mastery - fresh.mastery).abs() < 1e-12);
}

#[tokio::test]
async fn test_old_outcomes_leave_the_window() {
    let env = setup().await;
    for i in 0..7 {
        answer(&env, "q-easy", correct(), i * 10).await;
    }
    let at = fixed_time() + Duration::days(120);
    let verdict = env.engine.classify_entity_at(&skill(1), at).await.unwrap();
    assert_eq!(verdict.samples, 0);
    assert_eq!(verdict.status, MasteryStatus::Continue);
}

#[tokio::test]
async fn test_topic_mastery_is_mean_and_pools_attempts_once() {
    let env = setup().await;
    for i in 0..3 {
        answer(&env, "q-pair", correct(), i * 10).await;
    }
    answer(&env, "q-easy", wrong(), 40).await;

    let at = fixed_time() + Duration::minutes(45);
    let s1 = env.engine.get_estimate_at(&skill(1), at).await.unwrap().mastery;
    let s2 = env.engine.get_estimate_at(&skill(2), at).await.unwrap().mastery;

    let topic = EntityKey::new(USER, EntityType::Topic, 100, COURSE);
    let estimate = env.engine.get_estimate_at(&topic, at).await.unwrap();
    assert!((estimate.mastery - (s1 + s2) / 2.0).abs() < 1e-12);
    assert_eq!(estimate.alpha, None);

    let verdict = env.engine.topic_status_at(&topic, at).await.unwrap();
    assert_eq!(verdict.samples, 4);
    assert_eq!(verdict.skills_with_evidence, 2);
    assert_eq!(verdict.status, MasteryStatus::Continue);

    let stored = get_mastery_record(env.db.pool(), &topic).await.unwrap().unwrap();
    assert_eq!(stored.status, MasteryStatus::Continue);
}

#[tokio::test]
async fn test_topic_without_evidence() {
    let env = setup().await;
    let topic = EntityKey::new(USER, EntityType::Topic, 200, COURSE);
    assert!(matches!(
        env.engine.get_estimate_at(&topic, fixed_time()).await,
        Err(EngineError::NotFound(_))
    ));
    let verdict = env.engine.topic_status_at(&topic, fixed_time()).await.unwrap();
    assert_eq!(verdict.mastery, None);
    assert_eq!(verdict.status, MasteryStatus::Continue);

    let unknown = EntityKey::new(USER, EntityType::Topic, 999, COURSE);
    assert!(matches!(
        env.engine.topic_status_at(&unknown, fixed_time()).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_initialize_priors_seeds_once() {
    let env = setup().await;
    let seeded = env.engine.initialize_priors(USER, COURSE).await.unwrap();
    // Skills 1-4 and problem-number types 5, 6.
    assert_eq!(seeded, 6);

    answer(&env, "q-mid", correct(), 0).await;

    let again = env.engine.initialize_priors(USER, COURSE).await.unwrap();
    assert_eq!(again, 0);

    let record = get_mastery_record(env.db.pool(), &skill(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.alpha, 4.0);

    let untouched = get_mastery_record(env.db.pool(), &skill(3))
        .await
        .unwrap()
        .unwrap();
    assert_eq!((untouched.alpha, untouched.beta), (1.0, 40.0));

    let beliefs = env.engine.list_beliefs(USER, COURSE).await.unwrap();
    assert_eq!(beliefs.len(), 6);
}

#[tokio::test]
async fn test_remediation_resets_only_weak_skills() {
    let env = setup().await;
    env.engine.initialize_priors(USER, COURSE).await.unwrap();

    let strong = get_mastery_record(env.db.pool(), &skill(2))
        .await
        .unwrap()
        .unwrap();
    let mut updated = strong.clone();
    updated.alpha = 30.0;
    updated.beta = 10.0;
    assert!(write_mastery_record(env.db.pool(), &updated, strong.version)
        .await
        .unwrap());

    let reset = env
        .engine
        .remediate_topics(USER, COURSE, &[100])
        .await
        .unwrap();
    assert_eq!(reset, vec![1, 3]);

    let weak = get_mastery_record(env.db.pool(), &skill(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!((weak.alpha, weak.beta), (11.0, 40.0));
    assert_eq!(weak.cusum_s, 0.0);
    assert_eq!(weak.status, MasteryStatus::Continue);

    let strong = get_mastery_record(env.db.pool(), &skill(2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!((strong.alpha, strong.beta), (30.0, 10.0));

    let second = env
        .engine
        .remediate_topics(USER, COURSE, &[100])
        .await
        .unwrap();
    assert!(second.is_empty());

    assert!(matches!(
        env.engine.remediate_topics(USER, COURSE, &[100, 999]).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_remediation_seeds_missing_skills() {
    let env = setup().await;
    let reset = env
        .engine
        .remediate_topics(USER, COURSE, &[200])
        .await
        .unwrap();
    assert_eq!(reset, vec![4]);
    let record = get_mastery_record(env.db.pool(), &skill(4))
        .await
        .unwrap()
        .unwrap();
    assert_eq!((record.alpha, record.beta), (11.0, 40.0));
}

#[tokio::test]
async fn test_concurrent_updates_on_one_key_are_serialized() {
    let mut config = MasteryConfig::default();
    config.retry.max_attempts = 100;
    let env = setup_with(config.clone()).await;

    let updater = BayesianUpdater::new(&config);
    let key = skill(1);
    let now = fixed_time();
    let outcome = AttemptOutcome {
        score: Score::FULL,
        difficulty: Difficulty::new(1).unwrap(),
        duration_secs: 10.0,
        is_correct: true,
    };

    let updates = (0..8).map(|_| updater.update(&env.db, &key, &outcome, now));
    let results = futures::future::join_all(updates).await;
    assert!(results.iter().all(|r| r.is_ok()));

    let record: MasteryRecord = get_mastery_record(env.db.pool(), &key)
        .await
        .unwrap()
        .unwrap();
    // Eight +1 increments plus one CUSUM boost on the seventh.
    assert!((record.alpha - 9.5).abs() < 1e-9);
    assert_eq!(record.beta, 40.0);
    assert_eq!(record.version, 8);
}

#[tokio::test]
async fn test_topic_entities_carry_no_belief() {
    let env = setup().await;
    let updater = BayesianUpdater::new(&MasteryConfig::default());
    let outcome = AttemptOutcome {
        score: Score::FULL,
        difficulty: Difficulty::DEFAULT,
        duration_secs: 10.0,
        is_correct: true,
    };
    let topic = EntityKey::new(USER, EntityType::Topic, 100, COURSE);
    assert!(matches!(
        updater.update(&env.db, &topic, &outcome, fixed_time()).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn test_direct_update_returns_stored_version() {
    let env = setup().await;
    let updater = BayesianUpdater::new(&MasteryConfig::default());
    let outcome = AttemptOutcome {
        score: Score::FULL,
        difficulty: Difficulty::new(1).unwrap(),
        duration_secs: 10.0,
        is_correct: true,
    };

    let update = updater
        .update(&env.db, &skill(3), &outcome, fixed_time())
        .await
        .unwrap();
    assert_eq!(update.record.version, 1);
    assert_eq!((update.record.alpha, update.record.beta), (2.0, 40.0));

    let stored = get_mastery_record(env.db.pool(), &skill(3))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.version, update.record.version);
}

#[tokio::test]
async fn test_remediated_prior_decays_from_reset_time() {
    let env = setup().await;
    answer(&env, "q-hard", wrong(), 0).await;

    let reset = env
        .engine
        .remediate_topics(USER, COURSE, &[200])
        .await
        .unwrap();
    assert_eq!(reset, vec![4]);

    let estimate = env
        .engine
        .get_estimate_at(&skill(4), Utc::now() + Duration::days(1))
        .await
        .unwrap();
    let w = (-0.02f64).exp();
    assert!((estimate.alpha.unwrap() - 11.0 * w).abs() < 1e-3);
    assert!((estimate.beta.unwrap() - 40.0 * w).abs() < 1e-3);
}

#[tokio::test]
async fn test_seeded_priors_are_not_topic_evidence() {
    let env = setup().await;
    env.engine.initialize_priors(USER, COURSE).await.unwrap();

    assert_eq!(env.engine.topic_mastery(USER, COURSE, 100).await.unwrap(), None);
    let topic = EntityKey::new(USER, EntityType::Topic, 100, COURSE);
    let verdict = env.engine.topic_status_at(&topic, fixed_time()).await.unwrap();
    assert_eq!(verdict.mastery, None);
    assert_eq!(verdict.skills_with_evidence, 0);
    assert_eq!(verdict.status, MasteryStatus::Continue);

    env.engine
        .remediate_topics(USER, COURSE, &[100])
        .await
        .unwrap();
    assert_eq!(env.engine.topic_mastery(USER, COURSE, 100).await.unwrap(), None);

    answer(&env, "q-mid", correct(), 0).await;
    let at = fixed_time() + Duration::minutes(5);
    let verdict = env.engine.topic_status_at(&topic, at).await.unwrap();
    assert_eq!(verdict.skills_with_evidence, 1);
    assert!(verdict.mastery.is_some());
}

#[tokio::test]
async fn test_concurrent_completions_apply_once() {
    let mut config = MasteryConfig::default();
    config.retry.max_attempts = 100;
    let env = setup_with(config).await;

    let started = fixed_time();
    let attempt = env
        .engine
        .record_attempt_start_at(USER, "q-pair", COURSE, started)
        .await
        .unwrap();
    let done = started + Duration::seconds(60);

    let completions =
        (0..6).map(|_| env.engine.record_attempt_complete_at(&attempt.id, correct(), done));
    let results = futures::future::join_all(completions).await;

    let mut applied = 0;
    for result in &results {
        match result {
            Ok(report) => {
                assert!(report.scored);
                applied += report.updates.iter().filter(|u| u.applied).count();
            }
            Err(EngineError::AlreadyCompleted(_)) => {}
            Err(err) => panic!("unexpected completion error: {err}"),
        }
    }
    // Skills 1, 2 and problem-number type 6, each exactly once.
    assert_eq!(applied, 3);
    assert!(results.iter().any(|r| r.is_ok()));

    let record = get_mastery_record(env.db.pool(), &skill(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!((record.alpha, record.beta), (3.0, 40.0));
    assert_eq!(record.version, 1);

    let stored = get_attempt(env.db.pool(), &attempt.id)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.scored);
}
