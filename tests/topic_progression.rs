//! Integration tests for the six-step topic walkthrough
//!
//! These tests drive the full stack (services over an in-memory SQLite
//! database) through enrollment, step evaluation, and completion recording.

use std::sync::Arc;

use chrono::{Duration, Utc};
use lamad_progress::db::CreateTopicInput;
use lamad_progress::{AssessmentSubmission, ProgressDb, ProgressError, Services, Step};

const SESSION: &str = "session-1";
const USER: &str = "learner-1";
const TOPIC: &str = "topic-fractions";

/// Helper to create services over a fresh in-memory database
fn setup() -> Services {
    let db = Arc::new(ProgressDb::open_in_memory().unwrap());
    Services::with_defaults(db)
}

/// Helper to create the standard test topic: intro, pre-assessment,
/// two required resources, activity, post-assessment
fn create_full_topic(services: &Services, id: &str) {
    services
        .topics
        .create(CreateTopicInput {
            id: id.to_string(),
            title: "Fractions".to_string(),
            description: None,
            intro_content_id: Some("intro-video".to_string()),
            pre_assessment_id: Some("pre-quiz".to_string()),
            activity_id: Some("worksheet".to_string()),
            post_assessment_id: Some("post-quiz".to_string()),
            resources: vec!["res-a".to_string(), "res-b".to_string()],
        })
        .unwrap();
}

/// Helper to register a learner with an active membership and enroll them
fn enroll_member(services: &Services, user: &str, topic: &str) {
    services.access.register_learner(user).unwrap();
    services
        .access
        .set_membership(user, Utc::now() + Duration::days(30))
        .unwrap();
    let result = services.access.evaluate_access(user, topic).unwrap();
    assert!(result.is_granted());
}

fn submission(assessment_id: &str, score: i64, max_score: i64) -> AssessmentSubmission {
    AssessmentSubmission {
        assessment_id: assessment_id.to_string(),
        score,
        max_score,
    }
}

/// Walk every step in order and verify the evaluator advances one gate
/// at a time
#[test]
fn full_walkthrough_reaches_complete() {
    let services = setup();
    create_full_topic(&services, TOPIC);
    enroll_member(&services, USER, TOPIC);

    // Fresh enrollment starts at the introduction
    let progress = services.progress.current_topic(SESSION, USER, TOPIC).unwrap();
    assert_eq!(progress.step, Step::Introduction);

    let progress = services
        .progress
        .complete_introduction(SESSION, USER, USER, TOPIC)
        .unwrap();
    assert_eq!(progress.step, Step::PreAssessment);

    let progress = services
        .progress
        .record_pre_assessment(SESSION, USER, USER, TOPIC, submission("pre-quiz", 3, 10))
        .unwrap();
    assert_eq!(progress.step, Step::Resources);

    // One of two resources done: still on the resources step
    let progress = services
        .progress
        .complete_resource(SESSION, USER, USER, TOPIC, "res-a")
        .unwrap();
    assert_eq!(progress.step, Step::Resources);
    assert_eq!(progress.snapshot.completed_resource_count(), 1);

    let progress = services
        .progress
        .complete_resource(SESSION, USER, USER, TOPIC, "res-b")
        .unwrap();
    assert_eq!(progress.step, Step::Activity);

    let progress = services
        .progress
        .complete_activity(SESSION, USER, USER, TOPIC, "worksheet")
        .unwrap();
    assert_eq!(progress.step, Step::PostAssessment);

    let outcome = services
        .progress
        .record_post_assessment(SESSION, USER, USER, TOPIC, submission("post-quiz", 9, 10))
        .unwrap();
    assert_eq!(outcome.step, Step::Complete);
    assert!(outcome.passed);
}

/// A topic with no pre-assessment, resources, activity, or post-assessment
/// completes as soon as the introduction is done
#[test]
fn absent_attachments_are_skipped() {
    let services = setup();
    services
        .topics
        .create(CreateTopicInput {
            id: "bare-topic".to_string(),
            title: "Bare".to_string(),
            description: None,
            intro_content_id: Some("intro".to_string()),
            pre_assessment_id: None,
            activity_id: None,
            post_assessment_id: None,
            resources: vec![],
        })
        .unwrap();
    enroll_member(&services, USER, "bare-topic");

    let progress = services
        .progress
        .complete_introduction(SESSION, USER, USER, "bare-topic")
        .unwrap();
    assert_eq!(progress.step, Step::Complete);
}

/// Completing the same resource twice leaves the completed set unchanged
#[test]
fn completing_a_resource_twice_records_once() {
    let services = setup();
    create_full_topic(&services, TOPIC);
    enroll_member(&services, USER, TOPIC);

    services
        .progress
        .complete_introduction(SESSION, USER, USER, TOPIC)
        .unwrap();
    services
        .progress
        .record_pre_assessment(SESSION, USER, USER, TOPIC, submission("pre-quiz", 5, 10))
        .unwrap();

    let first = services
        .progress
        .complete_resource(SESSION, USER, USER, TOPIC, "res-a")
        .unwrap();
    let second = services
        .progress
        .complete_resource(SESSION, USER, USER, TOPIC, "res-a")
        .unwrap();

    assert_eq!(first.snapshot.completed_resource_count(), 1);
    assert_eq!(second.snapshot.completed_resource_count(), 1);
    assert_eq!(second.step, Step::Resources);
}

/// A resource outside the topic's required set is rejected and nothing
/// is persisted
#[test]
fn resource_outside_required_set_is_rejected() {
    let services = setup();
    create_full_topic(&services, TOPIC);
    enroll_member(&services, USER, TOPIC);

    services
        .progress
        .complete_introduction(SESSION, USER, USER, TOPIC)
        .unwrap();
    services
        .progress
        .record_pre_assessment(SESSION, USER, USER, TOPIC, submission("pre-quiz", 5, 10))
        .unwrap();

    let err = services
        .progress
        .complete_resource(SESSION, USER, USER, TOPIC, "res-from-other-topic")
        .unwrap_err();
    assert!(matches!(err, ProgressError::InvalidResource { .. }));

    let progress = services.progress.get_progress(USER, TOPIC).unwrap();
    assert_eq!(progress.snapshot.completed_resource_count(), 0);
}

/// A write on someone else's progress is rejected before touching the
/// database
#[test]
fn non_owner_writes_are_forbidden_and_change_nothing() {
    let services = setup();
    create_full_topic(&services, TOPIC);
    enroll_member(&services, USER, TOPIC);

    let err = services
        .progress
        .complete_introduction(SESSION, "intruder", USER, TOPIC)
        .unwrap_err();
    assert!(matches!(err, ProgressError::Forbidden(_)));

    let progress = services.progress.get_progress(USER, TOPIC).unwrap();
    assert_eq!(progress.step, Step::Introduction);
}

/// Re-completing the introduction after moving on does not regress the step
#[test]
fn completing_the_introduction_twice_is_idempotent() {
    let services = setup();
    create_full_topic(&services, TOPIC);
    enroll_member(&services, USER, TOPIC);

    let first = services
        .progress
        .complete_introduction(SESSION, USER, USER, TOPIC)
        .unwrap();
    let second = services
        .progress
        .complete_introduction(SESSION, USER, USER, TOPIC)
        .unwrap();

    assert_eq!(first.step, Step::PreAssessment);
    assert_eq!(second.step, Step::PreAssessment);
}

/// A failing post-assessment score still records the submission; the
/// learner's resources are untouched
#[test]
fn failing_post_assessment_still_records() {
    let services = setup();
    create_full_topic(&services, TOPIC);
    enroll_member(&services, USER, TOPIC);

    services
        .progress
        .complete_introduction(SESSION, USER, USER, TOPIC)
        .unwrap();
    services
        .progress
        .record_pre_assessment(SESSION, USER, USER, TOPIC, submission("pre-quiz", 5, 10))
        .unwrap();
    services
        .progress
        .complete_resource(SESSION, USER, USER, TOPIC, "res-a")
        .unwrap();
    services
        .progress
        .complete_resource(SESSION, USER, USER, TOPIC, "res-b")
        .unwrap();
    services
        .progress
        .complete_activity(SESSION, USER, USER, TOPIC, "worksheet")
        .unwrap();

    let outcome = services
        .progress
        .record_post_assessment(SESSION, USER, USER, TOPIC, submission("post-quiz", 2, 10))
        .unwrap();

    assert!(!outcome.passed);
    assert_eq!(outcome.step, Step::Complete);
    assert!(outcome.snapshot.post_assessment.is_some());
    assert_eq!(outcome.snapshot.completed_resource_count(), 2);
}

/// Invalidating resource completions lands the learner back on the
/// resources step without touching intro or assessment records
#[test]
fn invalidation_returns_learner_to_resources_step() {
    let services = setup();
    create_full_topic(&services, TOPIC);
    enroll_member(&services, USER, TOPIC);

    services
        .progress
        .complete_introduction(SESSION, USER, USER, TOPIC)
        .unwrap();
    services
        .progress
        .record_pre_assessment(SESSION, USER, USER, TOPIC, submission("pre-quiz", 5, 10))
        .unwrap();
    services
        .progress
        .complete_resource(SESSION, USER, USER, TOPIC, "res-a")
        .unwrap();
    services
        .progress
        .complete_resource(SESSION, USER, USER, TOPIC, "res-b")
        .unwrap();

    let progress = services
        .progress
        .invalidate_resource_completions(USER, TOPIC)
        .unwrap();

    assert_eq!(progress.step, Step::Resources);
    assert_eq!(progress.snapshot.completed_resource_count(), 0);
    // Earlier gates stay satisfied
    assert!(progress.snapshot.is_intro_complete());
    assert!(progress.snapshot.pre_assessment.is_some());
}

/// Submissions must name the topic's own assessment
#[test]
fn wrong_assessment_id_is_rejected() {
    let services = setup();
    create_full_topic(&services, TOPIC);
    enroll_member(&services, USER, TOPIC);

    services
        .progress
        .complete_introduction(SESSION, USER, USER, TOPIC)
        .unwrap();

    let err = services
        .progress
        .record_pre_assessment(SESSION, USER, USER, TOPIC, submission("someone-elses-quiz", 5, 10))
        .unwrap_err();
    assert!(matches!(err, ProgressError::InvalidInput(_)));

    let progress = services.progress.get_progress(USER, TOPIC).unwrap();
    assert!(progress.snapshot.pre_assessment.is_none());
}

/// Scores outside 0..=max_score never reach the database
#[test]
fn out_of_range_scores_are_rejected() {
    let services = setup();
    create_full_topic(&services, TOPIC);
    enroll_member(&services, USER, TOPIC);

    services
        .progress
        .complete_introduction(SESSION, USER, USER, TOPIC)
        .unwrap();

    let too_high = services
        .progress
        .record_pre_assessment(SESSION, USER, USER, TOPIC, submission("pre-quiz", 11, 10))
        .unwrap_err();
    assert!(matches!(too_high, ProgressError::InvalidInput(_)));

    let negative = services
        .progress
        .record_pre_assessment(SESSION, USER, USER, TOPIC, submission("pre-quiz", -1, 10))
        .unwrap_err();
    assert!(matches!(negative, ProgressError::InvalidInput(_)));

    let zero_max = services
        .progress
        .record_pre_assessment(SESSION, USER, USER, TOPIC, submission("pre-quiz", 0, 0))
        .unwrap_err();
    assert!(matches!(zero_max, ProgressError::InvalidInput(_)));
}

/// Progress reads without an enrollment are NotFound
#[test]
fn progress_without_enrollment_is_not_found() {
    let services = setup();
    create_full_topic(&services, TOPIC);
    services.access.register_learner(USER).unwrap();

    let err = services.progress.get_progress(USER, TOPIC).unwrap_err();
    assert!(matches!(err, ProgressError::NotFound(_)));
}

/// Repeated session reads hit the cache, and writes refresh it so the
/// next read sees the new step
#[test]
fn writes_refresh_the_session_cache() {
    let services = setup();
    create_full_topic(&services, TOPIC);
    enroll_member(&services, USER, TOPIC);

    // First read misses, second is served from the cache
    services.progress.current_topic(SESSION, USER, TOPIC).unwrap();
    services.progress.current_topic(SESSION, USER, TOPIC).unwrap();

    let stats = services.sessions.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);

    // A write refreshes the entry in place
    services
        .progress
        .complete_introduction(SESSION, USER, USER, TOPIC)
        .unwrap();

    let progress = services.progress.current_topic(SESSION, USER, TOPIC).unwrap();
    assert_eq!(progress.step, Step::PreAssessment);

    let stats = services.sessions.stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
}

/// Progression state lives in the on-disk database and survives a
/// process restart
#[test]
fn progress_survives_reopen() {
    let temp = tempfile::TempDir::new().unwrap();

    {
        let db = Arc::new(ProgressDb::open(temp.path()).unwrap());
        let services = Services::with_defaults(db);
        create_full_topic(&services, TOPIC);
        enroll_member(&services, USER, TOPIC);
        services
            .progress
            .complete_introduction(SESSION, USER, USER, TOPIC)
            .unwrap();
    }

    let db = Arc::new(ProgressDb::open(temp.path()).unwrap());
    let services = Services::with_defaults(db);

    let progress = services.progress.get_progress(USER, TOPIC).unwrap();
    assert_eq!(progress.step, Step::PreAssessment);
    assert!(progress.snapshot.is_intro_complete());
}

/// A cached snapshot is never served to a different user claiming the
/// same session
#[test]
fn cached_snapshot_for_another_user_is_not_served() {
    let services = setup();
    create_full_topic(&services, TOPIC);
    enroll_member(&services, USER, TOPIC);

    // Warm the cache for USER under this session
    services.progress.current_topic(SESSION, USER, TOPIC).unwrap();

    // Same session id, different user: the cached entry must not leak
    let err = services
        .progress
        .current_topic(SESSION, "learner-2", TOPIC)
        .unwrap_err();
    assert!(matches!(err, ProgressError::NotFound(_)));
}

/// A cached snapshot is never served for a different topic, even when ids
/// contain ':' and one (session, topic) pair spells out another
#[test]
fn cached_snapshot_for_another_topic_is_not_served() {
    let services = setup();
    create_full_topic(&services, "algebra:intro");
    create_full_topic(&services, "intro");
    enroll_member(&services, USER, "algebra:intro");
    enroll_member(&services, USER, "intro");

    // Warm the cache for topic "intro" under session "s:algebra"
    services
        .progress
        .current_topic("s:algebra", USER, "intro")
        .unwrap();

    // Session "s" asking for "algebra:intro" gets that topic's snapshot
    let progress = services
        .progress
        .current_topic("s", USER, "algebra:intro")
        .unwrap();
    assert_eq!(progress.snapshot.topic.id, "algebra:intro");

    // The warmed entry still serves its own session and topic
    let progress = services
        .progress
        .current_topic("s:algebra", USER, "intro")
        .unwrap();
    assert_eq!(progress.snapshot.topic.id, "intro");
}
