//! Integration tests for access evaluation and grant precedence
//!
//! Covers the fixed grant order (existing enrollment, membership, token),
//! the single-token spend, and denial leaving no trace.

use std::sync::Arc;

use chrono::{Duration, Utc};
use lamad_progress::db::{enrollments, CreateTopicInput};
use lamad_progress::services::ProgressEvent;
use lamad_progress::{AccessResult, GrantBasis, ProgressDb, ProgressError, Services};

const USER: &str = "learner-1";
const TOPIC: &str = "topic-decimals";

fn setup() -> Services {
    let db = Arc::new(ProgressDb::open_in_memory().unwrap());
    Services::with_defaults(db)
}

fn create_topic(services: &Services, id: &str) {
    services
        .topics
        .create(CreateTopicInput {
            id: id.to_string(),
            title: "Decimals".to_string(),
            description: None,
            intro_content_id: Some("intro".to_string()),
            pre_assessment_id: None,
            activity_id: None,
            post_assessment_id: None,
            resources: vec!["res-1".to_string()],
        })
        .unwrap();
}

fn granted_basis(result: &AccessResult) -> GrantBasis {
    match result {
        AccessResult::Granted { basis, .. } => *basis,
        AccessResult::Denied { .. } => panic!("expected a grant, got a denial"),
    }
}

/// An unexpired membership enrolls the learner without consuming tokens
#[test]
fn membership_grant_creates_enrollment() {
    let services = setup();
    create_topic(&services, TOPIC);
    services.access.register_learner(USER).unwrap();
    services
        .access
        .set_membership(USER, Utc::now() + Duration::days(30))
        .unwrap();
    services.access.add_tokens(USER, 2).unwrap();

    let result = services.access.evaluate_access(USER, TOPIC).unwrap();
    assert_eq!(granted_basis(&result), GrantBasis::Membership);

    // Tokens untouched
    let learner = services.access.get_learner(USER).unwrap().unwrap();
    assert_eq!(learner.token_balance, 2);

    let enrollments = services.progress.list_enrollments(USER).unwrap();
    assert_eq!(enrollments.len(), 1);
    assert_eq!(enrollments[0].grant_basis, "membership");
}

/// A token grant decrements the balance by exactly one
#[test]
fn token_grant_consumes_exactly_one() {
    let services = setup();
    create_topic(&services, TOPIC);
    services.access.register_learner(USER).unwrap();
    services.access.add_tokens(USER, 3).unwrap();

    let result = services.access.evaluate_access(USER, TOPIC).unwrap();
    assert_eq!(granted_basis(&result), GrantBasis::Token);

    let learner = services.access.get_learner(USER).unwrap().unwrap();
    assert_eq!(learner.token_balance, 2);

    let enrollments = services.progress.list_enrollments(USER).unwrap();
    assert_eq!(enrollments[0].grant_basis, "token");
}

/// Racing evaluations against a one-token balance spend it exactly once
#[test]
fn racing_token_grants_spend_once() {
    let services = setup();
    for i in 0..4 {
        create_topic(&services, &format!("topic-{i}"));
    }
    services.access.register_learner(USER).unwrap();
    services.access.add_tokens(USER, 1).unwrap();

    let results: Vec<AccessResult> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let services = &services;
                s.spawn(move || {
                    services
                        .access
                        .evaluate_access(USER, &format!("topic-{i}"))
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let grants: Vec<_> = results.iter().filter(|r| r.is_granted()).collect();
    assert_eq!(grants.len(), 1);
    assert_eq!(granted_basis(grants[0]), GrantBasis::Token);

    let learner = services.access.get_learner(USER).unwrap().unwrap();
    assert_eq!(learner.token_balance, 0);

    let enrollments = services.progress.list_enrollments(USER).unwrap();
    assert_eq!(enrollments.len(), 1);
}

/// Re-evaluating access for an enrolled learner consumes nothing
#[test]
fn repeat_access_consumes_nothing() {
    let services = setup();
    create_topic(&services, TOPIC);
    services.access.register_learner(USER).unwrap();
    services.access.add_tokens(USER, 1).unwrap();

    let first = services.access.evaluate_access(USER, TOPIC).unwrap();
    assert_eq!(granted_basis(&first), GrantBasis::Token);

    // Balance is now zero, but the existing enrollment still grants access
    let second = services.access.evaluate_access(USER, TOPIC).unwrap();
    assert_eq!(granted_basis(&second), GrantBasis::AlreadyEnrolled);

    let learner = services.access.get_learner(USER).unwrap().unwrap();
    assert_eq!(learner.token_balance, 0);

    let enrollments = services.progress.list_enrollments(USER).unwrap();
    assert_eq!(enrollments.len(), 1);
}

/// Membership is checked before the token balance
#[test]
fn membership_takes_precedence_over_tokens() {
    let services = setup();
    create_topic(&services, TOPIC);
    services.access.register_learner(USER).unwrap();
    services
        .access
        .set_membership(USER, Utc::now() + Duration::days(1))
        .unwrap();
    services.access.add_tokens(USER, 5).unwrap();

    let result = services.access.evaluate_access(USER, TOPIC).unwrap();
    assert_eq!(granted_basis(&result), GrantBasis::Membership);

    let learner = services.access.get_learner(USER).unwrap().unwrap();
    assert_eq!(learner.token_balance, 5);
}

/// An expired membership falls through to the token path
#[test]
fn expired_membership_falls_back_to_token() {
    let services = setup();
    create_topic(&services, TOPIC);
    services.access.register_learner(USER).unwrap();
    services
        .access
        .set_membership(USER, Utc::now() - Duration::days(1))
        .unwrap();
    services.access.add_tokens(USER, 1).unwrap();

    let result = services.access.evaluate_access(USER, TOPIC).unwrap();
    assert_eq!(granted_basis(&result), GrantBasis::Token);

    let learner = services.access.get_learner(USER).unwrap().unwrap();
    assert_eq!(learner.token_balance, 0);
}

/// Denial is a value and leaves no rows behind
#[test]
fn denial_persists_nothing() {
    let services = setup();
    create_topic(&services, TOPIC);
    services.access.register_learner(USER).unwrap();

    let result = services.access.evaluate_access(USER, TOPIC).unwrap();
    assert!(!result.is_granted());

    let err = services.progress.get_progress(USER, TOPIC).unwrap_err();
    assert!(matches!(err, ProgressError::NotFound(_)));

    let learner = services.access.get_learner(USER).unwrap().unwrap();
    assert_eq!(learner.token_balance, 0);
}

/// Evaluating access to an unknown topic is an error, not a denial
#[test]
fn unknown_topic_is_not_found() {
    let services = setup();
    services.access.register_learner(USER).unwrap();

    let err = services.access.evaluate_access(USER, "no-such-topic").unwrap_err();
    assert!(matches!(err, ProgressError::NotFound(_)));
}

/// Learners must be registered before access can be evaluated
#[test]
fn unregistered_learner_is_not_found() {
    let services = setup();
    create_topic(&services, TOPIC);

    let err = services.access.evaluate_access("ghost", TOPIC).unwrap_err();
    assert!(matches!(err, ProgressError::NotFound(_)));
}

/// Token top-ups must be positive and accumulate across orders
#[test]
fn token_top_ups_accumulate() {
    let services = setup();
    services.access.register_learner(USER).unwrap();

    assert_eq!(services.access.add_tokens(USER, 2).unwrap(), 2);
    assert_eq!(services.access.add_tokens(USER, 3).unwrap(), 5);

    let zero = services.access.add_tokens(USER, 0).unwrap_err();
    assert!(matches!(zero, ProgressError::InvalidInput(_)));

    let negative = services.access.add_tokens(USER, -4).unwrap_err();
    assert!(matches!(negative, ProgressError::InvalidInput(_)));

    let learner = services.access.get_learner(USER).unwrap().unwrap();
    assert_eq!(learner.token_balance, 5);
}

/// An enrollment pins the topic version current at grant time; later
/// edits create new versions that existing learners do not see
#[test]
fn grants_pin_the_current_topic_version() {
    let services = setup();
    create_topic(&services, TOPIC);
    services.access.register_learner(USER).unwrap();
    services
        .access
        .set_membership(USER, Utc::now() + Duration::days(30))
        .unwrap();
    services.access.evaluate_access(USER, TOPIC).unwrap();

    // Publish a second version with a longer resource list
    services
        .topics
        .create(CreateTopicInput {
            id: TOPIC.to_string(),
            title: "Decimals, revised".to_string(),
            description: None,
            intro_content_id: Some("intro".to_string()),
            pre_assessment_id: None,
            activity_id: None,
            post_assessment_id: None,
            resources: vec!["res-1".to_string(), "res-2".to_string(), "res-3".to_string()],
        })
        .unwrap();

    // The existing enrollment still walks version 1
    let progress = services.progress.get_progress(USER, TOPIC).unwrap();
    assert_eq!(progress.snapshot.enrollment.topic_version, 1);
    assert_eq!(progress.snapshot.required_resource_count(), 1);

    // A new learner pins version 2
    services.access.register_learner("learner-2").unwrap();
    services
        .access
        .set_membership("learner-2", Utc::now() + Duration::days(30))
        .unwrap();
    services.access.evaluate_access("learner-2", TOPIC).unwrap();

    let progress = services.progress.get_progress("learner-2", TOPIC).unwrap();
    assert_eq!(progress.snapshot.enrollment.topic_version, 2);
    assert_eq!(progress.snapshot.required_resource_count(), 3);
}

/// A soft-deactivated enrollment stops granting access; the next
/// evaluation starts a fresh enrollment and spends a new token
#[test]
fn deactivated_enrollment_allows_a_fresh_grant() {
    let db = Arc::new(ProgressDb::open_in_memory().unwrap());
    let services = Services::with_defaults(db.clone());
    create_topic(&services, TOPIC);
    services.access.register_learner(USER).unwrap();
    services.access.add_tokens(USER, 2).unwrap();

    let first = services.access.evaluate_access(USER, TOPIC).unwrap();
    let first_id = match &first {
        AccessResult::Granted { enrollment, .. } => enrollment.id.clone(),
        AccessResult::Denied { .. } => panic!("expected a grant"),
    };

    let deactivated = db
        .with_conn(|conn| enrollments::deactivate_enrollment(conn, USER, TOPIC))
        .unwrap();
    assert!(deactivated);

    let second = services.access.evaluate_access(USER, TOPIC).unwrap();
    assert_eq!(granted_basis(&second), GrantBasis::Token);
    match &second {
        AccessResult::Granted { enrollment, .. } => assert_ne!(enrollment.id, first_id),
        AccessResult::Denied { .. } => panic!("expected a grant"),
    }

    let learner = services.access.get_learner(USER).unwrap().unwrap();
    assert_eq!(learner.token_balance, 0);
}

/// Grants and denials both surface on the event bus
#[test]
fn access_outcomes_are_published() {
    let services = setup();
    create_topic(&services, TOPIC);
    create_topic(&services, "topic-2");
    services.access.register_learner(USER).unwrap();
    services.access.add_tokens(USER, 1).unwrap();

    let mut rx = services.events.subscribe();

    services.access.evaluate_access(USER, TOPIC).unwrap();
    match rx.try_recv().unwrap() {
        ProgressEvent::EnrollmentCreated { user_id, topic_id, basis } => {
            assert_eq!(user_id, USER);
            assert_eq!(topic_id, TOPIC);
            assert_eq!(basis, "token");
        }
        other => panic!("expected EnrollmentCreated, got {:?}", other),
    }

    // Balance is spent, so the second topic is a denial
    services.access.evaluate_access(USER, "topic-2").unwrap();
    match rx.try_recv().unwrap() {
        ProgressEvent::AccessDenied { user_id, topic_id } => {
            assert_eq!(user_id, USER);
            assert_eq!(topic_id, "topic-2");
        }
        other => panic!("expected AccessDenied, got {:?}", other),
    }
}
