//! Step evaluation and completion recording
//!
//! A topic walks a learner through six steps in fixed order: introduction,
//! pre-assessment, resources, activity, post-assessment, complete. The
//! evaluator derives the current step from an enrollment snapshot; the
//! recorder operations persist each kind of completion and keep the
//! session cache in sync.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::db::{enrollments, AssessmentPhase, EnrollmentRow, EnrollmentSnapshot, ProgressDb};
use crate::error::ProgressError;

use super::events::{EventBus, ProgressEvent};
use super::session_cache::SessionCache;

/// The six steps of a topic, in fixed order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Step {
    Introduction = 1,
    PreAssessment = 2,
    Resources = 3,
    Activity = 4,
    PostAssessment = 5,
    Complete = 6,
}

impl Step {
    /// Step number as shown to learners (1 through 6)
    pub fn number(self) -> i32 {
        self as i32
    }
}

/// Derive the current step from an enrollment snapshot
///
/// The first unmet gate in step order wins. A gate whose attachment is
/// absent on the topic (no pre-assessment, no required resources, no
/// activity, no post-assessment) counts as satisfied.
pub fn current_step(snapshot: &EnrollmentSnapshot) -> Step {
    if !snapshot.is_intro_complete() {
        return Step::Introduction;
    }

    if snapshot.topic.pre_assessment_id.is_some()
        && snapshot.enrollment.pre_completed_assessment_id.is_none()
    {
        return Step::PreAssessment;
    }

    if snapshot.completed_resource_count() < snapshot.required_resource_count() {
        return Step::Resources;
    }

    if snapshot.topic.activity_id.is_some() && snapshot.enrollment.completed_activity_id.is_none() {
        return Step::Activity;
    }

    if snapshot.topic.post_assessment_id.is_some()
        && snapshot.enrollment.post_completed_assessment_id.is_none()
    {
        return Step::PostAssessment;
    }

    Step::Complete
}

/// An assessment submission to record
#[derive(Debug, Clone, Deserialize)]
pub struct AssessmentSubmission {
    pub assessment_id: String,
    pub score: i64,
    pub max_score: i64,
}

/// Snapshot plus the step it evaluates to
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub snapshot: EnrollmentSnapshot,
    pub step: Step,
}

/// Result of recording a post-assessment
#[derive(Debug, Clone, Serialize)]
pub struct AssessmentOutcome {
    pub snapshot: EnrollmentSnapshot,
    pub step: Step,
    pub passed: bool,
}

/// Progress service: step evaluation and completion recording
pub struct ProgressService {
    db: Arc<ProgressDb>,
    events: Arc<EventBus>,
    sessions: Arc<SessionCache>,
    passing_threshold: f64,
}

impl ProgressService {
    /// Create a new progress service
    pub fn new(
        db: Arc<ProgressDb>,
        events: Arc<EventBus>,
        sessions: Arc<SessionCache>,
        passing_threshold: f64,
    ) -> Self {
        Self {
            db,
            events,
            sessions,
            passing_threshold,
        }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Get a learner's progress on a topic, straight from the database
    pub fn get_progress(&self, user_id: &str, topic_id: &str) -> Result<ProgressUpdate, ProgressError> {
        let snapshot = self.db.with_conn(|conn| {
            enrollments::get_snapshot(conn, user_id, topic_id)?
                .ok_or_else(|| not_enrolled(user_id, topic_id))
        })?;

        Ok(ProgressUpdate {
            step: current_step(&snapshot),
            snapshot,
        })
    }

    /// Get a session's view of a topic, served from the session cache when
    /// the cached snapshot matches the requested topic
    ///
    /// A cached snapshot belonging to a different user than the session now
    /// claims is dropped, never served.
    pub fn current_topic(
        &self,
        session_id: &str,
        user_id: &str,
        topic_id: &str,
    ) -> Result<ProgressUpdate, ProgressError> {
        if let Some(snapshot) = self.sessions.get(session_id, topic_id) {
            if snapshot.enrollment.user_id == user_id {
                return Ok(ProgressUpdate {
                    step: current_step(&snapshot),
                    snapshot,
                });
            }
            self.sessions.invalidate_topic(session_id, topic_id);
        }

        let snapshot = self.db.with_conn(|conn| {
            enrollments::get_snapshot(conn, user_id, topic_id)?
                .ok_or_else(|| not_enrolled(user_id, topic_id))
        })?;

        self.sessions.put(session_id, snapshot.clone());

        Ok(ProgressUpdate {
            step: current_step(&snapshot),
            snapshot,
        })
    }

    /// List a learner's active enrollments
    pub fn list_enrollments(&self, user_id: &str) -> Result<Vec<EnrollmentRow>, ProgressError> {
        self.db.with_conn(|conn| enrollments::list_enrollments_for_user(conn, user_id))
    }

    // =========================================================================
    // Completion Recording
    // =========================================================================

    /// Mark the introduction finished
    pub fn complete_introduction(
        &self,
        session_id: &str,
        acting_user: &str,
        user_id: &str,
        topic_id: &str,
    ) -> Result<ProgressUpdate, ProgressError> {
        check_ownership(acting_user, user_id)?;

        let (snapshot, prev_step) = self.db.with_conn(|conn| {
            let before = enrollments::get_snapshot(conn, user_id, topic_id)?
                .ok_or_else(|| not_enrolled(user_id, topic_id))?;
            let prev_step = current_step(&before);

            enrollments::set_intro_complete(conn, &before.enrollment.id)?;

            let after = reload_snapshot(conn, user_id, topic_id)?;
            Ok((after, prev_step))
        })?;

        let update = self.finish_write(session_id, snapshot);

        self.events.emit(ProgressEvent::IntroCompleted {
            user_id: user_id.to_string(),
            topic_id: topic_id.to_string(),
        });
        self.emit_if_completed(prev_step, &update);

        Ok(update)
    }

    /// Record a pre-assessment submission and advance past step 2
    ///
    /// The submission row and the enrollment pointer commit together.
    pub fn record_pre_assessment(
        &self,
        session_id: &str,
        acting_user: &str,
        user_id: &str,
        topic_id: &str,
        submission: AssessmentSubmission,
    ) -> Result<ProgressUpdate, ProgressError> {
        check_ownership(acting_user, user_id)?;
        validate_submission(&submission)?;

        let (snapshot, prev_step, assessment_id) = self.db.with_conn_mut(|conn| {
            let before = enrollments::get_snapshot(conn, user_id, topic_id)?
                .ok_or_else(|| not_enrolled(user_id, topic_id))?;
            let prev_step = current_step(&before);

            let expected = before.topic.pre_assessment_id.as_deref().ok_or_else(|| {
                ProgressError::InvalidInput(format!("Topic {} has no pre-assessment", topic_id))
            })?;
            if submission.assessment_id != expected {
                return Err(ProgressError::InvalidInput(format!(
                    "Assessment {} is not the pre-assessment of topic {}",
                    submission.assessment_id, topic_id
                )));
            }

            let tx = conn.transaction()
                .map_err(|e| ProgressError::Persistence(format!("Transaction failed: {}", e)))?;

            let assessment = enrollments::insert_completed_assessment(
                &tx,
                user_id,
                &submission.assessment_id,
                AssessmentPhase::Pre,
                submission.score,
                submission.max_score,
            )?;
            enrollments::set_pre_assessment(&tx, &before.enrollment.id, &assessment.id)?;

            tx.commit()
                .map_err(|e| ProgressError::Persistence(format!("Commit failed: {}", e)))?;

            let after = reload_snapshot(conn, user_id, topic_id)?;
            Ok((after, prev_step, assessment.assessment_id))
        })?;

        let update = self.finish_write(session_id, snapshot);

        self.events.emit(ProgressEvent::PreAssessmentRecorded {
            user_id: user_id.to_string(),
            topic_id: topic_id.to_string(),
            assessment_id,
            score: submission.score,
            max_score: submission.max_score,
        });
        self.emit_if_completed(prev_step, &update);

        Ok(update)
    }

    /// Record a resource as completed, idempotently
    ///
    /// Rejects resources outside the topic's required set. Recording the
    /// same resource twice leaves the completed set unchanged.
    pub fn complete_resource(
        &self,
        session_id: &str,
        acting_user: &str,
        user_id: &str,
        topic_id: &str,
        resource_id: &str,
    ) -> Result<ProgressUpdate, ProgressError> {
        check_ownership(acting_user, user_id)?;

        let (snapshot, prev_step, newly_recorded) = self.db.with_conn(|conn| {
            let before = enrollments::get_snapshot(conn, user_id, topic_id)?
                .ok_or_else(|| not_enrolled(user_id, topic_id))?;
            let prev_step = current_step(&before);

            let required = before
                .required_resources
                .iter()
                .any(|r| r.resource_id == resource_id);
            if !required {
                return Err(ProgressError::InvalidResource {
                    topic_id: topic_id.to_string(),
                    resource_id: resource_id.to_string(),
                });
            }

            let newly = enrollments::insert_completed_resource(conn, &before.enrollment.id, resource_id)?;

            let after = reload_snapshot(conn, user_id, topic_id)?;
            Ok((after, prev_step, newly))
        })?;

        let update = self.finish_write(session_id, snapshot);

        self.events.emit(ProgressEvent::ResourceCompleted {
            user_id: user_id.to_string(),
            topic_id: topic_id.to_string(),
            resource_id: resource_id.to_string(),
            newly_recorded,
        });
        self.emit_if_completed(prev_step, &update);

        Ok(update)
    }

    /// Record the topic's activity as finished
    pub fn complete_activity(
        &self,
        session_id: &str,
        acting_user: &str,
        user_id: &str,
        topic_id: &str,
        activity_id: &str,
    ) -> Result<ProgressUpdate, ProgressError> {
        check_ownership(acting_user, user_id)?;

        let (snapshot, prev_step) = self.db.with_conn(|conn| {
            let before = enrollments::get_snapshot(conn, user_id, topic_id)?
                .ok_or_else(|| not_enrolled(user_id, topic_id))?;
            let prev_step = current_step(&before);

            let expected = before.topic.activity_id.as_deref().ok_or_else(|| {
                ProgressError::InvalidInput(format!("Topic {} has no activity", topic_id))
            })?;
            if activity_id != expected {
                return Err(ProgressError::InvalidInput(format!(
                    "Activity {} is not the activity of topic {}",
                    activity_id, topic_id
                )));
            }

            enrollments::set_activity_complete(conn, &before.enrollment.id, activity_id)?;

            let after = reload_snapshot(conn, user_id, topic_id)?;
            Ok((after, prev_step))
        })?;

        let update = self.finish_write(session_id, snapshot);

        self.events.emit(ProgressEvent::ActivityCompleted {
            user_id: user_id.to_string(),
            topic_id: topic_id.to_string(),
            activity_id: activity_id.to_string(),
        });
        self.emit_if_completed(prev_step, &update);

        Ok(update)
    }

    /// Record a post-assessment submission
    ///
    /// Reports whether the score met the passing threshold. A failing score
    /// still records; clearing resource completions for re-review is the
    /// explicit `invalidate_resource_completions` operation.
    pub fn record_post_assessment(
        &self,
        session_id: &str,
        acting_user: &str,
        user_id: &str,
        topic_id: &str,
        submission: AssessmentSubmission,
    ) -> Result<AssessmentOutcome, ProgressError> {
        check_ownership(acting_user, user_id)?;
        validate_submission(&submission)?;

        let (snapshot, prev_step, assessment_id) = self.db.with_conn_mut(|conn| {
            let before = enrollments::get_snapshot(conn, user_id, topic_id)?
                .ok_or_else(|| not_enrolled(user_id, topic_id))?;
            let prev_step = current_step(&before);

            let expected = before.topic.post_assessment_id.as_deref().ok_or_else(|| {
                ProgressError::InvalidInput(format!("Topic {} has no post-assessment", topic_id))
            })?;
            if submission.assessment_id != expected {
                return Err(ProgressError::InvalidInput(format!(
                    "Assessment {} is not the post-assessment of topic {}",
                    submission.assessment_id, topic_id
                )));
            }

            let tx = conn.transaction()
                .map_err(|e| ProgressError::Persistence(format!("Transaction failed: {}", e)))?;

            let assessment = enrollments::insert_completed_assessment(
                &tx,
                user_id,
                &submission.assessment_id,
                AssessmentPhase::Post,
                submission.score,
                submission.max_score,
            )?;
            enrollments::set_post_assessment(&tx, &before.enrollment.id, &assessment.id)?;

            tx.commit()
                .map_err(|e| ProgressError::Persistence(format!("Commit failed: {}", e)))?;

            let after = reload_snapshot(conn, user_id, topic_id)?;
            Ok((after, prev_step, assessment.assessment_id))
        })?;

        let passed = submission.score as f64 / submission.max_score as f64 >= self.passing_threshold;
        let step = current_step(&snapshot);

        self.sessions.put(session_id, snapshot.clone());

        self.events.emit(ProgressEvent::PostAssessmentRecorded {
            user_id: user_id.to_string(),
            topic_id: topic_id.to_string(),
            assessment_id,
            score: submission.score,
            max_score: submission.max_score,
            passed,
        });
        if step == Step::Complete && prev_step != Step::Complete {
            self.events.emit(ProgressEvent::TopicCompleted {
                user_id: user_id.to_string(),
                topic_id: topic_id.to_string(),
            });
        }

        Ok(AssessmentOutcome {
            snapshot,
            step,
            passed,
        })
    }

    /// Deactivate a learner's completed resources on a topic for re-review
    ///
    /// Administrative operation: the rows are flagged inactive (history
    /// kept) and the evaluator lands back on the resources step. Every
    /// session's cached snapshot of the topic is dropped.
    pub fn invalidate_resource_completions(
        &self,
        user_id: &str,
        topic_id: &str,
    ) -> Result<ProgressUpdate, ProgressError> {
        let (snapshot, count) = self.db.with_conn(|conn| {
            let before = enrollments::get_snapshot(conn, user_id, topic_id)?
                .ok_or_else(|| not_enrolled(user_id, topic_id))?;

            let count = enrollments::deactivate_completed_resources(conn, &before.enrollment.id)?;

            let after = reload_snapshot(conn, user_id, topic_id)?;
            Ok((after, count))
        })?;

        self.sessions.invalidate_topic_all_sessions(topic_id);

        self.events.emit(ProgressEvent::ResourceCompletionsInvalidated {
            user_id: user_id.to_string(),
            topic_id: topic_id.to_string(),
            count,
        });

        Ok(ProgressUpdate {
            step: current_step(&snapshot),
            snapshot,
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Refresh the acting session's cache entry and wrap the snapshot
    fn finish_write(&self, session_id: &str, snapshot: EnrollmentSnapshot) -> ProgressUpdate {
        self.sessions.put(session_id, snapshot.clone());
        ProgressUpdate {
            step: current_step(&snapshot),
            snapshot,
        }
    }

    fn emit_if_completed(&self, prev_step: Step, update: &ProgressUpdate) {
        if update.step == Step::Complete && prev_step != Step::Complete {
            self.events.emit(ProgressEvent::TopicCompleted {
                user_id: update.snapshot.enrollment.user_id.clone(),
                topic_id: update.snapshot.enrollment.topic_id.clone(),
            });
        }
    }
}

fn check_ownership(acting_user: &str, user_id: &str) -> Result<(), ProgressError> {
    if acting_user != user_id {
        return Err(ProgressError::Forbidden(format!(
            "User {} cannot modify progress owned by {}",
            acting_user, user_id
        )));
    }
    Ok(())
}

fn not_enrolled(user_id: &str, topic_id: &str) -> ProgressError {
    ProgressError::NotFound(format!(
        "No active enrollment for user {} on topic {}",
        user_id, topic_id
    ))
}

fn reload_snapshot(
    conn: &rusqlite::Connection,
    user_id: &str,
    topic_id: &str,
) -> Result<EnrollmentSnapshot, ProgressError> {
    enrollments::get_snapshot(conn, user_id, topic_id)?
        .ok_or_else(|| ProgressError::Persistence("Enrollment missing after update".into()))
}

fn validate_submission(submission: &AssessmentSubmission) -> Result<(), ProgressError> {
    if submission.assessment_id.is_empty() {
        return Err(ProgressError::InvalidInput("assessment_id is required".into()));
    }
    if submission.max_score < 1 {
        return Err(ProgressError::InvalidInput(format!(
            "max_score must be at least 1, got {}",
            submission.max_score
        )));
    }
    if submission.score < 0 || submission.score > submission.max_score {
        return Err(ProgressError::InvalidInput(format!(
            "score {} out of range 0..={}",
            submission.score, submission.max_score
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CompletedResourceRow, EnrollmentRow, TopicResourceRow, TopicRow};

    /// Build a snapshot with the given topic shape and completion state
    fn make_snapshot(
        intro_done: bool,
        has_pre: bool,
        pre_done: bool,
        required: usize,
        completed: usize,
        has_activity: bool,
        activity_done: bool,
        has_post: bool,
        post_done: bool,
    ) -> EnrollmentSnapshot {
        let required_resources: Vec<TopicResourceRow> = (0..required)
            .map(|i| TopicResourceRow {
                topic_id: "topic-1".into(),
                topic_version: 1,
                resource_id: format!("res-{}", i),
                position: i as i32,
            })
            .collect();

        let completed_resources: Vec<CompletedResourceRow> = (0..completed)
            .map(|i| CompletedResourceRow {
                id: format!("cr-{}", i),
                enrollment_id: "enr-1".into(),
                resource_id: format!("res-{}", i),
                active: 1,
                created_at: "2024-01-01 00:00:00".into(),
                updated_at: "2024-01-01 00:00:00".into(),
            })
            .collect();

        EnrollmentSnapshot {
            enrollment: EnrollmentRow {
                id: "enr-1".into(),
                user_id: "user-1".into(),
                topic_id: "topic-1".into(),
                topic_version: 1,
                grant_basis: "membership".into(),
                is_intro_complete: intro_done as i32,
                pre_completed_assessment_id: pre_done.then(|| "ca-pre".into()),
                completed_activity_id: activity_done.then(|| "act-1".into()),
                post_completed_assessment_id: post_done.then(|| "ca-post".into()),
                active: 1,
                created_at: "2024-01-01 00:00:00".into(),
                updated_at: "2024-01-01 00:00:00".into(),
            },
            topic: TopicRow {
                id: "topic-1".into(),
                version: 1,
                title: "Test Topic".into(),
                description: None,
                intro_content_id: Some("intro-1".into()),
                pre_assessment_id: has_pre.then(|| "assess-pre".into()),
                activity_id: has_activity.then(|| "act-1".into()),
                post_assessment_id: has_post.then(|| "assess-post".into()),
                active: 1,
                created_at: "2024-01-01 00:00:00".into(),
                updated_at: "2024-01-01 00:00:00".into(),
                resource_count: required as u32,
            },
            required_resources,
            completed_resources,
            pre_assessment: None,
            post_assessment: None,
        }
    }

    #[test]
    fn test_fresh_enrollment_starts_at_introduction() {
        let s = make_snapshot(false, true, false, 3, 0, true, false, true, false);
        assert_eq!(current_step(&s), Step::Introduction);
    }

    #[test]
    fn test_intro_done_moves_to_pre_assessment() {
        let s = make_snapshot(true, true, false, 3, 0, true, false, true, false);
        assert_eq!(current_step(&s), Step::PreAssessment);
    }

    #[test]
    fn test_missing_pre_attachment_skips_gate() {
        let s = make_snapshot(true, false, false, 3, 0, true, false, true, false);
        assert_eq!(current_step(&s), Step::Resources);
    }

    #[test]
    fn test_partial_resources_stay_on_resources() {
        let s = make_snapshot(true, true, true, 3, 2, true, false, true, false);
        assert_eq!(current_step(&s), Step::Resources);
    }

    #[test]
    fn test_zero_resource_topic_skips_resources() {
        let s = make_snapshot(true, true, true, 0, 0, true, false, true, false);
        assert_eq!(current_step(&s), Step::Activity);
    }

    #[test]
    fn test_resources_done_moves_to_activity() {
        let s = make_snapshot(true, true, true, 3, 3, true, false, true, false);
        assert_eq!(current_step(&s), Step::Activity);
    }

    #[test]
    fn test_missing_activity_attachment_skips_gate() {
        let s = make_snapshot(true, true, true, 3, 3, false, false, true, false);
        assert_eq!(current_step(&s), Step::PostAssessment);
    }

    #[test]
    fn test_activity_done_moves_to_post_assessment() {
        let s = make_snapshot(true, true, true, 3, 3, true, true, true, false);
        assert_eq!(current_step(&s), Step::PostAssessment);
    }

    #[test]
    fn test_all_gates_met_is_complete() {
        let s = make_snapshot(true, true, true, 3, 3, true, true, true, true);
        assert_eq!(current_step(&s), Step::Complete);
    }

    #[test]
    fn test_bare_topic_completes_after_intro() {
        // No attachments and no resources: intro is the only gate
        let s = make_snapshot(true, false, false, 0, 0, false, false, false, false);
        assert_eq!(current_step(&s), Step::Complete);
    }

    #[test]
    fn test_first_unmet_gate_wins() {
        // Everything later is done, but the intro is not
        let s = make_snapshot(false, true, true, 3, 3, true, true, true, true);
        assert_eq!(current_step(&s), Step::Introduction);
    }

    #[test]
    fn test_step_numbers() {
        assert_eq!(Step::Introduction.number(), 1);
        assert_eq!(Step::PreAssessment.number(), 2);
        assert_eq!(Step::Resources.number(), 3);
        assert_eq!(Step::Activity.number(), 4);
        assert_eq!(Step::PostAssessment.number(), 5);
        assert_eq!(Step::Complete.number(), 6);
    }
}
